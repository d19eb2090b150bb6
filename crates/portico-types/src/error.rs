//! Shared error vocabulary.
//!
//! Every error enum in the workspace implements [`ErrorCode`], giving
//! callers a stable machine-readable code and a recoverability hint
//! regardless of which layer produced the error. Codes are part of the
//! protocol: they travel to the host inside error-result values, so
//! they must not change once shipped.

/// Stable machine-readable identity for an error.
///
/// # Code format
///
/// - UPPER_SNAKE_CASE, prefixed by the owning domain
///   (`VM_`, `FAULT_`, `ENGINE_`)
/// - stable across versions once published
///
/// # Recoverability
///
/// `is_recoverable` answers "can the caller do something about this?":
/// `true` for per-operation errors where a corrected retry can succeed
/// (bad arguments, unknown object), `false` for conditions that require
/// discarding state (faults, a dead instance).
///
/// # Example
///
/// ```
/// use portico_types::ErrorCode;
///
/// #[derive(Debug)]
/// enum LookupError {
///     Missing,
///     Corrupt,
/// }
///
/// impl ErrorCode for LookupError {
///     fn code(&self) -> &'static str {
///         match self {
///             Self::Missing => "LOOKUP_MISSING",
///             Self::Corrupt => "LOOKUP_CORRUPT",
///         }
///     }
///
///     fn is_recoverable(&self) -> bool {
///         matches!(self, Self::Missing)
///     }
/// }
///
/// assert_eq!(LookupError::Missing.code(), "LOOKUP_MISSING");
/// assert!(!LookupError::Corrupt.is_recoverable());
/// ```
pub trait ErrorCode {
    /// Returns the machine-readable error code.
    fn code(&self) -> &'static str;

    /// Returns whether a corrected retry can succeed.
    fn is_recoverable(&self) -> bool;
}

/// Asserts that an error's code follows the workspace conventions:
/// non-empty, UPPER_SNAKE_CASE, and carrying the expected prefix.
///
/// # Panics
///
/// Panics with a descriptive message when a check fails. Intended for
/// tests that pin down every variant of an error enum.
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();
    assert!(!code.is_empty(), "error code must not be empty");
    assert!(
        code.starts_with(expected_prefix),
        "error code '{code}' must start with prefix '{expected_prefix}'"
    );
    assert!(
        is_upper_snake_case(code),
        "error code '{code}' must be UPPER_SNAKE_CASE"
    );
}

/// [`assert_error_code`] over every variant of an enum at once.
///
/// # Example
///
/// ```
/// use portico_types::{assert_error_codes, ErrorCode};
///
/// #[derive(Debug)]
/// enum E { A, B }
///
/// impl ErrorCode for E {
///     fn code(&self) -> &'static str {
///         match self {
///             Self::A => "E_A",
///             Self::B => "E_B",
///         }
///     }
///     fn is_recoverable(&self) -> bool { false }
/// }
///
/// assert_error_codes(&[E::A, E::B], "E_");
/// ```
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

fn is_upper_snake_case(s: &str) -> bool {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum SampleError {
        Soft,
        Hard,
    }

    impl ErrorCode for SampleError {
        fn code(&self) -> &'static str {
            match self {
                Self::Soft => "SAMPLE_SOFT",
                Self::Hard => "SAMPLE_HARD",
            }
        }

        fn is_recoverable(&self) -> bool {
            matches!(self, Self::Soft)
        }
    }

    #[test]
    fn codes_and_recoverability() {
        assert_eq!(SampleError::Soft.code(), "SAMPLE_SOFT");
        assert!(SampleError::Soft.is_recoverable());
        assert!(!SampleError::Hard.is_recoverable());
    }

    #[test]
    fn all_variants_pass_prefix_check() {
        assert_error_codes(&[SampleError::Soft, SampleError::Hard], "SAMPLE_");
    }

    #[test]
    #[should_panic(expected = "must start with prefix")]
    fn wrong_prefix_panics() {
        assert_error_code(&SampleError::Soft, "OTHER_");
    }

    #[test]
    fn snake_case_rules() {
        assert!(is_upper_snake_case("VM_NOT_RUNNING"));
        assert!(is_upper_snake_case("FAULT_2"));
        assert!(!is_upper_snake_case(""));
        assert!(!is_upper_snake_case("vm_lower"));
        assert!(!is_upper_snake_case("_VM"));
        assert!(!is_upper_snake_case("VM_"));
        assert!(!is_upper_snake_case("VM__X"));
    }
}
