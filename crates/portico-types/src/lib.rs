//! Core types for portico.
//!
//! Portico bridges a host process and embedded, single-threaded
//! script-execution engines: producer threads send command ticks to a
//! per-engine worker, and engine-resident code can call synchronously
//! back into the host without a second thread. This crate is the leaf
//! of the workspace — the identifiers, values, and error vocabulary
//! everything above it shares.
//!
//! # Workspace layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  portico-types : ids, TermValue, ErrorCode      ◄── HERE │
//! ├──────────────────────────────────────────────────────────┤
//! │  portico-vm    : transport, tick loop, dispatch,         │
//! │                  reentrant call protocol, registry       │
//! ├──────────────────────────────────────────────────────────┤
//! │  portico-heap  : reference in-memory object-heap engine  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Identity
//!
//! Everything crossing the host/engine boundary is addressed by a
//! UUID-based handle ([`EngineId`], [`ContextId`], [`ObjectId`],
//! [`CallToken`]); live engine state never leaves the worker thread.
//!
//! # Example
//!
//! ```
//! use portico_types::{CallToken, EngineId, TermValue};
//!
//! let vm = EngineId::new();
//! let token = CallToken::new();
//! let payload = TermValue::command("get", vec![TermValue::Str("x".into())]);
//!
//! assert!(format!("{vm}").starts_with("vm:"));
//! assert!(format!("{token}").starts_with("call:"));
//! assert!(payload.as_command().is_some());
//! ```

mod error;
mod id;
mod value;

pub use error::{assert_error_code, assert_error_codes, ErrorCode};
pub use id::{CallToken, ContextId, EngineId, ObjectId};
pub use value::{ExternKind, PropKey, TermValue};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_id_uniqueness() {
        assert_ne!(EngineId::new(), EngineId::new());
    }

    #[test]
    fn engine_id_display() {
        let id = EngineId::new();
        let display = format!("{id}");
        assert!(display.starts_with("vm:"));
        assert!(display.contains(&id.uuid().to_string()));
    }

    #[test]
    fn engine_id_short_is_eight_hex_digits() {
        let id = EngineId::new();
        let short = id.short();
        assert_eq!(short.len(), 8);
        assert!(short.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn context_id_display() {
        let id = ContextId::new();
        assert!(format!("{id}").starts_with("ctx:"));
    }

    #[test]
    fn object_id_display() {
        let id = ObjectId::new();
        assert!(format!("{id}").starts_with("obj:"));
    }

    #[test]
    fn call_token_uniqueness() {
        assert_ne!(CallToken::new(), CallToken::new());
    }

    #[test]
    fn call_token_display() {
        let token = CallToken::new();
        let display = format!("{token}");
        assert!(display.starts_with("call:"));
        assert!(display.contains(&token.uuid().to_string()));
    }

    // NOTE: none of the id types implement Default intentionally.
    // See id.rs for the rationale on each.

    #[test]
    fn ids_serialize_as_plain_uuids() {
        let id = ContextId::new();
        let json = serde_json::to_string(&id).expect("serialize");
        let back: ContextId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, back);
    }
}
