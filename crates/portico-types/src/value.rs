//! The value representation exchanged across the host/engine boundary.
//!
//! [`TermValue`] is deliberately small: scalars, binaries, lists, and
//! opaque references to engine-resident entities. It is the payload
//! type of every tick and every host message. How a concrete engine
//! maps these onto its own value universe is the engine's business;
//! this crate only fixes the shapes that cross threads.

use serde::{Deserialize, Serialize};

use crate::id::{ContextId, ObjectId};

/// A host-visible value.
///
/// | Variant | Carries | Notes |
/// |---------|---------|-------|
/// | `Undefined` | nothing | absence / no result |
/// | `Bool`, `Int`, `Float`, `Str`, `Bin` | plain data | copied across threads |
/// | `List` | `Vec<TermValue>` | also the command-payload shape |
/// | `Ctx` | [`ContextId`] | reference to an execution context |
/// | `Obj` | [`ObjectId`] | reference to an engine-resident object |
/// | `Fun` | [`ObjectId`] | reference to a callable engine object |
/// | `Extern` | [`ObjectId`] | an externalized host term held by the engine |
///
/// Reference variants never carry live engine state, only ids; the
/// worker thread is the only place those ids are dereferenced.
///
/// # Example
///
/// ```
/// use portico_types::TermValue;
///
/// let cmd = TermValue::command("get", vec![TermValue::Str("x".into())]);
/// let (name, args) = cmd.as_command().unwrap();
/// assert_eq!(name, "get");
/// assert_eq!(args.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TermValue {
    Undefined,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bin(Vec<u8>),
    List(Vec<TermValue>),
    Ctx(ContextId),
    Obj(ObjectId),
    Fun(ObjectId),
    Extern(ObjectId),
}

impl TermValue {
    /// Builds a command payload: a list headed by the command name.
    ///
    /// This is the only payload shape the dispatcher accepts; anything
    /// else fails the tick sanity check and is skipped.
    #[must_use]
    pub fn command(name: impl Into<String>, args: Vec<TermValue>) -> Self {
        let mut items = Vec::with_capacity(args.len() + 1);
        items.push(TermValue::Str(name.into()));
        items.extend(args);
        TermValue::List(items)
    }

    /// Builds the conventional error-result value: `["error", code, message]`.
    ///
    /// Protocol and per-operation engine errors travel back to the host
    /// as ordinary result values of this shape, never as faults.
    #[must_use]
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        TermValue::List(vec![
            TermValue::Str("error".into()),
            TermValue::Str(code.into()),
            TermValue::Str(message.into()),
        ])
    }

    /// Parses a command payload into `(name, args)`.
    ///
    /// Returns `None` unless the value is a non-empty list headed by a
    /// string.
    #[must_use]
    pub fn as_command(&self) -> Option<(&str, &[TermValue])> {
        match self {
            TermValue::List(items) => match items.split_first() {
                Some((TermValue::Str(name), args)) => Some((name, args)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Returns the error code if this is an `["error", code, message]` value.
    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        match self {
            TermValue::List(items) => match items.as_slice() {
                [TermValue::Str(tag), TermValue::Str(code), ..] if tag == "error" => {
                    Some(code)
                }
                _ => None,
            },
            _ => None,
        }
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, TermValue::Undefined)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TermValue::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            TermValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TermValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[TermValue]> {
        match self {
            TermValue::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_ctx(&self) -> Option<ContextId> {
        match self {
            TermValue::Ctx(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the object id behind any reference variant
    /// (`Obj`, `Fun`, or `Extern`).
    #[must_use]
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            TermValue::Obj(id) | TermValue::Fun(id) | TermValue::Extern(id) => Some(*id),
            _ => None,
        }
    }
}

impl std::fmt::Display for TermValue {
    /// Compact single-line literal form, for logs and engine renderings.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TermValue::Undefined => write!(f, "undefined"),
            TermValue::Bool(b) => write!(f, "{b}"),
            TermValue::Int(i) => write!(f, "{i}"),
            TermValue::Float(x) => write!(f, "{x}"),
            TermValue::Str(s) => write!(f, "{s:?}"),
            TermValue::Bin(b) => write!(f, "<<{} bytes>>", b.len()),
            TermValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            TermValue::Ctx(id) => write!(f, "{id}"),
            TermValue::Obj(id) => write!(f, "{id}"),
            TermValue::Fun(id) => write!(f, "fn:{}", id.uuid()),
            TermValue::Extern(id) => write!(f, "ext:{}", id.uuid()),
        }
    }
}

/// A property key on an engine-resident object.
///
/// Engines index properties by string or integer keys; other value
/// kinds are rejected as malformed arguments at the dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropKey {
    Str(String),
    Int(i64),
}

impl PropKey {
    /// Extracts a property key from a term, if the term is key-shaped.
    #[must_use]
    pub fn from_term(value: &TermValue) -> Option<PropKey> {
        match value {
            TermValue::Str(s) => Some(PropKey::Str(s.clone())),
            TermValue::Int(i) => Some(PropKey::Int(*i)),
            _ => None,
        }
    }

    /// Returns the key as a term, for replies carrying keys back.
    #[must_use]
    pub fn to_term(&self) -> TermValue {
        match self {
            PropKey::Str(s) => TermValue::Str(s.clone()),
            PropKey::Int(i) => TermValue::Int(*i),
        }
    }
}

impl From<&str> for PropKey {
    fn from(s: &str) -> Self {
        PropKey::Str(s.to_string())
    }
}

impl From<i64> for PropKey {
    fn from(i: i64) -> Self {
        PropKey::Int(i)
    }
}

impl std::fmt::Display for PropKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropKey::Str(s) => write!(f, "{s}"),
            PropKey::Int(i) => write!(f, "{i}"),
        }
    }
}

/// Host-term kind taxonomy for externalized values.
///
/// When a host term is wrapped into an engine-resident extern, the
/// engine attaches a per-kind prototype object so engine code can
/// recognize what kind of host value it is holding. The `Fun` kind is
/// special: externalizing it produces a callable object whose
/// invocation performs a reentrant call back into the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExternKind {
    Num,
    Sym,
    Bin,
    Ref,
    Fun,
    Proc,
    Tuple,
    List,
}

impl ExternKind {
    /// All kinds, in a fixed order (used to pre-build prototype sets).
    pub const ALL: [ExternKind; 8] = [
        ExternKind::Num,
        ExternKind::Sym,
        ExternKind::Bin,
        ExternKind::Ref,
        ExternKind::Fun,
        ExternKind::Proc,
        ExternKind::Tuple,
        ExternKind::List,
    ];

    /// The protocol name of this kind, as carried in command arguments.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ExternKind::Num => "num",
            ExternKind::Sym => "sym",
            ExternKind::Bin => "bin",
            ExternKind::Ref => "ref",
            ExternKind::Fun => "fun",
            ExternKind::Proc => "proc",
            ExternKind::Tuple => "tuple",
            ExternKind::List => "list",
        }
    }

    /// Parses a protocol kind name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<ExternKind> {
        ExternKind::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl std::fmt::Display for ExternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
