//! Identifier types for portico.
//!
//! Every entity that crosses the host/engine boundary is addressed by
//! an opaque UUID-based handle: engine instances, execution contexts,
//! engine-resident objects, and in-flight host calls. Raw pointers or
//! indices are never used as identity.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for an engine instance.
///
/// An engine instance is one execution engine plus its dedicated worker
/// thread and transport channels. Instances are registered in a
/// `VmRegistry` under their `EngineId`; the id is the only identity the
/// host ever sees.
///
/// # Example
///
/// ```
/// use portico_types::EngineId;
///
/// let a = EngineId::new();
/// let b = EngineId::new();
/// assert_ne!(a, b);
/// assert!(format!("{a}").starts_with("vm:"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineId(pub Uuid);

#[allow(clippy::new_without_default)] // Default intentionally not implemented - see below
impl EngineId {
    /// Creates a new [`EngineId`] with a random UUID v4.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// Returns the first eight hex digits of the UUID.
    ///
    /// Used for worker thread names, where the full UUID would exceed
    /// the platform's thread-name limit.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

// NOTE: EngineId intentionally does NOT implement Default.
// Default::default() would mint an id that no registry knows about.
// Instances are created through VmRegistry/VmBuilder, which mint the id.

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vm:{}", self.0)
    }
}

/// Identifier for an execution context within an engine instance.
///
/// An instance always has a default context created with the engine;
/// additional contexts can be created on demand and share the same
/// instance (and therefore the same worker thread).
///
/// # Example
///
/// ```
/// use portico_types::ContextId;
///
/// let ctx = ContextId::new();
/// assert!(format!("{ctx}").starts_with("ctx:"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub Uuid);

#[allow(clippy::new_without_default)] // Default intentionally not implemented - see below
impl ContextId {
    /// Creates a new [`ContextId`] with a random UUID v4.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

// NOTE: ContextId intentionally does NOT implement Default.
// Context ids are minted by the engine when a context is created;
// a default-constructed id would reference no context.

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx:{}", self.0)
    }
}

/// Identifier for an engine-resident object.
///
/// Objects, functions, and externalized host terms live inside the
/// engine; the host only ever holds their `ObjectId` (wrapped in a
/// `TermValue::Obj`, `TermValue::Fun`, or `TermValue::Extern`). Live
/// engine state never crosses a thread boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub Uuid);

#[allow(clippy::new_without_default)] // Default intentionally not implemented - objects are allocated by the engine
impl ObjectId {
    /// Creates a new [`ObjectId`] with a random UUID v4.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "obj:{}", self.0)
    }
}

/// Correlation token pairing a request with its eventual reply.
///
/// A token is minted by whoever initiates a correlated exchange: the
/// host when it sends a command tick and wants the result routed back,
/// or the worker when engine-resident code performs a reentrant call
/// into the host. Tokens are random UUIDs, so they are globally unique
/// per outstanding call without coordination; at most one tick-loop
/// frame ever awaits a given token.
///
/// # Example
///
/// ```
/// use portico_types::CallToken;
///
/// let t = CallToken::new();
/// assert!(format!("{t}").starts_with("call:"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallToken(pub Uuid);

#[allow(clippy::new_without_default)] // Default intentionally not implemented - see below
impl CallToken {
    /// Creates a new [`CallToken`] with a random UUID v4.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

// NOTE: CallToken intentionally does NOT implement Default.
// A token is only meaningful to the party that minted it for a specific
// exchange; silently defaulting one would break correlation.

impl std::fmt::Display for CallToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "call:{}", self.0)
    }
}
