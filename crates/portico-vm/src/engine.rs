//! The engine seam.
//!
//! [`ScriptEngine`] is the contract between the tick loop and whatever
//! execution engine an instance embeds. The worker drives it from its
//! dedicated thread; a handful of read-only entry points (`new_context`,
//! `global`) are also called from host threads, so implementations use
//! interior mutability and keep their own locking short-lived.
//!
//! Operations that can execute engine-resident code — property access
//! through accessors, calls, construction, script evaluation — take a
//! [`HostInvoker`]: the bridge an engine uses when that code needs a
//! synchronous answer from the host. The worker's implementation turns
//! each such call into a fresh correlation token, a callback request to
//! the host endpoint, and a nested tick-loop frame that blocks until
//! the matching reply arrives.

use portico_types::{CallToken, ContextId, ErrorCode, ExternKind, ObjectId, PropKey, TermValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::VmFault;

/// Per-operation engine error, reported to the command's caller as an
/// error-result value. The one exception is [`EngineError::Fault`],
/// which aborts the instance instead (see [`EngineError::into_fault`]).
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("unknown object: {0}")]
    UnknownObject(ObjectId),

    #[error("unknown context: {0}")]
    UnknownContext(ContextId),

    #[error("unknown script: {0}")]
    UnknownScript(String),

    #[error("not callable: {0}")]
    NotCallable(TermValue),

    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("script failed: {0}")]
    ScriptFailed(String),

    #[error("internal slot {index} out of range for {object}")]
    InternalOutOfRange { object: ObjectId, index: usize },

    /// A fatal condition surfaced through an engine operation, e.g. a
    /// hard abort observed mid-evaluation, or a fault raised by a
    /// nested host call. Never reported as an error value; the worker
    /// unwraps it and terminates.
    #[error(transparent)]
    Fault(#[from] VmFault),
}

impl EngineError {
    /// Splits the fatal case off: `Ok(fault)` if this error must abort
    /// the instance, `Err(self)` if it is an ordinary per-operation
    /// error to report to the caller.
    pub fn into_fault(self) -> Result<VmFault, EngineError> {
        match self {
            EngineError::Fault(fault) => Ok(fault),
            other => Err(other),
        }
    }

    /// Shorthand for the hard-abort fault.
    #[must_use]
    pub fn terminated() -> Self {
        EngineError::Fault(VmFault::Engine(EngineFault::Terminated))
    }
}

impl ErrorCode for EngineError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownObject(_) => "ENGINE_UNKNOWN_OBJECT",
            Self::UnknownContext(_) => "ENGINE_UNKNOWN_CONTEXT",
            Self::UnknownScript(_) => "ENGINE_UNKNOWN_SCRIPT",
            Self::NotCallable(_) => "ENGINE_NOT_CALLABLE",
            Self::BadArgument(_) => "ENGINE_BAD_ARGUMENT",
            Self::ScriptFailed(_) => "ENGINE_SCRIPT_FAILED",
            Self::InternalOutOfRange { .. } => "ENGINE_INTERNAL_RANGE",
            Self::Fault(_) => "ENGINE_FAULT",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Fault(_))
    }
}

/// Unrecoverable failure inside the engine itself.
#[derive(Debug, Clone, Error)]
pub enum EngineFault {
    /// Execution was cut short by a hard abort (`terminate`).
    #[error("execution terminated by hard abort")]
    Terminated,

    /// The engine's own state is broken.
    #[error("engine internal failure: {0}")]
    Internal(String),
}

impl ErrorCode for EngineFault {
    fn code(&self) -> &'static str {
        match self {
            Self::Terminated => "ENGINE_TERMINATED",
            Self::Internal(_) => "ENGINE_INTERNAL",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// The engine-side description of a callback site: where inside the
/// engine a host call originates. The worker adds the correlation
/// token to form the full [`Invocation`].
#[derive(Debug, Clone)]
pub struct CallSite {
    /// Context the calling code runs in.
    pub context: ContextId,
    /// Receiver at the call site.
    pub this: TermValue,
    /// The callable being invoked (the externalized host function).
    pub holder: TermValue,
    /// Whether the call is a construction (`inst`) rather than a plain
    /// call.
    pub is_construct: bool,
}

/// The callback-site record delivered to the host inside
/// `HostMessage::Invoke`. Carries everything the host needs to service
/// the call and address the reply: the reply goes back as a `result`
/// tick bearing `token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    pub token: CallToken,
    pub context: ContextId,
    pub this: TermValue,
    pub holder: TermValue,
    pub is_construct: bool,
}

impl Invocation {
    #[must_use]
    pub fn new(token: CallToken, site: CallSite) -> Self {
        Self {
            token,
            context: site.context,
            this: site.this,
            holder: site.holder,
            is_construct: site.is_construct,
        }
    }
}

/// The bridge engine-resident code uses to call synchronously into the
/// host. Blocks the worker (and only the worker) until the correlated
/// reply arrives; see the reentrant call protocol in `worker`.
pub trait HostInvoker {
    /// Performs one host round trip: delivers a callback request for
    /// `target` and waits for the reply correlated to it.
    ///
    /// `target` identifies the host-side callable (the term that was
    /// externalized into the engine); `site` says where in the engine
    /// the call originates.
    fn call_host(
        &mut self,
        target: TermValue,
        site: CallSite,
        args: Vec<TermValue>,
    ) -> Result<TermValue, EngineError>;
}

/// An embedded execution engine, as seen by the tick loop.
///
/// One instance of an implementor backs one engine instance. All
/// methods take `&self`: implementations synchronize internally and
/// must keep each operation's locking confined to that operation, so
/// that a host thread calling `new_context` never deadlocks against
/// the worker sitting in a blocking receive.
///
/// # Execution-context ownership
///
/// Engine-resident state is only ever touched through these methods,
/// and the mutating ones are only called from the worker thread. The
/// worker brackets its blocking waits with [`exit_context`] /
/// [`enter_context`]; engines with a thread-affine run lock (the
/// classic embedded-VM shape) hold it between `enter` and `exit` and
/// release it inside that bracket, which is what lets administrative
/// operations interleave while the worker is parked.
///
/// [`exit_context`]: ScriptEngine::exit_context
/// [`enter_context`]: ScriptEngine::enter_context
pub trait ScriptEngine: Send + Sync {
    /// The context created with the engine.
    fn default_context(&self) -> ContextId;

    /// Creates an additional context sharing this engine.
    fn new_context(&self) -> Result<ContextId, EngineError>;

    /// Disposes a context created by [`new_context`](Self::new_context).
    /// The default context cannot be disposed.
    fn dispose_context(&self, ctx: ContextId) -> Result<(), EngineError>;

    /// A context's global object.
    fn global(&self, ctx: ContextId) -> Result<TermValue, EngineError>;

    /// Reads a property. May run an accessor, hence the invoker.
    fn get(
        &self,
        obj: ObjectId,
        key: &PropKey,
        host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError>;

    /// Writes a property and returns the stored value. May run an
    /// accessor, hence the invoker.
    fn set(
        &self,
        obj: ObjectId,
        key: PropKey,
        value: TermValue,
        host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError>;

    /// Deletes a property; returns whether it existed.
    fn delete(&self, obj: ObjectId, key: &PropKey) -> Result<bool, EngineError>;

    /// The object's prototype, or `Undefined`.
    fn get_proto(&self, obj: ObjectId) -> Result<TermValue, EngineError>;

    /// Replaces the object's prototype; returns whether it was set.
    fn set_proto(&self, obj: ObjectId, proto: TermValue) -> Result<bool, EngineError>;

    /// Reads a hidden property (engine-internal keyspace, invisible to
    /// `proplist`).
    fn get_hidden(&self, obj: ObjectId, key: &str) -> Result<TermValue, EngineError>;

    /// Writes a hidden property and returns the stored value.
    fn set_hidden(
        &self,
        obj: ObjectId,
        key: String,
        value: TermValue,
    ) -> Result<TermValue, EngineError>;

    /// Installs an accessor pair for a key; `None` leaves that side
    /// absent. Returns whether the accessor was installed.
    fn set_accessor(
        &self,
        obj: ObjectId,
        key: PropKey,
        getter: Option<TermValue>,
        setter: Option<TermValue>,
    ) -> Result<bool, EngineError>;

    /// The object's own (non-hidden) properties, in property order.
    fn proplist(&self, obj: ObjectId) -> Result<Vec<(TermValue, TermValue)>, EngineError>;

    /// The object's integer-keyed elements, densely from 0.
    fn list_elements(&self, obj: ObjectId) -> Result<Vec<TermValue>, EngineError>;

    /// Engine equality (loose: numeric kinds compare across `Int` and
    /// `Float`).
    fn equals(&self, a: &TermValue, b: &TermValue) -> Result<bool, EngineError>;

    /// Engine identity equality (same variant, same contents, same
    /// object).
    fn strict_equals(&self, a: &TermValue, b: &TermValue) -> Result<bool, EngineError>;

    /// Passes a host term through the engine's value domain,
    /// validating any engine references it carries.
    fn taint(&self, value: TermValue) -> Result<TermValue, EngineError>;

    /// Wraps a host term as an engine-resident extern of the given
    /// kind. `ExternKind::Fun` produces a callable whose invocation
    /// performs a reentrant host call targeting `term`.
    fn externalize(&self, kind: ExternKind, term: TermValue) -> Result<TermValue, EngineError>;

    /// The per-kind prototype object attached to externs of `kind`.
    fn extern_proto(&self, kind: ExternKind) -> Result<TermValue, EngineError>;

    /// Number of internal slots on the object.
    fn internal_count(&self, obj: ObjectId) -> Result<usize, EngineError>;

    /// Reads an internal slot.
    fn get_internal(&self, obj: ObjectId, index: usize) -> Result<TermValue, EngineError>;

    /// Writes an internal slot and returns the stored value.
    fn set_internal(
        &self,
        obj: ObjectId,
        index: usize,
        value: TermValue,
    ) -> Result<TermValue, EngineError>;

    /// Calls a callable value. The context is the callable's home
    /// context.
    fn call(
        &self,
        fun: TermValue,
        args: Vec<TermValue>,
        host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError>;

    /// Calls a callable value as a constructor.
    fn construct(
        &self,
        fun: TermValue,
        args: Vec<TermValue>,
        host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError>;

    /// Evaluates a script source in a context.
    fn eval(
        &self,
        ctx: ContextId,
        source: &str,
        host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError>;

    /// Engine rendering of a value.
    fn to_string(&self, value: &TermValue) -> Result<String, EngineError>;

    /// Verbose engine rendering of a value.
    fn to_detail_string(&self, value: &TermValue) -> Result<String, EngineError>;

    /// Best-effort garbage collection; returns reclaimed object count.
    fn collect_garbage(&self) -> Result<usize, EngineError>;

    /// Hard abort. Callable from any thread; in-flight and subsequent
    /// operations fail with [`EngineFault::Terminated`]. The instance
    /// must be torn down afterwards, not reused.
    fn terminate(&self);

    /// Marks the worker as outside the execution context for the
    /// duration of a blocking wait. Engines with a thread-affine run
    /// lock release it here; engines that synchronize per-operation
    /// need not override.
    fn exit_context(&self) {}

    /// Re-enters the execution context after a blocking wait.
    fn enter_context(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_types::assert_error_codes;

    #[test]
    fn engine_error_codes_follow_conventions() {
        assert_error_codes(
            &[
                EngineError::UnknownObject(ObjectId::new()),
                EngineError::UnknownContext(ContextId::new()),
                EngineError::UnknownScript("boot".into()),
                EngineError::NotCallable(TermValue::Int(3)),
                EngineError::BadArgument("expected an object".into()),
                EngineError::ScriptFailed("exploded".into()),
                EngineError::InternalOutOfRange {
                    object: ObjectId::new(),
                    index: 9,
                },
                EngineError::terminated(),
            ],
            "ENGINE_",
        );
    }

    #[test]
    fn engine_fault_codes_follow_conventions() {
        assert_error_codes(
            &[EngineFault::Terminated, EngineFault::Internal("x".into())],
            "ENGINE_",
        );
    }

    #[test]
    fn into_fault_splits_severities() {
        let soft = EngineError::BadArgument("nope".into());
        assert!(soft.into_fault().is_err());

        let hard = EngineError::terminated();
        match hard.into_fault() {
            Ok(VmFault::Engine(EngineFault::Terminated)) => {}
            other => panic!("expected terminated fault, got {other:?}"),
        }
    }

    #[test]
    fn invocation_carries_site_fields() {
        let token = CallToken::new();
        let ctx = ContextId::new();
        let inv = Invocation::new(
            token,
            CallSite {
                context: ctx,
                this: TermValue::Undefined,
                holder: TermValue::Int(1),
                is_construct: true,
            },
        );
        assert_eq!(inv.token, token);
        assert_eq!(inv.context, ctx);
        assert!(inv.is_construct);
    }
}
