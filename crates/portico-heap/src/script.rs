//! Scripts: the engine-resident code of the heap engine.
//!
//! The heap engine does not parse a language. A "script" is a Rust
//! closure registered under a name with
//! [`HeapEngine::define_script`](crate::HeapEngine::define_script);
//! the `script` command's source text is the name to run. Scripts
//! execute on the worker thread inside a [`ScriptScope`], which gives
//! them heap access and, crucially, the host bridge: a script calling
//! [`ScriptScope::call_host`] suspends exactly like engine code
//! calling back into its embedder, with a fresh correlation token and
//! a nested tick-loop frame.

use std::sync::Arc;

use portico_types::{ContextId, ObjectId, PropKey, TermValue};
use portico_vm::{CallSite, EngineError, HostInvoker};

use crate::engine::HeapEngine;

/// A registered script body. Receives the call arguments (empty when
/// run via the `script` command) and yields the script's result.
pub type ScriptFn =
    Arc<dyn Fn(&mut ScriptScope<'_>, Vec<TermValue>) -> Result<TermValue, EngineError> + Send + Sync>;

/// What a running script sees: the heap, the context it runs in, and
/// the host bridge.
pub struct ScriptScope<'a> {
    pub(crate) engine: &'a HeapEngine,
    pub(crate) context: ContextId,
    pub(crate) host: &'a mut dyn HostInvoker,
}

impl ScriptScope<'_> {
    #[must_use]
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// The global object of the script's context.
    pub fn global(&self) -> Result<ObjectId, EngineError> {
        self.engine.global_of(self.context)
    }

    /// Allocates a plain object. Unreferenced plain objects are
    /// reclaimed by the next collection, so attach it to something
    /// reachable before yielding.
    #[must_use]
    pub fn alloc(&self) -> ObjectId {
        self.engine.alloc_object()
    }

    /// A callable backed by the named script (resolved at call time).
    #[must_use]
    pub fn bind_script(&self, name: impl Into<String>) -> TermValue {
        self.engine.bind_script(name)
    }

    /// Reads a property, running any getter.
    pub fn get(
        &mut self,
        obj: ObjectId,
        key: impl Into<PropKey>,
    ) -> Result<TermValue, EngineError> {
        self.engine.get_with(obj, &key.into(), self.host)
    }

    /// Writes a property, running any setter.
    pub fn set(
        &mut self,
        obj: ObjectId,
        key: impl Into<PropKey>,
        value: TermValue,
    ) -> Result<TermValue, EngineError> {
        self.engine.set_with(obj, key.into(), value, self.host)
    }

    /// Calls a callable heap value.
    pub fn call(&mut self, fun: TermValue, args: Vec<TermValue>) -> Result<TermValue, EngineError> {
        self.engine.call_with(fun, args, self.host)
    }

    /// One synchronous round trip into the host: delivers a callback
    /// request for `target` and blocks this frame until the correlated
    /// reply arrives. Other ticks queue up behind the reply and are
    /// replayed afterwards.
    pub fn call_host(
        &mut self,
        target: TermValue,
        args: Vec<TermValue>,
    ) -> Result<TermValue, EngineError> {
        let this = match self.engine.global_of(self.context) {
            Ok(global) => TermValue::Obj(global),
            Err(_) => TermValue::Undefined,
        };
        let site = CallSite {
            context: self.context,
            this,
            holder: target.clone(),
            is_construct: false,
        };
        self.host.call_host(target, site, args)
    }
}
