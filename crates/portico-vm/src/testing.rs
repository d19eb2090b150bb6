//! Unit-test support: a canned-answer engine and a fully wired worker.
//!
//! The loop can be exercised without spawning a thread: preload the
//! external channel, drop the sender, and run `ticker` (or `run`)
//! inline. The closed transport ends the top frame the same way a
//! dropped host handle would in production.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

use portico_types::{ContextId, EngineId, ExternKind, ObjectId, PropKey, TermValue};

use crate::config::VmConfig;
use crate::dispatch::DispatchTable;
use crate::engine::{EngineError, HostInvoker, ScriptEngine};
use crate::mailbox::{HostMessage, QueueMailbox};
use crate::tick::TickScope;
use crate::transport::{self, TickSender};
use crate::vm::VmShared;
use crate::worker::{TickFrame, VmWorker};

/// Counts the `exit_context`/`enter_context` bracket around blocking
/// receives.
#[derive(Clone, Default)]
pub(crate) struct YieldCounts {
    exits: Arc<AtomicUsize>,
    enters: Arc<AtomicUsize>,
}

impl YieldCounts {
    pub(crate) fn exits(&self) -> usize {
        self.exits.load(Ordering::SeqCst)
    }

    pub(crate) fn enters(&self) -> usize {
        self.enters.load(Ordering::SeqCst)
    }
}

/// A [`ScriptEngine`] stub with fixed answers. Mutating operations echo
/// their input back; lookups answer `Undefined`; calls fail with
/// `NotCallable` and internal-slot access with `InternalOutOfRange`,
/// which makes it handy for asserting the error-result path too.
pub(crate) struct NullEngine {
    default_ctx: ContextId,
    global_obj: ObjectId,
    terminated: AtomicBool,
    yields: YieldCounts,
}

impl NullEngine {
    pub(crate) fn new() -> Self {
        Self {
            default_ctx: ContextId::new(),
            global_obj: ObjectId::new(),
            terminated: AtomicBool::new(false),
            yields: YieldCounts::default(),
        }
    }

    pub(crate) fn yields(&self) -> YieldCounts {
        self.yields.clone()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    fn guard(&self) -> Result<(), EngineError> {
        if self.is_terminated() {
            Err(EngineError::terminated())
        } else {
            Ok(())
        }
    }
}

fn loosely_equal(a: &TermValue, b: &TermValue) -> bool {
    match (a, b) {
        (TermValue::Int(i), TermValue::Float(x)) | (TermValue::Float(x), TermValue::Int(i)) => {
            (*i as f64) == *x
        }
        _ => a == b,
    }
}

impl ScriptEngine for NullEngine {
    fn default_context(&self) -> ContextId {
        self.default_ctx
    }

    fn new_context(&self) -> Result<ContextId, EngineError> {
        self.guard()?;
        Ok(ContextId::new())
    }

    fn dispose_context(&self, _ctx: ContextId) -> Result<(), EngineError> {
        self.guard()
    }

    fn global(&self, _ctx: ContextId) -> Result<TermValue, EngineError> {
        self.guard()?;
        Ok(TermValue::Obj(self.global_obj))
    }

    fn get(
        &self,
        _obj: ObjectId,
        _key: &PropKey,
        _host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        Ok(TermValue::Undefined)
    }

    fn set(
        &self,
        _obj: ObjectId,
        _key: PropKey,
        value: TermValue,
        _host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        Ok(value)
    }

    fn delete(&self, _obj: ObjectId, _key: &PropKey) -> Result<bool, EngineError> {
        self.guard()?;
        Ok(false)
    }

    fn get_proto(&self, _obj: ObjectId) -> Result<TermValue, EngineError> {
        self.guard()?;
        Ok(TermValue::Undefined)
    }

    fn set_proto(&self, _obj: ObjectId, _proto: TermValue) -> Result<bool, EngineError> {
        self.guard()?;
        Ok(true)
    }

    fn get_hidden(&self, _obj: ObjectId, _key: &str) -> Result<TermValue, EngineError> {
        self.guard()?;
        Ok(TermValue::Undefined)
    }

    fn set_hidden(
        &self,
        _obj: ObjectId,
        _key: String,
        value: TermValue,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        Ok(value)
    }

    fn set_accessor(
        &self,
        _obj: ObjectId,
        _key: PropKey,
        _getter: Option<TermValue>,
        _setter: Option<TermValue>,
    ) -> Result<bool, EngineError> {
        self.guard()?;
        Ok(true)
    }

    fn proplist(&self, _obj: ObjectId) -> Result<Vec<(TermValue, TermValue)>, EngineError> {
        self.guard()?;
        Ok(Vec::new())
    }

    fn list_elements(&self, _obj: ObjectId) -> Result<Vec<TermValue>, EngineError> {
        self.guard()?;
        Ok(Vec::new())
    }

    fn equals(&self, a: &TermValue, b: &TermValue) -> Result<bool, EngineError> {
        self.guard()?;
        Ok(loosely_equal(a, b))
    }

    fn strict_equals(&self, a: &TermValue, b: &TermValue) -> Result<bool, EngineError> {
        self.guard()?;
        Ok(a == b)
    }

    fn taint(&self, value: TermValue) -> Result<TermValue, EngineError> {
        self.guard()?;
        Ok(value)
    }

    fn externalize(&self, _kind: ExternKind, _term: TermValue) -> Result<TermValue, EngineError> {
        self.guard()?;
        Ok(TermValue::Extern(ObjectId::new()))
    }

    fn extern_proto(&self, _kind: ExternKind) -> Result<TermValue, EngineError> {
        self.guard()?;
        Ok(TermValue::Obj(ObjectId::new()))
    }

    fn internal_count(&self, _obj: ObjectId) -> Result<usize, EngineError> {
        self.guard()?;
        Ok(0)
    }

    fn get_internal(&self, obj: ObjectId, index: usize) -> Result<TermValue, EngineError> {
        self.guard()?;
        Err(EngineError::InternalOutOfRange { object: obj, index })
    }

    fn set_internal(
        &self,
        obj: ObjectId,
        index: usize,
        _value: TermValue,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        Err(EngineError::InternalOutOfRange { object: obj, index })
    }

    fn call(
        &self,
        fun: TermValue,
        _args: Vec<TermValue>,
        _host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        Err(EngineError::NotCallable(fun))
    }

    fn construct(
        &self,
        fun: TermValue,
        _args: Vec<TermValue>,
        _host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        Err(EngineError::NotCallable(fun))
    }

    fn eval(
        &self,
        _ctx: ContextId,
        _source: &str,
        _host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        Ok(TermValue::Undefined)
    }

    fn to_string(&self, value: &TermValue) -> Result<String, EngineError> {
        self.guard()?;
        Ok(value.to_string())
    }

    fn to_detail_string(&self, value: &TermValue) -> Result<String, EngineError> {
        self.guard()?;
        Ok(format!("{value:?}"))
    }

    fn collect_garbage(&self) -> Result<usize, EngineError> {
        self.guard()?;
        Ok(0)
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    fn exit_context(&self) {
        self.yields.exits.fetch_add(1, Ordering::SeqCst);
    }

    fn enter_context(&self) {
        self.yields.enters.fetch_add(1, Ordering::SeqCst);
    }
}

/// A worker wired to real channels, ready to run inline.
pub(crate) struct TestHarness {
    pub(crate) worker: VmWorker,
    pub(crate) sender: TickSender,
    pub(crate) inbox: mpsc::Receiver<HostMessage>,
    pub(crate) shared: Arc<VmShared>,
    pub(crate) yields: YieldCounts,
}

impl TestHarness {
    /// A top-scope frame borrowing the harness worker, for driving
    /// handlers directly.
    pub(crate) fn frame(&mut self) -> TickFrame<'_> {
        TickFrame::new(&mut self.worker, TickScope::Top)
    }
}

pub(crate) fn harness() -> TestHarness {
    let id = EngineId::new();
    let config = VmConfig::default();
    let (sender, continuation, receiver) = transport::pair(id, &config);
    let (mailbox, inbox) = QueueMailbox::channel();
    let engine = Arc::new(NullEngine::new());
    let yields = engine.yields();
    let engine: Arc<dyn ScriptEngine> = engine;
    let shared = Arc::new(VmShared::new(id));
    let worker = VmWorker::new(
        id,
        engine,
        Arc::new(mailbox),
        Arc::new(DispatchTable::standard()),
        receiver,
        continuation,
        Arc::clone(&shared),
    );
    TestHarness {
        worker,
        sender,
        inbox,
        shared,
        yields,
    }
}
