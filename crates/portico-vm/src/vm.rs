//! Instance lifecycle: builder, host-facing handle, and registry.
//!
//! ```text
//!   VmBuilder::new(engine).build()          VmHandle (cloneable)
//!          │                                   │ tick / stop / kill
//!          ▼                                   ▼
//!   ┌─────────────┐  bind_host(mailbox)  ┌────────────┐
//!   │   Created    │ ───────────────────► │  Running   │ worker thread
//!   └─────────────┘   spawns the worker  └─────┬──────┘
//!                                              │ stop / transport close / fault
//!                                              ▼
//!                                     Exited  or  Faulted
//! ```
//!
//! A handle is a thin cloneable front: a tick sender plus shared
//! state. The heavyweight parts (receiver, continuation channel,
//! dispatch table) sit in a one-shot seed consumed by `bind_host`,
//! which is why binding can happen exactly once per instance.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use portico_types::{CallToken, ContextId, EngineId, TermValue};
use tracing::{info, warn};

use crate::config::VmConfig;
use crate::dispatch::DispatchTable;
use crate::engine::ScriptEngine;
use crate::error::VmError;
use crate::mailbox::{HostMailbox, Tack};
use crate::tick::Tick;
use crate::transport::{self, TickReceiver, TickSender, TickerSender};
use crate::worker::VmWorker;

/// Where an instance is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmPhase {
    /// Built, no host endpoint bound, worker not started.
    Created,
    /// Worker thread running the tick loop.
    Running,
    /// Worker left the loop cleanly (stop or transport close).
    Exited,
    /// Worker aborted on a fault; the instance must be discarded.
    Faulted,
}

impl std::fmt::Display for VmPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VmPhase::Created => "created",
            VmPhase::Running => "running",
            VmPhase::Exited => "exited",
            VmPhase::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// State shared between the handle(s) and the worker thread.
pub(crate) struct VmShared {
    pub(crate) id: EngineId,
    phase: Mutex<VmPhase>,
    /// Serializes worker teardown against host-side shutdown steps;
    /// held briefly, never across a blocking send.
    pub(crate) shutdown: Mutex<()>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl VmShared {
    pub(crate) fn new(id: EngineId) -> Self {
        Self {
            id,
            phase: Mutex::new(VmPhase::Created),
            shutdown: Mutex::new(()),
            join: Mutex::new(None),
        }
    }

    pub(crate) fn phase(&self) -> VmPhase {
        *self.phase.lock()
    }

    pub(crate) fn set_phase(&self, phase: VmPhase) {
        *self.phase.lock() = phase;
    }
}

/// The pieces the worker needs, parked until a host endpoint binds.
struct WorkerSeed {
    receiver: TickReceiver,
    continuation: TickerSender,
    table: Arc<DispatchTable>,
    thread_name: String,
}

/// Configures and creates an instance.
pub struct VmBuilder {
    engine: Arc<dyn ScriptEngine>,
    config: VmConfig,
    table: DispatchTable,
}

impl VmBuilder {
    /// A builder over `engine` with default config and the standard
    /// dispatch table.
    #[must_use]
    pub fn new(engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            engine,
            config: VmConfig::default(),
            table: DispatchTable::standard(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: VmConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the dispatch table, e.g. with
    /// [`DispatchTable::with_tracing`] or a custom-extended one.
    #[must_use]
    pub fn with_dispatch(mut self, table: DispatchTable) -> Self {
        self.table = table;
        self
    }

    /// Creates the instance in the `Created` phase. The worker does
    /// not start until [`VmHandle::bind_host`].
    #[must_use]
    pub fn build(self) -> VmHandle {
        let id = EngineId::new();
        let (sender, continuation, receiver) = transport::pair(id, &self.config);
        let shared = Arc::new(VmShared::new(id));
        let seed = WorkerSeed {
            receiver,
            continuation,
            table: Arc::new(self.table),
            thread_name: self.config.thread_name(&id.short()),
        };
        info!(vm = %id, "vm created");
        VmHandle {
            shared,
            engine: self.engine,
            sender,
            seed: Arc::new(Mutex::new(Some(seed))),
        }
    }
}

/// Host-side handle to one instance. Cheap to clone; all clones drive
/// the same worker.
#[derive(Clone)]
pub struct VmHandle {
    shared: Arc<VmShared>,
    engine: Arc<dyn ScriptEngine>,
    sender: TickSender,
    seed: Arc<Mutex<Option<WorkerSeed>>>,
}

impl VmHandle {
    #[must_use]
    pub fn id(&self) -> EngineId {
        self.shared.id
    }

    #[must_use]
    pub fn phase(&self) -> VmPhase {
        self.shared.phase()
    }

    /// The engine's default context.
    #[must_use]
    pub fn context(&self) -> ContextId {
        self.engine.default_context()
    }

    /// Creates an additional context. Safe to call from any host
    /// thread, including while the worker is parked.
    pub fn new_context(&self) -> Result<ContextId, VmError> {
        Ok(self.engine.new_context()?)
    }

    /// A context's global object.
    pub fn global(&self, ctx: ContextId) -> Result<TermValue, VmError> {
        Ok(self.engine.global(ctx)?)
    }

    /// Binds the host endpoint and starts the worker thread. Allowed
    /// exactly once; later calls fail with `VM_ALREADY_BOUND`.
    pub fn bind_host(&self, mailbox: Arc<dyn HostMailbox>) -> Result<(), VmError> {
        let Some(seed) = self.seed.lock().take() else {
            return Err(VmError::AlreadyBound);
        };
        let worker = VmWorker::new(
            self.shared.id,
            Arc::clone(&self.engine),
            mailbox,
            seed.table,
            seed.receiver,
            seed.continuation,
            Arc::clone(&self.shared),
        );
        self.shared.set_phase(VmPhase::Running);
        let join = std::thread::Builder::new()
            .name(seed.thread_name.clone())
            .spawn(move || worker.run())
            .expect("failed to spawn vm worker thread");
        *self.shared.join.lock() = Some(join);
        info!(vm = %self.shared.id, thread = %seed.thread_name, "host endpoint bound; worker started");
        Ok(())
    }

    /// Enqueues a tick. Returns [`Tack`] once the tick is accepted
    /// into the transport; applies backpressure (bounded retry) when
    /// the buffer is full.
    pub fn send(&self, tick: Tick) -> Result<Tack, VmError> {
        self.sender.send(tick)?;
        Ok(Tack)
    }

    /// Convenience over [`send`](Self::send): builds the tick from a
    /// correlation token and a payload.
    pub fn tick(&self, token: Option<CallToken>, payload: TermValue) -> Result<Tack, VmError> {
        self.send(Tick { token, payload })
    }

    /// Requests cooperative shutdown. The worker finishes the tick in
    /// flight, acknowledges with `Stopped { token }`, and exits.
    ///
    /// Idempotent: once the instance has exited (or faulted), further
    /// calls succeed without effect, including the race where the
    /// worker exits between the phase check and the send.
    pub fn stop(&self, token: CallToken) -> Result<(), VmError> {
        {
            let _latch = self.shared.shutdown.lock();
            match self.phase() {
                VmPhase::Created => return Err(VmError::NotRunning),
                VmPhase::Exited | VmPhase::Faulted => return Ok(()),
                VmPhase::Running => {}
            }
        }
        match self
            .sender
            .send(Tick::correlated(token, TermValue::command("stop", vec![])))
        {
            Ok(()) | Err(VmError::NotRunning) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Hard abort. Marks the engine terminated and wakes a parked
    /// worker; the next engine operation fails fatally and the worker
    /// exits `Faulted`. The instance cannot be reused afterwards.
    pub fn kill(&self) {
        warn!(vm = %self.shared.id, "hard abort requested");
        self.engine.terminate();
        let _ = self.send(Tick::uncorrelated(TermValue::command("gc", vec![])));
    }

    pub(crate) fn join_worker(&self) {
        {
            let _latch = self.shared.shutdown.lock();
        }
        let handle = self.shared.join.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(vm = %self.shared.id, "worker thread panicked during teardown");
            }
        }
    }
}

/// Tracks live instances by id.
///
/// Removal joins the worker thread, so callers should stop (or kill)
/// the instance first; removing a running instance blocks until its
/// transport closes.
pub struct VmRegistry {
    vms: RwLock<HashMap<EngineId, VmHandle>>,
}

impl VmRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            vms: RwLock::new(HashMap::new()),
        }
    }

    /// Builds the instance and registers its handle.
    pub fn create(&self, builder: VmBuilder) -> VmHandle {
        let handle = builder.build();
        self.vms.write().insert(handle.id(), handle.clone());
        handle
    }

    #[must_use]
    pub fn get(&self, id: EngineId) -> Option<VmHandle> {
        self.vms.read().get(&id).cloned()
    }

    /// Unregisters the instance and joins its worker thread.
    pub fn remove(&self, id: EngineId) -> Result<(), VmError> {
        let Some(handle) = self.vms.write().remove(&id) else {
            return Err(VmError::NotFound(id));
        };
        handle.join_worker();
        info!(vm = %id, "vm removed");
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vms.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vms.read().is_empty()
    }
}

impl Default for VmRegistry {
    fn default() -> Self {
        Self::new()
    }
}
