//! The engine worker: one dedicated thread running the tick loop.
//!
//! # The loop
//!
//! ```text
//!  ENTERING_CONTEXT
//!        │
//!        ▼                    exit_context ─┐
//!  AWAITING_TICK ◄───────────┐              ├─ blocking receive
//!        │  tick             │ enter_context┘
//!        ▼                   │
//!  DISPATCHING ──Done────────┘
//!        │   │
//!        │   └─Done + stop flag (top level only)
//!        ▼
//!  EXITING_CONTEXT: drain replay queue, yield value
//! ```
//!
//! One invocation of [`VmWorker::ticker`] is one loop *frame*. The
//! root frame runs at [`TickScope::Top`] for the worker's entire life.
//! When engine-resident code calls back into the host, the bridge
//! mints a fresh correlation token, delivers the callback request, and
//! recurses into `ticker` scoped to that token — the nested frame is
//! what blocks until the reply arrives, so no handler ever blocks
//! itself and no second thread is needed.
//!
//! A frame scoped to a token dispatches only ticks carrying that
//! token; everything else is deferred to the frame's own replay queue
//! and requeued, oldest first, when the frame unwinds. Ticks are
//! never dropped and never reordered relative to each other.
//!
//! The blocking receive is the worker's only suspension point. It is
//! bracketed by the engine's `exit_context`/`enter_context` hooks via
//! a guard, so an engine holding a thread-affine run lock releases it
//! exactly while the worker is parked and on no other path.

use std::sync::Arc;

use portico_types::{CallToken, EngineId, ErrorCode, TermValue};
use tracing::{debug, error, info, trace, warn};

use crate::dispatch::DispatchTable;
use crate::engine::{CallSite, EngineError, HostInvoker, Invocation, ScriptEngine};
use crate::error::VmFault;
use crate::mailbox::{HostMailbox, HostMessage};
use crate::replay::ReplayQueue;
use crate::tick::{Tick, TickResolution, TickScope};
use crate::transport::{TickReceiver, TickerSender};
use crate::vm::{VmPhase, VmShared};

/// Releases the execution context for the duration of a blocking wait
/// and re-enters it on every path out.
struct ContextYield<'a> {
    engine: &'a dyn ScriptEngine,
}

impl<'a> ContextYield<'a> {
    fn new(engine: &'a dyn ScriptEngine) -> Self {
        engine.exit_context();
        Self { engine }
    }
}

impl Drop for ContextYield<'_> {
    fn drop(&mut self) {
        self.engine.enter_context();
    }
}

/// State owned by the worker thread of one instance.
pub(crate) struct VmWorker {
    pub(crate) id: EngineId,
    pub(crate) engine: Arc<dyn ScriptEngine>,
    pub(crate) mailbox: Arc<dyn HostMailbox>,
    pub(crate) table: Arc<DispatchTable>,
    pub(crate) receiver: TickReceiver,
    pub(crate) continuation: TickerSender,
    pub(crate) shared: Arc<VmShared>,
    stop_requested: bool,
    stop_token: Option<CallToken>,
}

impl VmWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: EngineId,
        engine: Arc<dyn ScriptEngine>,
        mailbox: Arc<dyn HostMailbox>,
        table: Arc<DispatchTable>,
        receiver: TickReceiver,
        continuation: TickerSender,
        shared: Arc<VmShared>,
    ) -> Self {
        Self {
            id,
            engine,
            mailbox,
            table,
            receiver,
            continuation,
            shared,
            stop_requested: false,
            stop_token: None,
        }
    }

    /// Thread entry point. Runs the root frame to completion, then
    /// acknowledges a pending stop and marks the instance exited —
    /// under the shutdown latch, so teardown cannot overlap a
    /// still-sending `stop()`.
    pub(crate) fn run(mut self) {
        info!(vm = %self.id, "vm worker started");
        match self.ticker(TickScope::Top) {
            Ok(_) => {
                if let Some(token) = self.stop_token.take() {
                    if self
                        .mailbox
                        .deliver(HostMessage::Stopped { token })
                        .is_err()
                    {
                        warn!(vm = %self.id, "host endpoint gone before stop acknowledgement");
                    }
                }
                let _latch = self.shared.shutdown.lock();
                self.shared.set_phase(VmPhase::Exited);
                info!(vm = %self.id, "vm worker exited");
            }
            Err(fault) => {
                error!(vm = %self.id, code = fault.code(), error = %fault, "vm worker faulted");
                let _latch = self.shared.shutdown.lock();
                self.shared.set_phase(VmPhase::Faulted);
            }
        }
    }

    /// One tick-loop frame.
    ///
    /// Returns when a handler resolves `Return` (any frame), when the
    /// stop flag is set after a `Done` (top frame only), or when the
    /// transport closes. Deferred ticks are requeued before the value
    /// is yielded; the top frame never defers, since it admits every
    /// tick.
    pub(crate) fn ticker(&mut self, scope: TickScope) -> Result<TermValue, VmFault> {
        debug!(vm = %self.id, scope = %scope, "entering tick loop frame");
        let mut replay = ReplayQueue::new();
        loop {
            let received = {
                let _yield = ContextYield::new(self.engine.as_ref());
                self.receiver.receive()
            };
            let tick = match received {
                Ok(tick) => tick,
                Err(_) => {
                    // Every external sender is gone and nothing was
                    // left to replay.
                    if scope.is_top() {
                        info!(vm = %self.id, "transport closed; worker stopping");
                        return Ok(TermValue::Undefined);
                    }
                    return Err(VmFault::HostGone);
                }
            };

            if !scope.admits(tick.token) {
                replay.defer(tick, &scope);
                continue;
            }

            let table = Arc::clone(&self.table);
            let resolution = match tick.command() {
                None => {
                    warn!(vm = %self.id, token = ?tick.token, "malformed tick payload; skipping");
                    continue;
                }
                Some(cmd) => {
                    trace!(
                        vm = %self.id,
                        scope = %scope,
                        command = cmd.name,
                        token = ?tick.token,
                        "dispatching tick"
                    );
                    let mut frame = TickFrame {
                        worker: self,
                        scope,
                    };
                    table.dispatch(&mut frame, &tick, &cmd)?
                }
            };

            match resolution {
                TickResolution::Done | TickResolution::Continue => {
                    if scope.is_top() && self.stop_requested {
                        debug!(vm = %self.id, "stop requested; leaving top-level loop");
                        return Ok(TermValue::Undefined);
                    }
                }
                TickResolution::Return(value) => {
                    replay.drain_to(&self.continuation)?;
                    debug!(vm = %self.id, scope = %scope, "tick loop frame returning");
                    return Ok(value);
                }
            }
        }
    }

    pub(crate) fn deliver(&self, message: HostMessage) -> Result<(), VmFault> {
        self.mailbox.deliver(message).map_err(|_| VmFault::HostGone)
    }

    fn request_stop(&mut self, token: Option<CallToken>) {
        if self.stop_requested {
            trace!(vm = %self.id, "stop already requested");
            return;
        }
        self.stop_requested = true;
        self.stop_token = token;
    }
}

/// What a handler sees: the worker plus the scope of the frame the
/// tick was dispatched in.
pub struct TickFrame<'w> {
    worker: &'w mut VmWorker,
    scope: TickScope,
}

impl<'w> TickFrame<'w> {
    pub(crate) fn new(worker: &'w mut VmWorker, scope: TickScope) -> Self {
        Self { worker, scope }
    }

    /// The instance id, for logging.
    #[must_use]
    pub fn vm_id(&self) -> EngineId {
        self.worker.id
    }

    /// The scope of the frame this tick was dispatched in.
    #[must_use]
    pub fn scope(&self) -> TickScope {
        self.scope
    }

    /// The instance's engine.
    #[must_use]
    pub fn engine(&self) -> Arc<dyn ScriptEngine> {
        Arc::clone(&self.worker.engine)
    }

    /// Delivers a message to the bound host endpoint.
    pub fn deliver(&self, message: HostMessage) -> Result<(), VmFault> {
        self.worker.deliver(message)
    }

    /// Delivers a command result correlated to `tick`'s token.
    pub fn reply(&self, tick: &Tick, value: TermValue) -> Result<(), VmFault> {
        self.deliver(HostMessage::Result {
            token: tick.token,
            value,
        })
    }

    /// Flags cooperative shutdown. The first request wins; its token
    /// (if any) is acknowledged with `Stopped` once the worker has
    /// left the top-level loop.
    pub fn request_stop(&mut self, token: Option<CallToken>) {
        self.worker.request_stop(token);
    }

    /// The reentrant-call bridge to hand to engine operations that can
    /// execute engine-resident code.
    pub fn invoker(&mut self) -> ReentrantCall<'_> {
        ReentrantCall {
            worker: self.worker,
        }
    }
}

/// The worker's [`HostInvoker`]: each host call becomes a fresh token,
/// a callback request to the host endpoint, and a nested tick-loop
/// frame scoped to that token.
pub struct ReentrantCall<'w> {
    worker: &'w mut VmWorker,
}

impl HostInvoker for ReentrantCall<'_> {
    fn call_host(
        &mut self,
        target: TermValue,
        site: CallSite,
        args: Vec<TermValue>,
    ) -> Result<TermValue, EngineError> {
        let token = CallToken::new();
        debug!(vm = %self.worker.id, token = %token, "reentrant host call");
        self.worker.deliver(HostMessage::Invoke {
            target,
            invocation: Invocation::new(token, site),
            args,
        })?;
        let value = self.worker.ticker(TickScope::Call(token))?;
        Ok(value)
    }
}
