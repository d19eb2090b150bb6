//! Per-instance tick transport.
//!
//! Two channels feed one consumer, the worker thread:
//!
//! - the **external** channel — bounded, written by any number of
//!   producer threads through [`TickSender`];
//! - the **continuation** channel — unbounded, written only by the
//!   worker itself while unwinding a nested frame (replaying deferred
//!   ticks).
//!
//! [`TickReceiver::receive`] always drains the continuation channel
//! before blocking on the external one, so replayed ticks — the
//! messages keeping a pending nested call alive — can never be starved
//! by a flood of external ticks. Because only the worker writes
//! continuations, and it never parks itself while continuation ticks
//! are unread, checking the continuation side non-blockingly loses
//! nothing.
//!
//! Sends never silently drop: a full external channel is retried until
//! the tick is accepted. The only send failure is a disconnected
//! worker.

use std::sync::mpsc::{self, Receiver, RecvError, SyncSender, TryRecvError, TrySendError};
use std::thread;
use std::time::Duration;

use portico_types::EngineId;
use tracing::trace;

use crate::config::VmConfig;
use crate::error::{VmError, VmFault};
use crate::tick::Tick;

/// Multi-producer handle for the external channel. Cloneable and safe
/// to use from any thread; never requires the engine lock.
#[derive(Debug, Clone)]
pub struct TickSender {
    vm: EngineId,
    tx: SyncSender<Tick>,
    retry: Duration,
}

impl TickSender {
    /// Delivers a tick, retrying under backpressure until accepted.
    ///
    /// Backpressure is not an error: a full channel pauses this
    /// producer for the configured retry interval and tries again.
    /// `Err(VmError::NotRunning)` means the worker is gone and the
    /// tick can never be delivered.
    pub fn send(&self, tick: Tick) -> Result<(), VmError> {
        let mut tick = tick;
        loop {
            match self.tx.try_send(tick) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(rejected)) => {
                    trace!(vm = %self.vm, "external channel full; retrying send");
                    tick = rejected;
                    thread::sleep(self.retry);
                }
                Err(TrySendError::Disconnected(_)) => return Err(VmError::NotRunning),
            }
        }
    }
}

/// Worker-held handle for the continuation channel, used to replay a
/// frame's deferred ticks while unwinding.
#[derive(Debug)]
pub(crate) struct TickerSender {
    tx: mpsc::Sender<Tick>,
}

impl TickerSender {
    /// Requeues a deferred tick for the enclosing frame.
    ///
    /// The worker owns the receiving side, so this can only fail if an
    /// internal invariant broke; losing a tick here would violate the
    /// no-loss guarantee, hence the fault.
    pub(crate) fn requeue(&self, tick: Tick) -> Result<(), VmFault> {
        self.tx
            .send(tick)
            .map_err(|_| VmFault::Internal("continuation channel closed".into()))
    }
}

/// The worker's single receive point over both channels.
#[derive(Debug)]
pub(crate) struct TickReceiver {
    external: Receiver<Tick>,
    continuation: Receiver<Tick>,
}

impl TickReceiver {
    /// Blocks until a tick is available, continuation channel first.
    ///
    /// `Err(RecvError)` means every external sender has been dropped
    /// and nothing remains to replay: the instance has no possible
    /// input left.
    pub(crate) fn receive(&self) -> Result<Tick, RecvError> {
        match self.continuation.try_recv() {
            Ok(tick) => return Ok(tick),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => {}
        }
        self.external.recv()
    }
}

/// Builds the transport for one instance.
pub(crate) fn pair(vm: EngineId, config: &VmConfig) -> (TickSender, TickerSender, TickReceiver) {
    let (external_tx, external_rx) = mpsc::sync_channel(config.tick_buffer);
    let (continuation_tx, continuation_rx) = mpsc::channel();
    (
        TickSender {
            vm,
            tx: external_tx,
            retry: config.send_retry,
        },
        TickerSender { tx: continuation_tx },
        TickReceiver {
            external: external_rx,
            continuation: continuation_rx,
        },
    )
}
