//! Per-frame deferral of non-matching ticks.
//!
//! Every nested tick-loop frame owns one [`ReplayQueue`]. Ticks that
//! arrive while the frame awaits its correlation token, but do not
//! carry it, are parked here in arrival order and requeued onto the
//! continuation channel when the frame unwinds — the enclosing frame
//! then observes them exactly as if the nested call had never
//! interposed.
//!
//! The queue is unbounded: no tick is ever dropped, so there is no
//! capacity ceiling to enforce. Deferral moves the tick; nothing is
//! copied or duplicated.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::error::VmFault;
use crate::tick::{Tick, TickScope};
use crate::transport::TickerSender;

#[derive(Debug, Default)]
pub(crate) struct ReplayQueue {
    queue: VecDeque<Tick>,
}

impl ReplayQueue {
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Parks a tick that does not match the frame's awaited token.
    pub(crate) fn defer(&mut self, tick: Tick, scope: &TickScope) {
        trace!(
            scope = %scope,
            token = ?tick.token,
            queued = self.queue.len() + 1,
            "deferring tick for replay"
        );
        self.queue.push_back(tick);
    }

    /// Requeues every deferred tick, oldest first, onto the
    /// continuation channel. Returns how many were replayed.
    pub(crate) fn drain_to(&mut self, ticker: &TickerSender) -> Result<usize, VmFault> {
        let count = self.queue.len();
        while let Some(tick) = self.queue.pop_front() {
            ticker.requeue(tick)?;
        }
        if count > 0 {
            debug!(count, "replayed deferred ticks to enclosing frame");
        }
        Ok(count)
    }

    #[allow(dead_code)] // Used in tests
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    #[allow(dead_code)] // Used in tests
    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
