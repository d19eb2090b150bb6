//! The host endpoint an instance delivers to.
//!
//! Every instance has exactly one bound [`HostMailbox`]: the address
//! for command results, reentrant callback requests, and the stop
//! acknowledgement. Binding happens once, before the worker thread
//! starts. [`QueueMailbox`] is the channel-backed implementation used
//! by embedders and tests; anything that can absorb a [`HostMessage`]
//! without blocking the worker for long can implement the trait.

use std::sync::mpsc;

use portico_types::{CallToken, TermValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::Invocation;

/// Acknowledgement that a correlated tick was accepted for delivery.
///
/// The command's actual result arrives later at the mailbox; `Tack`
/// only says the transport took the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tack;

/// The bound host endpoint has been dropped.
#[derive(Debug, Clone, Error)]
#[error("host endpoint disconnected")]
pub struct HostGone;

/// What an instance sends to its bound host endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HostMessage {
    /// Outcome of a dispatched command, correlated by the tick's
    /// token (`None` for uncorrelated ticks). Per-operation failures
    /// arrive here too, as `["error", code, message]` values.
    Result {
        token: Option<CallToken>,
        value: TermValue,
    },

    /// Engine-resident code is calling into the host and is now
    /// blocked in a nested tick-loop frame. The host services the
    /// call and replies with a `result` tick bearing
    /// `invocation.token`.
    Invoke {
        target: TermValue,
        invocation: Invocation,
        args: Vec<TermValue>,
    },

    /// Cooperative stop has completed; the worker has left its
    /// top-level loop. Sent at most once per instance.
    Stopped { token: CallToken },
}

/// Receives everything an instance has to say to its host.
///
/// Implementations must be cheap and non-blocking from the worker's
/// point of view; a full queue should fail fast rather than park the
/// worker.
pub trait HostMailbox: Send + Sync {
    /// Delivers one message. `Err(HostGone)` means the host side no
    /// longer exists; the worker treats that as fatal.
    fn deliver(&self, message: HostMessage) -> Result<(), HostGone>;
}

/// Channel-backed [`HostMailbox`].
///
/// # Example
///
/// ```
/// use portico_vm::{HostMailbox, HostMessage, QueueMailbox};
/// use portico_types::TermValue;
///
/// let (mailbox, inbox) = QueueMailbox::channel();
/// mailbox
///     .deliver(HostMessage::Result {
///         token: None,
///         value: TermValue::Int(42),
///     })
///     .unwrap();
///
/// match inbox.recv().unwrap() {
///     HostMessage::Result { value, .. } => assert_eq!(value, TermValue::Int(42)),
///     other => panic!("unexpected message: {other:?}"),
/// }
/// ```
#[derive(Debug, Clone)]
pub struct QueueMailbox {
    tx: mpsc::Sender<HostMessage>,
}

impl QueueMailbox {
    /// Creates the mailbox and the receiver the host reads from.
    #[must_use]
    pub fn channel() -> (QueueMailbox, mpsc::Receiver<HostMessage>) {
        let (tx, rx) = mpsc::channel();
        (QueueMailbox { tx }, rx)
    }
}

impl HostMailbox for QueueMailbox {
    fn deliver(&self, message: HostMessage) -> Result<(), HostGone> {
        self.tx.send(message).map_err(|_| HostGone)
    }
}
