//! Tick transport and dispatch for embedded script engines.
//!
//! Each instance pairs one [`ScriptEngine`] with one dedicated worker
//! thread. Host threads never touch engine state; they enqueue
//! *ticks* (command payloads, optionally tagged with a correlation
//! token) and receive results, callback requests, and stop
//! acknowledgements through a [`HostMailbox`] endpoint.
//!
//! ```text
//!  host threads                     worker thread (one per instance)
//!  ────────────                     ────────────────────────────────
//!  VmHandle::tick ──► external ─┐
//!                    channel    ├──► tick loop ─► DispatchTable
//!  frame unwind ───► continuation                     │
//!  (replays)         channel   ─┘                     ▼
//!                                                ScriptEngine
//!  HostMailbox ◄── results / callback requests ──────┘
//! ```
//!
//! # Guarantees
//!
//! - **No loss, no reorder**: every accepted tick is dispatched (or
//!   deferred and replayed) exactly once; ticks from one sender keep
//!   their relative order, and replayed ticks take priority over new
//!   external ones.
//! - **Correlation isolation**: while a reentrant host call is
//!   pending, only ticks carrying its token are dispatched; everything
//!   else waits in the frame's replay queue and is never consumed by
//!   the wrong frame.
//! - **Single suspension point**: the worker blocks only in its
//!   receive, bracketed by the engine's context-yield hooks, so
//!   engines with a thread-affine run lock release it exactly while
//!   the worker is parked.
//!
//! # Lifecycle
//!
//! Build with [`VmBuilder`], bind a host endpoint with
//! [`VmHandle::bind_host`] (this starts the worker), drive it with
//! [`VmHandle::tick`], and shut down cooperatively with
//! [`VmHandle::stop`] or forcibly with [`VmHandle::kill`]. A
//! [`VmRegistry`] tracks live instances and joins their workers on
//! removal.

mod config;
mod dispatch;
mod engine;
mod error;
mod handlers;
mod mailbox;
mod replay;
mod tick;
mod transport;
mod vm;
mod worker;

#[cfg(test)]
mod testing;

pub use config::VmConfig;
pub use dispatch::{DispatchTable, TickHandler};
pub use engine::{CallSite, EngineError, EngineFault, HostInvoker, Invocation, ScriptEngine};
pub use error::{VmError, VmFault};
pub use mailbox::{HostGone, HostMailbox, HostMessage, QueueMailbox, Tack};
pub use tick::{Command, Tick, TickResolution, TickScope};
pub use transport::TickSender;
pub use vm::{VmBuilder, VmHandle, VmPhase, VmRegistry};
pub use worker::{ReentrantCall, TickFrame};
