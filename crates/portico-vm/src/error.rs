//! Host-facing errors and worker-fatal faults.
//!
//! Two severities, deliberately separate types:
//!
//! - [`VmError`] — returned to host callers from handle and registry
//!   operations. The instance is still usable (or can be made usable).
//! - [`VmFault`] — raised inside the worker; fatal to the instance.
//!   The worker thread exits and the instance must be discarded.
//!
//! Per-operation command failures (bad arguments, unknown objects)
//! are neither: they travel back to the host as ordinary error-result
//! values and never surface as `Err` anywhere.
//!
//! # Error codes
//!
//! | Code | Variant | Recoverable |
//! |------|---------|-------------|
//! | `VM_NOT_RUNNING` | [`VmError::NotRunning`] | yes |
//! | `VM_ALREADY_BOUND` | [`VmError::AlreadyBound`] | no |
//! | `VM_NOT_FOUND` | [`VmError::NotFound`] | no |
//! | `VM_UNKNOWN_COMMAND` | [`VmError::UnknownCommand`] | yes |
//! | `VM_ENGINE_OP` | [`VmError::Engine`] | delegated |
//! | `FAULT_ENGINE` | [`VmFault::Engine`] | no |
//! | `FAULT_HOST_GONE` | [`VmFault::HostGone`] | no |
//! | `FAULT_INTERNAL` | [`VmFault::Internal`] | no |

use portico_types::{EngineId, ErrorCode};
use thiserror::Error;

use crate::engine::{EngineError, EngineFault};

/// Errors returned to host callers by handle and registry operations.
#[derive(Debug, Clone, Error)]
pub enum VmError {
    /// The instance has no running worker: either no host endpoint has
    /// been bound yet, or the worker has already exited.
    #[error("vm is not running")]
    NotRunning,

    /// A host endpoint is already bound; binding starts the worker and
    /// can happen only once per instance.
    #[error("host endpoint already bound")]
    AlreadyBound,

    /// The registry has no instance under this id.
    #[error("vm not found: {0}")]
    NotFound(EngineId),

    /// A tick named a command no dispatch entry claims. Reported back
    /// to the sender as an error-result value by the wildcard handler.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// An engine operation invoked directly from the host side
    /// (context creation, global lookup) failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ErrorCode for VmError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotRunning => "VM_NOT_RUNNING",
            Self::AlreadyBound => "VM_ALREADY_BOUND",
            Self::NotFound(_) => "VM_NOT_FOUND",
            Self::UnknownCommand(_) => "VM_UNKNOWN_COMMAND",
            Self::Engine(_) => "VM_ENGINE_OP",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::NotRunning | Self::UnknownCommand(_) => true,
            Self::AlreadyBound | Self::NotFound(_) => false,
            Self::Engine(e) => e.is_recoverable(),
        }
    }
}

/// Fatal conditions inside the worker.
///
/// A fault propagates out of every tick-loop frame, the worker thread
/// exits, and the instance is marked faulted. No partial recovery is
/// attempted mid-dispatch.
#[derive(Debug, Clone, Error)]
pub enum VmFault {
    /// The engine reported an unrecoverable failure (including hard
    /// abort via `terminate`).
    #[error("engine fault: {0}")]
    Engine(#[from] EngineFault),

    /// The bound host endpoint has been dropped; results and callback
    /// requests can no longer be delivered.
    #[error("host endpoint disconnected")]
    HostGone,

    /// An internal invariant was broken.
    #[error("internal fault: {0}")]
    Internal(String),
}

impl ErrorCode for VmFault {
    fn code(&self) -> &'static str {
        match self {
            Self::Engine(_) => "FAULT_ENGINE",
            Self::HostGone => "FAULT_HOST_GONE",
            Self::Internal(_) => "FAULT_INTERNAL",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}
