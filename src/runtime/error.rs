//! Fatal errors and the warning channel.
//!
//! Nothing on the allocation or reference-counting paths returns a
//! recoverable error. A broken heap invariant cannot be continued past, so
//! every condition here ends the process (a panic, which the release profile
//! turns into an abort). Recoverable anomalies go to [`warning_message`].

use std::fmt;

use thiserror::Error;

const ENOMEM: i32 = 12;
const EINVAL: i32 = 22;
const ENOSYS: i32 = 38;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("out of memory: cannot allocate {size} bytes")]
    OutOfMemory { size: usize },
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl FatalError {
    /// errno-style code reported with the message.
    pub fn code(&self) -> i32 {
        match self {
            FatalError::OutOfMemory { .. } => ENOMEM,
            FatalError::Unsupported(_) => ENOSYS,
            FatalError::Internal(_) => EINVAL,
        }
    }
}

/// Reports an unrecoverable condition and never returns.
#[cold]
#[track_caller]
pub fn fatal_error(err: FatalError) -> ! {
    let code = err.code();
    tracing::error!(code, "{err}");
    panic!("fatal error [{code}]: {err}");
}

/// Non-fatal warning channel.
#[cold]
pub fn warning_message(args: fmt::Arguments<'_>) {
    tracing::warn!("{args}");
}

/// Raised when generated code invokes an operation this build does not provide.
#[cold]
#[track_caller]
pub fn unsupported_external(msg: &str) -> ! {
    fatal_error(FatalError::Unsupported(msg.to_string()))
}
