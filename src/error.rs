//! Error taxonomy for supervised service execution.
//!
//! Every failure a caller can observe is one of the [`ServiceError`]
//! variants.  The classifier functions in this module turn raw OS and
//! process outcomes into that taxonomy so the transport layer can tell a
//! missing repository (answer "not found") from an internal failure.

use std::fmt;
use std::io;
use std::process::ExitStatus;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

// ---------------------------------------------------------------------------
// Stream identity
// ---------------------------------------------------------------------------

/// Which of the child's standard streams a copy fault occurred on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Taxonomy
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The requested service name is not one of the known services.
    #[error("unsupported service: {0}")]
    UnsupportedService(String),

    /// The working directory or the executable does not exist.
    #[error("invalid repository")]
    InvalidRepository,

    #[error("failed to start process: {0}")]
    Start(#[source] io::Error),

    #[error("failed to wait for process: {0}")]
    Wait(#[source] io::Error),

    /// The process ran and exited unsuccessfully.
    #[error("{}", exit_message(.status, .stderr))]
    Exit { status: ExitStatus, stderr: String },

    /// Best-effort byte shuttling failed.  Reported through the fault sink,
    /// never returned from an invocation.
    #[error("failed to copy {stream}: {source}")]
    StreamCopy {
        stream: StreamKind,
        #[source]
        source: io::Error,
    },

    #[error("service invocation cancelled")]
    Cancelled,

    /// Failure raised by a delegated (non-process) service handler.
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

fn exit_message(status: &ExitStatus, stderr: &str) -> String {
    if stderr.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {stderr}")
    }
}

impl ServiceError {
    /// Whether a caller may reasonably try the same request again.
    ///
    /// Only failures of the process machinery itself qualify; a missing
    /// repository or a protocol-level exit failure will not change on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Start(_) | Self::Wait(_))
    }

    /// Short, stable label used for metrics and structured logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::UnsupportedService(_) => "unsupported",
            Self::InvalidRepository => "invalid_repository",
            Self::Start(_) => "start_error",
            Self::Wait(_) => "wait_error",
            Self::Exit { .. } => "exit_error",
            Self::StreamCopy { .. } => "stream_copy_error",
            Self::Cancelled => "cancelled",
            Self::Handler(_) => "handler_error",
        }
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

fn is_missing_path(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// Classify a failure to spawn the child process.
pub(crate) fn classify_spawn(err: io::Error) -> ServiceError {
    if is_missing_path(&err) {
        ServiceError::InvalidRepository
    } else {
        ServiceError::Start(err)
    }
}

/// Classify a failure while waiting on a started child.
pub(crate) fn classify_wait(err: io::Error) -> ServiceError {
    if is_missing_path(&err) {
        ServiceError::InvalidRepository
    } else {
        ServiceError::Wait(err)
    }
}

/// Turn an exit status plus whatever stderr was captured into a result.
pub(crate) fn classify_exit(status: ExitStatus, captured_stderr: &[u8]) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(captured_stderr).trim_end().to_string();
    Err(ServiceError::Exit { status, stderr })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
