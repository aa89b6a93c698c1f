//! Reporting channel for best-effort stream faults.
//!
//! Copy failures between the caller's streams and the child's pipes never
//! change the outcome of an invocation (the exit status decides that), but
//! they still need to go somewhere.  The [`Engine`](crate::engine::Engine)
//! hands a [`FaultSink`] to every invocation explicitly.

use tracing::error;

use crate::error::ServiceError;

pub trait FaultSink: Send + Sync {
    fn report(&self, fault: &ServiceError);
}

/// Default sink: emit every fault as a `tracing` error event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFaultSink;

impl FaultSink for TracingFaultSink {
    fn report(&self, fault: &ServiceError) {
        match fault {
            ServiceError::StreamCopy { stream, source } => {
                error!(stream = %stream, error = %source, "failed to copy stream");
            }
            other => {
                error!(error = %other, outcome = other.outcome(), "service fault");
            }
        }
    }
}
