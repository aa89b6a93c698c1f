//! Concurrent byte shuttling between caller streams and child pipes.
//!
//! stdin is fed by a detached task that closes the pipe when the caller's
//! source is exhausted.  It is never awaited, but it is aborted once the
//! child has exited so an idle client cannot pin the pipe or its own input.
//! stdout and stderr each get their own task and are joined before the
//! child is waited on, so a full pipe buffer can never hold up process exit.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument, Span};

use crate::error::{ServiceError, StreamKind};
use crate::fault::FaultSink;

use super::command::{InputStream, OutputStream};

const COPY_BUF_SIZE: usize = 32 * 1024;

pub(crate) struct Pipeline {
    stdin: Option<JoinHandle<()>>,
    stdout: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

impl Pipeline {
    /// Attach the caller's streams to whichever of the child's pipes were
    /// opened and start copying.
    pub(crate) fn start(
        child: &mut Child,
        input: Option<InputStream>,
        output: Option<OutputStream>,
        error_output: Option<OutputStream>,
        faults: Arc<dyn FaultSink>,
        stderr_capture_limit: usize,
    ) -> Self {
        let stdin = match (input, child.stdin.take()) {
            (Some(input), Some(pipe)) => Some(tokio::spawn(
                feed_stdin(input, pipe, Arc::clone(&faults)).instrument(Span::current()),
            )),
            _ => None,
        };

        let stdout = match (output, child.stdout.take()) {
            (Some(sink), Some(pipe)) => {
                let faults = Arc::clone(&faults);
                Some(tokio::spawn(
                    async move {
                        forward(pipe, sink, StreamKind::Stdout, 0, faults.as_ref()).await;
                    }
                    .instrument(Span::current()),
                ))
            }
            _ => None,
        };

        let stderr = match (error_output, child.stderr.take()) {
            (Some(sink), Some(pipe)) => {
                let faults = Arc::clone(&faults);
                Some(tokio::spawn(
                    async move {
                        forward(
                            pipe,
                            sink,
                            StreamKind::Stderr,
                            stderr_capture_limit,
                            faults.as_ref(),
                        )
                        .await
                    }
                    .instrument(Span::current()),
                ))
            }
            _ => None,
        };

        Self {
            stdin,
            stdout,
            stderr,
        }
    }

    /// Wait until both output copiers have finished.  Returns the tail of
    /// stderr captured along the way.
    pub(crate) async fn drain(&mut self) -> Vec<u8> {
        let Self { stdout, stderr, .. } = self;

        let stdout = async {
            if let Some(handle) = stdout.as_mut() {
                if let Err(e) = handle.await {
                    warn!(error = %e, "stdout copier did not complete");
                }
            }
        };
        let stderr = async {
            match stderr.as_mut() {
                Some(handle) => handle.await.unwrap_or_else(|e| {
                    warn!(error = %e, "stderr copier did not complete");
                    Vec::new()
                }),
                None => Vec::new(),
            }
        };

        let ((), captured) = tokio::join!(stdout, stderr);
        captured
    }

    /// Stop every copier, including the detached stdin feeder.  Dropping
    /// the feeder closes the child's stdin pipe and releases the caller's
    /// input.
    pub(crate) fn abort(&mut self) {
        if let Some(handle) = self.stdin.take() {
            handle.abort();
        }
        if let Some(handle) = self.stdout.take() {
            handle.abort();
        }
        if let Some(handle) = self.stderr.take() {
            handle.abort();
        }
    }
}

impl Drop for Pipeline {
    // No copier outlives the invocation, including the stdin feeder.
    fn drop(&mut self) {
        self.abort();
    }
}

/// Copy the caller's input into the child and close the pipe afterwards.
async fn feed_stdin(mut input: InputStream, mut pipe: ChildStdin, faults: Arc<dyn FaultSink>) {
    match tokio::io::copy(&mut input, &mut pipe).await {
        Ok(n) => debug!(bytes = n, "stdin exhausted"),
        Err(e) => faults.report(&ServiceError::StreamCopy {
            stream: StreamKind::Stdin,
            source: e,
        }),
    }
    if let Err(e) = pipe.shutdown().await {
        debug!(error = %e, "failed to flush stdin pipe");
    }
    // Dropping the pipe signals EOF to the child.
}

/// Copy a child pipe into the caller's sink, keeping the last
/// `capture_limit` bytes.
///
/// If the sink fails the pipe keeps being read and discarded so the child
/// cannot block on a full buffer.
async fn forward<R>(
    mut pipe: R,
    mut sink: OutputStream,
    stream: StreamKind,
    capture_limit: usize,
    faults: &dyn FaultSink,
) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut captured = Vec::new();
    let mut sink_ok = true;

    loop {
        let n = match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                faults.report(&ServiceError::StreamCopy { stream, source: e });
                break;
            }
        };

        if capture_limit > 0 {
            captured.extend_from_slice(&buf[..n]);
            if captured.len() > capture_limit {
                let excess = captured.len() - capture_limit;
                captured.drain(..excess);
            }
        }

        if sink_ok {
            if let Err(e) = sink.write_all(&buf[..n]).await {
                faults.report(&ServiceError::StreamCopy { stream, source: e });
                sink_ok = false;
            }
        }
    }

    if sink_ok {
        if let Err(e) = sink.flush().await {
            faults.report(&ServiceError::StreamCopy { stream, source: e });
        }
    }

    captured
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FailingWriter, RecordingFaults, SharedBuf};

    #[tokio::test]
    async fn forward_copies_everything_without_capture() {
        let data = vec![7u8; 200_000];
        let out = SharedBuf::default();
        let faults = RecordingFaults::default();

        let captured = forward(
            std::io::Cursor::new(data.clone()),
            Box::new(out.clone()),
            StreamKind::Stdout,
            0,
            &faults,
        )
        .await;

        assert!(captured.is_empty());
        assert_eq!(out.contents(), data);
        assert!(faults.messages().is_empty());
    }

    #[tokio::test]
    async fn forward_keeps_only_the_tail() {
        let out = SharedBuf::default();
        let faults = RecordingFaults::default();

        let captured = forward(
            std::io::Cursor::new(b"0123456789".to_vec()),
            Box::new(out.clone()),
            StreamKind::Stderr,
            4,
            &faults,
        )
        .await;

        assert_eq!(captured, b"6789");
        assert_eq!(out.contents(), b"0123456789");
    }

    #[tokio::test]
    async fn forward_reports_sink_failure_and_keeps_draining() {
        let faults = RecordingFaults::default();

        let captured = forward(
            std::io::Cursor::new(b"fatal: oops".to_vec()),
            Box::new(FailingWriter),
            StreamKind::Stderr,
            1024,
            &faults,
        )
        .await;

        assert_eq!(captured, b"fatal: oops");
        let messages = faults.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("failed to copy stderr"));
    }
}
