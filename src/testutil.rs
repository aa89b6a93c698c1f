//! Shared helpers for unit tests.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::ServiceError;
use crate::fault::FaultSink;

/// In-memory sink whose contents stay readable after it has been moved
/// into an invocation.
#[derive(Clone, Default)]
pub(crate) struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub(crate) fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl AsyncWrite for SharedBuf {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Sink that rejects every write.
pub(crate) struct FailingWriter;

impl AsyncWrite for FailingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Input from a client that never sends anything and never hangs up.
/// The flag flips once the reader has been dropped.
#[derive(Default)]
pub(crate) struct IdleInput(Arc<AtomicBool>);

impl IdleInput {
    pub(crate) fn dropped(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

impl AsyncRead for IdleInput {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl Drop for IdleInput {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Poll `flag` until it is set or `within` elapses.
pub(crate) async fn eventually(flag: &AtomicBool, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while !flag.load(Ordering::SeqCst) {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    true
}

#[derive(Default)]
pub(crate) struct RecordingFaults(Mutex<Vec<String>>);

impl RecordingFaults {
    pub(crate) fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl FaultSink for RecordingFaults {
    fn report(&self, fault: &ServiceError) {
        self.0.lock().unwrap().push(fault.to_string());
    }
}

/// Shell script standing in for the `git` executable.  Its behaviour is
/// selected by `FAKE_GIT_MODE` in the child's environment.
#[cfg(unix)]
const FAKE_GIT: &str = r#"#!/bin/sh
case "$FAKE_GIT_MODE" in
  args)
    for a in "$@"; do printf '%s\n' "$a"; done
    ;;
  cat)
    cat
    ;;
  env)
    printf '%s' "$FAKE_GIT_VALUE"
    ;;
  pwd)
    pwd
    ;;
  both)
    printf 'out:%s' "$FAKE_GIT_VALUE"
    printf 'err:%s' "$FAKE_GIT_VALUE" >&2
    ;;
  fail)
    printf 'fatal: not a git repository' >&2
    exit 128
    ;;
  flood)
    head -c 1048576 /dev/zero
    head -c 262144 /dev/zero >&2
    ;;
  sleep)
    printf '%s\n' "$$"
    exec sleep 30
    ;;
esac
"#;

/// Write the fake git script into `dir` and return its path.
#[cfg(unix)]
pub(crate) fn fake_git(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("git");
    std::fs::write(&path, FAKE_GIT).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Whether a process with `pid` still exists.
#[cfg(unix)]
pub(crate) fn process_alive(pid: &str) -> bool {
    std::process::Command::new("kill")
        .args(["-0", pid])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
