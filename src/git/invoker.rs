//! Construction and supervision of the child process behind a service.
//!
//! [`GitInvoker`] builds the `git` command line for the process-backed
//! services; [`supervise`] starts any prepared command, drives the stream
//! pipeline, waits for exit and classifies the outcome.  The large-file
//! handlers reuse [`supervise`] for their own executables.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{classify_exit, classify_spawn, classify_wait, Result, ServiceError};
use crate::fault::{FaultSink, TracingFaultSink};

use super::command::ServiceCommand;
use super::pipeline::Pipeline;
use super::service::Service;

/// Configuration flags passed ahead of every git service subcommand.
///
/// Partial-clone filtering and push options are switched on; the LFS
/// filter driver is neutralised because large files are served separately.
pub const SAFETY_FLAGS: [&str; 10] = [
    "-c",
    "uploadpack.allowFilter=true",
    "-c",
    "receive.advertisePushOptions=true",
    "-c",
    "filter.lfs.required=",
    "-c",
    "filter.lfs.smudge=",
    "-c",
    "filter.lfs.clean=",
];

/// Default number of trailing stderr bytes kept for exit errors.
pub const DEFAULT_STDERR_CAPTURE_LIMIT: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Process context
// ---------------------------------------------------------------------------

/// Process-wide inputs every invocation needs, passed in explicitly.
#[derive(Clone)]
pub struct ProcessContext {
    /// Environment the child starts from before request entries are merged.
    pub ambient_env: Arc<[(OsString, OsString)]>,
    pub faults: Arc<dyn FaultSink>,
    pub stderr_capture_limit: usize,
}

impl ProcessContext {
    /// Snapshot the current process environment.
    pub fn from_process_env() -> Self {
        Self {
            ambient_env: std::env::vars_os().collect(),
            faults: Arc::new(TracingFaultSink),
            stderr_capture_limit: DEFAULT_STDERR_CAPTURE_LIMIT,
        }
    }
}

impl Default for ProcessContext {
    fn default() -> Self {
        Self::from_process_env()
    }
}

/// Start a command for `program` in the request's directory with the
/// merged environment.  No arguments are added.
pub(crate) fn base_command(program: &Path, cmd: &ServiceCommand, ctx: &ProcessContext) -> Command {
    let mut command = Command::new(program);
    command.current_dir(&cmd.dir);
    command.env_clear();
    command.envs(ctx.ambient_env.iter().map(|(k, v)| (k, v)));
    command.envs(cmd.env.iter().map(|(k, v)| (k, v)));
    command
}

// ---------------------------------------------------------------------------
// Git invoker
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct GitInvoker {
    program: PathBuf,
    ctx: ProcessContext,
}

impl GitInvoker {
    pub fn new(program: impl Into<PathBuf>, ctx: ProcessContext) -> Self {
        Self {
            program: program.into(),
            ctx,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn context(&self) -> &ProcessContext {
        &self.ctx
    }

    /// Build the (not yet started) child for `service`:
    /// `git <SAFETY_FLAGS> <name> [args...] .`
    pub fn build_command(&self, service: Service, cmd: &ServiceCommand) -> Command {
        let mut command = base_command(&self.program, cmd, &self.ctx);
        command.args(SAFETY_FLAGS);
        command.arg(service.name());
        command.args(&cmd.args);
        command.arg(".");
        command
    }

    /// Run a process-backed service to completion.
    pub async fn run(
        &self,
        service: Service,
        cancel: &CancellationToken,
        cmd: ServiceCommand,
    ) -> Result<()> {
        if !service.is_process_backed() {
            return Err(ServiceError::UnsupportedService(service.to_string()));
        }
        let command = self.build_command(service, &cmd);
        supervise(service, command, cmd, &self.ctx, cancel).await
    }
}

// ---------------------------------------------------------------------------
// Supervision
// ---------------------------------------------------------------------------

fn stdio_for(requested: bool) -> Stdio {
    if requested {
        Stdio::piped()
    } else {
        Stdio::null()
    }
}

/// Start `command`, shuttle the request's streams and wait for exit.
///
/// The pre-start hook runs once on the fully configured command.  Pipes are
/// only opened for streams the caller supplied; the rest go to the null
/// device.  Cancelling `cancel` kills the child and aborts every copier.
#[instrument(skip_all, fields(service = %service, dir = %cmd.dir.display()))]
pub(crate) async fn supervise(
    service: Service,
    mut command: Command,
    mut cmd: ServiceCommand,
    ctx: &ProcessContext,
    cancel: &CancellationToken,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ServiceError::Cancelled);
    }

    if let Some(hook) = cmd.pre_start.take() {
        hook(&mut command);
    }

    command
        .stdin(stdio_for(cmd.stdin.is_some()))
        .stdout(stdio_for(cmd.stdout.is_some()))
        .stderr(stdio_for(cmd.stderr.is_some()))
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| {
        debug!(error = %e, "failed to spawn process");
        classify_spawn(e)
    })?;
    debug!(pid = ?child.id(), "process started");

    let mut pipeline = Pipeline::start(
        &mut child,
        cmd.stdin.take(),
        cmd.stdout.take(),
        cmd.stderr.take(),
        Arc::clone(&ctx.faults),
        ctx.stderr_capture_limit,
    );

    // Output must be fully drained before waiting, otherwise a child
    // blocked on a full pipe never exits.
    let finished = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        done = async {
            let captured = pipeline.drain().await;
            (child.wait().await, captured)
        } => Some(done),
    };

    let Some((status, captured)) = finished else {
        warn!("invocation cancelled; killing process");
        if let Err(e) = child.kill().await {
            debug!(error = %e, "failed to kill process");
        }
        pipeline.abort();
        return Err(ServiceError::Cancelled);
    };

    // The child is gone; whatever input is still pending has nowhere to go.
    pipeline.abort();

    let status = status.map_err(classify_wait)?;
    debug!(%status, "process exited");
    classify_exit(status, &captured)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
