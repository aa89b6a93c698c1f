//! Large-file (LFS) services.
//!
//! `git-lfs-transfer` and `git-lfs-authenticate` are not git subcommands;
//! the [`Engine`](crate::engine::Engine) delegates them to a
//! [`ServiceHandler`] so their protocol logic can live outside process
//! supervision.  [`ExternalProgram`] is the stock implementation: it runs a
//! dedicated executable under the same supervision as git itself.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, ServiceError};
use crate::git::invoker::{base_command, supervise};
use crate::git::{ProcessContext, Service, ServiceCommand};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Anything able to serve a request with the [`ServiceCommand`] contract.
#[async_trait::async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn handle(&self, cancel: &CancellationToken, cmd: ServiceCommand) -> Result<()>;
}

// ---------------------------------------------------------------------------
// External program
// ---------------------------------------------------------------------------

/// Serve an LFS service by running `program [args...]` in the request
/// directory.
///
/// Unlike the git services no configuration flags and no trailing `.` are
/// added; the caller's arguments are passed verbatim.
pub struct ExternalProgram {
    service: Service,
    program: PathBuf,
    ctx: ProcessContext,
}

impl ExternalProgram {
    pub fn new(service: Service, program: impl Into<PathBuf>, ctx: ProcessContext) -> Self {
        Self {
            service,
            program: program.into(),
            ctx,
        }
    }
}

#[async_trait::async_trait]
impl ServiceHandler for ExternalProgram {
    async fn handle(&self, cancel: &CancellationToken, cmd: ServiceCommand) -> Result<()> {
        let mut command = base_command(&self.program, &cmd, &self.ctx);
        command.args(&cmd.args);
        supervise(self.service, command, cmd, &self.ctx, cancel).await
    }
}

/// Handler for deployments that do not serve large files at all
/// (`lfs.enabled: false`).
#[derive(Debug, Clone, Copy)]
pub struct Disabled(pub Service);

#[async_trait::async_trait]
impl ServiceHandler for Disabled {
    async fn handle(&self, _cancel: &CancellationToken, _cmd: ServiceCommand) -> Result<()> {
        Err(ServiceError::UnsupportedService(self.0.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
