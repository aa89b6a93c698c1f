//! Service dispatcher.
//!
//! [`Engine`] is the single entry point a transport calls: it maps a service
//! to either the git process invoker or one of the delegated LFS handlers,
//! applies the configured deadline, and records metrics.  All process-wide
//! inputs (git executable, ambient environment, fault sink) are held here and
//! passed down explicitly.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::fault::FaultSink;
use crate::git::{self, GitInvoker, ProcessContext, Service, ServiceCommand};
use crate::lfs::{Disabled, ExternalProgram, ServiceHandler};
use crate::metrics::ServiceMetrics;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    git: GitInvoker,
    lfs_transfer: Arc<dyn ServiceHandler>,
    lfs_authenticate: Arc<dyn ServiceHandler>,
    metrics: Option<ServiceMetrics>,
    timeout: Option<Duration>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Build an engine from loaded configuration, snapshotting the current
    /// process environment as the ambient environment.
    pub fn from_config(config: &Config) -> Self {
        let mut builder = Self::builder()
            .git_program(&config.git.program)
            .extend_env(config.git.env.clone())
            .stderr_capture_limit(config.git.stderr_capture_limit);
        if let Some(timeout) = config.git.timeout() {
            builder = builder.timeout(timeout);
        }
        if config.lfs.enabled {
            builder = builder
                .lfs_programs(&config.lfs.transfer_program, &config.lfs.authenticate_program);
        } else {
            builder = builder.disable_lfs();
        }
        builder.build()
    }

    pub fn git(&self) -> &GitInvoker {
        &self.git
    }

    /// Parse a wire service name and run it.
    ///
    /// Unknown names fail with
    /// [`ServiceError::UnsupportedService`](crate::error::ServiceError::UnsupportedService)
    /// before anything is started.
    pub async fn serve(
        &self,
        service_name: &str,
        cancel: &CancellationToken,
        cmd: ServiceCommand,
    ) -> Result<()> {
        let service = match service_name.parse::<Service>() {
            Ok(service) => service,
            Err(e) => {
                warn!(service = %service_name, "unsupported service requested");
                if let Some(metrics) = &self.metrics {
                    metrics.observe_rejected(&e);
                }
                return Err(e);
            }
        };
        self.handle(service, cancel, cmd).await
    }

    /// Run `service` for one request.
    pub async fn handle(
        &self,
        service: Service,
        cancel: &CancellationToken,
        cmd: ServiceCommand,
    ) -> Result<()> {
        let started = Instant::now();
        debug!(%service, dir = %cmd.dir.display(), "dispatching service");

        let scoped = self.timeout.map(|after| git::deadline(cancel, after));
        let token = scoped.as_ref().unwrap_or(cancel);

        let result = match service {
            Service::UploadPack | Service::UploadArchive | Service::ReceivePack => {
                self.git.run(service, token, cmd).await
            }
            Service::LfsTransfer => self.lfs_transfer.handle(token, cmd).await,
            Service::LfsAuthenticate => self.lfs_authenticate.handle(token, cmd).await,
        };

        if let Some(scoped) = scoped {
            scoped.cancel();
        }

        let elapsed = started.elapsed();
        match &result {
            Ok(()) => info!(%service, elapsed_ms = elapsed.as_millis() as u64, "service completed"),
            Err(e) => warn!(
                %service,
                outcome = e.outcome(),
                error = %e,
                elapsed_ms = elapsed.as_millis() as u64,
                "service failed"
            ),
        }
        if let Some(metrics) = &self.metrics {
            metrics.observe(service.as_str(), &result, elapsed);
        }

        result
    }

    pub async fn upload_pack(&self, cancel: &CancellationToken, cmd: ServiceCommand) -> Result<()> {
        self.handle(Service::UploadPack, cancel, cmd).await
    }

    pub async fn upload_archive(
        &self,
        cancel: &CancellationToken,
        cmd: ServiceCommand,
    ) -> Result<()> {
        self.handle(Service::UploadArchive, cancel, cmd).await
    }

    pub async fn receive_pack(&self, cancel: &CancellationToken, cmd: ServiceCommand) -> Result<()> {
        self.handle(Service::ReceivePack, cancel, cmd).await
    }

    pub async fn lfs_transfer(&self, cancel: &CancellationToken, cmd: ServiceCommand) -> Result<()> {
        self.handle(Service::LfsTransfer, cancel, cmd).await
    }

    pub async fn lfs_authenticate(
        &self,
        cancel: &CancellationToken,
        cmd: ServiceCommand,
    ) -> Result<()> {
        self.handle(Service::LfsAuthenticate, cancel, cmd).await
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct EngineBuilder {
    program: PathBuf,
    ctx: ProcessContext,
    lfs_transfer_program: PathBuf,
    lfs_authenticate_program: PathBuf,
    lfs_transfer: Option<Arc<dyn ServiceHandler>>,
    lfs_authenticate: Option<Arc<dyn ServiceHandler>>,
    metrics: Option<ServiceMetrics>,
    timeout: Option<Duration>,
}

impl EngineBuilder {
    fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
            ctx: ProcessContext::from_process_env(),
            lfs_transfer_program: PathBuf::from(Service::LfsTransfer.as_str()),
            lfs_authenticate_program: PathBuf::from(Service::LfsAuthenticate.as_str()),
            lfs_transfer: None,
            lfs_authenticate: None,
            metrics: None,
            timeout: None,
        }
    }

    pub fn git_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Replace the ambient environment snapshot.
    pub fn ambient_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.ctx.ambient_env = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Append entries to the ambient environment.
    pub fn extend_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.ctx.ambient_env = self
            .ctx
            .ambient_env
            .iter()
            .cloned()
            .chain(vars.into_iter().map(|(k, v)| (k.into(), v.into())))
            .collect();
        self
    }

    pub fn fault_sink(mut self, faults: Arc<dyn FaultSink>) -> Self {
        self.ctx.faults = faults;
        self
    }

    pub fn stderr_capture_limit(mut self, limit: usize) -> Self {
        self.ctx.stderr_capture_limit = limit;
        self
    }

    pub fn lfs_transfer(mut self, handler: Arc<dyn ServiceHandler>) -> Self {
        self.lfs_transfer = Some(handler);
        self
    }

    pub fn lfs_authenticate(mut self, handler: Arc<dyn ServiceHandler>) -> Self {
        self.lfs_authenticate = Some(handler);
        self
    }

    pub fn metrics(mut self, metrics: ServiceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Serve both LFS services with the given executables.  Replaces any
    /// handler set earlier; the handlers are built with the final process
    /// context.
    pub fn lfs_programs(
        mut self,
        transfer: impl Into<PathBuf>,
        authenticate: impl Into<PathBuf>,
    ) -> Self {
        self.lfs_transfer_program = transfer.into();
        self.lfs_authenticate_program = authenticate.into();
        self.lfs_transfer = None;
        self.lfs_authenticate = None;
        self
    }

    /// Reject both LFS services as unsupported.
    pub fn disable_lfs(self) -> Self {
        self.lfs_transfer(Arc::new(Disabled(Service::LfsTransfer)))
            .lfs_authenticate(Arc::new(Disabled(Service::LfsAuthenticate)))
    }

    pub fn build(self) -> Engine {
        let ctx = self.ctx;
        let lfs_transfer = self.lfs_transfer.unwrap_or_else(|| {
            Arc::new(ExternalProgram::new(
                Service::LfsTransfer,
                self.lfs_transfer_program,
                ctx.clone(),
            ))
        });
        let lfs_authenticate = self.lfs_authenticate.unwrap_or_else(|| {
            Arc::new(ExternalProgram::new(
                Service::LfsAuthenticate,
                self.lfs_authenticate_program,
                ctx.clone(),
            ))
        });
        Engine {
            git: GitInvoker::new(self.program, ctx),
            lfs_transfer,
            lfs_authenticate,
            metrics: self.metrics,
            timeout: self.timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
