//! Supervised execution of git wire-protocol services.
//!
//! A transport (SSH, HTTP, git daemon) hands the [`Engine`] a service name
//! and a [`ServiceCommand`] describing the repository directory and the
//! client's streams.  The engine runs `git upload-pack`, `upload-archive` or
//! `receive-pack` as a child process, shuttles bytes between the client and
//! the child without buffering whole payloads, and reports the outcome as a
//! [`ServiceError`] the transport can map onto its own protocol.

pub mod config;
pub mod engine;
pub mod error;
pub mod fault;
pub mod git;
pub mod lfs;
pub mod metrics;

#[cfg(test)]
mod testutil;

pub use engine::{Engine, EngineBuilder};
pub use error::{ServiceError, StreamKind};
pub use fault::{FaultSink, TracingFaultSink};
pub use git::{Service, ServiceCommand};
pub use lfs::ServiceHandler;
