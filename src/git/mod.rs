//! Supervised execution of git wire-protocol services.
//!
//! The three pack/archive services shell out to the `git` binary through
//! [`invoker::GitInvoker`]; the request descriptor, stream pipeline and
//! service naming live alongside it.

pub mod cancel;
pub mod command;
pub mod invoker;
mod pipeline;
pub mod service;

pub use cancel::deadline;
pub use command::{parse_env_entry, InputStream, OutputStream, PreStartHook, ServiceCommand};
pub use invoker::{GitInvoker, ProcessContext, DEFAULT_STDERR_CAPTURE_LIMIT, SAFETY_FLAGS};
pub use service::Service;
