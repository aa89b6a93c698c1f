//! The per-invocation request descriptor.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;

/// Byte source fed to the child's stdin.
pub type InputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Byte sink receiving the child's stdout or stderr.
pub type OutputStream = Box<dyn AsyncWrite + Send + Unpin>;

/// Last-mile adjustment of the fully configured, not yet spawned child.
///
/// Runs exactly once, strictly before the process starts.
pub type PreStartHook = Box<dyn FnOnce(&mut Command) + Send>;

/// Everything needed to run one service request.
///
/// A `ServiceCommand` is built by the transport immediately before the call
/// and consumed by it; it is never reused or shared between invocations.
pub struct ServiceCommand {
    pub stdin: Option<InputStream>,
    pub stdout: Option<OutputStream>,
    pub stderr: Option<OutputStream>,
    /// Repository directory the child runs in.  Never defaulted.
    pub dir: PathBuf,
    /// Merged over the ambient environment; later entries win.
    pub env: Vec<(String, String)>,
    /// Inserted after the subcommand and before the trailing `.` argument.
    pub args: Vec<String>,
    pub pre_start: Option<PreStartHook>,
}

impl ServiceCommand {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            stdin: None,
            stdout: None,
            stderr: None,
            dir: dir.into(),
            env: Vec::new(),
            args: Vec::new(),
            pre_start: None,
        }
    }

    pub fn stdin(mut self, input: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.stdin = Some(Box::new(input));
        self
    }

    pub fn stdout(mut self, output: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stdout = Some(Box::new(output));
        self
    }

    pub fn stderr(mut self, output: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stderr = Some(Box::new(output));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn pre_start(mut self, hook: impl FnOnce(&mut Command) + Send + 'static) -> Self {
        self.pre_start = Some(Box::new(hook));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl fmt::Debug for ServiceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCommand")
            .field("dir", &self.dir)
            .field("args", &self.args)
            .field("env_keys", &self.env.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("pre_start", &self.pre_start.is_some())
            .finish()
    }
}

/// Parse a `KEY=VALUE` environment entry.
///
/// Returns `None` when there is no `=` or the key is empty.
pub fn parse_env_entry(entry: &str) -> Option<(String, String)> {
    let (key, value) = entry.split_once('=')?;
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_order() {
        let cmd = ServiceCommand::new("/srv/repos/acme.git")
            .arg("--stateless-rpc")
            .args(["--advertise-refs", "--strict"])
            .env("GIT_PROTOCOL", "version=2")
            .envs([("A", "1"), ("A", "2")]);

        assert_eq!(cmd.dir(), Path::new("/srv/repos/acme.git"));
        assert_eq!(
            cmd.args,
            vec!["--stateless-rpc", "--advertise-refs", "--strict"]
        );
        assert_eq!(
            cmd.env,
            vec![
                ("GIT_PROTOCOL".to_string(), "version=2".to_string()),
                ("A".to_string(), "1".to_string()),
                ("A".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn debug_hides_env_values() {
        let cmd = ServiceCommand::new("/tmp").env("TOKEN", "hunter2");
        let dbg = format!("{cmd:?}");
        assert!(dbg.contains("TOKEN"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn parse_env_entry_splits_on_first_equals() {
        assert_eq!(
            parse_env_entry("GIT_PROTOCOL=version=2"),
            Some(("GIT_PROTOCOL".to_string(), "version=2".to_string()))
        );
        assert_eq!(
            parse_env_entry("EMPTY="),
            Some(("EMPTY".to_string(), String::new()))
        );
        assert_eq!(parse_env_entry("NOEQUALS"), None);
        assert_eq!(parse_env_entry("=value"), None);
    }
}
