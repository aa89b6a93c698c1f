use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::git::DEFAULT_STDERR_CAPTURE_LIMIT;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub lfs: LfsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GitConfig {
    /// Executable used for upload-pack, upload-archive and receive-pack.
    #[serde(default = "default_git_program")]
    pub program: String,
    /// Number of trailing stderr bytes kept to enrich exit errors.
    #[serde(default = "default_stderr_capture_limit")]
    pub stderr_capture_limit: usize,
    /// Per-invocation deadline in seconds.  `0` disables it.
    #[serde(default)]
    pub timeout_secs: u64,
    /// Extra environment merged into every invocation, ahead of the
    /// request's own entries.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            program: default_git_program(),
            stderr_capture_limit: default_stderr_capture_limit(),
            timeout_secs: 0,
            env: BTreeMap::new(),
        }
    }
}

impl GitConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

fn default_git_program() -> String {
    "git".to_string()
}

fn default_stderr_capture_limit() -> usize {
    DEFAULT_STDERR_CAPTURE_LIMIT
}

// ---------------------------------------------------------------------------
// LFS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LfsConfig {
    /// When false both LFS services are rejected as unsupported.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_transfer_program")]
    pub transfer_program: String,
    #[serde(default = "default_authenticate_program")]
    pub authenticate_program: String,
}

impl Default for LfsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            transfer_program: default_transfer_program(),
            authenticate_program: default_authenticate_program(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_transfer_program() -> String {
    "git-lfs-transfer".to_string()
}

fn default_authenticate_program() -> String {
    "git-lfs-authenticate".to_string()
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    parse_config(&contents)
        .with_context(|| format!("failed to load config file: {}", path.display()))
}

/// Parse and validate a [`Config`] from YAML text.
pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(contents).context("invalid config YAML")?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(!config.git.program.is_empty(), "git.program must not be empty");
    anyhow::ensure!(
        config.git.stderr_capture_limit > 0,
        "git.stderr_capture_limit must be greater than zero"
    );
    anyhow::ensure!(
        !config.lfs.transfer_program.is_empty() && !config.lfs.authenticate_program.is_empty(),
        "lfs programs must not be empty"
    );
    for key in config.git.env.keys() {
        anyhow::ensure!(
            !key.is_empty() && !key.contains('='),
            "invalid environment key in git.env: {key:?}"
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config.git.program, "git");
        assert_eq!(config.git.stderr_capture_limit, DEFAULT_STDERR_CAPTURE_LIMIT);
        assert_eq!(config.git.timeout(), None);
        assert!(config.lfs.enabled);
        assert_eq!(config.lfs.transfer_program, "git-lfs-transfer");
        assert_eq!(config.lfs.authenticate_program, "git-lfs-authenticate");
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn full_document_parses() {
        let config = parse_config(
            r#"
git:
  program: /usr/libexec/git-core/git
  stderr_capture_limit: 4096
  timeout_secs: 600
  env:
    GIT_CONFIG_NOSYSTEM: "1"
lfs:
  transfer_program: /usr/local/bin/git-lfs-transfer
log:
  format: pretty
"#,
        )
        .unwrap();
        assert_eq!(config.git.program, "/usr/libexec/git-core/git");
        assert_eq!(config.git.stderr_capture_limit, 4096);
        assert_eq!(config.git.timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.git.env.get("GIT_CONFIG_NOSYSTEM").map(String::as_str), Some("1"));
        assert_eq!(config.lfs.transfer_program, "/usr/local/bin/git-lfs-transfer");
        assert_eq!(config.lfs.authenticate_program, "git-lfs-authenticate");
        assert_eq!(config.log.format, LogFormat::Pretty);
    }

    #[test]
    fn lfs_can_be_switched_off() {
        let config = parse_config("lfs:\n  enabled: false\n").unwrap();
        assert!(!config.lfs.enabled);
        assert_eq!(config.lfs.transfer_program, "git-lfs-transfer");
    }

    #[test]
    fn rejects_zero_capture_limit() {
        let err = parse_config("git:\n  stderr_capture_limit: 0\n").unwrap_err();
        assert!(err.to_string().contains("stderr_capture_limit"));
    }

    #[test]
    fn rejects_bad_env_key() {
        assert!(parse_config("git:\n  env:\n    \"A=B\": x\n").is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = load_config("/nonexistent/forgeserve.yaml").unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
