//! The closed set of git wire-protocol services.

use std::fmt;
use std::str::FromStr;

use crate::error::ServiceError;

/// A git daemon service, identified on the wire by its `git-` prefixed name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    UploadPack,
    UploadArchive,
    ReceivePack,
    LfsTransfer,
    LfsAuthenticate,
}

impl Service {
    pub const ALL: [Service; 5] = [
        Service::UploadPack,
        Service::UploadArchive,
        Service::ReceivePack,
        Service::LfsTransfer,
        Service::LfsAuthenticate,
    ];

    /// Canonical wire name, e.g. `git-upload-pack`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UploadPack => "git-upload-pack",
            Self::UploadArchive => "git-upload-archive",
            Self::ReceivePack => "git-receive-pack",
            Self::LfsTransfer => "git-lfs-transfer",
            Self::LfsAuthenticate => "git-lfs-authenticate",
        }
    }

    /// Wire name with the `git-` prefix stripped.  For process-backed
    /// services this is the subcommand handed to the git executable.
    pub fn name(&self) -> &'static str {
        let wire = self.as_str();
        wire.strip_prefix("git-").unwrap_or(wire)
    }

    /// Whether the service runs as a supervised `git` subprocess rather than
    /// through a delegated handler.
    pub fn is_process_backed(&self) -> bool {
        matches!(
            self,
            Self::UploadPack | Self::UploadArchive | Self::ReceivePack
        )
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Service::ALL
            .into_iter()
            .find(|svc| svc.as_str() == s)
            .ok_or_else(|| ServiceError::UnsupportedService(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_strip_prefix() {
        assert_eq!(Service::UploadPack.name(), "upload-pack");
        assert_eq!(Service::UploadArchive.name(), "upload-archive");
        assert_eq!(Service::ReceivePack.name(), "receive-pack");
        assert_eq!(Service::LfsTransfer.name(), "lfs-transfer");
        assert_eq!(Service::LfsAuthenticate.name(), "lfs-authenticate");
    }

    #[test]
    fn parse_accepts_every_wire_name() {
        for svc in Service::ALL {
            assert_eq!(svc.to_string().parse::<Service>().unwrap(), svc);
        }
    }

    #[test]
    fn parse_rejects_short_and_unknown_names() {
        for bad in ["upload-pack", "git-frobnicate", "", "GIT-UPLOAD-PACK"] {
            match bad.parse::<Service>() {
                Err(ServiceError::UnsupportedService(name)) => assert_eq!(name, bad),
                other => panic!("expected unsupported service for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn only_pack_and_archive_services_are_process_backed() {
        let backed: Vec<_> = Service::ALL
            .into_iter()
            .filter(Service::is_process_backed)
            .collect();
        assert_eq!(
            backed,
            vec![
                Service::UploadPack,
                Service::UploadArchive,
                Service::ReceivePack
            ]
        );
    }
}
