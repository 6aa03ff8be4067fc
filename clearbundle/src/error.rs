//! Error taxonomy and process exit codes.
//!
//! Library APIs return [`UpdaterError`]; the CLI maps each error to one of
//! the fixed numeric [`ExitCode`]s via [`UpdaterError::exit_code`].

use crate::hash::ContentHash;
use crate::manifest::ManifestError;
use crate::transport::TransportError;
use std::path::PathBuf;
use thiserror::Error;

/// Closed set of process exit codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    #[default]
    Ok = 0,
    RequiredBundle = 2,
    InvalidBundle = 3,
    CouldntLoadMom = 4,
    CouldntRemoveFile = 5,
    RecurseManifest = 8,
    BundleNotTracked = 12,
    CouldntLoadManifest = 13,
    InvalidOption = 14,
    CouldntListDir = 18,
    CurrentVersionUnknown = 19,
    TimeUnknown = 21,
    DiskSpace = 22,
    BadCert = 24,
    Unexpected = 25,
}

impl ExitCode {
    /// Numeric process exit status.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Errors produced by the update engine.
#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error("unable to determine current OS version")]
    CurrentVersionUnknown,

    #[error("unable to download/verify {version} Manifest.MoM")]
    CouldntLoadMom {
        version: u32,
        #[source]
        source: Box<UpdaterError>,
    },

    #[error("unable to load manifest for bundle \"{bundle}\" version {version}")]
    CouldntLoadManifest {
        bundle: String,
        version: u32,
        #[source]
        source: Box<UpdaterError>,
    },

    #[error("cannot load MoM sub-manifests")]
    RecurseManifest(#[source] Box<UpdaterError>),

    #[error("bundle \"{0}\" is invalid")]
    InvalidBundle(String),

    #[error("bundle \"{0}\" is not tracked on this system")]
    BundleNotTracked(String),

    #[error("bundle \"{0}\" is required by other installed bundles")]
    RequiredBundle(String),

    #[error("bundle too large: {needed} bytes needed, {available} available")]
    DiskSpace { needed: u64, available: u64 },

    #[error("could not remove file {path}")]
    CouldntRemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not list directory {path}")]
    CouldntListDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest {name} not found on server for version {version}")]
    ManifestNotFound { name: String, version: u32 },

    #[error("hash mismatch for {name}: expected {expected}, got {actual}")]
    HashMismatch {
        name: String,
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("signature verification failed for Manifest.MoM version {version}")]
    BadSignature { version: u32 },

    #[error("failed to download {failed} fullfile(s)")]
    FullfileDownload { failed: usize },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected condition: {0}")]
    Unexpected(String),
}

impl UpdaterError {
    /// Attach path context to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Map this error to its process exit code.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::CurrentVersionUnknown => ExitCode::CurrentVersionUnknown,
            Self::CouldntLoadMom { .. } | Self::BadSignature { .. } => ExitCode::CouldntLoadMom,
            Self::CouldntLoadManifest { .. }
            | Self::ManifestNotFound { .. }
            | Self::HashMismatch { .. }
            | Self::Manifest(_) => ExitCode::CouldntLoadManifest,
            Self::RecurseManifest(_) => ExitCode::RecurseManifest,
            Self::InvalidBundle(_) => ExitCode::InvalidBundle,
            Self::BundleNotTracked(_) => ExitCode::BundleNotTracked,
            Self::RequiredBundle(_) => ExitCode::RequiredBundle,
            Self::DiskSpace { .. } => ExitCode::DiskSpace,
            Self::CouldntRemoveFile { .. } => ExitCode::CouldntRemoveFile,
            Self::CouldntListDir { .. } => ExitCode::CouldntListDir,
            Self::Transport(e) => match e {
                TransportError::BadCertificate(_) => ExitCode::BadCert,
                _ => ExitCode::Unexpected,
            },
            Self::FullfileDownload { .. } | Self::Io { .. } | Self::Unexpected(_) => {
                ExitCode::Unexpected
            }
        }
    }
}
