//! HTTP transport abstraction.
//!
//! The engine never talks to the network directly: every fetch goes through
//! the [`Transport`] trait so tests can substitute an in-memory or on-disk
//! server. The caller owns the transport's lifecycle and passes it into the
//! core, one instance per run.

mod http;
pub mod retry;

pub use http::HttpTransport;

use std::future::Future;
use std::path::Path;
use thiserror::Error;

/// Transport-level failures, categorised for the retry policy.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Server answered with a non-success HTTP status.
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Connect or low-speed timeout.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// Local write failure while persisting a download.
    #[error("could not write download to {path}: {detail}")]
    Write { path: String, detail: String },

    /// Server rejected a Range request; resume must be disabled.
    #[error("range request rejected by server for {url}")]
    RangeNotSupported { url: String },

    /// Everything else: DNS, connection reset, TLS handshake, protocol.
    #[error("transport failure for {url}: {detail}")]
    Network { url: String, detail: String },

    /// The local client certificate could not be loaded.
    #[error("bad SSL client certificate: {0}")]
    BadCertificate(String),

    /// Building the HTTP client failed.
    #[error("failed to create HTTP client: {0}")]
    Client(String),
}

/// Download outcome categories driving the retry strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    /// Server delivered a partial body that was not asked for.
    PartialFile,
    /// HTTP 403.
    Forbidden,
    /// HTTP 404.
    NotFound,
    /// Local write failed.
    WriteError,
    /// Timed out.
    Timeout,
    /// Range not supported by the server.
    RangeError,
    /// Unspecified transport error.
    Error,
}

impl TransportError {
    /// Categorise this failure for retry decisions.
    pub fn status(&self) -> DownloadStatus {
        match self {
            Self::HttpStatus { status: 403, .. } => DownloadStatus::Forbidden,
            Self::HttpStatus { status: 404, .. } => DownloadStatus::NotFound,
            Self::HttpStatus { status: 206, .. } => DownloadStatus::PartialFile,
            Self::HttpStatus { .. } => DownloadStatus::Error,
            Self::Timeout { .. } => DownloadStatus::Timeout,
            Self::Write { .. } => DownloadStatus::WriteError,
            Self::RangeNotSupported { .. } => DownloadStatus::RangeError,
            Self::Network { .. } | Self::BadCertificate(_) | Self::Client(_) => {
                DownloadStatus::Error
            }
        }
    }

    /// True for HTTP 404, which callers often treat as "not there" rather
    /// than a failure (optional packs, optional signatures).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::HttpStatus { status: 404, .. })
    }
}

/// Async HTTP operations the engine needs.
///
/// Implementations must be `Send + Sync`; the download pipeline shares one
/// transport across its concurrent fetch tasks.
pub trait Transport: Send + Sync {
    /// Fetch a URL into memory.
    fn get(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// Fetch a URL to a file.
    ///
    /// With `resume` set and a partial file on disk, the request carries an
    /// HTTP Range header and appends. A server that rejects the range makes
    /// this return [`TransportError::RangeNotSupported`].
    fn get_to_file(
        &self,
        url: &str,
        dest: &Path,
        resume: bool,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
