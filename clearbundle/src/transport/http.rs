//! reqwest-backed transport.

use crate::config::UpdaterConfig;
use crate::transport::{Transport, TransportError};
use reqwest::header::RANGE;
use reqwest::StatusCode;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Per-request connect timeout.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Low-speed timeout: a transfer stalled this long is abandoned.
const LOW_SPEED_TIMEOUT_SECS: u64 = 120;

/// HTTP transport over a pooled async client.
///
/// One instance serves the whole run; the fullfile pipeline issues its
/// concurrent GETs through the shared connection pool.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    bytes_transferred: AtomicU64,
}

impl HttpTransport {
    /// Build a transport for this configuration.
    ///
    /// If an SSL client certificate exists at the configured live-tree
    /// location it is presented on every request; a certificate that is
    /// present but unreadable or malformed fails construction.
    pub fn new(config: &UpdaterConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .read_timeout(Duration::from_secs(LOW_SPEED_TIMEOUT_SECS))
            .user_agent(format!("clearbundle/{}", crate::VERSION))
            .tcp_keepalive(Duration::from_secs(30));

        let cert_path = config.client_cert_path();
        if cert_path.exists() {
            debug!(path = %cert_path.display(), "using SSL client certificate");
            let pem = std::fs::read(&cert_path)
                .map_err(|e| TransportError::BadCertificate(e.to_string()))?;
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| TransportError::BadCertificate(e.to_string()))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self {
            client,
            bytes_transferred: AtomicU64::new(0),
        })
    }

    /// Bytes downloaded over the lifetime of this transport.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    fn request_error(url: &str, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                url: url.to_string(),
            }
        } else {
            TransportError::Network {
                url: url.to_string(),
                detail: err.to_string(),
            }
        }
    }

    fn write_error(dest: &Path, err: std::io::Error) -> TransportError {
        TransportError::Write {
            path: dest.display().to_string(),
            detail: err.to_string(),
        }
    }
}

impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        trace!(url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::request_error(url, e))?;

        let status = response.status();
        if !status.is_success() || status == StatusCode::PARTIAL_CONTENT {
            // 206 without a range request means a truncated body
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::request_error(url, e))?;
        self.bytes_transferred
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        trace!(url, bytes = bytes.len(), "GET complete");
        Ok(bytes.to_vec())
    }

    async fn get_to_file(
        &self,
        url: &str,
        dest: &Path,
        resume: bool,
    ) -> Result<(), TransportError> {
        let offset = if resume {
            match std::fs::metadata(dest) {
                Ok(meta) if meta.len() > 0 => Some(meta.len()),
                _ => None,
            }
        } else {
            None
        };

        let mut request = self.client.get(url);
        if let Some(offset) = offset {
            debug!(url, offset, "resuming download");
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Self::request_error(url, e))?;

        let status = response.status();
        let append = match (status, offset) {
            (StatusCode::PARTIAL_CONTENT, Some(_)) => true,
            // server ignored the range request, take the whole body
            (StatusCode::OK, _) => false,
            (StatusCode::RANGE_NOT_SATISFIABLE, _) => {
                return Err(TransportError::RangeNotSupported {
                    url: url.to_string(),
                })
            }
            (s, _) => {
                warn!(url, status = s.as_u16(), "download failed");
                return Err(TransportError::HttpStatus {
                    status: s.as_u16(),
                    url: url.to_string(),
                });
            }
        };

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::request_error(url, e))?;
        self.bytes_transferred
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);

        let mut file = OpenOptions::new()
            .create(true)
            .append(append)
            .write(true)
            .truncate(!append)
            .open(dest)
            .map_err(|e| Self::write_error(dest, e))?;
        file.write_all(&bytes)
            .map_err(|e| Self::write_error(dest, e))?;

        debug!(url, dest = %dest.display(), bytes = bytes.len(), append, "download complete");
        Ok(())
    }
}
