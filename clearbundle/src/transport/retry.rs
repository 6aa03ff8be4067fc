//! Retry policy for downloads.
//!
//! Failures fall into three buckets: not worth retrying (the server said no,
//! or the local disk is the problem), retry immediately (rare transient
//! faults), and retry after an exponentially growing delay (connectivity).

use crate::config::UpdaterConfig;
use crate::transport::{DownloadStatus, Transport, TransportError};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Backoff multiplier applied after each delayed retry.
pub const DELAY_MULTIPLIER: u32 = 2;

/// Ceiling for the retry delay, in seconds.
pub const MAX_DELAY: u32 = 60;

/// What to do after a failed download attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    DontRetry,
    RetryNow,
    RetryWithDelay,
}

/// Classify a failure status into a retry strategy.
pub fn determine_strategy(status: DownloadStatus) -> RetryStrategy {
    match status {
        DownloadStatus::Forbidden | DownloadStatus::NotFound | DownloadStatus::WriteError => {
            RetryStrategy::DontRetry
        }
        DownloadStatus::RangeError | DownloadStatus::PartialFile => RetryStrategy::RetryNow,
        DownloadStatus::Error | DownloadStatus::Timeout => RetryStrategy::RetryWithDelay,
    }
}

/// Retry limits taken from the configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries per URL; 0 disables retrying.
    pub max_retries: u32,
    /// Initial delay in seconds for delayed retries.
    pub retry_delay: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &UpdaterConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        }
    }
}

/// Session-wide switch for HTTP range resume.
///
/// Starts enabled; the first server range rejection turns it off for the
/// rest of the run.
#[derive(Debug)]
pub struct ResumeControl(AtomicBool);

impl Default for ResumeControl {
    fn default() -> Self {
        Self(AtomicBool::new(true))
    }
}

impl ResumeControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn disable(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Download `url` to `dest`, applying the retry policy.
///
/// With `resume_ok`, an existing partial file is resumed via HTTP Range
/// until the server rejects a range request, which disables resume for the
/// whole session and restarts this download from scratch. Without
/// `resume_ok`, a failed attempt deletes the partial file.
pub async fn get_file_with_retry<T: Transport + ?Sized>(
    transport: &T,
    url: &str,
    dest: &Path,
    resume_ok: bool,
    policy: &RetryPolicy,
    resume: &ResumeControl,
) -> Result<(), TransportError> {
    let mut current_retry = 0u32;
    let mut sleep_time = policy.retry_delay;

    loop {
        let attempt_resume = resume_ok && resume.is_enabled();
        let err = match transport.get_to_file(url, dest, attempt_resume).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        let status = err.status();
        if status == DownloadStatus::RangeError && resume.is_enabled() {
            // The server cannot serve ranges; restart from scratch without
            // counting this as a retry, and stop resuming for the session.
            info!(url, "server rejected range request, download resume disabled");
            resume.disable();
            let _ = std::fs::remove_file(dest);
            continue;
        }

        if !resume_ok {
            let _ = std::fs::remove_file(dest);
        }

        let strategy = determine_strategy(status);
        if strategy == RetryStrategy::DontRetry {
            return Err(err);
        }

        if policy.max_retries == 0 {
            info!("download retries are disabled");
            return Err(err);
        }
        current_retry += 1;
        if current_retry > policy.max_retries {
            warn!(url, "maximum number of retries reached");
            return Err(err);
        }

        if strategy == RetryStrategy::RetryWithDelay && sleep_time > 0 {
            info!(seconds = sleep_time, "waiting before retrying the download");
            tokio::time::sleep(Duration::from_secs(u64::from(sleep_time))).await;
        }
        if strategy == RetryStrategy::RetryWithDelay {
            sleep_time = (sleep_time * DELAY_MULTIPLIER).min(MAX_DELAY);
        }
        info!(url, retry = current_retry, "retrying download");
    }
}
