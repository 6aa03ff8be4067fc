//! Updater configuration.
//!
//! The engine keeps no module-level state: everything an operation needs is
//! carried by an [`UpdaterConfig`] constructed once by the front-end. Two
//! engines can run in-process against distinct roots.

use std::path::{Path, PathBuf};

/// Default maximum download retries per URL.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default initial delay between retries, in seconds.
pub const DEFAULT_RETRY_DELAY_SECS: u32 = 10;

/// Default number of concurrent fullfile downloads.
pub const DEFAULT_MAX_PARALLEL_DOWNLOADS: usize = 8;

/// Manifest format the client speaks.
pub const DEFAULT_FORMAT: u32 = 1;

/// Configuration record threaded through the core APIs.
///
/// Built with `UpdaterConfig::new` plus `with_*` setters:
///
/// ```
/// use clearbundle::config::UpdaterConfig;
///
/// let config = UpdaterConfig::new("/", "/var/lib/clearbundle")
///     .with_content_url("https://cdn.example.com/update")
///     .with_max_retries(5);
/// assert_eq!(config.max_retries, 5);
/// ```
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Installation root of the live tree (usually `/`).
    pub path_prefix: PathBuf,
    /// Writable state root (manifest cache, staged content, tracking files).
    pub state_dir: PathBuf,
    /// Base URL for content downloads (manifests, fullfiles, packs).
    pub content_url: String,
    /// Base URL for version queries.
    pub version_url: String,
    /// Manifest format the client expects.
    pub format: u32,
    /// Maximum download retries per URL; 0 disables retrying.
    pub max_retries: u32,
    /// Initial delay before a delayed retry, in seconds.
    pub retry_delay: u32,
    /// Concurrency cap for the fullfile download fan-out.
    pub max_parallel_downloads: usize,
    /// Skip the free-space check before installing.
    pub skip_diskspace_check: bool,
    /// Require a valid detached signature on the MoM.
    pub sigcheck: bool,
    /// Path prefixes the installer must never touch.
    pub ignored_paths: Vec<String>,
}

impl UpdaterConfig {
    /// Create a configuration for the given live root and state directory.
    pub fn new(path_prefix: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            state_dir: state_dir.into(),
            content_url: String::new(),
            version_url: String::new(),
            format: DEFAULT_FORMAT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY_SECS,
            max_parallel_downloads: DEFAULT_MAX_PARALLEL_DOWNLOADS,
            skip_diskspace_check: false,
            sigcheck: false,
            ignored_paths: Vec::new(),
        }
    }

    /// Set the content download URL.
    pub fn with_content_url(mut self, url: impl Into<String>) -> Self {
        self.content_url = url.into();
        self
    }

    /// Set the version query URL.
    pub fn with_version_url(mut self, url: impl Into<String>) -> Self {
        self.version_url = url.into();
        self
    }

    /// Set both URLs to the same base.
    pub fn with_url(self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.with_content_url(url.clone()).with_version_url(url)
    }

    /// Set the maximum number of download retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the initial retry delay in seconds.
    pub fn with_retry_delay(mut self, secs: u32) -> Self {
        self.retry_delay = secs;
        self
    }

    /// Set the fullfile download concurrency cap.
    pub fn with_max_parallel_downloads(mut self, n: usize) -> Self {
        self.max_parallel_downloads = n.max(1);
        self
    }

    /// Skip the pre-install free-space check.
    pub fn with_skip_diskspace_check(mut self, skip: bool) -> Self {
        self.skip_diskspace_check = skip;
        self
    }

    /// Require MoM signature verification.
    pub fn with_sigcheck(mut self, sigcheck: bool) -> Self {
        self.sigcheck = sigcheck;
        self
    }

    /// Add a path prefix the installer must leave alone.
    pub fn with_ignored_path(mut self, prefix: impl Into<String>) -> Self {
        self.ignored_paths.push(prefix.into());
        self
    }

    /// Resolve an absolute manifest path (leading `/`) under the live root.
    pub fn target_path(&self, filename: &str) -> PathBuf {
        self.path_prefix.join(filename.trim_start_matches('/'))
    }

    /// URL of a file below the content base, e.g. `20/Manifest.MoM`.
    pub fn content_file_url(&self, rel: &str) -> String {
        format!("{}/{}", self.content_url.trim_end_matches('/'), rel)
    }
}

impl UpdaterConfig {
    /// Live-tree path of the image-installed bundle tracking seed.
    pub fn image_bundles_dir(&self) -> PathBuf {
        self.path_prefix.join("usr/share/clear/bundles")
    }

    /// Live-tree path of the os-release file used for the version probe.
    pub fn os_release_path(&self) -> PathBuf {
        self.path_prefix.join("usr/lib/os-release")
    }

    /// Optional SSL client certificate the transport presents when found.
    pub fn client_cert_path(&self) -> PathBuf {
        self.path_prefix.join("etc/swupd/client.pem")
    }
}

/// True if `filename` starts with any of the configured ignore prefixes.
pub fn is_ignored(config: &UpdaterConfig, filename: &str) -> bool {
    config
        .ignored_paths
        .iter()
        .any(|prefix| filename.starts_with(prefix.as_str()))
}

impl UpdaterConfig {
    /// Helper for tests and callers that only care about roots.
    pub fn for_roots(path_prefix: &Path, state_dir: &Path) -> Self {
        Self::new(path_prefix, state_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = UpdaterConfig::new("/", "/var/lib/clearbundle");
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.retry_delay, DEFAULT_RETRY_DELAY_SECS);
        assert_eq!(config.max_parallel_downloads, DEFAULT_MAX_PARALLEL_DOWNLOADS);
        assert!(!config.skip_diskspace_check);
        assert!(!config.sigcheck);
        assert!(config.ignored_paths.is_empty());
    }

    #[test]
    fn test_builder_setters() {
        let config = UpdaterConfig::new("/target", "/state")
            .with_url("https://cdn.example.com/update/")
            .with_max_retries(1)
            .with_retry_delay(2)
            .with_skip_diskspace_check(true)
            .with_ignored_path("/usr/src");

        assert_eq!(config.content_url, config.version_url);
        assert_eq!(config.max_retries, 1);
        assert!(config.skip_diskspace_check);
        assert!(is_ignored(&config, "/usr/src/debug/foo"));
        assert!(!is_ignored(&config, "/usr/bin/foo"));
    }

    #[test]
    fn test_target_path_strips_leading_slash() {
        let config = UpdaterConfig::new("/target", "/state");
        assert_eq!(
            config.target_path("/usr/bin/test"),
            PathBuf::from("/target/usr/bin/test")
        );
    }

    #[test]
    fn test_content_file_url_normalizes_slashes() {
        let config =
            UpdaterConfig::new("/", "/state").with_content_url("https://cdn.example.com/update/");
        assert_eq!(
            config.content_file_url("20/Manifest.MoM"),
            "https://cdn.example.com/update/20/Manifest.MoM"
        );
    }

    #[test]
    fn test_parallel_downloads_floor() {
        let config = UpdaterConfig::new("/", "/state").with_max_parallel_downloads(0);
        assert_eq!(config.max_parallel_downloads, 1);
    }
}
