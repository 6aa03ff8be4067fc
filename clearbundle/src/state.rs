//! State-directory layout and system probes.
//!
//! Layout under the writable state root:
//!
//! ```text
//! state/version                  last known version marker
//! state/<version>/Manifest.MoM   cached manifests per version
//! state/staged/<hash>            content-addressed blobs
//! state/pack-*-from-*-to-*.tar   pack indicators (empty)
//! state/bundles/<bundle>         tracking files (zero byte)
//! ```

use crate::config::UpdaterConfig;
use crate::error::UpdaterError;
use crate::hash::ContentHash;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Directory holding cached manifests for one version.
pub fn version_dir(config: &UpdaterConfig, version: u32) -> PathBuf {
    config.state_dir.join(version.to_string())
}

/// Cached `Manifest.MoM` path for a version.
pub fn mom_path(config: &UpdaterConfig, version: u32) -> PathBuf {
    version_dir(config, version).join("Manifest.MoM")
}

/// Detached signature next to the cached MoM.
pub fn mom_sig_path(config: &UpdaterConfig, version: u32) -> PathBuf {
    version_dir(config, version).join("Manifest.MoM.sig")
}

/// Cached plain bundle manifest path.
pub fn bundle_manifest_path(config: &UpdaterConfig, version: u32, component: &str) -> PathBuf {
    version_dir(config, version).join(format!("Manifest.{component}"))
}

/// Hash-hint manifest path (`Manifest.<bundle>.<hash>`).
pub fn hashed_manifest_path(
    config: &UpdaterConfig,
    version: u32,
    component: &str,
    hash: &ContentHash,
) -> PathBuf {
    version_dir(config, version).join(format!("Manifest.{component}.{hash}"))
}

/// The staged-content directory, keyed by hash.
pub fn staged_dir(config: &UpdaterConfig) -> PathBuf {
    config.state_dir.join("staged")
}

/// Path of a staged blob.
pub fn staged_path(config: &UpdaterConfig, hash: &ContentHash) -> PathBuf {
    staged_dir(config).join(hash.to_string())
}

/// Tracking directory for manually installed bundles.
pub fn tracking_dir(config: &UpdaterConfig) -> PathBuf {
    config.state_dir.join("bundles")
}

/// Empty indicator recording that a pack has been applied.
pub fn pack_indicator_path(config: &UpdaterConfig, bundle: &str, from: u32, to: u32) -> PathBuf {
    config
        .state_dir
        .join(format!("pack-{bundle}-from-{from}-to-{to}.tar"))
}

/// Marker file holding the last version this client operated against.
pub fn version_marker_path(config: &UpdaterConfig) -> PathBuf {
    config.state_dir.join("version")
}

/// Create the writable state skeleton if missing.
pub fn ensure_state_layout(config: &UpdaterConfig) -> Result<(), UpdaterError> {
    for dir in [
        config.state_dir.clone(),
        staged_dir(config),
        tracking_dir(config),
    ] {
        fs::create_dir_all(&dir).map_err(|e| UpdaterError::io(&dir, e))?;
    }
    Ok(())
}

/// Record the version the client last operated against. Best effort.
pub fn write_version_marker(config: &UpdaterConfig, version: u32) {
    let path = version_marker_path(config);
    if let Err(e) = fs::write(&path, format!("{version}\n")) {
        debug!(path = %path.display(), error = %e, "could not write version marker");
    }
}

/// Read back the last recorded version, if any.
pub fn read_version_marker(config: &UpdaterConfig) -> Option<u32> {
    let content = fs::read_to_string(version_marker_path(config)).ok()?;
    content.trim().parse().ok()
}

/// Probe the current OS version from `<prefix>/usr/lib/os-release`.
///
/// Accepts both `VERSION_ID=20` and `VERSION_ID="20"`.
pub fn get_current_version(config: &UpdaterConfig) -> Result<u32, UpdaterError> {
    let path = config.os_release_path();
    let content = fs::read_to_string(&path).map_err(|_| UpdaterError::CurrentVersionUnknown)?;

    for line in content.lines() {
        if let Some(value) = line.trim().strip_prefix("VERSION_ID=") {
            let value = value.trim().trim_matches('"');
            return value
                .parse()
                .map_err(|_| UpdaterError::CurrentVersionUnknown);
        }
    }
    Err(UpdaterError::CurrentVersionUnknown)
}
