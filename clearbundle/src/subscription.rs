//! Subscriptions and bundle tracking.
//!
//! A subscription is the in-memory record that a bundle is part of the
//! working set for the current operation. The on-disk projection has two
//! homes: the image bundles directory under the live root (one entry per
//! installed bundle, owned by bundle content itself) and the state tracking
//! directory (one zero-byte file per *manually* installed bundle).

use crate::config::UpdaterConfig;
use crate::error::UpdaterError;
use crate::manifest::Manifest;
use crate::state;
use std::fs;
use std::path::Path;
use tracing::debug;

/// A bundle in the current working set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Bundle name.
    pub component: String,
    /// Version the bundle manifest should be fetched at.
    pub version: u32,
    /// Version dependencies were last computed from (0 for fresh installs).
    pub version_deps_from: u32,
}

impl Subscription {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            version: 0,
            version_deps_from: 0,
        }
    }
}

/// True if `name` is already in the subscription list.
pub fn component_subscribed(subs: &[Subscription], name: &str) -> bool {
    subs.iter().any(|s| s.component == name)
}

/// Append a fresh subscription for `name`.
pub fn create_and_append_subscription(subs: &mut Vec<Subscription>, name: &str) {
    subs.push(Subscription::new(name));
}

/// Drop `name` from the subscription list.
pub fn unload_tracked_bundle(
    subs: &mut Vec<Subscription>,
    name: &str,
) -> Result<(), UpdaterError> {
    let before = subs.len();
    subs.retain(|s| s.component != name);
    if subs.len() == before {
        return Err(UpdaterError::BundleNotTracked(name.to_string()));
    }
    Ok(())
}

/// Point every subscription at the version its bundle last changed,
/// according to the MoM. Bundles unknown to the MoM are left untouched and
/// skipped later by reconciliation.
pub fn set_subscription_versions(mom: &Manifest, subs: &mut [Subscription]) {
    for sub in subs.iter_mut() {
        if let Some(entry) = mom.search_bundle(&sub.component) {
            sub.version = entry.last_change;
        }
    }
}

/// Filesystem-backed view of installed and tracked bundles.
pub struct TrackingStore<'a> {
    config: &'a UpdaterConfig,
}

impl<'a> TrackingStore<'a> {
    pub fn new(config: &'a UpdaterConfig) -> Self {
        Self { config }
    }

    /// True if `bundle` is installed on the target system.
    ///
    /// Installed bundles carry their own entry in the image bundles
    /// directory (it is part of the bundle's content).
    pub fn is_installed(&self, bundle: &str) -> bool {
        self.config.image_bundles_dir().join(bundle).exists()
    }

    /// Load one subscription per installed bundle, sorted by name.
    ///
    /// A missing image bundles directory just means nothing is installed.
    pub fn read_subscriptions(&self) -> Result<Vec<Subscription>, UpdaterError> {
        let dir = self.config.image_bundles_dir();
        let names = list_dir_sorted(&dir)?;
        Ok(names.into_iter().map(Subscription::new).collect())
    }

    /// Bundle names in the state tracking directory, sorted.
    ///
    /// Bootstraps the tracking directory from the image first if it is
    /// missing or empty, so a fresh state directory still reflects what the
    /// image installed.
    pub fn tracked_bundles(&self) -> Result<Vec<String>, UpdaterError> {
        self.bootstrap_tracking_dir();
        let dir = state::tracking_dir(self.config);
        match fs::read_dir(&dir) {
            Ok(_) => list_dir_sorted(&dir),
            Err(e) => Err(UpdaterError::CouldntListDir {
                path: dir,
                source: e,
            }),
        }
    }

    /// Record `bundle` as manually installed. Best effort: any weird state
    /// in the tracking directory is tolerated.
    pub fn track_installed(&self, bundle: &str) {
        self.bootstrap_tracking_dir();

        let tracking_file = state::tracking_dir(self.config).join(bundle);
        if let Err(e) = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&tracking_file)
        {
            debug!(bundle, error = %e, "could not create tracking file");
        }
    }

    /// Drop the tracking file for `bundle`, ignoring all failures.
    pub fn remove_tracked(&self, bundle: &str) {
        let tracking_file = state::tracking_dir(self.config).join(bundle);
        if let Err(e) = fs::remove_file(&tracking_file) {
            debug!(bundle, error = %e, "could not remove tracking file");
        }
    }

    /// First-time setup: copy the image tracking seed into the state
    /// tracking directory so bundles installed with the image count as
    /// manually installed. The `.MoM` marker that lives in the image
    /// directory is not a bundle and is dropped.
    fn bootstrap_tracking_dir(&self) {
        let dst = state::tracking_dir(self.config);
        if is_populated_dir(&dst) {
            return;
        }

        let _ = fs::remove_dir_all(&dst);
        if fs::create_dir_all(&dst).is_err() {
            return;
        }

        let src = self.config.image_bundles_dir();
        let Ok(entries) = fs::read_dir(&src) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name == ".MoM" {
                continue;
            }
            let _ = fs::File::create(dst.join(&name));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&dst, fs::Permissions::from_mode(0o700));
        }
    }
}

fn is_populated_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn list_dir_sorted(dir: &Path) -> Result<Vec<String>, UpdaterError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(UpdaterError::CouldntListDir {
                path: dir.to_path_buf(),
                source: e,
            })
        }
    };

    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    Ok(names)
}
