//! bundle-remove: uninstall bundles, keeping shared files alive.

use crate::config::UpdaterConfig;
use crate::consolidate::{consolidate_files, files_from_bundles, filter_out_shared_files};
use crate::deps::{recurse_manifest, required_by};
use crate::error::{ExitCode, UpdaterError};
use crate::manifest::{FileKind, ManifestStore};
use crate::report::Reporter;
use crate::state;
use crate::subscription::{set_subscription_versions, unload_tracked_bundle, TrackingStore};
use crate::transport::Transport;
use std::fs;
use tracing::{debug, warn};

/// Result of a bundle-remove run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOutcome {
    /// Bundles named on the command line.
    pub total: usize,
    /// Bundles removed.
    pub removed: usize,
    /// Bundles that could not be removed.
    pub failed: usize,
    /// Exit code: the first per-bundle failure, or OK.
    pub code: ExitCode,
}

/// Remove one or more bundles.
///
/// Each bundle is processed independently: a failure is recorded and the
/// remaining bundles are still attempted. Only files owned exclusively by
/// the removed bundle leave the live tree.
pub async fn remove_bundles<T: Transport>(
    config: &UpdaterConfig,
    transport: &T,
    reporter: &dyn Reporter,
    bundles: &[String],
) -> Result<RemoveOutcome, UpdaterError> {
    state::ensure_state_layout(config)?;

    let current_version = match state::get_current_version(config) {
        Ok(version) => version,
        Err(e) => {
            reporter.error(format_args!("Unable to determine current OS version"));
            return Err(e);
        }
    };

    let store = ManifestStore::new(config, transport);
    let tracking = TrackingStore::new(config);

    let mut outcome = RemoveOutcome {
        total: bundles.len(),
        ..RemoveOutcome::default()
    };
    let mut first_error: Option<ExitCode> = None;

    for bundle in bundles {
        if bundles.len() > 1 {
            reporter.info(format_args!("Removing bundle: {bundle}"));
        }
        match remove_one(config, &store, &tracking, reporter, bundle, current_version).await {
            Ok(()) => outcome.removed += 1,
            Err(e) => {
                outcome.failed += 1;
                first_error.get_or_insert(e.exit_code());
            }
        }
    }

    if outcome.failed > 0 {
        reporter.print(format_args!(
            "Failed to remove {} of {} bundles",
            outcome.failed, outcome.total
        ));
    } else {
        reporter.print(format_args!(
            "Successfully removed {} bundle{}",
            outcome.total,
            if outcome.total > 1 { "s" } else { "" }
        ));
    }

    outcome.code = first_error.unwrap_or(ExitCode::Ok);
    Ok(outcome)
}

async fn remove_one<T: Transport>(
    config: &UpdaterConfig,
    store: &ManifestStore<'_, T>,
    tracking: &TrackingStore<'_>,
    reporter: &dyn Reporter,
    bundle: &str,
    current_version: u32,
) -> Result<(), UpdaterError> {
    // os-core holds the system together; removing it is never allowed
    if bundle == "os-core" {
        reporter.warn(format_args!(
            "Bundle \"os-core\" not allowed to be removed"
        ));
        return Err(UpdaterError::RequiredBundle(bundle.to_string()));
    }

    if !tracking.is_installed(bundle) {
        reporter.warn(format_args!(
            "Bundle \"{bundle}\" is not installed, skipping it..."
        ));
        return Err(UpdaterError::BundleNotTracked(bundle.to_string()));
    }

    let mom = match store.load_mom(current_version, true).await {
        Ok(mom) => mom,
        Err(e) => {
            reporter.error(format_args!(
                "Unable to download/verify {current_version} Manifest.MoM"
            ));
            return Err(e);
        }
    };

    let Some(entry) = mom.search_bundle(bundle) else {
        reporter.error(format_args!("Bundle name is invalid, aborting removal"));
        return Err(UpdaterError::InvalidBundle(bundle.to_string()));
    };

    // all installed bundles minus the one being removed
    let mut subs = tracking.read_subscriptions()?;
    unload_tracked_bundle(&mut subs, bundle)?;
    set_subscription_versions(&mom, &mut subs);

    let submanifests = match recurse_manifest(store, &mom, &subs, None).await {
        Ok(manifests) => manifests,
        Err(e) => {
            reporter.error(format_args!("Cannot load MoM sub-manifests"));
            return Err(e);
        }
    };
    let mut mom_ctx = mom.clone();
    mom_ctx.submanifests = submanifests;

    let dependants = required_by(&mom_ctx, bundle);
    if !dependants.is_empty() {
        reporter.error(format_args!(
            "bundle requested to be removed is required by the following bundles:"
        ));
        reporter.info(format_args!("format:"));
        reporter.info(format_args!(" # * is-required-by"));
        reporter.info(format_args!(" #   |-- is-required-by"));
        reporter.info(format_args!(" # * is-also-required-by"));
        reporter.info(format_args!(" # ..."));
        for line in &dependants {
            reporter.print(format_args!("{line}"));
        }
        return Err(UpdaterError::RequiredBundle(bundle.to_string()));
    }

    let survivors = consolidate_files(files_from_bundles(&mom_ctx.submanifests));

    let bundle_manifest = match store.load_bundle_manifest(&mom, entry).await {
        Ok(manifest) => manifest,
        Err(e) => {
            reporter.error(format_args!("Cannot load {bundle} sub-manifest"));
            return Err(e);
        }
    };

    let mut unique = filter_out_shared_files(bundle_manifest.files, &survivors);
    unique.sort_by(|a, b| a.filename.cmp(&b.filename));

    reporter.info(format_args!("Deleting bundle files..."));
    let removed = remove_files_from_fs(config, &unique);
    debug!(bundle, removed, "removed files from the live tree");

    tracking.remove_tracked(bundle);
    Ok(())
}

/// Unlink the given records from the live tree, best effort.
///
/// Files and links first, then directories deepest-first so emptied parents
/// can go too. Paths that are already gone count as success; everything
/// else is logged and skipped.
fn remove_files_from_fs(config: &UpdaterConfig, files: &[crate::manifest::FileRecord]) -> usize {
    let mut removed = 0;

    for file in files.iter().filter(|f| f.kind != FileKind::Directory) {
        let target = config.target_path(&file.filename);
        match fs::remove_file(&target) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %target.display(), error = %e, "could not remove file"),
        }
    }

    let mut dirs: Vec<_> = files
        .iter()
        .filter(|f| f.kind == FileKind::Directory)
        .collect();
    dirs.sort_by_key(|f| std::cmp::Reverse(f.filename.len()));
    for dir in dirs {
        let target = config.target_path(&dir.filename);
        match fs::remove_dir(&target) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!(path = %target.display(), error = %e, "directory not removed"),
        }
    }

    removed
}
