//! bundle-add: install bundles and their include closure.

use crate::alias::{get_alias_bundles, get_alias_definitions};
use crate::config::UpdaterConfig;
use crate::consolidate::{
    consolidate_files, files_from_bundles, filter_out_deleted_files, filter_out_existing_files,
    total_contentsize,
};
use crate::deps::{add_subscriptions, recurse_manifest};
use crate::diskspace::check_disk_space_availability;
use crate::download::{revalidate_staged, DownloadPipeline, PACK_THRESHOLD};
use crate::error::{ExitCode, UpdaterError};
use crate::install::Installer;
use crate::manifest::ManifestStore;
use crate::report::Reporter;
use crate::scripts::PostUpdateHook;
use crate::state;
use crate::subscription::{set_subscription_versions, TrackingStore};
use crate::transport::Transport;
use std::sync::Arc;
use tracing::debug;

/// Result of a bundle-add run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOutcome {
    /// Bundles named on the command line (after alias expansion).
    pub requested: usize,
    /// Requested bundles newly installed.
    pub installed: usize,
    /// Requested bundles that were already installed.
    pub already_installed: usize,
    /// Requested bundles that could not be installed.
    pub failed: usize,
    /// Exit code for the command.
    pub code: ExitCode,
}

/// Install one or more bundles.
///
/// Alias definitions are expanded first; invalid names are skipped (and
/// reported through the exit code) while valid ones still install.
pub async fn add_bundles<T: Transport + 'static>(
    config: &UpdaterConfig,
    transport: &Arc<T>,
    hook: &dyn PostUpdateHook,
    reporter: &dyn Reporter,
    requested: &[String],
) -> Result<AddOutcome, UpdaterError> {
    state::ensure_state_layout(config)?;

    let current_version = match state::get_current_version(config) {
        Ok(version) => version,
        Err(e) => {
            reporter.error(format_args!("Unable to determine current OS version"));
            return Err(e);
        }
    };

    let store = ManifestStore::new(config, &**transport);
    let mom = match store.load_mom(current_version, true).await {
        Ok(mom) => mom,
        Err(e) => {
            reporter.error(format_args!(
                "Cannot load official manifest MoM for version {current_version}"
            ));
            return Err(e);
        }
    };

    let aliases = get_alias_definitions(config);
    let mut bundles: Vec<String> = Vec::new();
    for name in requested {
        let expanded = get_alias_bundles(&aliases, name);
        if expanded.len() != 1 || expanded[0] != *name {
            reporter.info(format_args!(
                "Alias {} will install bundle(s): {}",
                name,
                expanded.join(", ")
            ));
        }
        for bundle in expanded {
            // a name listed twice installs once; the duplicate is already
            // covered by the first occurrence
            if bundles.contains(&bundle) {
                reporter.warn(format_args!(
                    "Bundle \"{bundle}\" is already installed, skipping it..."
                ));
                continue;
            }
            bundles.push(bundle);
        }
    }

    let outcome = install_bundles(config, &store, transport, hook, reporter, &bundles, &mom).await;
    if outcome.is_ok() {
        state::write_version_marker(config, current_version);
    }
    outcome
}

async fn install_bundles<T: Transport + 'static>(
    config: &UpdaterConfig,
    store: &ManifestStore<'_, T>,
    transport: &Arc<T>,
    hook: &dyn PostUpdateHook,
    reporter: &dyn Reporter,
    bundles: &[String],
    mom: &crate::manifest::Manifest,
) -> Result<AddOutcome, UpdaterError> {
    let tracking = TrackingStore::new(config);
    let requested = bundles.len();

    // Step 1: subscriptions for the bundles to be installed.
    reporter.info(format_args!("Loading required manifests..."));
    let mut subs = Vec::new();
    let resolved = add_subscriptions(store, bundles, &mut subs, mom, false).await?;

    let mut already_installed = 0;
    for bundle in bundles {
        if tracking.is_installed(bundle) {
            reporter.warn(format_args!(
                "Bundle \"{bundle}\" is already installed, skipping it..."
            ));
            already_installed += 1;
            // the user asked for it explicitly, so track it as manual
            tracking.track_installed(bundle);
        }
        if let Some(entry) = mom.search_bundle(bundle) {
            if entry.is_experimental {
                reporter.warn(format_args!("Bundle {bundle} is experimental"));
            }
        }
    }
    for bad in &resolved.bad_names {
        reporter.warn(format_args!("Bundle \"{bad}\" is invalid, skipping it..."));
    }

    if !resolved.new_subscriptions {
        if let Some(bad) = resolved.bad_names.first() {
            return Err(UpdaterError::InvalidBundle(bad.clone()));
        }
        // nothing to do: everything requested is already installed
        print_already_installed(reporter, already_installed);
        return Ok(AddOutcome {
            requested,
            installed: 0,
            already_installed,
            failed: 0,
            code: ExitCode::Ok,
        });
    }
    let invalid_bundle_provided = !resolved.bad_names.is_empty();

    set_subscription_versions(mom, &mut subs);

    let fail = |e: UpdaterError| {
        print_failed(reporter, requested, already_installed);
        Err(e)
    };

    // Step 2: consolidate files from bundles.
    let to_install_bundles = match recurse_manifest(store, mom, &subs, None).await {
        Ok(manifests) => manifests,
        Err(e) => {
            reporter.error(format_args!("Cannot load to install bundles"));
            return fail(e);
        }
    };

    let mut current_subs = tracking.read_subscriptions()?;
    set_subscription_versions(mom, &mut current_subs);
    let installed_bundles = match recurse_manifest(store, mom, &current_subs, None).await {
        Ok(manifests) => manifests,
        Err(e) => {
            reporter.error(format_args!("Cannot load installed bundles"));
            return fail(e);
        }
    };

    let installed_all = consolidate_files(files_from_bundles(&installed_bundles));
    // keep the consolidated installed view on the MoM for the rename-pass
    // fallback lookup
    let mut mom_ctx = mom.clone();
    mom_ctx.files = installed_all.iter().map(|e| e.file.clone()).collect();
    let installed_files = filter_out_deleted_files(installed_all);

    let to_install_files = filter_out_existing_files(
        filter_out_deleted_files(consolidate_files(files_from_bundles(&to_install_bundles))),
        &installed_files,
    );
    debug!(files = to_install_files.len(), "computed install work list");

    // Step 3: disk space.
    if let Err(e) = check_disk_space_availability(config, total_contentsize(&to_install_bundles)) {
        if let UpdaterError::DiskSpace { needed, available } = &e {
            reporter.error(format_args!(
                "Bundle too large by {}M.",
                (needed.saturating_sub(*available)) / 1000 / 1000
            ));
            reporter.info(format_args!(
                "NOTE: currently, only /usr/ (or the passed-in path with /usr/ appended) is checked for available space."
            ));
            reporter.info(format_args!(
                "To skip this error and install anyways, add the --skip-diskspace-check flag to your command."
            ));
        }
        return fail(e);
    }

    // Step 4: packs.
    let pipeline = DownloadPipeline::new(Arc::clone(transport));
    if to_install_files.len() > PACK_THRESHOLD {
        pipeline
            .download_subscribed_packs(config, mom, &subs)
            .await?;
    } else {
        reporter.info(format_args!("No packs need to be downloaded"));
    }

    // Step 5: fullfiles, after dropping any staged blob that went bad.
    revalidate_staged(config, &to_install_files)?;
    if let Err(e) = pipeline.download_fullfiles(config, &to_install_files).await {
        reporter.error(format_args!(
            "Could not download some files from bundles, aborting bundle installation."
        ));
        return fail(e);
    }

    // Step 6: install into the live tree.
    reporter.info(format_args!("Installing bundle(s) files..."));
    let mut work = to_install_files;
    let stats = match Installer::new(config).install_files(&mut work, &mom_ctx) {
        Ok(stats) => stats,
        Err(e) => return fail(e),
    };

    // Step 7: post-update scripts.
    let _ = hook.run(stats.updated_boot_files);

    let mut installed = 0;
    for manifest in &to_install_bundles {
        if bundles.iter().any(|b| *b == manifest.component) {
            installed += 1;
            tracking.track_installed(&manifest.component);
        }
    }

    let failed = requested.saturating_sub(installed + already_installed);
    if failed > 0 {
        reporter.print(format_args!(
            "Failed to install {} of {} bundles",
            failed,
            requested - already_installed
        ));
    } else if installed > 0 {
        reporter.print(format_args!(
            "Successfully installed {} bundle{}",
            installed,
            if installed > 1 { "s" } else { "" }
        ));
    }
    print_already_installed(reporter, already_installed);

    Ok(AddOutcome {
        requested,
        installed,
        already_installed,
        failed,
        code: if invalid_bundle_provided {
            ExitCode::InvalidBundle
        } else {
            ExitCode::Ok
        },
    })
}

fn print_already_installed(reporter: &dyn Reporter, already_installed: usize) {
    if already_installed > 0 {
        reporter.print(format_args!(
            "{} bundle{} already installed",
            already_installed,
            if already_installed > 1 { "s were" } else { " was" }
        ));
    }
}

fn print_failed(reporter: &dyn Reporter, requested: usize, already_installed: usize) {
    let failed = requested - already_installed;
    reporter.print(format_args!(
        "Failed to install {failed} of {failed} bundles"
    ));
}
