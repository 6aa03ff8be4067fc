//! State-directory garbage collector.
//!
//! Deletion is driven by per-directory filename predicates rather than
//! blanket removal, so a misconfigured path cannot take out unrelated
//! content. The tracking directory `state/bundles/` is never touched.

use crate::config::UpdaterConfig;
use crate::error::UpdaterError;
use crate::hash;
use crate::report::Reporter;
use crate::state;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Clean modes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanOptions {
    /// Remove everything cacheable, including manifests the current
    /// version still references.
    pub all: bool,
    /// List what would be removed without removing it.
    pub dry_run: bool,
}

/// What the collector did (or would do, under dry-run).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanStats {
    /// Files and directories removed (or listed).
    pub files_removed: u32,
}

/// Clean the state directory.
///
/// Staged fullfile blobs, pack indicators, and delta manifests always go.
/// Cached manifests of the current version survive a default clean (only
/// their hash-hint copies are dropped) so routine cleaning does not force
/// a redownload; `all` removes them too.
pub fn clean_statedir(
    config: &UpdaterConfig,
    reporter: &dyn Reporter,
    options: CleanOptions,
) -> Result<CleanStats, UpdaterError> {
    let mut stats = CleanStats::default();

    let staged = state::staged_dir(config);
    remove_if(&staged, options.dry_run, reporter, &mut stats, |name| {
        hash::is_fullfile_name(name)
    })?;

    remove_if(
        &config.state_dir,
        options.dry_run,
        reporter,
        &mut stats,
        hash::is_pack_indicator_name,
    )?;

    remove_if(
        &config.state_dir,
        options.dry_run,
        reporter,
        &mut stats,
        hash::is_manifest_delta_name,
    )?;

    clean_staged_manifests(config, reporter, options, &mut stats)?;

    Ok(stats)
}

/// Remove entries of `path` for which `pred` returns true.
///
/// Directories are only removed when empty; failures are warned about and
/// counted as kept. A missing directory is simply nothing to clean.
fn remove_if(
    path: &Path,
    dry_run: bool,
    reporter: &dyn Reporter,
    stats: &mut CleanStats,
    pred: impl Fn(&str) -> bool,
) -> Result<(), UpdaterError> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(UpdaterError::CouldntListDir {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    for entry in entries {
        let entry = entry.map_err(|e| UpdaterError::CouldntListDir {
            path: path.to_path_buf(),
            source: e,
        })?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !pred(&name) {
            continue;
        }

        let file = entry.path();
        let Ok(meta) = fs::symlink_metadata(&file) else {
            warn!(path = %file.display(), "couldn't access entry");
            continue;
        };

        if dry_run {
            reporter.print(format_args!("{}", file.display()));
            stats.files_removed += 1;
            continue;
        }

        let removed = if meta.is_dir() {
            fs::remove_dir(&file)
        } else {
            fs::remove_file(&file)
        };
        match removed {
            Ok(()) => stats.files_removed += 1,
            Err(e) => warn!(path = %file.display(), error = %e, "couldn't remove file"),
        }
    }

    Ok(())
}

/// Clean cached manifests under the per-version directories.
fn clean_staged_manifests(
    config: &UpdaterConfig,
    reporter: &dyn Reporter,
    options: CleanOptions,
    stats: &mut CleanStats,
) -> Result<(), UpdaterError> {
    // Manifests referenced by the current version's MoM are kept on a
    // default clean. Reading the MoM text is best effort.
    let mom_contents = if options.all {
        None
    } else {
        match state::get_current_version(config) {
            Ok(version) => fs::read_to_string(state::mom_path(config, version)).ok(),
            Err(_) => {
                reporter.warn(format_args!("Unable to determine current OS version"));
                None
            }
        }
    };

    let entries = match fs::read_dir(&config.state_dir) {
        Ok(entries) => entries,
        Err(e) => {
            return Err(UpdaterError::CouldntListDir {
                path: config.state_dir.clone(),
                source: e,
            })
        }
    };

    for entry in entries.flatten() {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !hash::is_all_digits(&name) {
            continue;
        }

        let version_dir = entry.path();

        // Matching on the raw MoM text is deliberately loose: it may keep a
        // few extra manifests, never too few.
        if mom_contents
            .as_deref()
            .is_some_and(|contents| contents.contains(&name))
        {
            remove_if(
                &version_dir,
                options.dry_run,
                reporter,
                stats,
                hash::is_hashed_manifest_name,
            )?;
        } else {
            remove_if(
                &version_dir,
                options.dry_run,
                reporter,
                stats,
                hash::is_manifest_name,
            )?;
        }

        if !options.dry_run {
            let _ = fs::remove_dir(&version_dir);
        }
    }

    Ok(())
}
