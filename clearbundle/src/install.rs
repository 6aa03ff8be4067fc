//! Two-phase installer: stage, then rename.
//!
//! Pass 1 places every record next to its final location (`<path>.update`
//! for files and links, final name for directories). Pass 2 atomically
//! renames the staged copies over their final names. A crash between the
//! passes leaves the live tree untouched; leftover `.update` files are
//! reclaimed by `clean`. This split is the crash-safety contract and must
//! not be collapsed into a rename-per-file loop.

use crate::config::{is_ignored, UpdaterConfig};
use crate::consolidate::BundleFile;
use crate::download::staged_link_target;
use crate::error::UpdaterError;
use crate::manifest::{FileKind, FileRecord, Manifest};
use crate::state;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What an installation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallStats {
    /// Records staged and renamed.
    pub installed: usize,
    /// Records skipped by flags or ignore policy.
    pub skipped: usize,
    /// At least one boot file was updated.
    pub updated_boot_files: bool,
}

/// Installer bound to one configuration.
pub struct Installer<'a> {
    config: &'a UpdaterConfig,
}

impl<'a> Installer<'a> {
    pub fn new(config: &'a UpdaterConfig) -> Self {
        Self { config }
    }

    /// Install the consolidated work list into the live tree.
    ///
    /// `mom` is consulted during the rename pass for records some earlier
    /// phase staged through the MoM file list rather than the bundle list.
    pub fn install_files(
        &self,
        files: &mut [BundleFile],
        mom: &Manifest,
    ) -> Result<InstallStats, UpdaterError> {
        let mut stats = InstallStats::default();

        // Pass 1: stage every record without touching final names.
        for entry in files.iter_mut() {
            let file = &mut entry.file;
            if self.skip(file) {
                continue;
            }
            apply_heuristics(file);
            if file.do_not_update {
                continue;
            }
            self.stage_file(file)?;
            if file.is_boot {
                stats.updated_boot_files = true;
            }
        }

        // Pass 2: flip the staged copies live.
        for entry in files.iter_mut() {
            let file = &entry.file;
            if self.skip(file) || file.do_not_update {
                stats.skipped += 1;
                continue;
            }

            if file.staging.is_none() && !file.is_dir() {
                // Staged by an earlier repair phase via the MoM file list;
                // the authoritative record lives there.
                if let Some(mom_file) = mom.search_file(&file.filename) {
                    self.rename_staged_to_final(mom_file)?;
                    stats.installed += 1;
                    continue;
                }
                warn!(filename = %file.filename, "no staged copy and no MoM record, skipping");
                stats.skipped += 1;
                continue;
            }

            self.rename_staged_to_final(file)?;
            stats.installed += 1;
        }

        // One barrier after the rename pass; the two-phase structure plus
        // this sync bounds what a crash can leave behind.
        unsafe { libc::sync() };

        Ok(stats)
    }

    fn skip(&self, file: &FileRecord) -> bool {
        file.is_deleted || is_ignored(self.config, &file.filename)
    }

    /// Stage one record (pass 1).
    fn stage_file(&self, file: &mut FileRecord) -> Result<(), UpdaterError> {
        let target = self.config.target_path(&file.filename);

        let parent = target
            .parent()
            .ok_or_else(|| UpdaterError::Unexpected(format!("no parent for {}", file.filename)))?;
        fs::create_dir_all(parent).map_err(|e| UpdaterError::io(parent, e))?;

        remove_on_type_change(&target, file)?;

        match file.kind {
            FileKind::Directory => {
                // directories are created in place, no rename needed
                fs::create_dir_all(&target).map_err(|e| UpdaterError::io(&target, e))?;
                file.staging = None;
            }
            FileKind::File => {
                let blob = state::staged_path(self.config, &file.hash);
                let staged = update_sibling(&target);
                let _ = fs::remove_file(&staged);
                if fs::hard_link(&blob, &staged).is_err() {
                    fs::copy(&blob, &staged).map_err(|e| UpdaterError::io(&blob, e))?;
                }
                file.staging = Some(staged);
            }
            FileKind::Link => {
                let blob = state::staged_path(self.config, &file.hash);
                let link_target = staged_link_target(&blob)?;
                let staged = update_sibling(&target);
                let _ = fs::remove_file(&staged);
                #[cfg(unix)]
                std::os::unix::fs::symlink(&link_target, &staged)
                    .map_err(|e| UpdaterError::io(&staged, e))?;
                file.staging = Some(staged);
            }
            FileKind::Manifest => {
                return Err(UpdaterError::Unexpected(format!(
                    "manifest entry {} in install list",
                    file.filename
                )))
            }
        }

        debug!(filename = %file.filename, "staged");
        Ok(())
    }

    /// Rename one staged record onto its final name (pass 2).
    fn rename_staged_to_final(&self, file: &FileRecord) -> Result<(), UpdaterError> {
        if file.is_dir() {
            return Ok(());
        }

        let target = self.config.target_path(&file.filename);
        let staged = match &file.staging {
            Some(path) => path.clone(),
            None => update_sibling(&target),
        };
        fs::rename(&staged, &target).map_err(|e| UpdaterError::io(&staged, e))?;
        Ok(())
    }
}

/// `<final>.update` sibling path used for staging.
fn update_sibling(target: &Path) -> PathBuf {
    let mut staged = target.as_os_str().to_os_string();
    staged.push(".update");
    PathBuf::from(staged)
}

/// If a live entry exists whose type differs from the record's, remove it
/// so the staged copy can take its place.
fn remove_on_type_change(target: &Path, file: &FileRecord) -> Result<(), UpdaterError> {
    let Ok(meta) = fs::symlink_metadata(target) else {
        return Ok(());
    };

    let same_type = match file.kind {
        FileKind::Directory => meta.is_dir(),
        FileKind::File => meta.is_file(),
        FileKind::Link => meta.file_type().is_symlink(),
        FileKind::Manifest => false,
    };
    if same_type {
        return Ok(());
    }

    debug!(target = %target.display(), "replacing entry of different type");
    let result = if meta.is_dir() {
        fs::remove_dir_all(target)
    } else {
        fs::remove_file(target)
    };
    result.map_err(|e| UpdaterError::CouldntRemoveFile {
        path: target.to_path_buf(),
        source: e,
    })
}

/// Derive post-action flags from the filename.
///
/// Boot assets need the boot manager refreshed; configuration and runtime
/// state belong to the administrator and are never updated in place.
pub fn apply_heuristics(file: &mut FileRecord) {
    let name = file.filename.as_str();

    if name.starts_with("/boot/")
        || name.starts_with("/usr/lib/kernel/")
        || name.starts_with("/usr/lib/modules/")
    {
        file.is_boot = true;
    }
    if name.starts_with("/etc/") {
        file.is_config = true;
    }
    if name.starts_with("/dev/")
        || name.starts_with("/home/")
        || name.starts_with("/proc/")
        || name.starts_with("/root/")
        || name.starts_with("/run/")
        || name.starts_with("/sys/")
        || name.starts_with("/tmp/")
        || name.starts_with("/var/")
    {
        file.is_state = true;
        file.do_not_update = true;
    }
    if file.is_ghosted {
        file.do_not_update = true;
    }
}
