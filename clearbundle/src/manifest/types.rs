//! In-memory manifest model.
//!
//! A [`Manifest`] describes one component (bundle) at one version. The
//! Manifest-of-Manifests is an ordinary `Manifest` whose file records are
//! bundle descriptors (`FileKind::Manifest`) instead of filesystem entries.

use crate::hash::ContentHash;
use std::path::PathBuf;

/// What kind of filesystem (or catalog) entry a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link
    Link,
    /// Bundle manifest descriptor inside a MoM
    Manifest,
}

/// One row of a manifest body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Absolute path under the target root (bundle name for MoM entries).
    pub filename: String,
    /// Content hash; the zero hash marks a tombstone.
    pub hash: ContentHash,
    /// Version at which this record last changed.
    pub last_change: u32,
    /// Entry kind.
    pub kind: FileKind,
    /// Tombstone: the path must not exist.
    pub is_deleted: bool,
    /// Deleted, but the file is left alone if something else owns it.
    pub is_ghosted: bool,
    /// Configuration file (under /etc).
    pub is_config: bool,
    /// Runtime state the updater must not touch.
    pub is_state: bool,
    /// Boot asset; updating one triggers the boot post-action.
    pub is_boot: bool,
    /// Marked as a rename target by the server.
    pub is_rename: bool,
    /// Experimental bundle marker (MoM entries).
    pub is_experimental: bool,
    /// Set at runtime by heuristics; never parsed from a manifest.
    pub do_not_update: bool,
    /// Transient path of the staged copy, filled during installation.
    pub staging: Option<PathBuf>,
}

impl FileRecord {
    /// A record with the given identity and no flags set.
    pub fn new(
        filename: impl Into<String>,
        hash: ContentHash,
        last_change: u32,
        kind: FileKind,
    ) -> Self {
        Self {
            filename: filename.into(),
            hash,
            last_change,
            kind,
            is_deleted: false,
            is_ghosted: false,
            is_config: false,
            is_state: false,
            is_boot: false,
            is_rename: false,
            is_experimental: false,
            do_not_update: false,
            staging: None,
        }
    }

    /// A tombstone for `filename`, carrying the zero hash.
    pub fn tombstone(filename: impl Into<String>, last_change: u32) -> Self {
        let mut record = Self::new(filename, ContentHash::ZERO, last_change, FileKind::File);
        record.is_deleted = true;
        record
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_link(&self) -> bool {
        self.kind == FileKind::Link
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    /// True for bundle descriptors inside a MoM.
    pub fn is_manifest_entry(&self) -> bool {
        self.kind == FileKind::Manifest
    }
}

/// A parsed manifest for one component at one version.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    /// Component (bundle) name; `"MoM"` for the Manifest-of-Manifests.
    pub component: String,
    /// Version this manifest describes.
    pub version: u32,
    /// Manifest format generation.
    pub format: u32,
    /// Previous version of this component.
    pub previous: u32,
    /// File count declared by the header.
    pub filecount: u64,
    /// Server-side generation timestamp.
    pub timestamp: u64,
    /// Uncompressed content size declared by the header.
    pub contentsize: u64,
    /// Bundles this bundle pulls in.
    pub includes: Vec<String>,
    /// Ordered file records (order preserved from the wire).
    pub files: Vec<FileRecord>,
    /// Per-bundle manifests attached to a MoM by the dependency engine.
    pub submanifests: Vec<Manifest>,
    /// Loaded from a local mix overlay instead of the content server.
    pub is_mix: bool,
}

impl Manifest {
    /// An empty manifest for `component` at `version`.
    pub fn new(component: impl Into<String>, version: u32) -> Self {
        Self {
            component: component.into(),
            version,
            ..Self::default()
        }
    }

    /// Find a file record by exact filename.
    pub fn search_file(&self, filename: &str) -> Option<&FileRecord> {
        self.files.iter().find(|f| f.filename == filename)
    }

    /// Find the MoM descriptor for a bundle name.
    pub fn search_bundle(&self, name: &str) -> Option<&FileRecord> {
        self.files
            .iter()
            .find(|f| f.is_manifest_entry() && f.filename == name)
    }

    /// Bundle name decorated with its experimental marker for display.
    pub fn printable_bundle_name(entry: &FileRecord) -> String {
        if entry.is_experimental {
            format!("{} (experimental)", entry.filename)
        } else {
            entry.filename.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> ContentHash {
        ContentHash::of_bytes(&[n])
    }

    #[test]
    fn test_new_record_has_no_flags() {
        let record = FileRecord::new("/usr/bin/test", hash(1), 20, FileKind::File);
        assert!(!record.is_deleted);
        assert!(!record.do_not_update);
        assert!(record.staging.is_none());
        assert!(record.is_file());
    }

    #[test]
    fn test_tombstone_carries_zero_hash() {
        let record = FileRecord::tombstone("/usr/bin/gone", 20);
        assert!(record.is_deleted);
        assert!(record.hash.is_zero());
    }

    #[test]
    fn test_search_bundle_only_matches_manifest_entries() {
        let mut mom = Manifest::new("MoM", 20);
        mom.files
            .push(FileRecord::new("editors", hash(1), 20, FileKind::Manifest));
        mom.files
            .push(FileRecord::new("os-core", hash(2), 10, FileKind::Manifest));
        // a stray non-manifest record must not be found as a bundle
        mom.files
            .push(FileRecord::new("stray", hash(3), 20, FileKind::File));

        assert!(mom.search_bundle("editors").is_some());
        assert!(mom.search_bundle("stray").is_none());
        assert_eq!(mom.search_bundle("os-core").unwrap().last_change, 10);
    }

    #[test]
    fn test_printable_bundle_name() {
        let mut entry = FileRecord::new("labs", hash(1), 20, FileKind::Manifest);
        assert_eq!(Manifest::printable_bundle_name(&entry), "labs");
        entry.is_experimental = true;
        assert_eq!(Manifest::printable_bundle_name(&entry), "labs (experimental)");
    }
}
