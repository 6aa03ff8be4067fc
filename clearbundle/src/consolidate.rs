//! File-set consolidation across bundles.
//!
//! The union of every installed bundle's file list, reduced to one
//! authoritative record per path, is what the live filesystem should
//! contain. Subtracting the installed set from the to-be-installed set
//! yields the exact download and stage work list.

use crate::manifest::{FileRecord, Manifest};
use std::cmp::Reverse;
use std::collections::HashSet;

/// A file record together with the bundle that declared it.
///
/// Carrying the owning bundle name alongside a cloned record keeps the
/// authoritative-copy information in an owned, index-free form, with no
/// cross-references between list entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFile {
    /// Name of the bundle whose manifest declared this record.
    pub bundle: String,
    /// The record itself.
    pub file: FileRecord,
}

/// Concatenate the file lists of all given manifests, tagging each record
/// with its owning bundle.
pub fn files_from_bundles(manifests: &[Manifest]) -> Vec<BundleFile> {
    manifests
        .iter()
        .flat_map(|manifest| {
            manifest.files.iter().map(|file| BundleFile {
                bundle: manifest.component.clone(),
                file: file.clone(),
            })
        })
        .collect()
}

/// Reduce a multi-bundle list to one authoritative record per path.
///
/// Sort order is `(filename, is_deleted asc, last_change desc, bundle)` and
/// the first record per filename wins: the newest non-deleted record if any
/// exists, otherwise the newest deletion. The bundle name is the explicit
/// tie-breaker for records that share a path and a version.
pub fn consolidate_files(mut files: Vec<BundleFile>) -> Vec<BundleFile> {
    files.sort_by(|a, b| {
        a.file
            .filename
            .cmp(&b.file.filename)
            .then_with(|| a.file.is_deleted.cmp(&b.file.is_deleted))
            .then_with(|| Reverse(a.file.last_change).cmp(&Reverse(b.file.last_change)))
            .then_with(|| a.bundle.cmp(&b.bundle))
    });
    files.dedup_by(|next, kept| next.file.filename == kept.file.filename);
    files
}

/// Drop tombstones.
pub fn filter_out_deleted_files(files: Vec<BundleFile>) -> Vec<BundleFile> {
    files.into_iter().filter(|f| !f.file.is_deleted).collect()
}

/// Keep entries of `files` whose `(filename, hash)` does not appear in
/// `existing`. Used to strip already-installed content from the work list.
pub fn filter_out_existing_files(
    files: Vec<BundleFile>,
    existing: &[BundleFile],
) -> Vec<BundleFile> {
    let present: HashSet<(&str, _)> = existing
        .iter()
        .map(|f| (f.file.filename.as_str(), f.file.hash))
        .collect();
    files
        .into_iter()
        .filter(|f| !present.contains(&(f.file.filename.as_str(), f.file.hash)))
        .collect()
}

/// Keep only records whose path appears in no survivor bundle.
///
/// This is the removal-side deduplication: a file shared with any other
/// installed bundle must stay on disk, whatever version either bundle
/// declares.
pub fn filter_out_shared_files(files: Vec<FileRecord>, survivors: &[BundleFile]) -> Vec<FileRecord> {
    let shared: HashSet<&str> = survivors
        .iter()
        .map(|f| f.file.filename.as_str())
        .collect();
    files
        .into_iter()
        .filter(|f| !shared.contains(f.filename.as_str()))
        .collect()
}

/// Sum of the declared content sizes of the given manifests.
pub fn total_contentsize(manifests: &[Manifest]) -> u64 {
    manifests.iter().map(|m| m.contentsize).sum()
}
