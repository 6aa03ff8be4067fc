//! Content cache and download pipeline.
//!
//! Staged content lives under `state/staged/`, keyed by content hash. The
//! fullfile pipeline fans out concurrent fetches over the shared transport,
//! verifies every blob after download, and discards mismatches. Pack
//! downloads are an optimisation applied before fullfiles when the work
//! list is large; a failed pack is tolerated because fullfiles cover it.

use crate::config::UpdaterConfig;
use crate::consolidate::BundleFile;
use crate::error::UpdaterError;
use crate::hash::ContentHash;
use crate::manifest::Manifest;
use crate::state;
use crate::subscription::Subscription;
use crate::transport::retry::{get_file_with_retry, ResumeControl, RetryPolicy};
use crate::transport::Transport;
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Work list size above which packs are attempted before fullfiles.
pub const PACK_THRESHOLD: usize = 10;

/// Outcome of a fullfile batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FullfileStats {
    /// Distinct hashes the batch needed.
    pub requested: usize,
    /// Hashes fetched this run.
    pub downloaded: usize,
    /// Hashes already present in the staged directory.
    pub already_staged: usize,
}

/// Concurrent download front-end bound to one transport.
pub struct DownloadPipeline<T: Transport + 'static> {
    transport: Arc<T>,
    resume: Arc<ResumeControl>,
}

impl<T: Transport + 'static> DownloadPipeline<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            resume: Arc::new(ResumeControl::new()),
        }
    }

    /// Materialise every hash referenced by `files` under `state/staged/`.
    ///
    /// Deduplicates by hash, fans out concurrent GETs capped by the
    /// configured parallelism, verifies each blob's content hash on
    /// completion and discards mismatches. Directories and tombstones have
    /// no blob and are skipped.
    pub async fn download_fullfiles(
        &self,
        config: &UpdaterConfig,
        files: &[BundleFile],
    ) -> Result<FullfileStats, UpdaterError> {
        let staged = state::staged_dir(config);
        fs::create_dir_all(&staged).map_err(|e| UpdaterError::io(&staged, e))?;

        // One fetch per distinct hash, whatever number of records share it.
        let mut wanted: HashMap<ContentHash, u32> = HashMap::new();
        for entry in files {
            let file = &entry.file;
            if file.is_deleted || file.is_dir() || file.hash.is_zero() {
                continue;
            }
            wanted.entry(file.hash).or_insert(file.last_change);
        }

        let mut stats = FullfileStats {
            requested: wanted.len(),
            ..FullfileStats::default()
        };

        let policy = RetryPolicy::from_config(config);
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_downloads));
        let mut tasks: JoinSet<Result<(), ContentHash>> = JoinSet::new();

        for (hash, version) in wanted {
            let blob = staged.join(hash.to_string());
            if blob.exists() {
                stats.already_staged += 1;
                continue;
            }

            let url = config.content_file_url(&format!("{version}/files/{hash}"));
            let tmp = staged.join(format!(".{hash}.download"));
            let transport = Arc::clone(&self.transport);
            let resume = Arc::clone(&self.resume);
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Err(hash),
                };
                fetch_and_verify(&*transport, &url, &tmp, &blob, hash, &policy, &resume)
                    .await
                    .map_err(|_| hash)
            });
        }

        let mut failed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => stats.downloaded += 1,
                Ok(Err(hash)) => {
                    warn!(%hash, "fullfile download failed");
                    failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "download task aborted");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(UpdaterError::FullfileDownload { failed });
        }
        debug!(
            requested = stats.requested,
            downloaded = stats.downloaded,
            already_staged = stats.already_staged,
            "fullfile batch complete"
        );
        Ok(stats)
    }

    /// Fetch and apply the delta pack of every subscription.
    ///
    /// Packs unpack straight into the state directory (their entries live
    /// under `staged/`); a successful application leaves an empty indicator
    /// file. Missing packs and failed applications are tolerated: the
    /// fullfile pass downloads whatever the packs did not deliver.
    pub async fn download_subscribed_packs(
        &self,
        config: &UpdaterConfig,
        _mom: &Manifest,
        subs: &[Subscription],
    ) -> Result<usize, UpdaterError> {
        let policy = RetryPolicy::from_config(config);
        let mut applied = 0;

        for sub in subs {
            if sub.version == 0 {
                continue;
            }
            let from = sub.version_deps_from;
            let indicator = state::pack_indicator_path(config, &sub.component, from, sub.version);
            if indicator.exists() {
                debug!(bundle = %sub.component, "pack already applied");
                continue;
            }

            let url = config.content_file_url(&format!(
                "{}/pack-{}-from-{}.tar",
                sub.version, sub.component, from
            ));
            let tmp = config
                .state_dir
                .join(format!(".pack-{}.download", sub.component));

            info!(bundle = %sub.component, "downloading pack");
            match get_file_with_retry(&*self.transport, &url, &tmp, true, &policy, &self.resume)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(bundle = %sub.component, "no pack on server");
                    let _ = fs::remove_file(&tmp);
                    continue;
                }
                Err(e) => {
                    warn!(bundle = %sub.component, error = %e, "pack download failed");
                    let _ = fs::remove_file(&tmp);
                    continue;
                }
            }

            match unpack_pack(&tmp, &config.state_dir) {
                Ok(()) => {
                    // empty indicator marks the pack as consumed
                    if let Err(e) = File::create(&indicator) {
                        debug!(error = %e, "could not create pack indicator");
                    }
                    applied += 1;
                }
                Err(e) => {
                    warn!(bundle = %sub.component, error = %e, "could not unpack pack");
                }
            }
            let _ = fs::remove_file(&tmp);
        }

        Ok(applied)
    }
}

async fn fetch_and_verify<T: Transport + ?Sized>(
    transport: &T,
    url: &str,
    tmp: &Path,
    blob: &Path,
    hash: ContentHash,
    policy: &RetryPolicy,
    resume: &ResumeControl,
) -> Result<(), UpdaterError> {
    get_file_with_retry(transport, url, tmp, false, policy, resume).await?;

    let actual = ContentHash::of_file(tmp).map_err(|e| UpdaterError::io(tmp, e))?;
    if actual != hash {
        warn!(expected = %hash, %actual, "downloaded blob failed hash check");
        let _ = fs::remove_file(tmp);
        return Err(UpdaterError::HashMismatch {
            name: hash.to_string(),
            expected: hash,
            actual,
        });
    }

    fs::rename(tmp, blob).map_err(|e| UpdaterError::io(blob, e))?;
    Ok(())
}

/// Unpack a pack archive into the state directory, tolerating both plain
/// and gzip-compressed tars.
fn unpack_pack(pack: &Path, state_dir: &Path) -> std::io::Result<()> {
    let mut file = File::open(pack)?;
    let mut magic = [0u8; 2];
    let n = file.read(&mut magic)?;
    drop(file);

    let file = File::open(pack)?;
    if n == 2 && magic == [0x1f, 0x8b] {
        tar::Archive::new(GzDecoder::new(file)).unpack(state_dir)
    } else {
        tar::Archive::new(file).unpack(state_dir)
    }
}

/// Pre-install revalidation of the staged directory.
///
/// Every staged blob the work list references is re-hashed; corrupt blobs
/// are deleted so the fullfile pass fetches them again. Hashes absent from
/// the staged directory are fine (first install, or just cleaned).
///
/// Returns the number of discarded blobs.
pub fn revalidate_staged(
    config: &UpdaterConfig,
    files: &[BundleFile],
) -> Result<usize, UpdaterError> {
    let mut discarded = 0;
    let mut checked: std::collections::HashSet<ContentHash> = std::collections::HashSet::new();

    for entry in files {
        let file = &entry.file;
        if file.is_deleted || file.is_dir() || file.hash.is_zero() || !checked.insert(file.hash) {
            continue;
        }

        let blob = state::staged_path(config, &file.hash);
        if !blob.exists() {
            continue;
        }

        let actual = ContentHash::of_file(&blob).map_err(|e| UpdaterError::io(&blob, e))?;
        if actual != file.hash {
            warn!(filename = %file.filename, "hash check failed, will re-download fullfile");
            fs::remove_file(&blob).map_err(|e| UpdaterError::CouldntRemoveFile {
                path: blob.clone(),
                source: e,
            })?;
            discarded += 1;
        }
    }

    Ok(discarded)
}

/// Read a staged symlink blob: its content is the link target.
pub fn staged_link_target(blob: &Path) -> Result<PathBuf, UpdaterError> {
    let content = fs::read_to_string(blob).map_err(|e| UpdaterError::io(blob, e))?;
    Ok(PathBuf::from(content.trim_end_matches('\n')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{FileKind, FileRecord};
    use crate::transport::mock::MockTransport;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, UpdaterConfig) {
        let temp = TempDir::new().unwrap();
        let config = UpdaterConfig::new(temp.path().join("target"), temp.path().join("state"))
            .with_url("https://t/update")
            .with_max_retries(0);
        state::ensure_state_layout(&config).unwrap();
        (temp, config)
    }

    fn bundle_file(filename: &str, content: &[u8], version: u32) -> (BundleFile, ContentHash) {
        let hash = ContentHash::of_bytes(content);
        let record = FileRecord::new(filename, hash, version, FileKind::File);
        (
            BundleFile {
                bundle: "test-bundle".into(),
                file: record,
            },
            hash,
        )
    }

    #[tokio::test]
    async fn test_download_fullfiles_fetches_and_verifies() {
        let (_temp, config) = fixture();
        let transport = Arc::new(MockTransport::new());
        let (file, hash) = bundle_file("/usr/bin/test", b"content", 20);
        transport.serve(
            &format!("https://t/update/20/files/{hash}"),
            b"content".to_vec(),
        );

        let pipeline = DownloadPipeline::new(Arc::clone(&transport));
        let stats = pipeline
            .download_fullfiles(&config, &[file])
            .await
            .unwrap();

        assert_eq!(stats.requested, 1);
        assert_eq!(stats.downloaded, 1);
        let blob = state::staged_path(&config, &hash);
        assert_eq!(fs::read(&blob).unwrap(), b"content");
    }

    #[tokio::test]
    async fn test_download_fullfiles_dedupes_by_hash() {
        let (_temp, config) = fixture();
        let transport = Arc::new(MockTransport::new());
        let (a, hash) = bundle_file("/usr/bin/a", b"same", 20);
        let (b, _) = bundle_file("/usr/bin/b", b"same", 20);
        transport.serve(&format!("https://t/update/20/files/{hash}"), b"same".to_vec());

        let pipeline = DownloadPipeline::new(Arc::clone(&transport));
        let stats = pipeline
            .download_fullfiles(&config, &[a, b])
            .await
            .unwrap();

        assert_eq!(stats.requested, 1);
        assert_eq!(transport.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_download_fullfiles_skips_staged_dirs_and_tombstones() {
        let (_temp, config) = fixture();
        let transport = Arc::new(MockTransport::new());

        let (staged_file, hash) = bundle_file("/usr/bin/cached", b"cached", 20);
        fs::write(state::staged_path(&config, &hash), b"cached").unwrap();

        let dir = BundleFile {
            bundle: "test-bundle".into(),
            file: FileRecord::new(
                "/usr/bin",
                ContentHash::of_bytes(b"dir"),
                20,
                FileKind::Directory,
            ),
        };
        let tombstone = BundleFile {
            bundle: "test-bundle".into(),
            file: FileRecord::tombstone("/usr/bin/gone", 20),
        };

        let pipeline = DownloadPipeline::new(Arc::clone(&transport));
        let stats = pipeline
            .download_fullfiles(&config, &[staged_file, dir, tombstone])
            .await
            .unwrap();

        assert_eq!(stats.requested, 1);
        assert_eq!(stats.already_staged, 1);
        assert_eq!(stats.downloaded, 0);
        assert_eq!(transport.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_download_fullfiles_discards_corrupt_blob() {
        let (_temp, config) = fixture();
        let transport = Arc::new(MockTransport::new());
        let (file, hash) = bundle_file("/usr/bin/test", b"expected", 20);
        transport.serve(
            &format!("https://t/update/20/files/{hash}"),
            b"tampered".to_vec(),
        );

        let pipeline = DownloadPipeline::new(Arc::clone(&transport));
        let err = pipeline
            .download_fullfiles(&config, &[file])
            .await
            .unwrap_err();

        assert!(matches!(err, UpdaterError::FullfileDownload { failed: 1 }));
        assert!(!state::staged_path(&config, &hash).exists());
    }

    #[tokio::test]
    async fn test_missing_pack_is_tolerated() {
        let (_temp, config) = fixture();
        let transport = Arc::new(MockTransport::new());
        let pipeline = DownloadPipeline::new(Arc::clone(&transport));

        let subs = vec![Subscription {
            component: "editors".into(),
            version: 20,
            version_deps_from: 0,
        }];
        let mom = Manifest::new("MoM", 20);
        let applied = pipeline
            .download_subscribed_packs(&config, &mom, &subs)
            .await
            .unwrap();
        assert_eq!(applied, 0);
        assert!(!state::pack_indicator_path(&config, "editors", 0, 20).exists());
    }

    #[tokio::test]
    async fn test_pack_unpacks_into_staged_and_leaves_indicator() {
        let (_temp, config) = fixture();
        let transport = Arc::new(MockTransport::new());

        // build a pack containing staged/<hash>
        let hash = ContentHash::of_bytes(b"packed content");
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(b"packed content".len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(
                &mut header,
                format!("staged/{hash}"),
                &b"packed content"[..],
            )
            .unwrap();
        let pack_bytes = builder.into_inner().unwrap();
        transport.serve("https://t/update/20/pack-editors-from-0.tar", pack_bytes);

        let pipeline = DownloadPipeline::new(Arc::clone(&transport));
        let subs = vec![Subscription {
            component: "editors".into(),
            version: 20,
            version_deps_from: 0,
        }];
        let mom = Manifest::new("MoM", 20);
        let applied = pipeline
            .download_subscribed_packs(&config, &mom, &subs)
            .await
            .unwrap();

        assert_eq!(applied, 1);
        assert_eq!(
            fs::read(state::staged_path(&config, &hash)).unwrap(),
            b"packed content"
        );
        assert!(state::pack_indicator_path(&config, "editors", 0, 20).exists());
        // indicator is an empty file
        assert_eq!(
            fs::metadata(state::pack_indicator_path(&config, "editors", 0, 20))
                .unwrap()
                .len(),
            0
        );
    }

    #[test]
    fn test_revalidate_staged_discards_corrupt() {
        let (_temp, config) = fixture();
        let (good, good_hash) = bundle_file("/usr/bin/good", b"good", 20);
        let (bad, bad_hash) = bundle_file("/usr/bin/bad", b"bad", 20);
        let (missing, _) = bundle_file("/usr/bin/missing", b"missing", 20);

        fs::write(state::staged_path(&config, &good_hash), b"good").unwrap();
        fs::write(state::staged_path(&config, &bad_hash), b"corrupted").unwrap();

        let discarded = revalidate_staged(&config, &[good, bad, missing]).unwrap();
        assert_eq!(discarded, 1);
        assert!(state::staged_path(&config, &good_hash).exists());
        assert!(!state::staged_path(&config, &bad_hash).exists());
    }

    #[test]
    fn test_staged_link_target() {
        let (_temp, config) = fixture();
        let blob = state::staged_dir(&config).join("linkblob");
        fs::write(&blob, "/usr/lib/libtest.so.1\n").unwrap();
        assert_eq!(
            staged_link_target(&blob).unwrap(),
            PathBuf::from("/usr/lib/libtest.so.1")
        );
    }
}
