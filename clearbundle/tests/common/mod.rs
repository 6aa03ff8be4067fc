//! Shared fixtures: a disk-backed content server, a file transport, and a
//! recording reporter.

use clearbundle::config::UpdaterConfig;
use clearbundle::hash::ContentHash;
use clearbundle::manifest::{write_manifest, FileKind, FileRecord, Manifest};
use clearbundle::state;
use clearbundle::transport::{Transport, TransportError};
use std::fmt::Arguments;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

/// Base URL the test world is configured with.
pub const BASE_URL: &str = "https://t/update";

/// Transport that resolves URLs below [`BASE_URL`] against a directory.
pub struct FileTransport {
    root: PathBuf,
}

impl FileTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let rel = url
            .strip_prefix(BASE_URL)
            .ok_or_else(|| TransportError::Network {
                url: url.to_string(),
                detail: "unexpected base url".to_string(),
            })?;
        fs::read(self.root.join(rel.trim_start_matches('/'))).map_err(|_| {
            TransportError::HttpStatus {
                status: 404,
                url: url.to_string(),
            }
        })
    }
}

impl Transport for FileTransport {
    async fn get(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        self.resolve(url)
    }

    async fn get_to_file(
        &self,
        url: &str,
        dest: &Path,
        _resume: bool,
    ) -> Result<(), TransportError> {
        let body = self.resolve(url)?;
        fs::write(dest, body).map_err(|e| TransportError::Write {
            path: dest.display().to_string(),
            detail: e.to_string(),
        })
    }
}

/// Reporter that records every line for later assertions.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    lines: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .any(|line| line.contains(needle))
    }
}

impl clearbundle::report::Reporter for RecordingReporter {
    fn print(&self, args: Arguments<'_>) {
        self.lines.lock().unwrap().push(args.to_string());
    }
    fn info(&self, args: Arguments<'_>) {
        self.lines.lock().unwrap().push(args.to_string());
    }
    fn warn(&self, args: Arguments<'_>) {
        self.lines.lock().unwrap().push(args.to_string());
    }
    fn error(&self, args: Arguments<'_>) {
        self.lines.lock().unwrap().push(args.to_string());
    }
}

/// One entry of a test bundle.
pub enum Entry {
    Dir(&'static str),
    File(&'static str, &'static [u8]),
    #[allow(dead_code)]
    Link(&'static str, &'static str),
}

struct TestBundle {
    name: String,
    manifest_text: String,
    experimental: bool,
}

/// A target root, state directory, and fake content server on disk.
pub struct TestWorld {
    _temp: TempDir,
    pub config: UpdaterConfig,
    pub server: PathBuf,
    pub version: u32,
    bundles: Vec<TestBundle>,
}

impl TestWorld {
    pub fn new(version: u32) -> Self {
        let temp = TempDir::new().unwrap();
        let config = UpdaterConfig::new(temp.path().join("target"), temp.path().join("state"))
            .with_url(BASE_URL)
            .with_max_retries(0);
        let server = temp.path().join("server");

        fs::create_dir_all(server.join(format!("{version}/files"))).unwrap();
        let os_release = config.os_release_path();
        fs::create_dir_all(os_release.parent().unwrap()).unwrap();
        fs::write(os_release, format!("VERSION_ID={version}\n")).unwrap();
        state::ensure_state_layout(&config).unwrap();

        Self {
            _temp: temp,
            config,
            server,
            version,
            bundles: Vec::new(),
        }
    }

    pub fn transport(&self) -> std::sync::Arc<FileTransport> {
        std::sync::Arc::new(FileTransport::new(&self.server))
    }

    /// Declare a bundle with the given includes and content.
    ///
    /// Every bundle also carries its own image tracking record under
    /// `/usr/share/clear/bundles/`, like real bundles do.
    pub fn add_bundle(&mut self, name: &str, includes: &[&str], entries: &[Entry]) {
        self.add_bundle_opts(name, includes, entries, false, None);
    }

    pub fn add_bundle_opts(
        &mut self,
        name: &str,
        includes: &[&str],
        entries: &[Entry],
        experimental: bool,
        contentsize: Option<u64>,
    ) {
        let mut manifest = Manifest::new(name, self.version);
        manifest.format = 1;
        manifest.includes = includes.iter().map(|s| s.to_string()).collect();

        let mut size = 0u64;
        for entry in entries {
            match entry {
                Entry::Dir(path) => {
                    manifest.files.push(FileRecord::new(
                        *path,
                        ContentHash::of_bytes(path.as_bytes()),
                        self.version,
                        FileKind::Directory,
                    ));
                }
                Entry::File(path, content) => {
                    let hash = self.serve_blob(content);
                    manifest
                        .files
                        .push(FileRecord::new(*path, hash, self.version, FileKind::File));
                    size += content.len() as u64;
                }
                Entry::Link(path, target) => {
                    let hash = self.serve_blob(target.as_bytes());
                    manifest
                        .files
                        .push(FileRecord::new(*path, hash, self.version, FileKind::Link));
                }
            }
        }

        // the bundle's own tracking record
        let tracking_path = format!("/usr/share/clear/bundles/{name}");
        let hash = self.serve_blob(b"");
        manifest
            .files
            .push(FileRecord::new(tracking_path, hash, self.version, FileKind::File));

        manifest.contentsize = contentsize.unwrap_or(size);
        let text = write_manifest(&manifest);
        fs::write(
            self.server.join(format!("{}/Manifest.{name}", self.version)),
            &text,
        )
        .unwrap();

        self.bundles.push(TestBundle {
            name: name.to_string(),
            manifest_text: text,
            experimental,
        });
    }

    /// Write the MoM for everything declared so far.
    pub fn publish(&self) {
        let mut mom = Manifest::new("MoM", self.version);
        mom.format = 1;
        for bundle in &self.bundles {
            let mut entry = FileRecord::new(
                bundle.name.clone(),
                ContentHash::of_bytes(bundle.manifest_text.as_bytes()),
                self.version,
                FileKind::Manifest,
            );
            entry.is_experimental = bundle.experimental;
            mom.files.push(entry);
        }
        fs::write(
            self.server.join(format!("{}/Manifest.MoM", self.version)),
            write_manifest(&mom),
        )
        .unwrap();
    }

    fn serve_blob(&self, content: &[u8]) -> ContentHash {
        let hash = ContentHash::of_bytes(content);
        fs::write(
            self.server.join(format!("{}/files/{hash}", self.version)),
            content,
        )
        .unwrap();
        hash
    }

    /// Path of a file in the live tree.
    pub fn target(&self, filename: &str) -> PathBuf {
        self.config.target_path(filename)
    }

    /// Snapshot of every path in the live tree, for round-trip checks.
    pub fn live_tree_snapshot(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        collect_paths(&self.config.path_prefix, &mut paths);
        paths.sort();
        paths
    }
}

fn collect_paths(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        out.push(path.clone());
        if path.is_dir() {
            collect_paths(&path, out);
        }
    }
}
