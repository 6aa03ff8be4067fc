//! Manifest fetch-or-cache store.
//!
//! Manifests are cached under `state/<version>/` and validated against the
//! MoM before use. The MoM itself is the root of trust for a version: a
//! bundle manifest is only accepted at the exact hash its MoM entry names.

use crate::config::UpdaterConfig;
use crate::error::UpdaterError;
use crate::hash::ContentHash;
use crate::manifest::types::{FileRecord, Manifest};
use crate::manifest::parser::parse_manifest;
use crate::state;
use crate::transport::Transport;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Verifies the detached signature shipped next to the MoM.
///
/// The engine does not bundle a certificate-chain implementation; deployers
/// provide one through this seam when signature enforcement is on.
pub trait SignatureVerifier: Send + Sync {
    /// True if `signature` is a valid signature over `content`.
    fn verify(&self, content: &[u8], signature: &[u8]) -> bool;
}

/// Fetch-or-cache access to manifests for one configured state root.
pub struct ManifestStore<'a, T: Transport> {
    config: &'a UpdaterConfig,
    transport: &'a T,
    verifier: Option<&'a dyn SignatureVerifier>,
}

impl<'a, T: Transport> ManifestStore<'a, T> {
    pub fn new(config: &'a UpdaterConfig, transport: &'a T) -> Self {
        Self {
            config,
            transport,
            verifier: None,
        }
    }

    /// Attach a signature verifier, used when `config.sigcheck` is set.
    pub fn with_verifier(mut self, verifier: &'a dyn SignatureVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn config(&self) -> &UpdaterConfig {
        self.config
    }

    /// Load the Manifest-of-Manifests for a version.
    ///
    /// With `allow_mix`, a local mix overlay for the same version is
    /// preferred over the network copy and the result is flagged as mix so
    /// callers can tell upstream content from local overlays.
    pub async fn load_mom(&self, version: u32, allow_mix: bool) -> Result<Manifest, UpdaterError> {
        self.load_mom_inner(version, allow_mix)
            .await
            .map_err(|e| UpdaterError::CouldntLoadMom {
                version,
                source: Box::new(e),
            })
    }

    async fn load_mom_inner(
        &self,
        version: u32,
        allow_mix: bool,
    ) -> Result<Manifest, UpdaterError> {
        if allow_mix {
            let mix_path = self.mix_mom_path(version);
            if mix_path.exists() {
                debug!(version, "loading MoM from local mix overlay");
                let content =
                    fs::read_to_string(&mix_path).map_err(|e| UpdaterError::io(&mix_path, e))?;
                let mut mom = parse_manifest("MoM", &content)?;
                mom.is_mix = true;
                return Ok(mom);
            }
        }

        let local = state::mom_path(self.config, version);
        let bytes = match read_if_present(&local)? {
            Some(bytes) => bytes,
            None => {
                let url = self
                    .config
                    .content_file_url(&format!("{version}/Manifest.MoM"));
                let bytes = self.fetch(&url, "Manifest.MoM", version).await?;
                write_cached(&local, &bytes)?;
                bytes
            }
        };

        if self.config.sigcheck {
            self.verify_mom_signature(version, &bytes).await?;
        }

        let content = String::from_utf8_lossy(&bytes);
        Ok(parse_manifest("MoM", &content)?)
    }

    /// Load a per-bundle manifest referenced by a MoM entry.
    ///
    /// The entry's `filename` is the bundle name and its `hash` is the exact
    /// content hash the manifest blob must have.
    pub async fn load_bundle_manifest(
        &self,
        mom: &Manifest,
        entry: &FileRecord,
    ) -> Result<Manifest, UpdaterError> {
        self.load_bundle_inner(mom, entry)
            .await
            .map_err(|e| UpdaterError::CouldntLoadManifest {
                bundle: entry.filename.clone(),
                version: entry.last_change,
                source: Box::new(e),
            })
    }

    async fn load_bundle_inner(
        &self,
        mom: &Manifest,
        entry: &FileRecord,
    ) -> Result<Manifest, UpdaterError> {
        let component = entry.filename.as_str();
        let version = entry.last_change;

        let bytes = match self.cached_bundle_bytes(version, component, &entry.hash)? {
            Some(bytes) => bytes,
            None => {
                let url = self
                    .config
                    .content_file_url(&format!("{version}/Manifest.{component}"));
                let name = format!("Manifest.{component}");
                let bytes = self.fetch(&url, &name, version).await?;
                let actual = ContentHash::of_bytes(&bytes);
                if actual != entry.hash {
                    return Err(UpdaterError::HashMismatch {
                        name,
                        expected: entry.hash,
                        actual,
                    });
                }
                let plain = state::bundle_manifest_path(self.config, version, component);
                write_cached(&plain, &bytes)?;
                self.write_hash_hint(version, component, &entry.hash, &plain);
                bytes
            }
        };

        let content = String::from_utf8_lossy(&bytes);
        let mut manifest = parse_manifest(component, &content)?;
        manifest.is_mix = mom.is_mix;
        Ok(manifest)
    }

    /// Look for a valid cached copy, hashed hint first.
    ///
    /// A cached file whose content no longer matches the MoM hash is stale
    /// (or corrupt) and is dropped so the caller refetches.
    fn cached_bundle_bytes(
        &self,
        version: u32,
        component: &str,
        expected: &ContentHash,
    ) -> Result<Option<Vec<u8>>, UpdaterError> {
        let candidates = [
            state::hashed_manifest_path(self.config, version, component, expected),
            state::bundle_manifest_path(self.config, version, component),
        ];
        for path in candidates {
            let Some(bytes) = read_if_present(&path)? else {
                continue;
            };
            if ContentHash::of_bytes(&bytes) == *expected {
                return Ok(Some(bytes));
            }
            warn!(path = %path.display(), "cached manifest failed hash check, refetching");
            let _ = fs::remove_file(&path);
        }
        Ok(None)
    }

    async fn verify_mom_signature(&self, version: u32, mom_bytes: &[u8]) -> Result<(), UpdaterError> {
        let Some(verifier) = self.verifier else {
            warn!("signature checking enabled but no verifier provided");
            return Err(UpdaterError::BadSignature { version });
        };

        let sig_path = state::mom_sig_path(self.config, version);
        let sig = match read_if_present(&sig_path)? {
            Some(sig) => sig,
            None => {
                let url = self
                    .config
                    .content_file_url(&format!("{version}/Manifest.MoM.sig"));
                let sig = self
                    .transport
                    .get(&url)
                    .await
                    .map_err(|_| UpdaterError::BadSignature { version })?;
                write_cached(&sig_path, &sig)?;
                sig
            }
        };

        if !verifier.verify(mom_bytes, &sig) {
            return Err(UpdaterError::BadSignature { version });
        }
        Ok(())
    }

    async fn fetch(&self, url: &str, name: &str, version: u32) -> Result<Vec<u8>, UpdaterError> {
        match self.transport.get(url).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.is_not_found() => Err(UpdaterError::ManifestNotFound {
                name: name.to_string(),
                version,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Hash-hint copies are an optimisation; failing to write one is fine.
    fn write_hash_hint(&self, version: u32, component: &str, hash: &ContentHash, plain: &Path) {
        let hint = state::hashed_manifest_path(self.config, version, component, hash);
        if hint.exists() {
            return;
        }
        if fs::hard_link(plain, &hint).is_err() {
            if let Err(e) = fs::copy(plain, &hint) {
                debug!(path = %hint.display(), error = %e, "could not write hash hint");
            }
        }
    }

    fn mix_mom_path(&self, version: u32) -> PathBuf {
        self.config
            .path_prefix
            .join("usr/share/mix")
            .join(version.to_string())
            .join("Manifest.MoM")
    }
}

fn read_if_present(path: &Path) -> Result<Option<Vec<u8>>, UpdaterError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(UpdaterError::io(path, e)),
    }
}

fn write_cached(path: &Path, bytes: &[u8]) -> Result<(), UpdaterError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| UpdaterError::io(parent, e))?;
    }
    fs::write(path, bytes).map_err(|e| UpdaterError::io(path, e))
}
