//! bundle-list: tracked bundles by default, installable bundles with --all.

use crate::config::UpdaterConfig;
use crate::error::UpdaterError;
use crate::manifest::{Manifest, ManifestStore};
use crate::report::Reporter;
use crate::state;
use crate::subscription::TrackingStore;
use crate::transport::Transport;

/// Print bundle names, sorted, marking experimental ones.
///
/// With `all`, every installable bundle in the current MoM is listed.
/// Otherwise the tracked bundles from the state tracking directory are
/// listed; the MoM is consulted best-effort for experimental markers.
pub async fn list_bundles<T: Transport>(
    config: &UpdaterConfig,
    transport: &T,
    reporter: &dyn Reporter,
    all: bool,
) -> Result<(), UpdaterError> {
    state::ensure_state_layout(config)?;
    let store = ManifestStore::new(config, transport);

    if all {
        let current_version = match state::get_current_version(config) {
            Ok(version) => version,
            Err(e) => {
                reporter.error(format_args!("Unable to determine current OS version"));
                return Err(e);
            }
        };
        let mom = store.load_mom(current_version, true).await?;

        let mut entries: Vec<_> = mom.files.iter().filter(|f| f.is_manifest_entry()).collect();
        entries.sort_by(|a, b| a.filename.cmp(&b.filename));
        for entry in entries {
            reporter.print(format_args!("{}", Manifest::printable_bundle_name(entry)));
        }
        return Ok(());
    }

    // Default listing works offline; the MoM only adds experimental markers.
    let mom = match state::get_current_version(config) {
        Ok(version) => store.load_mom(version, true).await.ok(),
        Err(_) => None,
    };
    if mom.is_none() {
        reporter.warn(format_args!(
            "Could not determine which installed bundles are experimental"
        ));
    }

    let tracking = TrackingStore::new(config);
    for name in tracking.tracked_bundles()? {
        let line = mom
            .as_ref()
            .and_then(|m| m.search_bundle(&name))
            .map(Manifest::printable_bundle_name)
            .unwrap_or_else(|| name.clone());
        reporter.print(format_args!("{line}"));
    }

    Ok(())
}
