//! bundle-info: include closures and reverse dependencies.

use crate::config::UpdaterConfig;
use crate::deps::{add_subscriptions, recurse_manifest, required_by};
use crate::error::UpdaterError;
use crate::manifest::ManifestStore;
use crate::report::Reporter;
use crate::state;
use crate::subscription::{
    set_subscription_versions, unload_tracked_bundle, Subscription, TrackingStore,
};
use crate::transport::Transport;

/// Print the bundles `bundle` pulls in, directly or transitively.
pub async fn show_included_bundles<T: Transport>(
    config: &UpdaterConfig,
    transport: &T,
    reporter: &dyn Reporter,
    bundle: &str,
) -> Result<(), UpdaterError> {
    state::ensure_state_layout(config)?;

    let current_version = match state::get_current_version(config) {
        Ok(version) => version,
        Err(e) => {
            reporter.error(format_args!("Unable to determine current OS version"));
            return Err(e);
        }
    };

    let store = ManifestStore::new(config, transport);
    let mom = match store.load_mom(current_version, false).await {
        Ok(mom) => mom,
        Err(e) => {
            reporter.error(format_args!(
                "Cannot load official manifest MoM for version {current_version}"
            ));
            return Err(e);
        }
    };

    let requested = vec![bundle.to_string()];
    let mut subs = Vec::new();
    let resolved = match add_subscriptions(&store, &requested, &mut subs, &mom, true).await {
        Ok(resolved) => resolved,
        Err(e) => {
            reporter.error(format_args!("Processing error - Aborting"));
            return Err(e);
        }
    };
    if !resolved.new_subscriptions {
        if !resolved.bad_names.is_empty() {
            reporter.error(format_args!("Bad bundle name detected - Aborting"));
            return Err(UpdaterError::InvalidBundle(bundle.to_string()));
        }
        reporter.error(format_args!("Unknown error - Aborting"));
        return Err(UpdaterError::Unexpected("no subscriptions added".into()));
    }

    let deps = match recurse_manifest(&store, &mom, &subs, None).await {
        Ok(deps) => deps,
        Err(e) => {
            reporter.error(format_args!("Cannot load included bundles"));
            return Err(e);
        }
    };

    // the closure always contains the bundle itself
    if deps.len() == 1 {
        reporter.info(format_args!("No included bundles"));
        return Ok(());
    }

    reporter.info(format_args!("Bundles included by {bundle}:"));
    reporter.info(format_args!(""));
    for included in &deps {
        if included.component != bundle {
            reporter.print(format_args!("{}", included.component));
        }
    }

    Ok(())
}

/// Print the bundles that require `bundle`.
///
/// By default only installed bundles are considered; with `all`, every
/// installable bundle in the MoM is.
pub async fn show_bundle_reqd_by<T: Transport>(
    config: &UpdaterConfig,
    transport: &T,
    reporter: &dyn Reporter,
    bundle: &str,
    all: bool,
) -> Result<(), UpdaterError> {
    state::ensure_state_layout(config)?;
    let tracking = TrackingStore::new(config);

    if !all && !tracking.is_installed(bundle) {
        reporter.info(format_args!(
            "Bundle \"{bundle}\" does not seem to be installed"
        ));
        reporter.info(format_args!(
            "       try passing --all to check uninstalled bundles"
        ));
        return Err(UpdaterError::BundleNotTracked(bundle.to_string()));
    }

    let current_version = match state::get_current_version(config) {
        Ok(version) => version,
        Err(e) => {
            reporter.error(format_args!("Unable to determine current OS version"));
            return Err(e);
        }
    };

    let store = ManifestStore::new(config, transport);
    let mom = match store.load_mom(current_version, false).await {
        Ok(mom) => mom,
        Err(e) => {
            reporter.error(format_args!(
                "Unable to download/verify {current_version} Manifest.MoM"
            ));
            return Err(e);
        }
    };

    if mom.search_bundle(bundle).is_none() {
        reporter.error(format_args!(
            "Bundle name {bundle} is invalid, aborting dependency list"
        ));
        return Err(UpdaterError::InvalidBundle(bundle.to_string()));
    }

    let mut subs = if all {
        // consider every bundle the MoM can install
        mom.files
            .iter()
            .filter(|f| f.is_manifest_entry())
            .map(|f| Subscription::new(f.filename.clone()))
            .collect()
    } else {
        let mut subs = tracking.read_subscriptions()?;
        if let Err(e) = unload_tracked_bundle(&mut subs, bundle) {
            reporter.error(format_args!("Unable to untrack {bundle}"));
            return Err(e);
        }
        subs
    };
    set_subscription_versions(&mom, &mut subs);

    let submanifests = match recurse_manifest(&store, &mom, &subs, None).await {
        Ok(manifests) => manifests,
        Err(e) => {
            reporter.error(format_args!("Cannot load MoM sub-manifests"));
            return Err(e);
        }
    };
    let mut mom_ctx = mom.clone();
    mom_ctx.submanifests = submanifests;

    let dependants = required_by(&mom_ctx, bundle);
    if dependants.is_empty() {
        reporter.info(format_args!("No bundles have {bundle} as a dependency"));
        return Ok(());
    }

    reporter.info(format_args!(
        "{} bundles that have {bundle} as a dependency:",
        if all {
            "All installable and installed"
        } else {
            "Installed"
        }
    ));
    reporter.info(format_args!(""));
    reporter.info(format_args!("format:"));
    reporter.info(format_args!(" # * is-required-by"));
    reporter.info(format_args!(" #   |-- is-required-by"));
    reporter.info(format_args!(" # * is-also-required-by"));
    reporter.info(format_args!(" # ..."));
    reporter.info(format_args!(""));
    for line in &dependants {
        reporter.print(format_args!("{line}"));
    }

    Ok(())
}
