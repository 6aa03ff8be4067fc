//! Dependency resolution over the include graph.
//!
//! Bundles name the bundles they include; the engine walks that graph to
//! build the subscription set, loads every subscribed manifest, and answers
//! reverse-dependency queries for removal.

use crate::error::UpdaterError;
use crate::manifest::{Manifest, ManifestStore};
use crate::subscription::{
    component_subscribed, create_and_append_subscription, Subscription, TrackingStore,
};
use crate::transport::Transport;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

/// What [`add_subscriptions`] found.
///
/// The original exposed this as a three-bit flag word; the same information
/// travels here as data so callers can distinguish "nothing to do because
/// everything is already installed" (both fields empty) from "a requested
/// name was invalid" without decoding bits. A transport or parse failure
/// aborts the walk and surfaces as an error instead of a flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddSubsOutcome {
    /// At least one new subscription was appended.
    pub new_subscriptions: bool,
    /// Requested bundles that do not exist in the MoM.
    pub bad_names: Vec<String>,
}

impl AddSubsOutcome {
    fn merge(&mut self, other: AddSubsOutcome) {
        self.new_subscriptions |= other.new_subscriptions;
        self.bad_names.extend(other.bad_names);
    }
}

/// Subscribe `requested` bundles and, transitively, everything they include.
///
/// Bundles absent from the MoM are collected in `bad_names` and skipped.
/// Already-subscribed bundles are revisited at the top level (that is how
/// the include tree is seeded) but cut off during recursion. Unless
/// `find_all` is set, bundles already installed on the system are walked
/// for their includes but not subscribed themselves.
pub async fn add_subscriptions<T: Transport>(
    store: &ManifestStore<'_, T>,
    requested: &[String],
    subs: &mut Vec<Subscription>,
    mom: &Manifest,
    find_all: bool,
) -> Result<AddSubsOutcome, UpdaterError> {
    let tracking = TrackingStore::new(store.config());
    add_subscriptions_at(store, &tracking, requested, subs, mom, find_all, 0).await
}

/// Boxed so the include walk can recurse inside an async fn.
fn add_subscriptions_at<'a, T: Transport>(
    store: &'a ManifestStore<'a, T>,
    tracking: &'a TrackingStore<'a>,
    requested: &'a [String],
    subs: &'a mut Vec<Subscription>,
    mom: &'a Manifest,
    find_all: bool,
    depth: usize,
) -> Pin<Box<dyn Future<Output = Result<AddSubsOutcome, UpdaterError>> + Send + 'a>> {
    Box::pin(async move {
        let mut outcome = AddSubsOutcome::default();

        for bundle in requested {
            let Some(entry) = mom.search_bundle(bundle) else {
                debug!(bundle = %bundle, "requested bundle not present in MoM");
                outcome.bad_names.push(bundle.clone());
                continue;
            };

            // During recursion an already-subscribed bundle has been (or
            // will be) visited at the top level; cut the walk short. The
            // top level itself must still descend to seed the tree.
            if depth > 0 && component_subscribed(subs, bundle) {
                continue;
            }

            let manifest = store.load_bundle_manifest(mom, entry).await?;

            if !manifest.includes.is_empty() {
                let nested = add_subscriptions_at(
                    store,
                    tracking,
                    &manifest.includes,
                    subs,
                    mom,
                    find_all,
                    depth + 1,
                )
                .await?;
                outcome.merge(nested);
            }

            if !find_all && tracking.is_installed(bundle) {
                continue;
            }
            if component_subscribed(subs, bundle) {
                continue;
            }
            create_and_append_subscription(subs, bundle);
            outcome.new_subscriptions = true;
        }

        Ok(outcome)
    })
}

/// Load every manifest referenced by the subscription set and return them
/// in subscription order.
///
/// Subscriptions with no MoM entry (stale tracking content) are tolerated
/// and skipped. When `filter_name` is given the result is pruned to the
/// include closure of that single bundle.
pub async fn recurse_manifest<T: Transport>(
    store: &ManifestStore<'_, T>,
    mom: &Manifest,
    subs: &[Subscription],
    filter_name: Option<&str>,
) -> Result<Vec<Manifest>, UpdaterError> {
    let mut manifests = Vec::with_capacity(subs.len());

    for sub in subs {
        let Some(entry) = mom.search_bundle(&sub.component) else {
            debug!(bundle = %sub.component, "subscribed bundle not in MoM, ignoring");
            continue;
        };
        let manifest = store
            .load_bundle_manifest(mom, entry)
            .await
            .map_err(|e| UpdaterError::RecurseManifest(Box::new(e)))?;
        manifests.push(manifest);
    }

    if let Some(name) = filter_name {
        manifests = prune_to_closure(manifests, name);
    }

    Ok(manifests)
}

/// Keep only manifests reachable from `root` through includes.
fn prune_to_closure(manifests: Vec<Manifest>, root: &str) -> Vec<Manifest> {
    let mut reachable: HashSet<String> = HashSet::new();
    let mut frontier = vec![root.to_string()];
    while let Some(name) = frontier.pop() {
        if !reachable.insert(name.clone()) {
            continue;
        }
        if let Some(manifest) = manifests.iter().find(|m| m.component == name) {
            frontier.extend(manifest.includes.iter().cloned());
        }
    }
    manifests
        .into_iter()
        .filter(|m| reachable.contains(&m.component))
        .collect()
}

/// Collect the reverse-dependency tree of `bundle_name`.
///
/// Walks the MoM's attached submanifests; whenever one includes the target,
/// a display line is appended and the walk recurses on that bundle. The
/// indentation grammar is user-visible and frozen: first-level entries are
/// `  * name`, deeper entries `<4·(depth−1) spaces>|-- name`.
pub fn required_by(mom: &Manifest, bundle_name: &str) -> Vec<String> {
    let mut lines = Vec::new();
    required_by_at(mom, bundle_name, 1, &mut lines);
    lines
}

fn required_by_at(mom: &Manifest, bundle_name: &str, recursion: usize, lines: &mut Vec<String>) {
    for submanifest in &mom.submanifests {
        if !submanifest.includes.iter().any(|i| i == bundle_name) {
            continue;
        }
        if recursion == 1 {
            lines.push(format!("  * {}", submanifest.component));
        } else {
            let indent = (recursion - 1) * 4;
            lines.push(format!("{:indent$}|-- {}", "", submanifest.component));
        }
        required_by_at(mom, &submanifest.component, recursion + 1, lines);
    }
}
