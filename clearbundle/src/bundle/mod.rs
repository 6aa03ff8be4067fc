//! Bundle lifecycle operations.
//!
//! Each submodule is one user-facing command built from the shared
//! primitives: subscriptions, the dependency engine, the consolidator, the
//! download pipeline, and the installer.

mod add;
mod info;
mod list;
mod remove;

pub use add::{add_bundles, AddOutcome};
pub use info::{show_bundle_reqd_by, show_included_bundles};
pub use list::list_bundles;
pub use remove::{remove_bundles, RemoveOutcome};
