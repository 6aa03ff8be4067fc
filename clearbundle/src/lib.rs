//! clearbundle - client-side engine for bundle-composed OS updates
//!
//! The installed system is the union of named *bundles*; each bundle is a
//! manifest of files and the Manifest-of-Manifests (MoM) is the root of
//! trust for a version. This library resolves bundle dependencies, fetches
//! and verifies content-addressed files, and swaps them into the live tree
//! with a crash-safe two-phase installer.
//!
//! # High-Level API
//!
//! The [`bundle`] module carries the command-level operations:
//!
//! ```ignore
//! use clearbundle::bundle;
//! use clearbundle::config::UpdaterConfig;
//! use clearbundle::report::ConsoleReporter;
//! use clearbundle::scripts::NoopHook;
//! use clearbundle::transport::HttpTransport;
//! use std::sync::Arc;
//!
//! let config = UpdaterConfig::new("/", "/var/lib/clearbundle")
//!     .with_url("https://cdn.example.com/update");
//! let transport = Arc::new(HttpTransport::new(&config)?);
//!
//! let outcome = bundle::add_bundles(
//!     &config,
//!     &transport,
//!     &NoopHook,
//!     &ConsoleReporter,
//!     &["editors".to_string()],
//! )
//! .await?;
//! ```

pub mod alias;
pub mod bundle;
pub mod clean;
pub mod config;
pub mod consolidate;
pub mod deps;
pub mod diskspace;
pub mod download;
pub mod error;
pub mod hash;
pub mod install;
pub mod logging;
pub mod manifest;
pub mod report;
pub mod scripts;
pub mod state;
pub mod subscription;
pub mod transport;

/// Version of the clearbundle library and CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
