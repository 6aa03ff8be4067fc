//! clearbundle CLI - command-line front-end for the update engine.
//!
//! The CLI is organized into:
//! - `Cli` / `Commands`: argument parsing (clap)
//! - `CliRunner`: common setup (config file, logging, transport)
//! - `CliError`: centralized error handling with exit-code mapping

mod error;
mod runner;

use clap::{Args, Parser, Subcommand};
use clearbundle::bundle;
use clearbundle::clean::{clean_statedir, CleanOptions};
use clearbundle::report::ConsoleReporter;
use error::CliError;
use runner::CliRunner;
use std::path::PathBuf;
use std::process;

// ============================================================================
// CLI Argument Definitions
// ============================================================================

/// Global options shared by every subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Installation root of the managed system
    #[arg(short = 'p', long = "path", global = true)]
    pub path: Option<PathBuf>,

    /// Writable state directory
    #[arg(short = 'S', long = "statedir", global = true)]
    pub statedir: Option<PathBuf>,

    /// Base URL for both content and version requests
    #[arg(short = 'u', long = "url", global = true)]
    pub url: Option<String>,

    /// Base URL for content downloads
    #[arg(short = 'c', long = "contenturl", global = true)]
    pub contenturl: Option<String>,

    /// Base URL for version queries
    #[arg(short = 'v', long = "versionurl", global = true)]
    pub versionurl: Option<String>,

    /// Manifest format to request from the server
    #[arg(short = 'F', long = "format", global = true)]
    pub format: Option<u32>,

    /// Maximum download retries per URL (0 disables retrying)
    #[arg(short = 'r', long = "max-retries", global = true)]
    pub max_retries: Option<u32>,

    /// Initial delay between download retries, in seconds
    #[arg(short = 'd', long = "retry-delay", global = true)]
    pub retry_delay: Option<u32>,

    /// Configuration file (default: <path>/etc/clearbundle/config.ini)
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Parser)]
#[command(name = "clearbundle")]
#[command(version = clearbundle::VERSION)]
#[command(about = "Bundle-based OS update client", long_about = None)]
struct Cli {
    #[command(flatten)]
    globals: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install one or more bundles
    #[command(name = "bundle-add")]
    BundleAdd {
        /// Bundles to install
        #[arg(required = true)]
        bundles: Vec<String>,

        /// Skip the free-space check before installing
        #[arg(long = "skip-diskspace-check")]
        skip_diskspace_check: bool,
    },

    /// Uninstall one or more bundles
    #[command(name = "bundle-remove")]
    BundleRemove {
        /// Bundles to remove
        #[arg(required = true)]
        bundles: Vec<String>,
    },

    /// List installed bundles
    #[command(name = "bundle-list")]
    BundleList {
        /// List every installable bundle from the MoM instead
        #[arg(long = "all")]
        all: bool,
    },

    /// Show bundle dependency information
    #[command(name = "bundle-info")]
    BundleInfo {
        /// Bundle to inspect
        bundle: String,

        /// Show the bundles this bundle includes
        #[arg(long = "dependencies")]
        dependencies: bool,

        /// Show the bundles that require this bundle
        #[arg(long = "requires")]
        requires: bool,

        /// Consider all installable bundles, not only installed ones
        #[arg(long = "all")]
        all: bool,
    },

    /// Remove cached update content from the state directory
    Clean {
        /// Remove all cached content including recent metadata
        #[arg(long = "all")]
        all: bool,

        /// Only print the files that would be removed
        #[arg(long = "dry-run")]
        dry_run: bool,
    },
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // clap handles --help/--version itself with status 0
            if e.use_stderr() {
                let _ = e.print();
                process::exit(clearbundle::error::ExitCode::InvalidOption.as_i32());
            }
            let _ = e.print();
            process::exit(0);
        }
    };

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<i32, CliError> {
    let runner = CliRunner::new(&cli.globals)?;
    let reporter = ConsoleReporter;

    match cli.command {
        Commands::BundleAdd {
            bundles,
            skip_diskspace_check,
        } => {
            let mut config = runner.config.clone();
            config.skip_diskspace_check = skip_diskspace_check;
            let transport = runner.transport()?;
            let outcome = bundle::add_bundles(
                &config,
                &transport,
                runner.post_update.as_ref(),
                &reporter,
                &bundles,
            )
            .await;
            tracing::debug!(
                bytes = transport.bytes_transferred(),
                "session download total"
            );
            Ok(outcome?.code.as_i32())
        }

        Commands::BundleRemove { bundles } => {
            let transport = runner.transport()?;
            let outcome =
                bundle::remove_bundles(&runner.config, &*transport, &reporter, &bundles).await?;
            Ok(outcome.code.as_i32())
        }

        Commands::BundleList { all } => {
            let transport = runner.transport()?;
            bundle::list_bundles(&runner.config, &*transport, &reporter, all).await?;
            Ok(0)
        }

        Commands::BundleInfo {
            bundle: name,
            dependencies,
            requires,
            all,
        } => {
            if dependencies == requires {
                return Err(CliError::Config(
                    "bundle-info needs exactly one of --dependencies or --requires".to_string(),
                ));
            }
            let transport = runner.transport()?;
            if dependencies {
                bundle::show_included_bundles(&runner.config, &*transport, &reporter, &name)
                    .await?;
            } else {
                bundle::show_bundle_reqd_by(&runner.config, &*transport, &reporter, &name, all)
                    .await?;
            }
            Ok(0)
        }

        Commands::Clean { all, dry_run } => {
            clearbundle::state::ensure_state_layout(&runner.config)?;
            let stats = clean_statedir(&runner.config, &reporter, CleanOptions { all, dry_run })?;
            if dry_run {
                println!("Would remove {} files.", stats.files_removed);
            } else {
                println!("{} files removed.", stats.files_removed);
            }
            Ok(0)
        }
    }
}
