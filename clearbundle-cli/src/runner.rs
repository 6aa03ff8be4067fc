//! Shared command setup: config file, flag overrides, logging, transport.

use crate::error::CliError;
use crate::GlobalArgs;
use clearbundle::config::UpdaterConfig;
use clearbundle::logging::{init_logging, LoggingGuard};
use clearbundle::scripts::{NoopHook, PostUpdateHook, ScriptHook};
use clearbundle::transport::HttpTransport;
use ini::Ini;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default live root.
const DEFAULT_PATH_PREFIX: &str = "/";

/// Default writable state root.
const DEFAULT_STATE_DIR: &str = "/var/lib/clearbundle";

/// Holds everything a command handler needs.
pub struct CliRunner {
    pub config: UpdaterConfig,
    pub post_update: Box<dyn PostUpdateHook>,
    _logging: LoggingGuard,
}

impl std::fmt::Debug for CliRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliRunner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CliRunner {
    /// Build the runner from global flags and the optional config file.
    ///
    /// Precedence, lowest to highest: built-in defaults, config file,
    /// command-line flags.
    pub fn new(args: &GlobalArgs) -> Result<Self, CliError> {
        let logging =
            init_logging(None).map_err(|e| CliError::LoggingInit(e.to_string()))?;

        let path_prefix = args
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PATH_PREFIX));
        let state_dir = args
            .statedir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));

        let mut config = UpdaterConfig::new(path_prefix, state_dir);
        let mut post_update: Box<dyn PostUpdateHook> = Box::new(NoopHook);

        let config_file = args
            .config
            .clone()
            .unwrap_or_else(|| config.path_prefix.join("etc/clearbundle/config.ini"));
        if config_file.exists() {
            apply_config_file(&mut config, &mut post_update, &config_file)?;
        }

        if let Some(url) = &args.url {
            config = config.with_url(url.clone());
        }
        if let Some(url) = &args.contenturl {
            config = config.with_content_url(url.clone());
        }
        if let Some(url) = &args.versionurl {
            config = config.with_version_url(url.clone());
        }
        if let Some(format) = args.format {
            config.format = format;
        }
        if let Some(retries) = args.max_retries {
            config = config.with_max_retries(retries);
        }
        if let Some(delay) = args.retry_delay {
            config = config.with_retry_delay(delay);
        }

        if config.content_url.is_empty() {
            return Err(CliError::Config(
                "no content URL configured; pass --url or set update.content_url in config.ini"
                    .to_string(),
            ));
        }

        Ok(Self {
            config,
            post_update,
            _logging: logging,
        })
    }

    /// One transport per run, shared by every download.
    pub fn transport(&self) -> Result<Arc<HttpTransport>, CliError> {
        HttpTransport::new(&self.config)
            .map(Arc::new)
            .map_err(|e| CliError::Transport(e.into()))
    }
}

fn apply_config_file(
    config: &mut UpdaterConfig,
    post_update: &mut Box<dyn PostUpdateHook>,
    path: &Path,
) -> Result<(), CliError> {
    let ini = Ini::load_from_file(path)
        .map_err(|e| CliError::Config(format!("{}: {e}", path.display())))?;

    if let Some(section) = ini.section(Some("update")) {
        if let Some(url) = section.get("content_url") {
            config.content_url = url.to_string();
        }
        if let Some(url) = section.get("version_url") {
            config.version_url = url.to_string();
        }
        if let Some(format) = section.get("format") {
            config.format = parse_key(path, "update.format", format)?;
        }
    }

    if let Some(section) = ini.section(Some("download")) {
        if let Some(value) = section.get("max_retries") {
            config.max_retries = parse_key(path, "download.max_retries", value)?;
        }
        if let Some(value) = section.get("retry_delay") {
            config.retry_delay = parse_key(path, "download.retry_delay", value)?;
        }
        if let Some(value) = section.get("max_parallel_downloads") {
            config.max_parallel_downloads =
                parse_key(path, "download.max_parallel_downloads", value)?;
        }
    }

    if let Some(section) = ini.section(Some("scripts")) {
        if let Some(script) = section.get("post_update") {
            *post_update = Box::new(ScriptHook::new(script));
        }
    }

    Ok(())
}

fn parse_key<T: std::str::FromStr>(path: &Path, key: &str, value: &str) -> Result<T, CliError> {
    value.parse().map_err(|_| {
        CliError::Config(format!(
            "{}: invalid value '{value}' for {key}",
            path.display()
        ))
    })
}
