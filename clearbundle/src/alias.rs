//! Bundle name aliases.
//!
//! An alias file maps a short name to one or more bundles, one definition
//! per line: `alias<TAB>bundle[<TAB>bundle...]`. Definitions are read from
//! `/usr/share/defaults/clearbundle/alias/` (vendor) and
//! `/etc/clearbundle/alias/` (administrator) under the live root; the
//! administrator's definitions win on conflict.

use crate::config::UpdaterConfig;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Alias name → bundles it expands to.
pub type AliasDefinitions = HashMap<String, Vec<String>>;

fn alias_dirs(config: &UpdaterConfig) -> [PathBuf; 2] {
    [
        config
            .path_prefix
            .join("usr/share/defaults/clearbundle/alias"),
        config.path_prefix.join("etc/clearbundle/alias"),
    ]
}

/// Read every alias definition visible on the system.
///
/// Missing directories and unreadable files are quietly skipped; aliases
/// are sugar, never a hard dependency.
pub fn get_alias_definitions(config: &UpdaterConfig) -> AliasDefinitions {
    let mut aliases = AliasDefinitions::new();

    for dir in alias_dirs(config) {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        let mut files: Vec<_> = entries.flatten().map(|e| e.path()).collect();
        files.sort();
        for file in files {
            let Ok(content) = fs::read_to_string(&file) else {
                debug!(path = %file.display(), "skipping unreadable alias file");
                continue;
            };
            for line in content.lines() {
                let mut fields = line.split('\t');
                let Some(name) = fields.next() else {
                    continue;
                };
                if name.is_empty() || name.starts_with('#') {
                    continue;
                }
                let bundles: Vec<String> = fields
                    .filter(|b| !b.is_empty())
                    .map(|b| b.to_string())
                    .collect();
                if bundles.is_empty() {
                    continue;
                }
                aliases.insert(name.to_string(), bundles);
            }
        }
    }

    aliases
}

/// Expand one requested name through the alias table.
///
/// A name with no alias definition expands to itself.
pub fn get_alias_bundles(aliases: &AliasDefinitions, name: &str) -> Vec<String> {
    aliases
        .get(name)
        .cloned()
        .unwrap_or_else(|| vec![name.to_string()])
}
