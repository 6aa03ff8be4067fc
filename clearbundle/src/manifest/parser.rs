//! Textual manifest format.
//!
//! The wire format is line-oriented and bit-exact:
//!
//! ```text
//! MANIFEST\t<format>
//! version:\t<version>
//! previous:\t<previous>
//! filecount:\t<count>
//! timestamp:\t<epoch>
//! contentsize:\t<bytes>
//! includes:\t<bundle>
//!
//! <flags>\t<hash>\t<version>\t<filename>
//! ```
//!
//! `<flags>` is a 4-character token: type `[FDLMI.]`, status `[dg.]`,
//! modifier `[bCs.]`, then `[rx.]` for rename/experimental.

use crate::hash::HashError;
use crate::manifest::types::{FileKind, FileRecord, Manifest};
use std::collections::HashSet;
use thiserror::Error;

/// Errors from parsing manifest text.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest is missing the MANIFEST header line")]
    MissingHeader,

    #[error("invalid manifest header line: {0:?}")]
    InvalidHeader(String),

    #[error("invalid value for manifest header {key}: {value:?}")]
    InvalidHeaderValue { key: String, value: String },

    #[error("invalid file record line: {0:?}")]
    InvalidFileLine(String),

    #[error("invalid file flags token: {0:?}")]
    InvalidFlags(String),

    #[error("invalid content hash in manifest")]
    InvalidHash(#[from] HashError),

    #[error("duplicate filename in manifest: {0}")]
    DuplicateFilename(String),

    #[error("bundle \"{0}\" includes itself")]
    SelfInclude(String),

    #[error("deleted record for {0} does not carry the zero hash")]
    TombstoneHash(String),
}

/// Parse manifest text for the named component.
///
/// The component name is not part of the wire format; callers pass the name
/// they fetched the manifest under (`"MoM"` for the Manifest-of-Manifests).
pub fn parse_manifest(component: &str, content: &str) -> Result<Manifest, ManifestError> {
    let mut lines = content.lines();

    let first = lines.next().ok_or(ManifestError::MissingHeader)?;
    let format = first
        .strip_prefix("MANIFEST\t")
        .ok_or(ManifestError::MissingHeader)?
        .trim()
        .parse::<u32>()
        .map_err(|_| ManifestError::InvalidHeaderValue {
            key: "MANIFEST".into(),
            value: first.to_string(),
        })?;

    let mut manifest = Manifest::new(component, 0);
    manifest.format = format;

    // Header: key:\tvalue lines up to the first blank line.
    for line in lines.by_ref() {
        if line.is_empty() {
            break;
        }
        let (key, value) = line
            .split_once(":\t")
            .ok_or_else(|| ManifestError::InvalidHeader(line.to_string()))?;
        let parse_num = |value: &str| -> Result<u64, ManifestError> {
            value
                .trim()
                .parse()
                .map_err(|_| ManifestError::InvalidHeaderValue {
                    key: key.to_string(),
                    value: value.to_string(),
                })
        };
        match key {
            "version" => manifest.version = parse_num(value)? as u32,
            "previous" => manifest.previous = parse_num(value)? as u32,
            "filecount" => manifest.filecount = parse_num(value)?,
            "timestamp" => manifest.timestamp = parse_num(value)?,
            "contentsize" => manifest.contentsize = parse_num(value)?,
            "includes" => {
                let name = value.trim();
                if name == component {
                    return Err(ManifestError::SelfInclude(component.to_string()));
                }
                manifest.includes.push(name.to_string());
            }
            // Unknown headers from newer formats are tolerated.
            _ => tracing::debug!(key, "ignoring unknown manifest header"),
        }
    }

    // Body: one record per non-empty line, order preserved.
    let mut seen = HashSet::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let mut fields = line.splitn(4, '\t');
        let (flags, hash, version, filename) = match (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) {
            (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
            _ => return Err(ManifestError::InvalidFileLine(line.to_string())),
        };

        let mut record = FileRecord::new(
            filename,
            hash.parse()?,
            version
                .parse()
                .map_err(|_| ManifestError::InvalidFileLine(line.to_string()))?,
            FileKind::File,
        );
        apply_flags(&mut record, flags)?;

        if record.is_deleted && !record.hash.is_zero() {
            return Err(ManifestError::TombstoneHash(record.filename));
        }
        if !seen.insert(record.filename.clone()) {
            return Err(ManifestError::DuplicateFilename(record.filename));
        }
        manifest.files.push(record);
    }

    if manifest.filecount != manifest.files.len() as u64 {
        tracing::debug!(
            component,
            declared = manifest.filecount,
            actual = manifest.files.len(),
            "manifest filecount differs from body"
        );
    }

    Ok(manifest)
}

fn apply_flags(record: &mut FileRecord, token: &str) -> Result<(), ManifestError> {
    let bytes = token.as_bytes();
    if bytes.len() != 4 {
        return Err(ManifestError::InvalidFlags(token.to_string()));
    }

    record.kind = match bytes[0] {
        b'F' => FileKind::File,
        b'D' => FileKind::Directory,
        b'L' => FileKind::Link,
        b'M' | b'I' => FileKind::Manifest,
        b'.' => FileKind::File,
        _ => return Err(ManifestError::InvalidFlags(token.to_string())),
    };
    match bytes[1] {
        b'd' => record.is_deleted = true,
        b'g' => {
            record.is_deleted = true;
            record.is_ghosted = true;
        }
        b'.' => {}
        _ => return Err(ManifestError::InvalidFlags(token.to_string())),
    }
    match bytes[2] {
        b'C' => record.is_config = true,
        b's' => record.is_state = true,
        b'b' => record.is_boot = true,
        b'.' => {}
        _ => return Err(ManifestError::InvalidFlags(token.to_string())),
    }
    match bytes[3] {
        b'r' => record.is_rename = true,
        b'x' => record.is_experimental = true,
        b'.' => {}
        _ => return Err(ManifestError::InvalidFlags(token.to_string())),
    }
    Ok(())
}

fn flag_token(record: &FileRecord) -> String {
    let kind = match record.kind {
        FileKind::File => 'F',
        FileKind::Directory => 'D',
        FileKind::Link => 'L',
        FileKind::Manifest => 'M',
    };
    let status = if record.is_ghosted {
        'g'
    } else if record.is_deleted {
        'd'
    } else {
        '.'
    };
    let modifier = if record.is_config {
        'C'
    } else if record.is_state {
        's'
    } else if record.is_boot {
        'b'
    } else {
        '.'
    };
    let extra = if record.is_rename {
        'r'
    } else if record.is_experimental {
        'x'
    } else {
        '.'
    };
    [kind, status, modifier, extra].iter().collect()
}

/// Serialize a manifest back to wire format.
///
/// The parser is the consumer of record; the writer exists for mix overlays
/// and for building fixtures. `write_manifest` followed by [`parse_manifest`]
/// is lossless for everything the model carries.
pub fn write_manifest(manifest: &Manifest) -> String {
    let mut out = String::new();
    out.push_str(&format!("MANIFEST\t{}\n", manifest.format));
    out.push_str(&format!("version:\t{}\n", manifest.version));
    out.push_str(&format!("previous:\t{}\n", manifest.previous));
    out.push_str(&format!("filecount:\t{}\n", manifest.files.len()));
    out.push_str(&format!("timestamp:\t{}\n", manifest.timestamp));
    out.push_str(&format!("contentsize:\t{}\n", manifest.contentsize));
    for include in &manifest.includes {
        out.push_str(&format!("includes:\t{include}\n"));
    }
    out.push('\n');
    for record in &manifest.files {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\n",
            flag_token(record),
            record.hash,
            record.last_change,
            record.filename
        ));
    }
    out
}
