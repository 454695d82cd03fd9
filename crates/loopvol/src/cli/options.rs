//! Translation of `key=value` create options into a [`CreateRequest`].

use std::collections::BTreeMap;

use loopvol_common::{ByteSize, VolumeError, VolumeResult};

use crate::filesystem::Filesystem;
use crate::volume::{CreateRequest, Ownership};

/// Options accepted by `create`.
pub const ALLOWED_OPTIONS: [&str; 6] = ["size", "sparse", "fs", "uid", "gid", "mode"];

/// Highest accepted `mode`, all permission and special bits set.
const MAX_MODE: u32 = 0o7777;

/// Split a `key=value` argument.
///
/// # Errors
///
/// Returns a message if there is no `=`.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("invalid option '{s}': expected key=value"))
}

/// Build a create request from an option map.
///
/// Missing options take their defaults: `default_size`, not sparse, xfs and
/// no ownership change. Empty `uid`/`gid` values count as missing.
///
/// # Errors
///
/// - [`VolumeError::InvalidOption`] for unknown keys (all listed, sorted) and
///   malformed values
/// - [`VolumeError::InvalidSize`] for an unparsable `size`
/// - [`VolumeError::UnsupportedFilesystem`] for an unknown `fs`
pub fn parse_create_options(
    name: &str,
    options: &BTreeMap<String, String>,
    default_size: ByteSize,
) -> VolumeResult<CreateRequest> {
    let unknown: Vec<&str> = options
        .keys()
        .map(String::as_str)
        .filter(|key| !ALLOWED_OPTIONS.contains(key))
        .collect();
    if !unknown.is_empty() {
        return Err(VolumeError::InvalidOption {
            option: unknown.join(", "),
            reason: format!("supported options are {}", ALLOWED_OPTIONS.join(", ")),
        });
    }

    let size = match options.get("size") {
        Some(size) => ByteSize::parse(size)?,
        None => default_size,
    };

    let sparse = options
        .get("sparse")
        .map(|v| parse_bool("sparse", v))
        .transpose()?
        .unwrap_or(false);

    let filesystem = options
        .get("fs")
        .map(|v| v.parse::<Filesystem>())
        .transpose()?
        .unwrap_or_default();

    let ownership = Ownership {
        uid: parse_id(options, "uid")?,
        gid: parse_id(options, "gid")?,
        mode: options.get("mode").map(|v| parse_mode(v)).transpose()?,
    };

    tracing::debug!(
        name,
        size = size.as_bytes(),
        sparse,
        %filesystem,
        ?ownership,
        "Parsed create options"
    );

    Ok(CreateRequest::new(name, size.as_bytes())
        .with_sparse(sparse)
        .with_filesystem(filesystem)
        .with_ownership(ownership))
}

fn invalid(option: &str, reason: impl Into<String>) -> VolumeError {
    VolumeError::InvalidOption {
        option: option.to_string(),
        reason: reason.into(),
    }
}

fn parse_bool(option: &str, value: &str) -> VolumeResult<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(invalid(option, format!("cannot parse '{value}' as a boolean"))),
    }
}

fn parse_id(options: &BTreeMap<String, String>, option: &str) -> VolumeResult<Option<u32>> {
    let Some(value) = options.get(option).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    let id: i64 = value
        .parse()
        .map_err(|_| invalid(option, format!("cannot parse '{value}' as an integer")))?;
    if id < 0 {
        return Err(invalid(option, format!("must be >= 0 but received {id}")));
    }
    u32::try_from(id)
        .map(Some)
        .map_err(|_| invalid(option, format!("{id} is out of range")))
}

fn parse_mode(value: &str) -> VolumeResult<u32> {
    let mode = u32::from_str_radix(value, 8)
        .map_err(|_| invalid("mode", format!("cannot parse '{value}' as an octal mode")))?;
    if mode == 0 || mode > MAX_MODE {
        return Err(invalid("mode", format!("'{value}' is outside 1..7777")));
    }
    Ok(mode)
}
