//! Appliance version parsing.

use semver::Version;

use crate::{Error, Result};

/// Parse an appliance version string such as `2.13.0`, `v2.12` or `2.11.3-rc1`.
///
/// Missing minor/patch components default to zero.
pub fn parse_version(input: &str) -> Result<Version> {
    let trimmed = input.trim().trim_matches('"').trim_start_matches('v');
    let (core, suffix) = match trimmed.find(['-', '+']) {
        Some(idx) => trimmed.split_at(idx),
        None => (trimmed, ""),
    };

    let mut parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(Error::Version {
            input: input.to_string(),
            message: "expected MAJOR[.MINOR[.PATCH]]".to_string(),
        });
    }
    while parts.len() < 3 {
        parts.push("0");
    }

    Version::parse(&format!("{}{}", parts.join("."), suffix)).map_err(|e| Error::Version {
        input: input.to_string(),
        message: e.to_string(),
    })
}

/// Extract the release version from the target's release file.
///
/// Accepts either a `RELEASE_VERSION=...` line or a bare version.
pub fn parse_release(content: &str) -> Result<Version> {
    let line = content
        .lines()
        .map(str::trim)
        .find_map(|l| l.strip_prefix("RELEASE_VERSION="))
        .or_else(|| content.lines().map(str::trim).find(|l| !l.is_empty()))
        .ok_or_else(|| Error::Version {
            input: content.to_string(),
            message: "empty release information".to_string(),
        })?;
    parse_version(line)
}

/// `major.minor` pair of a version, used for series comparisons.
pub fn series(version: &Version) -> (u64, u64) {
    (version.major, version.minor)
}
