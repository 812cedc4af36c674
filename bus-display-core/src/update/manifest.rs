//! Version manifest exchanged with the update server.

use serde::{Deserialize, Serialize};

use super::error::UpdateError;
use crate::config::VersionPolicy;

/// Body of the version request.
#[derive(Debug, Serialize)]
pub struct ManifestRequest<'a> {
    pub hardware: &'a str,
    pub mac: &'a str,
}

/// Latest firmware published for this device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VersionDescriptor {
    #[serde(rename = "app_version")]
    pub version: String,
    #[serde(rename = "app_url")]
    pub download_url: String,
    /// Optional hex SHA-256 of the image.
    #[serde(rename = "app_sha256", default)]
    pub sha256: Option<String>,
}

impl VersionDescriptor {
    pub fn parse(body: &[u8]) -> Result<Self, UpdateError> {
        let descriptor: VersionDescriptor =
            serde_json::from_slice(body).map_err(|e| UpdateError::Parse(e.to_string()))?;
        if descriptor.version.trim().is_empty() {
            return Err(UpdateError::Parse("empty app_version".to_string()));
        }
        Ok(descriptor)
    }
}

/// Decide whether `candidate` should replace the running `current` version.
pub fn is_newer(policy: VersionPolicy, candidate: &str, current: &str) -> bool {
    match policy {
        VersionPolicy::Differs => candidate != current,
        VersionPolicy::Newer => match (parse_semver(candidate), parse_semver(current)) {
            (Some(candidate), Some(current)) => candidate > current,
            _ => candidate != current,
        },
    }
}

fn parse_semver(version: &str) -> Option<semver::Version> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    semver::Version::parse(trimmed).ok()
}
