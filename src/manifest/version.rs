//! Version requirement expressions.
//!
//! Accepted forms:
//! - `*` (or empty): any version
//! - `=1.2.3` or bare `1.2.3`: exact match
//! - `>=1.2.3`: minimum
//! - `^1.2.3`: compatible range, same major and not older than the anchor

use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Parse a version under strict `MAJOR.MINOR.PATCH` rules.
pub fn parse_version(raw: &str) -> Result<Version, semver::Error> {
    Version::parse(raw.trim())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionRequirement {
    Any,
    Exact(Version),
    Minimum(Version),
    Compatible(Version),
}

impl VersionRequirement {
    pub fn parse(raw: &str) -> Result<Self, semver::Error> {
        let raw = raw.trim();
        if raw.is_empty() || raw == "*" {
            return Ok(Self::Any);
        }
        if let Some(rest) = raw.strip_prefix(">=") {
            return Ok(Self::Minimum(parse_version(rest)?));
        }
        if let Some(rest) = raw.strip_prefix('^') {
            return Ok(Self::Compatible(parse_version(rest)?));
        }
        if let Some(rest) = raw.strip_prefix('=') {
            return Ok(Self::Exact(parse_version(rest)?));
        }
        Ok(Self::Exact(parse_version(raw)?))
    }

    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(v) => version == v,
            Self::Minimum(v) => version >= v,
            Self::Compatible(v) => version.major == v.major && version >= v,
        }
    }

    /// The version the requirement is expressed against, if any.
    pub fn anchor(&self) -> Option<&Version> {
        match self {
            Self::Any => None,
            Self::Exact(v) | Self::Minimum(v) | Self::Compatible(v) => Some(v),
        }
    }
}

impl Default for VersionRequirement {
    fn default() -> Self {
        Self::Any
    }
}

impl fmt::Display for VersionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Exact(v) => write!(f, "={}", v),
            Self::Minimum(v) => write!(f, ">={}", v),
            Self::Compatible(v) => write!(f, "^{}", v),
        }
    }
}

impl FromStr for VersionRequirement {
    type Err = semver::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for VersionRequirement {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionRequirement {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
