//! OpenShift versions
//!
//! OpenShift reports versions such as `v4.1`, `v4.3.1` or `v4.5.0-rc.2`. They follow
//! the Go module flavour of semantic versioning:
//!
//! - A leading `v` is mandatory
//! - `vMAJOR` and `vMAJOR.MINOR` are shorthands for `vMAJOR.0.0` and `vMAJOR.MINOR.0`
//! - Shorthands cannot carry a prerelease or build suffix
//! - Invalid versions sort before every valid version and are equal to each other
//! - Build metadata never affects ordering

use semver::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{CoreError, Result};
use crate::platform::PlatformInfo;

/// An OpenShift version string
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpenShiftVersion {
    #[serde(rename = "ocpVersion")]
    pub version: String,
}

/// A validated version split into its parts
struct Parsed {
    major: String,
    version: Version,
    build: String,
}

impl OpenShiftVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    /// Parse a version, rejecting strings that are not valid versions
    pub fn parse(version: &str) -> Result<Self> {
        let candidate = Self::new(version);
        if !candidate.is_valid() {
            return Err(CoreError::InvalidVersion {
                version: version.to_string(),
                message: "expected vMAJOR[.MINOR[.PATCH[-PRERELEASE][+BUILD]]]".to_string(),
            });
        }
        Ok(candidate)
    }

    /// Whether the version is a valid semantic version (shorthands allowed)
    pub fn is_valid(&self) -> bool {
        parse_parts(&self.version).is_some()
    }

    /// Major version with the `v` prefix ("v4" for "v4.1.2"), empty if invalid
    pub fn major_version(&self) -> String {
        parse_parts(&self.version)
            .map(|p| format!("v{}", p.major))
            .unwrap_or_default()
    }

    /// Minor version without prefix ("1" for "v4.1.2"), empty if invalid
    pub fn minor_version(&self) -> String {
        parse_parts(&self.version)
            .map(|p| p.version.minor.to_string())
            .unwrap_or_default()
    }

    /// `vMAJOR.MINOR` prefix of the version, empty if invalid
    pub fn major_minor(&self) -> String {
        parse_parts(&self.version)
            .map(|p| format!("v{}.{}", p.major, p.version.minor))
            .unwrap_or_default()
    }

    /// Prerelease suffix including the leading `-`, empty if none or invalid
    pub fn prerelease_version(&self) -> String {
        parse_parts(&self.version)
            .filter(|p| !p.version.pre.is_empty())
            .map(|p| format!("-{}", p.version.pre))
            .unwrap_or_default()
    }

    /// Build suffix including the leading `+`, empty if none or invalid
    pub fn build_version(&self) -> String {
        parse_parts(&self.version)
            .filter(|p| !p.build.is_empty())
            .map(|p| format!("+{}", p.build))
            .unwrap_or_default()
    }

    /// Compare two versions by semantic precedence
    pub fn compare(&self, other: &OpenShiftVersion) -> Ordering {
        match (parse_parts(&self.version), parse_parts(&other.version)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => precedence(&a.version, &b.version),
        }
    }
}

impl fmt::Display for OpenShiftVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpenShiftVersion [Version: {}]", self.version)
    }
}

fn precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch)
        .cmp(&(b.major, b.minor, b.patch))
        // an empty prerelease orders above any non-empty one
        .then_with(|| a.pre.cmp(&b.pre))
}

fn parse_parts(raw: &str) -> Option<Parsed> {
    let body = raw.strip_prefix('v')?;
    let (core, suffix) = match body.find(['-', '+']) {
        Some(idx) => body.split_at(idx),
        None => (body, ""),
    };

    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    if parts.len() < 3 && !suffix.is_empty() {
        return None;
    }

    let mut canonical = parts.join(".");
    for _ in parts.len()..3 {
        canonical.push_str(".0");
    }
    canonical.push_str(suffix);

    let version = Version::parse(&canonical).ok()?;
    Some(Parsed {
        major: parts[0].to_string(),
        build: version.build.to_string(),
        version,
    })
}

/// Kubernetes versions shipped by each OpenShift release
const K8S_TO_OPENSHIFT: &[(&str, &str)] = &[
    ("1.10+", "v3.10"),
    ("1.10", "v3.10"),
    ("1.11+", "v3.11"),
    ("1.11", "v3.11"),
    ("1.13+", "v4.1"),
    ("1.13", "v4.1"),
    ("1.14+", "v4.2"),
    ("1.14", "v4.2"),
    ("1.16+", "v4.3"),
    ("1.16", "v4.3"),
];

/// Map the Kubernetes version of a platform to the equivalent OpenShift version
///
/// Only the historical releases in the table are known; any other Kubernetes
/// version maps to an empty version.
pub fn k8s_openshift_version_map(info: &PlatformInfo) -> OpenShiftVersion {
    let mapped = K8S_TO_OPENSHIFT
        .iter()
        .find(|(k8s, _)| *k8s == info.k8s_version)
        .map(|(_, ocp)| OpenShiftVersion::new(*ocp).major_minor())
        .unwrap_or_default();
    OpenShiftVersion::new(mapped)
}
