//! Platform identification
//!
//! A controller frequently needs to know whether it runs on vanilla Kubernetes or
//! on OpenShift, and which Kubernetes version the API server reports.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::version::OpenShiftVersion;

/// Kind of cluster platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlatformType {
    OpenShift,
    #[default]
    Kubernetes,
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformType::OpenShift => write!(f, "OpenShift"),
            PlatformType::Kubernetes => write!(f, "Kubernetes"),
        }
    }
}

/// Platform a controller is running on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformInfo {
    /// Platform name
    pub name: PlatformType,

    /// Kubernetes version as reported by the API server (e.g. "1.16+")
    #[serde(rename = "k8sVersion", default)]
    pub k8s_version: String,

    /// Operating system / architecture of the API server
    #[serde(default)]
    pub os: String,
}

impl PlatformInfo {
    /// Create platform info for the given platform and Kubernetes version
    pub fn new(name: PlatformType, k8s_version: impl Into<String>) -> Self {
        Self {
            name,
            k8s_version: k8s_version.into(),
            os: String::new(),
        }
    }

    /// Major component of the Kubernetes version ("1" for "1.16+")
    pub fn k8s_major_version(&self) -> &str {
        self.k8s_version.split('.').next().unwrap_or_default()
    }

    /// Minor component of the Kubernetes version ("16+" for "1.16+")
    ///
    /// Empty when the version has no minor component.
    pub fn k8s_minor_version(&self) -> &str {
        self.k8s_version.split('.').nth(1).unwrap_or_default()
    }

    pub fn is_openshift(&self) -> bool {
        self.name == PlatformType::OpenShift
    }

    pub fn is_kubernetes(&self) -> bool {
        self.name == PlatformType::Kubernetes
    }
}

impl fmt::Display for PlatformInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PlatformInfo [Name: {}, K8SVersion: {}, OS: {}]",
            self.name, self.k8s_version, self.os
        )
    }
}

/// The subset of an OpenShift `ClusterVersion` object carrying the desired version
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformClusterInfo {
    #[serde(default)]
    pub status: ClusterVersionStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterVersionStatus {
    #[serde(default)]
    pub desired: DesiredVersion,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DesiredVersion {
    #[serde(default)]
    pub version: String,
}

impl PlatformClusterInfo {
    /// Parse the raw JSON body of a `ClusterVersion` fetch
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Desired OpenShift version, normalized to carry the `v` prefix
    pub fn openshift_version(&self) -> Result<OpenShiftVersion> {
        let raw = self.status.desired.version.trim();
        if raw.is_empty() {
            return Err(CoreError::MissingField {
                field: "status.desired.version".to_string(),
            });
        }
        let version = if raw.starts_with('v') {
            raw.to_string()
        } else {
            format!("v{}", raw)
        };
        Ok(OpenShiftVersion::new(version))
    }
}
