//! opkit Core - platform types shared by opkit controllers
//!
//! This crate provides the cluster-independent pieces of opkit:
//! - `PlatformInfo`: Which platform (Kubernetes or OpenShift) a controller runs on
//! - `OpenShiftVersion`: Semver-like OpenShift versions with Go-style comparison rules
//! - `DeploymentStatus`: Ready/starting/stopped summary of workload rollouts

pub mod error;
pub mod platform;
pub mod status;
pub mod version;

pub use error::{CoreError, Result};
pub use platform::{PlatformClusterInfo, PlatformInfo, PlatformType};
pub use status::{DeploymentStatus, Workload, deployment_status};
pub use version::{OpenShiftVersion, k8s_openshift_version_map};
