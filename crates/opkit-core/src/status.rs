//! Rollout status of workloads
//!
//! Summarizes a set of workloads into the ready / starting / stopped buckets that an
//! operator typically reports on its own custom resource status.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use serde::{Deserialize, Serialize};

/// Replica counts of a workload (Deployment, DaemonSet, DeploymentConfig, ...)
pub trait Workload {
    fn name(&self) -> &str;

    /// Replicas requested in the spec
    fn spec_replicas(&self) -> i32;

    /// Replicas currently created, as reported by the status
    fn status_replicas(&self) -> i32;

    /// Replicas reported ready
    fn ready_replicas(&self) -> i32;
}

/// Workload names grouped by rollout state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stopped: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub starting: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ready: Vec<String>,
}

impl DeploymentStatus {
    /// All workloads are ready
    pub fn all_ready(&self) -> bool {
        self.stopped.is_empty() && self.starting.is_empty()
    }
}

/// Compute the rollout status of a set of workloads
///
/// A workload scaled to zero, or without any replica created yet, is stopped. A
/// workload with fewer ready replicas than created ones is starting.
pub fn deployment_status<W: Workload>(workloads: &[W]) -> DeploymentStatus {
    let mut status = DeploymentStatus::default();

    for workload in workloads {
        let name = workload.name().to_string();
        if workload.spec_replicas() == 0 || workload.status_replicas() == 0 {
            status.stopped.push(name);
        } else if workload.ready_replicas() < workload.status_replicas() {
            status.starting.push(name);
        } else {
            status.ready.push(name);
        }
    }

    tracing::info!(
        stopped = ?status.stopped,
        starting = ?status.starting,
        ready = ?status.ready,
        "found workloads with status"
    );
    status
}

fn meta_name(name: &Option<String>) -> &str {
    name.as_deref().unwrap_or_default()
}

impl Workload for Deployment {
    fn name(&self) -> &str {
        meta_name(&self.metadata.name)
    }

    fn spec_replicas(&self) -> i32 {
        self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0)
    }

    fn status_replicas(&self) -> i32 {
        self.status.as_ref().and_then(|s| s.replicas).unwrap_or(0)
    }

    fn ready_replicas(&self) -> i32 {
        self.status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0)
    }
}

impl Workload for StatefulSet {
    fn name(&self) -> &str {
        meta_name(&self.metadata.name)
    }

    fn spec_replicas(&self) -> i32 {
        self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0)
    }

    fn status_replicas(&self) -> i32 {
        self.status.as_ref().map(|s| s.replicas).unwrap_or(0)
    }

    fn ready_replicas(&self) -> i32 {
        self.status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0)
    }
}

impl Workload for DaemonSet {
    fn name(&self) -> &str {
        meta_name(&self.metadata.name)
    }

    /// One pod per eligible node, so a DaemonSet always asks for replicas
    fn spec_replicas(&self) -> i32 {
        1
    }

    fn status_replicas(&self) -> i32 {
        self.status
            .as_ref()
            .map(|s| s.desired_number_scheduled)
            .unwrap_or(0)
    }

    fn ready_replicas(&self) -> i32 {
        self.status.as_ref().map(|s| s.number_ready).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment(name: &str, spec: Option<i32>, status: i32, ready: i32) -> Deployment {
        let yaml = format!(
            r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: {name}
spec:
  selector: {{}}
  template: {{}}
status:
  replicas: {status}
  readyReplicas: {ready}
"#
        );
        let mut d: Deployment = serde_yaml::from_str(&yaml).unwrap();
        if let Some(spec_replicas) = spec {
            d.spec.as_mut().unwrap().replicas = Some(spec_replicas);
        }
        d
    }

    #[test]
    fn test_deployment_status_buckets() {
        let deployments = vec![
            deployment("scaled-down", Some(0), 0, 0),
            deployment("no-replicas-field", None, 0, 0),
            deployment("pending", Some(2), 0, 0),
            deployment("starting", Some(3), 3, 1),
            deployment("ready", Some(2), 2, 2),
        ];

        let status = deployment_status(&deployments);
        assert_eq!(
            status.stopped,
            vec!["scaled-down", "no-replicas-field", "pending"]
        );
        assert_eq!(status.starting, vec!["starting"]);
        assert_eq!(status.ready, vec!["ready"]);
        assert!(!status.all_ready());
    }

    #[test]
    fn test_daemonset_status() {
        let ds: DaemonSet = serde_yaml::from_str(
            r#"
apiVersion: apps/v1
kind: DaemonSet
metadata:
  name: agent
status:
  currentNumberScheduled: 3
  desiredNumberScheduled: 3
  numberMisscheduled: 0
  numberReady: 3
"#,
        )
        .unwrap();
        let unscheduled = DaemonSet {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some("idle".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let status = deployment_status(&[ds, unscheduled]);
        assert_eq!(status.ready, vec!["agent"]);
        assert_eq!(status.stopped, vec!["idle"]);
    }

    #[test]
    fn test_empty_status_serializes_empty() {
        let status = deployment_status::<Deployment>(&[]);
        assert!(status.all_ready());
        assert_eq!(serde_json::to_string(&status).unwrap(), "{}");
    }
}
