//! Structural comparison of desired and actual resources
//!
//! Reconcilers compute a desired object and load the actual one from the cluster.
//! Comparing the two naively always reports a difference: the stored object carries
//! a status, a resource version, defaults and allocated addresses that the desired
//! object never sets. The [`Comparator`] normalizes both sides per resource kind
//! and then compares every remaining field, so that:
//!
//! - Fields the server owns never cause an update
//! - Any user-significant difference, including fields unknown to the rules, does
//!
//! Resources are compared through their JSON form, which works for k8s-openapi
//! types, [`DynamicObject`](kube::core::DynamicObject)s and raw values alike.

mod delta;
pub mod normalize;

pub use delta::{ResourceDelta, compare_by_kind, compare_resources};
pub use normalize::merge_secret_string_data;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::ComparatorConfig;

/// Custom equality for one resource kind, called with (desired, actual)
pub type CompareFn = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// Resource kinds with dedicated comparison rules
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Route,
    Service,
    Deployment,
    DeploymentConfig,
    BuildConfig,
    Secret,
    /// Any other kind, compared with the generic rules
    ///
    /// Kinds outside the core group are qualified with their group
    /// (`Widget.example.com`) so that equally named kinds of different APIs
    /// stay apart.
    Other(String),
}

impl ResourceKind {
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "Route" => ResourceKind::Route,
            "Service" => ResourceKind::Service,
            "Deployment" => ResourceKind::Deployment,
            "DeploymentConfig" => ResourceKind::DeploymentConfig,
            "BuildConfig" => ResourceKind::BuildConfig,
            "Secret" => ResourceKind::Secret,
            other => ResourceKind::Other(other.to_string()),
        }
    }

    /// Kind of a resource from its `apiVersion` and `kind`
    pub fn from_type(api_version: &str, kind: &str) -> Self {
        match Self::from_kind(kind) {
            ResourceKind::Other(kind) => match api_version.split_once('/') {
                Some((group, _)) if !group.is_empty() => {
                    ResourceKind::Other(format!("{}.{}", kind, group))
                }
                _ => ResourceKind::Other(kind),
            },
            known => known,
        }
    }

    /// Kind of a resource from its JSON form
    pub fn of(resource: &Value) -> Self {
        let field = |name: &str| resource.get(name).and_then(Value::as_str).unwrap_or_default();
        Self::from_type(field("apiVersion"), field("kind"))
    }

    pub fn as_str(&self) -> &str {
        match self {
            ResourceKind::Route => "Route",
            ResourceKind::Service => "Service",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::DeploymentConfig => "DeploymentConfig",
            ResourceKind::BuildConfig => "BuildConfig",
            ResourceKind::Secret => "Secret",
            ResourceKind::Other(kind) => kind,
        }
    }
}

impl From<&str> for ResourceKind {
    fn from(kind: &str) -> Self {
        Self::from_kind(kind)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-aware deep equality for Kubernetes resources
#[derive(Clone, Default)]
pub struct Comparator {
    config: ComparatorConfig,
    overrides: HashMap<ResourceKind, CompareFn>,
}

impl Comparator {
    /// Create a comparator with the built-in rules
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ComparatorConfig) -> Self {
        Self {
            config,
            overrides: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ComparatorConfig {
        &self.config
    }

    /// Replace the rules for one kind with a custom comparison
    pub fn set_comparator<F>(&mut self, kind: ResourceKind, compare: F)
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.overrides.insert(kind, Arc::new(compare));
    }

    /// Builder form of [`set_comparator`](Self::set_comparator)
    pub fn with_comparator<F>(mut self, kind: ResourceKind, compare: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.set_comparator(kind, compare);
        self
    }

    /// Whether a custom comparison is installed for the kind
    pub fn has_override(&self, kind: &ResourceKind) -> bool {
        self.overrides.contains_key(kind)
    }

    /// Compare two resources of the same type
    ///
    /// Returns `false` when either side cannot be represented as JSON.
    pub fn equal<T: Serialize>(&self, desired: &T, actual: &T) -> bool {
        match (serde_json::to_value(desired), serde_json::to_value(actual)) {
            (Ok(desired), Ok(actual)) => self.equal_values(&desired, &actual),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "cannot compare resources that do not serialize");
                false
            }
        }
    }

    /// Compare the JSON forms of two resources
    pub fn equal_values(&self, desired: &Value, actual: &Value) -> bool {
        let kind = ResourceKind::of(desired);
        if kind != ResourceKind::of(actual) {
            return false;
        }

        if let Some(compare) = self.overrides.get(&kind) {
            return compare(desired, actual);
        }

        let mut desired = normalize::normalize(&kind, desired, &self.config);
        let actual = normalize::normalize(&kind, actual, &self.config);
        normalize::adopt_allocated(&kind, &mut desired, &actual);

        let equal = desired == actual;
        if !equal {
            tracing::debug!(kind = %kind, "resources differ");
        }
        equal
    }

    /// The comparable form of a resource, as used by [`equal_values`](Self::equal_values)
    pub fn normalized(&self, resource: &Value) -> Value {
        normalize::normalize(&ResourceKind::of(resource), resource, &self.config)
    }
}

impl fmt::Debug for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Comparator")
            .field("config", &self.config)
            .field("overrides", &self.overrides.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Compare two resources with the built-in rules
pub fn equal<T: Serialize>(desired: &T, actual: &T) -> bool {
    Comparator::new().equal(desired, actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::{EnvVar, Secret, Service};
    use serde_json::json;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn env_vars(count: usize, ordered: bool) -> Vec<EnvVar> {
        (0..count)
            .map(|i| {
                let suffix = if ordered { i + 1 } else { count - i };
                EnvVar {
                    name: format!("VAR{}", suffix),
                    value: Some(format!("value_{}", suffix)),
                    ..Default::default()
                }
            })
            .collect()
    }

    fn deployment(name: &str) -> Deployment {
        serde_yaml::from_str(&format!(
            r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: {name}
spec:
  selector:
    matchLabels:
      app: {name}
  template:
    metadata:
      labels:
        app: {name}
    spec:
      containers:
        - name: my-container
          image: quay.io/org/app:1.0
"#
        ))
        .unwrap()
    }

    #[test]
    fn test_resource_kind_mapping() {
        assert_eq!(ResourceKind::from_kind("Route"), ResourceKind::Route);
        assert_eq!(
            ResourceKind::from_kind("ConfigMap"),
            ResourceKind::Other("ConfigMap".to_string())
        );
        assert_eq!(ResourceKind::of(&json!({"kind": "Secret"})), ResourceKind::Secret);
        assert_eq!(ResourceKind::DeploymentConfig.to_string(), "DeploymentConfig");
        assert_eq!(ResourceKind::of(&json!({})).as_str(), "");
    }

    #[test]
    fn test_custom_kinds_qualified_by_group() {
        assert_eq!(
            ResourceKind::from_type("v1", "ConfigMap"),
            ResourceKind::Other("ConfigMap".to_string())
        );
        assert_eq!(
            ResourceKind::from_type("example.com/v1", "Widget"),
            ResourceKind::Other("Widget.example.com".to_string())
        );
        assert_ne!(
            ResourceKind::from_type("example.com/v1", "Widget"),
            ResourceKind::from_type("other.io/v1alpha1", "Widget")
        );
        assert_eq!(
            ResourceKind::from_type("apps.openshift.io/v1", "DeploymentConfig"),
            ResourceKind::DeploymentConfig
        );

        let a = json!({"apiVersion": "example.com/v1", "kind": "Widget", "metadata": {"name": "x"}});
        let mut b = a.clone();
        b["apiVersion"] = json!("other.io/v1");
        assert!(!Comparator::new().equal_values(&a, &b));
    }

    #[test]
    fn test_equal_is_reflexive() {
        let d = deployment("app");
        assert!(equal(&d, &d));
    }

    #[test]
    fn test_compare_routes_ignores_status_and_generated_host() {
        let desired = yaml(
            r#"
apiVersion: route.openshift.io/v1
kind: Route
metadata:
  name: rte1
spec:
  to:
    kind: Service
    name: web
"#,
        );
        let actual = yaml(
            r#"
apiVersion: route.openshift.io/v1
kind: Route
metadata:
  name: rte1
  resourceVersion: "1234"
  annotations:
    openshift.io/host.generated: "true"
spec:
  host: rte1-myproject.apps.example.com
  to:
    kind: Service
    name: web
    weight: 100
  wildcardPolicy: None
status:
  ingress:
    - host: localhost
"#,
        );
        assert_ne!(desired, actual);
        assert!(Comparator::new().equal_values(&desired, &actual));
    }

    #[test]
    fn test_compare_routes_detects_explicit_host_change() {
        let desired = yaml("{kind: Route, metadata: {name: r}, spec: {host: a.example.com}}");
        let actual = yaml("{kind: Route, metadata: {name: r}, spec: {host: b.example.com}}");
        assert!(!Comparator::new().equal_values(&desired, &actual));
    }

    #[test]
    fn test_compare_empty_annotations() {
        let desired = yaml("{kind: Route, metadata: {name: r, annotations: {openshift.io/host.generated: 'true'}}}");
        let actual = yaml("{kind: Route, metadata: {name: r}}");
        assert!(Comparator::new().equal_values(&desired, &actual));
    }

    #[test]
    fn test_compare_services_ignores_load_balancer_and_allocations() {
        let desired: Service = serde_yaml::from_str(
            r#"
apiVersion: v1
kind: Service
metadata:
  name: svc1
spec:
  type: LoadBalancer
  selector:
    app: web
  ports:
    - port: 80
"#,
        )
        .unwrap();
        let actual: Service = serde_yaml::from_str(
            r#"
apiVersion: v1
kind: Service
metadata:
  name: svc1
  uid: 8f1c
spec:
  type: LoadBalancer
  clusterIP: 172.30.12.4
  clusterIPs: [172.30.12.4]
  ipFamilies: [IPv4]
  ipFamilyPolicy: SingleStack
  sessionAffinity: None
  selector:
    app: web
  ports:
    - port: 80
      protocol: TCP
      targetPort: 80
      nodePort: 31234
status:
  loadBalancer:
    ingress:
      - ip: 127.0.0.1
        hostname: localhost
"#,
        )
        .unwrap();
        assert!(equal(&desired, &actual));

        let mut changed = desired.clone();
        changed.spec.as_mut().unwrap().selector =
            Some([("app".to_string(), "api".to_string())].into());
        assert!(!equal(&changed, &actual));
    }

    #[test]
    fn test_compare_services_target_port_drift() {
        let service = |port: Value| {
            json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": {"name": "svc1"},
                "spec": {"ports": [port]}
            })
        };
        let desired = service(json!({"port": 80}));

        let defaulted = service(json!({"port": 80, "targetPort": 80, "protocol": "TCP"}));
        assert!(Comparator::new().equal_values(&desired, &defaulted));

        let drifted = service(json!({"port": 80, "targetPort": 9090, "protocol": "TCP"}));
        assert!(!Comparator::new().equal_values(&desired, &drifted));
    }

    #[test]
    fn test_compare_deployments_ignores_status() {
        let desired = deployment("app");
        let mut actual = deployment("app");
        actual.status = Some(k8s_openapi::api::apps::v1::DeploymentStatus {
            ready_replicas: Some(1),
            ..Default::default()
        });
        assert!(equal(&desired, &actual));
    }

    #[test]
    fn test_compare_deployments_detects_spec_change() {
        let desired = deployment("app");
        let mut actual = deployment("app");
        actual.spec.as_mut().unwrap().replicas = Some(3);
        assert!(!equal(&desired, &actual));

        let mut renamed = deployment("app");
        renamed.metadata.name = Some("other".to_string());
        assert!(!equal(&desired, &renamed));
    }

    #[test]
    fn test_compare_deployment_server_defaults() {
        let desired = deployment("app");
        let mut actual = deployment("app");
        let pod = actual
            .spec
            .as_mut()
            .unwrap()
            .template
            .spec
            .as_mut()
            .unwrap();
        pod.dns_policy = Some("ClusterFirst".to_string());
        pod.restart_policy = Some("Always".to_string());
        pod.termination_grace_period_seconds = Some(30);
        pod.containers[0].termination_message_path = Some("/dev/termination-log".to_string());
        assert!(equal(&desired, &actual));

        let strict = Comparator::with_config(ComparatorConfig {
            ignore_server_defaults: false,
            ..Default::default()
        });
        assert!(!strict.equal(&desired, &actual));
    }

    #[test]
    fn test_compare_deployment_image_trigger() {
        let trigger = r#"[{"from":{"kind":"ImageStreamTag","name":"my-image"},"fieldPath":"spec.template.spec.containers[?(@.name==\"my-container\")].image"}]"#;
        let mut desired = deployment("app");
        let mut actual = deployment("app");
        for d in [&mut desired, &mut actual] {
            d.metadata.annotations = Some(
                [("image.openshift.io/triggers".to_string(), trigger.to_string())].into(),
            );
        }
        desired.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0].image =
            Some("some generated value".to_string());
        actual.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0].image =
            Some("quay.io/namespace/image:tag".to_string());

        assert!(equal(&desired, &actual));
    }

    #[test]
    fn test_compare_deployment_image_without_trigger() {
        let desired = deployment("app");
        let mut actual = deployment("app");
        actual.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0].image =
            Some("quay.io/org/app:2.0".to_string());
        assert!(!equal(&desired, &actual));
    }

    #[test]
    fn test_compare_unordered_deployment_env_vars() {
        let mut desired = deployment("app");
        let mut actual = deployment("app");
        desired.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0].env =
            Some(env_vars(3, true));
        actual.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0].env =
            Some(env_vars(3, false));
        assert!(equal(&desired, &actual));

        actual.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0].env =
            Some(env_vars(2, false));
        assert!(!equal(&desired, &actual));
    }

    #[test]
    fn test_compare_container_ports_are_ordered() {
        let ports = |a: i32, b: i32| {
            json!([{"containerPort": a}, {"containerPort": b}])
        };
        let template = |p: Value| {
            json!({
                "kind": "StatefulSet",
                "metadata": {"name": "db"},
                "spec": {"template": {"spec": {"containers": [{"name": "db", "ports": p}]}}}
            })
        };
        let comparator = Comparator::new();
        assert!(comparator.equal_values(&template(ports(1, 2)), &template(ports(1, 2))));
        assert!(!comparator.equal_values(&template(ports(1, 2)), &template(ports(2, 1))));
    }

    fn deployment_config(name: &str) -> Value {
        yaml(&format!(
            r#"
apiVersion: apps.openshift.io/v1
kind: DeploymentConfig
metadata:
  name: {name}
spec:
  replicas: 1
  template:
    spec:
      containers:
        - name: container1
          image: image
"#
        ))
    }

    #[test]
    fn test_compare_deployment_configs() {
        let desired = deployment_config("dc1");
        let mut actual = deployment_config("dc1");
        actual["status"] = json!({"readyReplicas": 1, "latestVersion": 3});
        assert!(Comparator::new().equal_values(&desired, &actual));
    }

    #[test]
    fn test_compare_deployment_config_last_triggered_image() {
        let mut desired = deployment_config("dc1");
        let mut actual = deployment_config("dc1");
        actual["spec"]["triggers"] = json!([
            {"imageChangeParams": {"automatic": false, "lastTriggeredImage": "some generated value"}}
        ]);
        desired["spec"]["triggers"] = json!([{"imageChangeParams": {"automatic": false}}]);
        assert!(Comparator::new().equal_values(&desired, &actual));
    }

    #[test]
    fn test_compare_deployment_config_image_change() {
        let trigger = json!([{
            "type": "ImageChange",
            "imageChangeParams": {
                "automatic": false,
                "containerNames": ["container1", "container2"],
                "from": {"kind": "ImageStreamTag", "namespace": "namespace", "name": "image"}
            }
        }]);
        let mut desired = deployment_config("dc1");
        let mut actual = deployment_config("dc1");
        desired["spec"]["triggers"] = trigger.clone();
        actual["spec"]["triggers"] = trigger;
        actual["spec"]["template"]["spec"]["containers"][0]["image"] = json!("some generated value");
        assert!(Comparator::new().equal_values(&desired, &actual));
    }

    #[test]
    fn test_compare_unordered_deployment_config_env_vars() {
        let mut desired = deployment_config("dc1");
        let mut actual = deployment_config("dc1");
        desired["spec"]["template"]["spec"]["containers"][0]["env"] =
            serde_json::to_value(env_vars(3, true)).unwrap();
        actual["spec"]["template"]["spec"]["containers"][0]["env"] =
            serde_json::to_value(env_vars(3, false)).unwrap();
        assert!(Comparator::new().equal_values(&desired, &actual));
    }

    fn build_config(name: &str) -> Value {
        yaml(&format!(
            "{{apiVersion: build.openshift.io/v1, kind: BuildConfig, metadata: {{name: {name}}}}}"
        ))
    }

    #[test]
    fn test_compare_build_config_webhooks() {
        let mut desired = build_config("bc1");
        let mut actual = build_config("bc1");
        desired["spec"] = json!({
            "runPolicy": "Serial",
            "triggers": [{"type": "GitLab", "gitlab": {"allowEnv": false, "secretReference": {"name": "dafsaf"}}}]
        });
        actual["spec"] = json!({
            "triggers": [{"type": "GitLab", "gitlab": {"allowEnv": false, "secretReference": {"name": "eqwrer"}}}]
        });
        assert!(Comparator::new().equal_values(&desired, &actual));
    }

    #[test]
    fn test_compare_build_config_env_vars() {
        let ordered = serde_json::to_value(env_vars(3, true)).unwrap();
        let unordered = serde_json::to_value(env_vars(3, false)).unwrap();
        let mut desired = build_config("bc1");
        let mut actual = build_config("bc1");
        desired["spec"] = json!({"strategy": {"sourceStrategy": {"env": ordered}}});
        actual["spec"] = json!({"strategy": {"sourceStrategy": {"env": unordered}}});
        assert!(Comparator::new().equal_values(&desired, &actual));

        actual["spec"]["strategy"]["sourceStrategy"]["env"][0]["value"] = json!("changed");
        assert!(!Comparator::new().equal_values(&desired, &actual));
    }

    fn secret(name: &str) -> Secret {
        Secret {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_compare_secrets() {
        use k8s_openapi::ByteString;

        let mut encoded = secret("secret1");
        encoded.data = Some(
            [
                ("password".to_string(), ByteString(b"MnLWop3P75ywXjet".to_vec())),
                ("username".to_string(), ByteString(b"developer".to_vec())),
            ]
            .into(),
        );

        let mut plain = secret("secret1");
        plain.string_data = Some(
            [
                ("password".to_string(), "MnLWop3P75ywXjet".to_string()),
                ("username".to_string(), "developer".to_string()),
            ]
            .into(),
        );

        let mut overridden = plain.clone();
        overridden.data = Some(
            [
                ("password".to_string(), ByteString(b"MnLWop3P75ywXjXYet".to_vec())),
                ("username".to_string(), ByteString(b"devops".to_vec())),
            ]
            .into(),
        );

        assert!(equal(&encoded, &plain));
        assert!(equal(&encoded, &overridden));

        let mut different = plain.clone();
        different
            .string_data
            .as_mut()
            .unwrap()
            .insert("username".to_string(), "admin".to_string());
        assert!(!equal(&encoded, &different));
    }

    #[test]
    fn test_kind_mismatch_is_unequal() {
        let a = json!({"kind": "ConfigMap", "metadata": {"name": "x"}});
        let b = json!({"kind": "Secret", "metadata": {"name": "x"}});
        assert!(!Comparator::new().equal_values(&a, &b));
    }

    #[test]
    fn test_unknown_fields_are_compared() {
        let a = json!({"kind": "Widget", "metadata": {"name": "x"}, "spec": {"newField": 1}});
        let b = json!({"kind": "Widget", "metadata": {"name": "x"}, "spec": {"newField": 2}});
        assert!(!Comparator::new().equal_values(&a, &b));
    }

    #[test]
    fn test_custom_comparator_override() {
        let comparator = Comparator::new().with_comparator(ResourceKind::Other("Widget".into()), |d, a| {
            d["metadata"]["name"] == a["metadata"]["name"]
        });
        let a = json!({"kind": "Widget", "metadata": {"name": "x"}, "spec": {"size": 1}});
        let b = json!({"kind": "Widget", "metadata": {"name": "x"}, "spec": {"size": 2}});
        assert!(comparator.has_override(&ResourceKind::Other("Widget".into())));
        assert!(comparator.equal_values(&a, &b));
    }
}
