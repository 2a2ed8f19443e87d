//! Normalization of resources before comparison
//!
//! The API server fills in a lot of fields on write: identity metadata, status
//! subresources, defaults, allocated addresses. Each rule here removes one class of
//! such fields from the JSON form of a resource so that a freshly computed desired
//! object and the stored one can be compared field by field.
//!
//! Paths are written as slices of keys; `*` walks every element of an array.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value, json};

use super::ResourceKind;
use crate::config::ComparatorConfig;

/// Path segment matching every element of an array
const WILDCARD: &str = "*";

/// Metadata fields owned by the API server
const SERVER_METADATA_FIELDS: &[&str] = &[
    "uid",
    "resourceVersion",
    "generation",
    "creationTimestamp",
    "deletionTimestamp",
    "deletionGracePeriodSeconds",
    "managedFields",
    "selfLink",
    "generateName",
];

/// Annotations written by the API server or by tooling, never by a reconciler
pub const SERVER_ANNOTATIONS: &[&str] = &[
    "kubectl.kubernetes.io/last-applied-configuration",
    "deployment.kubernetes.io/revision",
    "openshift.io/generated-by",
    ROUTE_HOST_GENERATED,
];

/// Set by OpenShift on routes whose host was generated by the router
pub const ROUTE_HOST_GENERATED: &str = "openshift.io/host.generated";

/// Image trigger annotation on Deployments, a JSON list of triggers
pub const IMAGE_TRIGGERS_ANNOTATION: &str = "image.openshift.io/triggers";

const POD_TEMPLATE: &[&str] = &["spec", "template", "spec"];

/// Environment lists are sets of (name, value) pairs, not sequences
const POD_ENV_LISTS: &[&[&str]] = &[
    &["spec", "template", "spec", "containers", WILDCARD, "env"],
    &["spec", "template", "spec", "initContainers", WILDCARD, "env"],
];

const BUILD_ENV_LISTS: &[&[&str]] = &[
    &["spec", "strategy", "sourceStrategy", "env"],
    &["spec", "strategy", "dockerStrategy", "env"],
    &["spec", "strategy", "customStrategy", "env"],
    &["spec", "strategy", "jenkinsPipelineStrategy", "env"],
];

/// Webhook triggers carrying a generated secret
const BUILD_WEBHOOKS: &[&str] = &["github", "generic", "gitlab", "bitbucket"];

/// Fields the API server allocates when the desired object leaves them unset
pub(crate) const SERVICE_ALLOCATED: &[&[&str]] = &[
    &["spec", "clusterIP"],
    &["spec", "clusterIPs"],
    &["spec", "ipFamilies"],
    &["spec", "ipFamilyPolicy"],
    &["spec", "healthCheckNodePort"],
    &["spec", "ports", WILDCARD, "nodePort"],
];

pub(crate) const ROUTE_ALLOCATED: &[&[&str]] = &[&["spec", "host"]];

/// Normalize a resource of the given kind into its comparable form
pub fn normalize(kind: &ResourceKind, resource: &Value, config: &ComparatorConfig) -> Value {
    let mut value = resource.clone();

    strip_server_metadata(&mut value, config);
    remove_path(&mut value, &["status"]);

    match kind {
        ResourceKind::Route => normalize_route(&mut value, config),
        ResourceKind::Service => normalize_service(&mut value, config),
        ResourceKind::Deployment => normalize_deployment(&mut value, config),
        ResourceKind::DeploymentConfig => normalize_deployment_config(&mut value, config),
        ResourceKind::BuildConfig => normalize_build_config(&mut value, config),
        ResourceKind::Secret => normalize_secret(&mut value, config),
        ResourceKind::Other(_) => normalize_pod_template(&mut value, config),
    }

    strip_server_annotations(&mut value);
    prune_empty(&mut value);
    value
}

/// Copy server-allocated fields from `actual` into `desired` where `desired` leaves them unset
pub fn adopt_allocated(kind: &ResourceKind, desired: &mut Value, actual: &Value) {
    let paths = match kind {
        ResourceKind::Service => SERVICE_ALLOCATED,
        ResourceKind::Route => ROUTE_ALLOCATED,
        _ => return,
    };
    for path in paths {
        adopt_path(desired, actual, path);
    }
}

fn strip_server_metadata(value: &mut Value, config: &ComparatorConfig) {
    for field in SERVER_METADATA_FIELDS {
        remove_path(value, &["metadata", *field]);
    }
    if config.ignore_finalizers {
        remove_path(value, &["metadata", "finalizers"]);
    }
}

fn strip_server_annotations(value: &mut Value) {
    if let Some(Value::Object(annotations)) = value.pointer_mut("/metadata/annotations") {
        for key in SERVER_ANNOTATIONS {
            annotations.remove(*key);
        }
    }
}

fn annotation<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get("metadata")?
        .get("annotations")?
        .get(key)?
        .as_str()
}

fn normalize_route(value: &mut Value, config: &ComparatorConfig) {
    if annotation(value, ROUTE_HOST_GENERATED) == Some("true") {
        remove_path(value, &["spec", "host"]);
    }
    if config.ignore_server_defaults {
        remove_default(value, &["spec", "wildcardPolicy"], &json!("None"));
        remove_default(value, &["spec", "to", "weight"], &json!(100));
    }
}

fn normalize_service(value: &mut Value, config: &ComparatorConfig) {
    if config.ignore_server_defaults {
        remove_default(value, &["spec", "type"], &json!("ClusterIP"));
        remove_default(value, &["spec", "sessionAffinity"], &json!("None"));
        remove_default(value, &["spec", "internalTrafficPolicy"], &json!("Cluster"));
        remove_default(value, &["spec", "ports", WILDCARD, "protocol"], &json!("TCP"));
        remove_default_target_ports(value);
    }
}

/// An unset `targetPort` defaults to the port number itself
fn remove_default_target_ports(value: &mut Value) {
    let Some(Value::Array(ports)) = value.pointer_mut("/spec/ports") else {
        return;
    };
    for port in ports.iter_mut() {
        if let Value::Object(port) = port {
            if port.get("targetPort").is_some() && port.get("targetPort") == port.get("port") {
                port.remove("targetPort");
            }
        }
    }
}

fn normalize_deployment(value: &mut Value, config: &ComparatorConfig) {
    for (list, container) in image_triggered_containers(value) {
        remove_container_image(value, list, &container);
    }
    if config.ignore_server_defaults {
        remove_default(value, &["spec", "revisionHistoryLimit"], &json!(10));
        remove_default(value, &["spec", "progressDeadlineSeconds"], &json!(600));
        remove_default(
            value,
            &["spec", "strategy"],
            &json!({
                "type": "RollingUpdate",
                "rollingUpdate": { "maxSurge": "25%", "maxUnavailable": "25%" }
            }),
        );
    }
    normalize_pod_template(value, config);
}

fn normalize_deployment_config(value: &mut Value, config: &ComparatorConfig) {
    let mut triggered = Vec::new();
    if let Some(Value::Array(triggers)) = value.pointer_mut("/spec/triggers") {
        for trigger in triggers.iter_mut() {
            let Some(Value::Object(params)) = trigger.get_mut("imageChangeParams") else {
                continue;
            };
            params.remove("lastTriggeredImage");
            if let Some(Value::Array(names)) = params.get("containerNames") {
                triggered.extend(names.iter().filter_map(Value::as_str).map(String::from));
            }
        }
    }
    for container in triggered {
        remove_container_image(value, "containers", &container);
        remove_container_image(value, "initContainers", &container);
    }
    normalize_pod_template(value, config);
}

fn normalize_build_config(value: &mut Value, config: &ComparatorConfig) {
    for hook in BUILD_WEBHOOKS {
        remove_path(value, &["spec", "triggers", WILDCARD, *hook, "secret"]);
        remove_path(value, &["spec", "triggers", WILDCARD, *hook, "secretReference"]);
    }
    for path in BUILD_ENV_LISTS {
        sort_unordered(value, path);
    }
    if config.ignore_server_defaults {
        remove_default(value, &["spec", "runPolicy"], &json!("Serial"));
        remove_default(value, &["spec", "successfulBuildsHistoryLimit"], &json!(5));
        remove_default(value, &["spec", "failedBuildsHistoryLimit"], &json!(5));
    }
}

fn normalize_secret(value: &mut Value, config: &ComparatorConfig) {
    merge_secret_string_data(value);
    if config.ignore_server_defaults {
        remove_default(value, &["type"], &json!("Opaque"));
    }
}

/// Merge `stringData` into `data` the way the API server materializes a Secret
///
/// Plaintext entries override encoded ones. `data` values are re-encoded in
/// canonical base64 so that equal bytes always compare equal; `stringData` is
/// dropped afterwards.
pub fn merge_secret_string_data(value: &mut Value) {
    let Value::Object(secret) = value else {
        return;
    };

    let mut data = match secret.remove("data") {
        Some(Value::Object(data)) => data,
        _ => Map::new(),
    };
    for encoded in data.values_mut() {
        if let Some(bytes) = encoded.as_str().and_then(|s| STANDARD.decode(s).ok()) {
            *encoded = Value::String(STANDARD.encode(bytes));
        }
    }

    if let Some(Value::Object(plain)) = secret.remove("stringData") {
        for (key, text) in plain {
            if let Some(text) = text.as_str() {
                data.insert(key, Value::String(STANDARD.encode(text.as_bytes())));
            }
        }
    }

    if !data.is_empty() {
        secret.insert("data".to_string(), Value::Object(data));
    }
}

fn normalize_pod_template(value: &mut Value, config: &ComparatorConfig) {
    for path in POD_ENV_LISTS {
        sort_unordered(value, path);
    }
    if !config.ignore_server_defaults {
        return;
    }

    let Some(pod) = walk_mut(value, POD_TEMPLATE) else {
        return;
    };
    remove_default(pod, &["dnsPolicy"], &json!("ClusterFirst"));
    remove_default(pod, &["restartPolicy"], &json!("Always"));
    remove_default(pod, &["schedulerName"], &json!("default-scheduler"));
    remove_default(pod, &["terminationGracePeriodSeconds"], &json!(30));
    for list in ["containers", "initContainers"] {
        remove_default(
            pod,
            &[list, WILDCARD, "terminationMessagePath"],
            &json!("/dev/termination-log"),
        );
        remove_default(
            pod,
            &[list, WILDCARD, "terminationMessagePolicy"],
            &json!("File"),
        );
        remove_default(pod, &[list, WILDCARD, "ports", WILDCARD, "protocol"], &json!("TCP"));
    }
}

/// Containers whose image is resolved by an image trigger, as (list, container name)
fn image_triggered_containers(value: &Value) -> Vec<(&'static str, String)> {
    let Some(raw) = annotation(value, IMAGE_TRIGGERS_ANNOTATION) else {
        return Vec::new();
    };
    let Ok(Value::Array(triggers)) = serde_json::from_str::<Value>(raw) else {
        tracing::debug!(annotation = raw, "ignoring unparsable image trigger annotation");
        return Vec::new();
    };

    triggers
        .iter()
        .filter_map(|t| t.get("fieldPath")?.as_str())
        .filter_map(|field_path| {
            let list = if field_path.starts_with("spec.template.spec.initContainers") {
                "initContainers"
            } else if field_path.starts_with("spec.template.spec.containers") {
                "containers"
            } else {
                return None;
            };
            Some((list, triggered_container_name(field_path)?.to_string()))
        })
        .collect()
}

/// Extract `name` from a `...[?(@.name=="name")].image` field path
fn triggered_container_name(field_path: &str) -> Option<&str> {
    let rest = field_path.split_once("@.name==")?.1;
    let rest = rest
        .strip_prefix('"')
        .or_else(|| rest.strip_prefix('\''))?;
    let end = rest.find(['"', '\''])?;
    Some(&rest[..end])
}

fn remove_container_image(value: &mut Value, list: &str, container: &str) {
    let Some(Value::Array(containers)) = walk_mut(value, POD_TEMPLATE).and_then(|p| p.get_mut(list))
    else {
        return;
    };
    for c in containers.iter_mut() {
        if c.get("name").and_then(Value::as_str) == Some(container) {
            if let Value::Object(c) = c {
                c.remove("image");
            }
        }
    }
}

fn walk_mut<'a>(value: &'a mut Value, path: &[&str]) -> Option<&'a mut Value> {
    path.iter().try_fold(value, |v, key| v.get_mut(*key))
}

/// Call `f` with the parent object and final key of every match of `path`
fn for_each_parent(
    value: &mut Value,
    path: &[&str],
    f: &mut dyn FnMut(&mut Map<String, Value>, &str),
) {
    match path {
        [] => {}
        [last] => {
            if let Value::Object(map) = value {
                f(map, *last);
            }
        }
        [head, rest @ ..] if *head == WILDCARD => {
            if let Value::Array(items) = value {
                for item in items {
                    for_each_parent(item, rest, f);
                }
            }
        }
        [head, rest @ ..] => {
            if let Some(child) = value.get_mut(*head) {
                for_each_parent(child, rest, f);
            }
        }
    }
}

fn remove_path(value: &mut Value, path: &[&str]) {
    for_each_parent(value, path, &mut |map, key| {
        map.remove(key);
    });
}

fn remove_default(value: &mut Value, path: &[&str], default: &Value) {
    for_each_parent(value, path, &mut |map, key| {
        if map.get(key) == Some(default) {
            map.remove(key);
        }
    });
}

/// Sort (and deduplicate) a list whose order carries no meaning
fn sort_unordered(value: &mut Value, path: &[&str]) {
    for_each_parent(value, path, &mut |map, key| {
        if let Some(Value::Array(items)) = map.get_mut(key) {
            items.sort_by_cached_key(|item| item.to_string());
            items.dedup();
        }
    });
}

fn is_unset(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

fn adopt_path(desired: &mut Value, actual: &Value, path: &[&str]) {
    match path {
        [] => {}
        [last] => {
            if let (Value::Object(d), Value::Object(a)) = (desired, actual) {
                if is_unset(d.get(*last)) {
                    if let Some(allocated) = a.get(*last) {
                        d.insert(last.to_string(), allocated.clone());
                    }
                }
            }
        }
        [head, rest @ ..] if *head == WILDCARD => {
            if let (Value::Array(d), Value::Array(a)) = (desired, actual) {
                for (d, a) in d.iter_mut().zip(a) {
                    adopt_path(d, a, rest);
                }
            }
        }
        [head, rest @ ..] => {
            if let (Some(d), Some(a)) = (desired.get_mut(*head), actual.get(*head)) {
                adopt_path(d, a, rest);
            }
        }
    }
}

/// Drop nulls, empty objects and empty arrays so that unset and empty compare equal
fn prune_empty(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for child in map.values_mut() {
                prune_empty(child);
            }
            map.retain(|_, v| !is_empty(v));
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                prune_empty(item);
            }
        }
        _ => {}
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
