//! Per-kind admission checks.
//!
//! Validation runs before a record enters the desired-state store. The first
//! failing constraint is reported with its field path.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use super::identity::{ResourceIdentity, ResourceKind};
use super::quantity::Quantity;
use super::record::{spec_view, Labels};
use super::selector::LabelSelector;
use super::spec::{
    ConfigMapSpec, CronJobSpec, DaemonSetSpec, DeploymentSpec, DeploymentStrategyType,
    HorizontalPodAutoscalerSpec, IngressBackend, IngressSpec, JobSpec, NetworkPolicySpec,
    PersistentVolumeClaimSpec, PersistentVolumeSpec, PodSpec, PodTemplateSpec, SecretSpec,
    ServiceSpec, StatefulSetSpec, VerticalPodAutoscalerSpec,
};

/// A rejected field and the reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

type Result<T> = std::result::Result<T, ValidationError>;

fn dns_subdomain() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
            .expect("static pattern")
    })
}

fn data_key() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[-._a-zA-Z0-9]+$").expect("static pattern"))
}

/// Object names: lowercase DNS subdomain, at most 253 characters.
pub fn validate_name(field: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    if name.len() > 253 {
        return Err(ValidationError::new(field, "must be at most 253 characters"));
    }
    if !dns_subdomain().is_match(name) {
        return Err(ValidationError::new(
            field,
            format!("{:?} is not a lowercase DNS subdomain", name),
        ));
    }
    Ok(())
}

/// Identity shape: valid name, namespace present exactly when the kind is
/// namespaced.
pub fn validate_identity(identity: &ResourceIdentity) -> Result<()> {
    validate_name("metadata.name", &identity.name)?;
    if identity.kind.is_namespaced() {
        validate_name("metadata.namespace", &identity.namespace)?;
    } else if !identity.namespace.is_empty() {
        return Err(ValidationError::new(
            "metadata.namespace",
            format!("{} is cluster-scoped", identity.kind),
        ));
    }
    Ok(())
}

/// Label keys may carry a DNS prefix (`prefix/name`); values are short.
pub fn validate_labels(labels: &Labels) -> Result<()> {
    for (key, value) in labels {
        let field = format!("metadata.labels[{}]", key);
        let name = match key.split_once('/') {
            Some((prefix, name)) => {
                validate_name(&field, prefix)?;
                name
            }
            None => key.as_str(),
        };
        if name.is_empty() || name.len() > 63 || !data_key().is_match(name) {
            return Err(ValidationError::new(field, "invalid label key"));
        }
        if value.len() > 63 || (!value.is_empty() && !data_key().is_match(value)) {
            return Err(ValidationError::new(field, "invalid label value"));
        }
    }
    Ok(())
}

/// Validate a spec document against the rules for `kind`.
pub fn validate_spec(kind: ResourceKind, spec: &Value) -> Result<()> {
    if !(spec.is_object() || spec.is_null()) {
        return Err(ValidationError::new("spec", "must be an object"));
    }
    match kind {
        ResourceKind::Namespace | ResourceKind::Node => Ok(()),
        ResourceKind::Pod => validate_pod_spec("spec", &spec_view::<PodSpec>(spec)?, None),
        ResourceKind::Deployment => validate_deployment(&spec_view(spec)?),
        ResourceKind::StatefulSet => validate_statefulset(&spec_view(spec)?),
        ResourceKind::DaemonSet => validate_daemonset(&spec_view(spec)?),
        ResourceKind::Service => validate_service(&spec_view(spec)?),
        ResourceKind::ConfigMap => validate_configmap(&spec_view(spec)?),
        ResourceKind::Secret => validate_secret(&spec_view(spec)?),
        ResourceKind::PersistentVolume => validate_pv(&spec_view(spec)?),
        ResourceKind::PersistentVolumeClaim => validate_pvc("spec", &spec_view(spec)?),
        ResourceKind::Ingress => validate_ingress(&spec_view(spec)?),
        ResourceKind::HorizontalPodAutoscaler => validate_hpa(&spec_view(spec)?),
        ResourceKind::VerticalPodAutoscaler => validate_vpa(&spec_view(spec)?),
        ResourceKind::NetworkPolicy => validate_network_policy(&spec_view(spec)?),
        ResourceKind::Job => validate_job("spec", &spec_view(spec)?),
        ResourceKind::CronJob => validate_cronjob(&spec_view(spec)?),
    }
}

fn non_negative(field: &str, value: i64) -> Result<()> {
    if value < 0 {
        return Err(ValidationError::new(field, format!("must be >= 0, got {}", value)));
    }
    Ok(())
}

fn quantity(field: &str, raw: &str) -> Result<Quantity> {
    Quantity::parse(raw).map_err(|e| ValidationError::new(field, e.to_string()))
}

fn validate_pod_spec(prefix: &str, spec: &PodSpec, allowed_restart: Option<&[&str]>) -> Result<()> {
    if spec.containers.is_empty() {
        return Err(ValidationError::new(
            format!("{}.containers", prefix),
            "at least one container is required",
        ));
    }
    let all = spec
        .init_containers
        .iter()
        .map(|c| ("initContainers", c))
        .chain(spec.containers.iter().map(|c| ("containers", c)));
    let mut seen = std::collections::BTreeSet::new();
    for (i, (list, c)) in all.enumerate() {
        let field = format!("{}.{}[{}]", prefix, list, i);
        if c.name.is_empty() {
            return Err(ValidationError::new(format!("{}.name", field), "required"));
        }
        if !seen.insert(c.name.as_str()) {
            return Err(ValidationError::new(
                format!("{}.name", field),
                format!("duplicate container name {:?}", c.name),
            ));
        }
        if c.image.is_empty() {
            return Err(ValidationError::new(format!("{}.image", field), "required"));
        }
        for port in &c.ports {
            if !(1..=65535).contains(&port.container_port) {
                return Err(ValidationError::new(
                    format!("{}.ports", field),
                    format!("containerPort {} out of range", port.container_port),
                ));
            }
        }
        for (res, raw) in &c.resources.requests {
            let req = quantity(&format!("{}.resources.requests.{}", field, res), raw)?;
            if let Some(limit_raw) = c.resources.limits.get(res) {
                let limit = quantity(&format!("{}.resources.limits.{}", field, res), limit_raw)?;
                if req > limit {
                    return Err(ValidationError::new(
                        format!("{}.resources.requests.{}", field, res),
                        "request exceeds limit",
                    ));
                }
            }
        }
        for (res, raw) in &c.resources.limits {
            quantity(&format!("{}.resources.limits.{}", field, res), raw)?;
        }
    }
    let allowed = allowed_restart.unwrap_or(&["Always", "OnFailure", "Never"]);
    if let Some(policy) = &spec.restart_policy {
        if !allowed.contains(&policy.as_str()) {
            return Err(ValidationError::new(
                format!("{}.restartPolicy", prefix),
                format!("{:?} not allowed here", policy),
            ));
        }
    }
    Ok(())
}

fn validate_selector_and_template(
    selector: &LabelSelector,
    template: &PodTemplateSpec,
) -> Result<()> {
    if selector.is_empty() {
        return Err(ValidationError::new("spec.selector", "must not be empty"));
    }
    validate_labels(&template.metadata.labels)
        .map_err(|e| ValidationError::new("spec.template.metadata.labels", e.reason))?;
    if !selector.matches(&template.metadata.labels) {
        return Err(ValidationError::new(
            "spec.template.metadata.labels",
            "selector does not match template labels",
        ));
    }
    validate_pod_spec("spec.template.spec", &template.spec, None)
}

fn validate_deployment(spec: &DeploymentSpec) -> Result<()> {
    non_negative("spec.replicas", spec.replicas)?;
    non_negative("spec.minReadySeconds", spec.min_ready_seconds)?;
    validate_selector_and_template(&spec.selector, &spec.template)?;
    if spec.strategy.strategy_type == DeploymentStrategyType::Recreate {
        if spec.strategy.rolling_update.is_some() {
            return Err(ValidationError::new(
                "spec.strategy.rollingUpdate",
                "may not be set when strategy type is Recreate",
            ));
        }
        return Ok(());
    }
    if let Some(ru) = &spec.strategy.rolling_update {
        let surge_zero = ru.max_surge.as_ref().is_some_and(|v| v.is_zero());
        let unavailable_zero = ru.max_unavailable.as_ref().is_some_and(|v| v.is_zero());
        if surge_zero && unavailable_zero {
            return Err(ValidationError::new(
                "spec.strategy.rollingUpdate",
                "maxSurge and maxUnavailable may not both be zero",
            ));
        }
        if let Some(v) = &ru.max_unavailable {
            let resolved = v
                .resolve(100, false)
                .map_err(|e| ValidationError::new("spec.strategy.rollingUpdate.maxUnavailable", e))?;
            if matches!(v, super::spec::IntOrPercent::Str(_)) && resolved > 100 {
                return Err(ValidationError::new(
                    "spec.strategy.rollingUpdate.maxUnavailable",
                    "must not exceed 100%",
                ));
            }
        }
    }
    spec.rollout_bounds()
        .map_err(|e| ValidationError::new("spec.strategy.rollingUpdate", e))?;
    Ok(())
}

fn validate_statefulset(spec: &StatefulSetSpec) -> Result<()> {
    non_negative("spec.replicas", spec.replicas)?;
    non_negative("spec.updateStrategy.rollingUpdate.partition", spec.partition())?;
    validate_selector_and_template(&spec.selector, &spec.template)?;
    if spec.service_name.trim().is_empty() {
        return Err(ValidationError::new("spec.serviceName", "required"));
    }
    validate_name("spec.serviceName", &spec.service_name)?;
    let mut names = std::collections::BTreeSet::new();
    for (i, tmpl) in spec.volume_claim_templates.iter().enumerate() {
        let field = format!("spec.volumeClaimTemplates[{}]", i);
        let name = tmpl.metadata.name.as_deref().unwrap_or("");
        validate_name(&format!("{}.metadata.name", field), name)?;
        if !names.insert(name.to_string()) {
            return Err(ValidationError::new(
                format!("{}.metadata.name", field),
                "duplicate claim template name",
            ));
        }
        let pvc: PersistentVolumeClaimSpec = spec_view(&tmpl.spec)
            .map_err(|e| ValidationError::new(format!("{}.spec", field), e.reason))?;
        validate_pvc(&format!("{}.spec", field), &pvc)?;
    }
    Ok(())
}

fn validate_daemonset(spec: &DaemonSetSpec) -> Result<()> {
    validate_selector_and_template(&spec.selector, &spec.template)?;
    if let Some(v) = spec
        .update_strategy
        .rolling_update
        .as_ref()
        .and_then(|r| r.max_unavailable.as_ref())
    {
        if v.is_zero() {
            return Err(ValidationError::new(
                "spec.updateStrategy.rollingUpdate.maxUnavailable",
                "must be greater than zero",
            ));
        }
        v.resolve(1, false).map_err(|e| {
            ValidationError::new("spec.updateStrategy.rollingUpdate.maxUnavailable", e)
        })?;
    }
    Ok(())
}

fn validate_service(spec: &ServiceSpec) -> Result<()> {
    let kind = spec.service_type.as_deref().unwrap_or("ClusterIP");
    if !["ClusterIP", "NodePort", "LoadBalancer", "ExternalName"].contains(&kind) {
        return Err(ValidationError::new(
            "spec.type",
            format!("unsupported service type {:?}", kind),
        ));
    }
    if spec.ports.is_empty() {
        return Err(ValidationError::new("spec.ports", "at least one port is required"));
    }
    let mut seen = std::collections::BTreeSet::new();
    for (i, port) in spec.ports.iter().enumerate() {
        let field = format!("spec.ports[{}]", i);
        if !(1..=65535).contains(&port.port) {
            return Err(ValidationError::new(
                format!("{}.port", field),
                format!("{} out of range", port.port),
            ));
        }
        let protocol = port.protocol.as_deref().unwrap_or("TCP");
        if !seen.insert((port.port, protocol.to_string())) {
            return Err(ValidationError::new(
                format!("{}.port", field),
                "duplicate port/protocol",
            ));
        }
        if let Some(node_port) = port.node_port {
            if kind == "ClusterIP" {
                return Err(ValidationError::new(
                    format!("{}.nodePort", field),
                    "not allowed for ClusterIP services",
                ));
            }
            if !(30000..=32767).contains(&node_port) {
                return Err(ValidationError::new(
                    format!("{}.nodePort", field),
                    format!("{} outside 30000-32767", node_port),
                ));
            }
        }
    }
    validate_labels(&spec.selector)
        .map_err(|e| ValidationError::new("spec.selector", e.reason))?;
    Ok(())
}

fn validate_data_keys<'a, I>(field: &str, keys: I) -> Result<()>
where
    I: IntoIterator<Item = &'a String>,
{
    for key in keys {
        if key.is_empty() || key.len() > 253 || !data_key().is_match(key) {
            return Err(ValidationError::new(
                format!("{}[{}]", field, key),
                "invalid data key",
            ));
        }
    }
    Ok(())
}

fn validate_configmap(spec: &ConfigMapSpec) -> Result<()> {
    validate_data_keys("data", spec.data.keys())?;
    validate_data_keys("binaryData", spec.binary_data.keys())?;
    if let Some(dup) = spec.data.keys().find(|k| spec.binary_data.contains_key(*k)) {
        return Err(ValidationError::new(
            format!("binaryData[{}]", dup),
            "key also present in data",
        ));
    }
    Ok(())
}

fn validate_secret(spec: &SecretSpec) -> Result<()> {
    validate_data_keys("data", spec.data.keys())?;
    validate_data_keys("stringData", spec.string_data.keys())
}

fn validate_pv(spec: &PersistentVolumeSpec) -> Result<()> {
    let storage = spec
        .capacity
        .get("storage")
        .ok_or_else(|| ValidationError::new("spec.capacity.storage", "required"))?;
    if quantity("spec.capacity.storage", storage)?.is_zero() {
        return Err(ValidationError::new("spec.capacity.storage", "must be greater than zero"));
    }
    if spec.access_modes.is_empty() {
        return Err(ValidationError::new("spec.accessModes", "at least one access mode is required"));
    }
    if let Some(policy) = &spec.persistent_volume_reclaim_policy {
        if !["Retain", "Delete", "Recycle"].contains(&policy.as_str()) {
            return Err(ValidationError::new(
                "spec.persistentVolumeReclaimPolicy",
                format!("unsupported policy {:?}", policy),
            ));
        }
    }
    Ok(())
}

fn validate_pvc(prefix: &str, spec: &PersistentVolumeClaimSpec) -> Result<()> {
    if spec.access_modes.is_empty() {
        return Err(ValidationError::new(
            format!("{}.accessModes", prefix),
            "at least one access mode is required",
        ));
    }
    for mode in &spec.access_modes {
        if !["ReadWriteOnce", "ReadOnlyMany", "ReadWriteMany", "ReadWriteOncePod"]
            .contains(&mode.as_str())
        {
            return Err(ValidationError::new(
                format!("{}.accessModes", prefix),
                format!("unsupported access mode {:?}", mode),
            ));
        }
    }
    let field = format!("{}.resources.requests.storage", prefix);
    let storage = spec
        .resources
        .requests
        .get("storage")
        .ok_or_else(|| ValidationError::new(field.clone(), "required"))?;
    if quantity(&field, storage)?.is_zero() {
        return Err(ValidationError::new(field, "must be greater than zero"));
    }
    Ok(())
}

fn validate_ingress_backend(field: &str, backend: &IngressBackend) -> Result<()> {
    let service = backend
        .service
        .as_ref()
        .ok_or_else(|| ValidationError::new(format!("{}.service", field), "required"))?;
    validate_name(&format!("{}.service.name", field), &service.name)?;
    match (service.port.number, &service.port.name) {
        (Some(n), None) if (1..=65535).contains(&n) => Ok(()),
        (None, Some(name)) if !name.is_empty() => Ok(()),
        _ => Err(ValidationError::new(
            format!("{}.service.port", field),
            "exactly one of number (1-65535) or name is required",
        )),
    }
}

fn validate_ingress(spec: &IngressSpec) -> Result<()> {
    if spec.rules.is_empty() && spec.default_backend.is_none() {
        return Err(ValidationError::new(
            "spec",
            "either defaultBackend or rules must be specified",
        ));
    }
    if let Some(backend) = &spec.default_backend {
        validate_ingress_backend("spec.defaultBackend", backend)?;
    }
    for (i, rule) in spec.rules.iter().enumerate() {
        if let Some(host) = &rule.host {
            let bare = host.strip_prefix("*.").unwrap_or(host);
            validate_name(&format!("spec.rules[{}].host", i), bare)?;
        }
        let Some(http) = &rule.http else { continue };
        for (j, path) in http.paths.iter().enumerate() {
            let field = format!("spec.rules[{}].http.paths[{}]", i, j);
            if let Some(p) = &path.path {
                if !p.starts_with('/') {
                    return Err(ValidationError::new(format!("{}.path", field), "must be absolute"));
                }
            }
            if let Some(pt) = &path.path_type {
                if !["Exact", "Prefix", "ImplementationSpecific"].contains(&pt.as_str()) {
                    return Err(ValidationError::new(
                        format!("{}.pathType", field),
                        format!("unsupported path type {:?}", pt),
                    ));
                }
            }
            validate_ingress_backend(&format!("{}.backend", field), &path.backend)?;
        }
    }
    Ok(())
}

fn validate_hpa(spec: &HorizontalPodAutoscalerSpec) -> Result<()> {
    let target = spec
        .scale_target_ref
        .as_ref()
        .ok_or_else(|| ValidationError::new("spec.scaleTargetRef", "required"))?;
    if target.kind.is_empty() || target.name.is_empty() {
        return Err(ValidationError::new(
            "spec.scaleTargetRef",
            "kind and name are required",
        ));
    }
    if spec.max_replicas < 1 {
        return Err(ValidationError::new("spec.maxReplicas", "must be >= 1"));
    }
    let min = spec.min_replicas.unwrap_or(1);
    if min < 1 {
        return Err(ValidationError::new("spec.minReplicas", "must be >= 1"));
    }
    if min > spec.max_replicas {
        return Err(ValidationError::new(
            "spec.minReplicas",
            "must not exceed maxReplicas",
        ));
    }
    Ok(())
}

fn validate_vpa(spec: &VerticalPodAutoscalerSpec) -> Result<()> {
    let target = spec
        .target_ref
        .as_ref()
        .ok_or_else(|| ValidationError::new("spec.targetRef", "required"))?;
    if target.kind.is_empty() || target.name.is_empty() {
        return Err(ValidationError::new("spec.targetRef", "kind and name are required"));
    }
    if let Some(mode) = spec.update_policy.as_ref().and_then(|p| p.update_mode.as_ref()) {
        if !["Off", "Initial", "Recreate", "Auto"].contains(&mode.as_str()) {
            return Err(ValidationError::new(
                "spec.updatePolicy.updateMode",
                format!("unsupported mode {:?}", mode),
            ));
        }
    }
    Ok(())
}

fn validate_network_policy(spec: &NetworkPolicySpec) -> Result<()> {
    for t in &spec.policy_types {
        if t != "Ingress" && t != "Egress" {
            return Err(ValidationError::new(
                "spec.policyTypes",
                format!("unsupported policy type {:?}", t),
            ));
        }
    }
    Ok(())
}

fn validate_job(prefix: &str, spec: &JobSpec) -> Result<()> {
    if spec.completions() < 1 {
        return Err(ValidationError::new(format!("{}.completions", prefix), "must be >= 1"));
    }
    non_negative(&format!("{}.parallelism", prefix), spec.parallelism())?;
    non_negative(&format!("{}.backoffLimit", prefix), spec.backoff_limit())?;
    validate_pod_spec(
        &format!("{}.template.spec", prefix),
        &spec.template.spec,
        Some(&["OnFailure", "Never"]),
    )
}

fn validate_cron_field(field: &str, value: &str, min: u32, max: u32) -> Result<()> {
    let bad = || ValidationError::new("spec.schedule", format!("invalid {} field {:?}", field, value));
    for part in value.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((r, s)) => (r, Some(s)),
            None => (part, None),
        };
        if let Some(step) = step {
            if step.parse::<u32>().map_err(|_| bad())? == 0 {
                return Err(bad());
            }
        }
        if range == "*" {
            continue;
        }
        let (lo, hi) = match range.split_once('-') {
            Some((lo, hi)) => (lo, hi),
            None => (range, range),
        };
        let lo: u32 = lo.parse().map_err(|_| bad())?;
        let hi: u32 = hi.parse().map_err(|_| bad())?;
        if lo < min || hi > max || lo > hi {
            return Err(bad());
        }
    }
    Ok(())
}

fn validate_cronjob(spec: &CronJobSpec) -> Result<()> {
    let schedule = spec.schedule.trim();
    if !schedule.starts_with('@') {
        let fields: Vec<&str> = schedule.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ValidationError::new(
                "spec.schedule",
                "expected five whitespace-separated fields",
            ));
        }
        let bounds = [
            ("minute", 0, 59),
            ("hour", 0, 23),
            ("day-of-month", 1, 31),
            ("month", 1, 12),
            ("day-of-week", 0, 7),
        ];
        for (value, (name, min, max)) in fields.iter().zip(bounds) {
            validate_cron_field(name, value, min, max)?;
        }
    } else if ![
        "@yearly", "@annually", "@monthly", "@weekly", "@daily", "@midnight", "@hourly",
    ]
    .contains(&schedule)
    {
        return Err(ValidationError::new(
            "spec.schedule",
            format!("unknown macro {:?}", schedule),
        ));
    }
    if let Some(policy) = &spec.concurrency_policy {
        if !["Allow", "Forbid", "Replace"].contains(&policy.as_str()) {
            return Err(ValidationError::new(
                "spec.concurrencyPolicy",
                format!("unsupported policy {:?}", policy),
            ));
        }
    }
    validate_job("spec.jobTemplate.spec", &spec.job_template.spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn names() {
        assert!(validate_name("n", "web-1").is_ok());
        assert!(validate_name("n", "a.b.c").is_ok());
        assert!(validate_name("n", "Web").is_err());
        assert!(validate_name("n", "-web").is_err());
        assert!(validate_name("n", "").is_err());
    }

    #[test]
    fn cluster_scoped_identity_rejects_namespace() {
        let mut id = ResourceIdentity::cluster(ResourceKind::Namespace, "prod");
        assert!(validate_identity(&id).is_ok());
        id.namespace = "default".into();
        assert!(validate_identity(&id).is_err());
    }

    #[test]
    fn negative_replicas_rejected() {
        let err = validate_spec(
            ResourceKind::Deployment,
            &json!({
                "replicas": -1,
                "selector": {"matchLabels": {"app": "web"}},
                "template": {"metadata": {"labels": {"app": "web"}},
                             "spec": {"containers": [{"name": "c", "image": "A"}]}}
            }),
        )
        .unwrap_err();
        assert_eq!(err.field, "spec.replicas");
    }

    #[test]
    fn statefulset_needs_service_name() {
        let mut set = json!({
            "replicas": 1,
            "selector": {"matchLabels": {"app": "db"}},
            "template": {"metadata": {"labels": {"app": "db"}},
                         "spec": {"containers": [{"name": "c", "image": "A"}]}}
        });
        let err = validate_spec(ResourceKind::StatefulSet, &set).unwrap_err();
        assert_eq!(err.field, "spec.serviceName");
        set["serviceName"] = json!(" ");
        assert!(validate_spec(ResourceKind::StatefulSet, &set).is_err());
        set["serviceName"] = json!("db");
        assert!(validate_spec(ResourceKind::StatefulSet, &set).is_ok());
    }

    #[test]
    fn volume_capacity_must_be_positive() {
        let pv = |storage: &str| {
            json!({"capacity": {"storage": storage}, "accessModes": ["ReadWriteOnce"]})
        };
        assert!(validate_spec(ResourceKind::PersistentVolume, &pv("10Gi")).is_ok());
        let err = validate_spec(ResourceKind::PersistentVolume, &pv("0")).unwrap_err();
        assert_eq!(err.field, "spec.capacity.storage");
        assert!(validate_spec(ResourceKind::PersistentVolume, &pv("0Gi")).is_err());
    }

    #[test]
    fn every_service_type_needs_a_port() {
        for kind in ["ClusterIP", "NodePort", "LoadBalancer", "ExternalName"] {
            let err = validate_spec(ResourceKind::Service, &json!({"type": kind, "ports": []})).unwrap_err();
            assert_eq!(err.field, "spec.ports", "{}", kind);
        }
    }

    #[test]
    fn wrong_type_is_a_spec_error() {
        let err = validate_spec(ResourceKind::Deployment, &json!({"replicas": "three"})).unwrap_err();
        assert_eq!(err.field, "spec");
    }

    #[test]
    fn cron_schedule() {
        let job = json!({"template": {"spec": {"restartPolicy": "Never",
            "containers": [{"name": "c", "image": "busybox"}]}}});
        let ok = json!({"schedule": "*/5 * * * 1-5", "jobTemplate": {"spec": job}});
        assert!(validate_spec(ResourceKind::CronJob, &ok).is_ok());
        let bad = json!({"schedule": "61 * * * *", "jobTemplate": {"spec": job}});
        assert!(validate_spec(ResourceKind::CronJob, &bad).is_err());
        let bad = json!({"schedule": "* * *", "jobTemplate": {"spec": job}});
        assert!(validate_spec(ResourceKind::CronJob, &bad).is_err());
    }

    #[test]
    fn label_keys() {
        let mut labels = Labels::new();
        labels.insert("app.kubernetes.io/name".into(), "web".into());
        assert!(validate_labels(&labels).is_ok());
        labels.insert("bad key".into(), "x".into());
        assert!(validate_labels(&labels).is_err());
    }
}
