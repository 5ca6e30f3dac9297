//! Resource kinds and the (kind, namespace, name) identity key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Every kind the core understands.
///
/// `Node` is observed-only: it is reported by the backend and consumed by
/// DaemonSet planning, never applied as desired state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Namespace,
    Node,
    Pod,
    Deployment,
    StatefulSet,
    DaemonSet,
    Service,
    ConfigMap,
    Secret,
    PersistentVolume,
    PersistentVolumeClaim,
    Ingress,
    HorizontalPodAutoscaler,
    VerticalPodAutoscaler,
    NetworkPolicy,
    Job,
    CronJob,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 17] = [
        Self::Namespace,
        Self::Node,
        Self::Pod,
        Self::Deployment,
        Self::StatefulSet,
        Self::DaemonSet,
        Self::Service,
        Self::ConfigMap,
        Self::Secret,
        Self::PersistentVolume,
        Self::PersistentVolumeClaim,
        Self::Ingress,
        Self::HorizontalPodAutoscaler,
        Self::VerticalPodAutoscaler,
        Self::NetworkPolicy,
        Self::Job,
        Self::CronJob,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Namespace => "Namespace",
            Self::Node => "Node",
            Self::Pod => "Pod",
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
            Self::Service => "Service",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::PersistentVolume => "PersistentVolume",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::Ingress => "Ingress",
            Self::HorizontalPodAutoscaler => "HorizontalPodAutoscaler",
            Self::VerticalPodAutoscaler => "VerticalPodAutoscaler",
            Self::NetworkPolicy => "NetworkPolicy",
            Self::Job => "Job",
            Self::CronJob => "CronJob",
        }
    }

    /// `apiVersion` used on the wire for this kind.
    pub fn api_version(&self) -> &'static str {
        match self {
            Self::Namespace
            | Self::Node
            | Self::Pod
            | Self::Service
            | Self::ConfigMap
            | Self::Secret
            | Self::PersistentVolume
            | Self::PersistentVolumeClaim => "v1",
            Self::Deployment | Self::StatefulSet | Self::DaemonSet => "apps/v1",
            Self::Ingress | Self::NetworkPolicy => "networking.k8s.io/v1",
            Self::HorizontalPodAutoscaler => "autoscaling/v2",
            Self::VerticalPodAutoscaler => "autoscaling.k8s.io/v1",
            Self::Job | Self::CronJob => "batch/v1",
        }
    }

    /// Cluster-scoped kinds carry an empty namespace.
    pub fn is_namespaced(&self) -> bool {
        !matches!(self, Self::Namespace | Self::Node | Self::PersistentVolume)
    }

    /// Kinds reported by the backend but never submitted as desired state.
    pub fn is_observed_only(&self) -> bool {
        matches!(self, Self::Node)
    }

    /// Kinds whose reconciliation manages a population of pods.
    pub fn owns_pods(&self) -> bool {
        matches!(
            self,
            Self::Deployment | Self::StatefulSet | Self::DaemonSet | Self::Job
        )
    }

    /// Kinds that may be frozen with `immutable: true`.
    pub fn supports_immutable(&self) -> bool {
        matches!(self, Self::ConfigMap | Self::Secret)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognised kind name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownKind;

    /// Accepts the canonical kind name (case-insensitive) and the common
    /// short names (`deploy`, `sts`, `svc`, `pvc`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let kind = match lower.as_str() {
            "namespace" | "namespaces" | "ns" => Self::Namespace,
            "node" | "nodes" | "no" => Self::Node,
            "pod" | "pods" | "po" => Self::Pod,
            "deployment" | "deployments" | "deploy" => Self::Deployment,
            "statefulset" | "statefulsets" | "sts" => Self::StatefulSet,
            "daemonset" | "daemonsets" | "ds" => Self::DaemonSet,
            "service" | "services" | "svc" => Self::Service,
            "configmap" | "configmaps" | "cm" => Self::ConfigMap,
            "secret" | "secrets" => Self::Secret,
            "persistentvolume" | "persistentvolumes" | "pv" => Self::PersistentVolume,
            "persistentvolumeclaim" | "persistentvolumeclaims" | "pvc" => {
                Self::PersistentVolumeClaim
            }
            "ingress" | "ingresses" | "ing" => Self::Ingress,
            "horizontalpodautoscaler" | "horizontalpodautoscalers" | "hpa" => {
                Self::HorizontalPodAutoscaler
            }
            "verticalpodautoscaler" | "verticalpodautoscalers" | "vpa" => {
                Self::VerticalPodAutoscaler
            }
            "networkpolicy" | "networkpolicies" | "netpol" => Self::NetworkPolicy,
            "job" | "jobs" => Self::Job,
            "cronjob" | "cronjobs" | "cj" => Self::CronJob,
            _ => return Err(UnknownKind(s.to_string())),
        };
        Ok(kind)
    }
}

/// Unique key of a resource across the cluster.
///
/// The namespace is always empty for cluster-scoped kinds; the constructors
/// enforce that so two spellings of the same object never compare unequal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceIdentity {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = if kind.is_namespaced() {
            namespace.into()
        } else {
            String::new()
        };
        Self {
            kind,
            namespace,
            name: name.into(),
        }
    }

    /// Identity of a cluster-scoped object.
    pub fn cluster(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::new(kind, String::new(), name)
    }

    pub fn is_cluster_scoped(&self) -> bool {
        !self.kind.is_namespaced()
    }

    /// Same namespace, different kind and name. Used for child objects.
    pub fn sibling(&self, kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::new(kind, self.namespace.clone(), name)
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}
