//! Core data models for the HPA shipper
//!
//! `AutoscalerStatus` is the read-only view of a HorizontalPodAutoscaler the
//! collector works from. `TelemetryEvent` is the schema shipped to Logstash.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name reported in `@metadata.beat`
pub const BEAT_NAME: &str = "metricbeat";

/// Version reported in `@metadata.version`
pub const BEAT_VERSION: &str = "6.5.4";

/// Workload an autoscaler controls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleTargetRef {
    pub kind: String,
    pub name: String,
}

impl ScaleTargetRef {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// `"<Kind>/<Name>"`
    pub fn reference(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

/// Where a metric reading comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricSource {
    /// Per-pod resource metric (cpu, memory)
    Resource(String),
    /// Custom metric averaged across pods
    Pods(String),
    /// Metric not tied to any cluster object
    External(String),
    /// Metric describing a single cluster object
    Object(String),
    /// Resource metric of a single container in each pod
    ContainerResource(String),
    /// Implicit cpu utilization pair of the autoscaling/v1 API
    LegacyCpu,
    /// Source kind this build does not know about
    Unknown(String),
}

impl MetricSource {
    /// Key under `kubernetes.hpa.metrics` and the metric name, or `None`
    /// if the event schema has no slot for this source.
    pub fn event_key(&self) -> Option<(&'static str, &str)> {
        match self {
            MetricSource::Resource(name) => Some(("resource", name.as_str())),
            MetricSource::Pods(name) => Some(("pods", name.as_str())),
            MetricSource::External(name) => Some(("external", name.as_str())),
            MetricSource::LegacyCpu => Some(("resource", "cpu")),
            MetricSource::Object(_)
            | MetricSource::ContainerResource(_)
            | MetricSource::Unknown(_) => None,
        }
    }

    /// Source kind as the control plane spells it
    pub fn kind(&self) -> &str {
        match self {
            MetricSource::Resource(_) => "Resource",
            MetricSource::Pods(_) => "Pods",
            MetricSource::External(_) => "External",
            MetricSource::Object(_) => "Object",
            MetricSource::ContainerResource(_) => "ContainerResource",
            MetricSource::LegacyCpu => "CPUUtilization",
            MetricSource::Unknown(kind) => kind,
        }
    }
}

/// Current and target value of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricReading {
    /// Average utilization in percent of the request
    Utilization {
        current: Option<f64>,
        target: Option<f64>,
    },
    /// Value or average value, already reduced to an integer
    Quantity { current: i64, target: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStatus {
    pub source: MetricSource,
    pub reading: MetricReading,
}

impl MetricStatus {
    pub fn new(source: MetricSource, reading: MetricReading) -> Self {
        Self { source, reading }
    }
}

/// Autoscaler status as read from the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscalerStatus {
    pub namespace: String,
    pub name: String,
    pub scale_target_ref: ScaleTargetRef,
    pub min_replicas: Option<i32>,
    pub max_replicas: i32,
    pub current_replicas: i32,
    pub desired_replicas: i32,
    pub metrics: Vec<MetricStatus>,
}

/// `{current, target}` pair in the shipped event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricValue {
    pub current: i64,
    pub target: i64,
}

/// Metrics keyed by source kind, then metric name
pub type MetricsBySource = BTreeMap<String, BTreeMap<String, MetricValue>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub beat: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeatInfo {
    pub hostname: String,
    pub name: String,
    pub timezone: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HpaInfo {
    pub name: String,
    pub reference: String,
    pub metrics: MetricsBySource,
    pub minpods: i32,
    pub maxpods: i32,
    pub desired: i32,
    pub replicas: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentInfo {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubernetesInfo {
    pub namespace: String,
    pub hpa: HpaInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSet {
    pub module: String,
    pub name: String,
}

impl Default for MetricSet {
    fn default() -> Self {
        Self {
            module: "kubernetes".to_string(),
            name: "hpa".to_string(),
        }
    }
}

/// Telemetry event shipped once per autoscaler per cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    #[serde(rename = "@metadata")]
    pub metadata: EventMetadata,
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
    pub beat: BeatInfo,
    pub host: HostInfo,
    pub kubernetes: KubernetesInfo,
    pub metricset: MetricSet,
}
