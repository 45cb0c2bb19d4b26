//! HorizontalPodAutoscaler listing through the Kubernetes API

use super::{parse_quantity, ClusterStatus};
use crate::config::KubernetesSettings;
use crate::models::{AutoscalerStatus, MetricReading, MetricSource, MetricStatus, ScaleTargetRef};
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::autoscaling::{v1, v2};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use serde::Deserialize;
use tracing::{debug, info};

/// Which autoscaling API group version to read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoscalingApiVersion {
    /// `autoscaling/v2`: resource, pods and external metrics
    #[default]
    V2,
    /// `autoscaling/v1`: cpu utilization only
    V1,
}

/// Build a Kubernetes client from in-cluster credentials or a kubeconfig
pub async fn connect(settings: &KubernetesSettings) -> Result<Client> {
    let config = if settings.in_cluster {
        info!("Using in-cluster Kubernetes configuration");
        kube::Config::incluster().context("Failed to load in-cluster configuration")?
    } else if settings.config.is_empty() {
        info!("Using default kubeconfig");
        kube::Config::infer()
            .await
            .context("Failed to infer Kubernetes configuration")?
    } else {
        info!(path = %settings.config, "Using kubeconfig");
        let kubeconfig = Kubeconfig::read_from(&settings.config)
            .with_context(|| format!("Failed to read kubeconfig {}", settings.config))?;
        kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .with_context(|| format!("Invalid kubeconfig {}", settings.config))?
    };

    Client::try_from(config).context("Failed to create Kubernetes client")
}

/// `ClusterStatus` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeClusterStatus {
    client: Client,
    api_version: AutoscalingApiVersion,
}

impl KubeClusterStatus {
    pub fn new(client: Client, api_version: AutoscalingApiVersion) -> Self {
        Self {
            client,
            api_version,
        }
    }
}

#[async_trait]
impl ClusterStatus for KubeClusterStatus {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespaces = api
            .list(&ListParams::default())
            .await
            .context("List Namespaces error")?;

        Ok(namespaces
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn list_autoscalers(&self, namespace: &str) -> Result<Vec<AutoscalerStatus>> {
        let statuses: Vec<AutoscalerStatus> = match self.api_version {
            AutoscalingApiVersion::V2 => {
                let api: Api<v2::HorizontalPodAutoscaler> =
                    Api::namespaced(self.client.clone(), namespace);
                api.list(&ListParams::default())
                    .await
                    .with_context(|| {
                        format!("List HorizontalPodAutoscalers error in {}", namespace)
                    })?
                    .items
                    .iter()
                    .map(status_from_v2)
                    .collect()
            }
            AutoscalingApiVersion::V1 => {
                let api: Api<v1::HorizontalPodAutoscaler> =
                    Api::namespaced(self.client.clone(), namespace);
                api.list(&ListParams::default())
                    .await
                    .with_context(|| {
                        format!("List HorizontalPodAutoscalers error in {}", namespace)
                    })?
                    .items
                    .iter()
                    .map(status_from_v1)
                    .collect()
            }
        };

        debug!(namespace = %namespace, count = statuses.len(), "Listed autoscalers");
        Ok(statuses)
    }
}

fn quantity(q: Option<&Quantity>) -> i64 {
    q.and_then(|q| parse_quantity(&q.0)).unwrap_or(0)
}

/// Pair a target with the observed value according to the target type
fn reading(target: Option<&v2::MetricTarget>, current: Option<&v2::MetricValueStatus>) -> MetricReading {
    let target_type = target.map(|t| t.type_.as_str()).unwrap_or_else(|| {
        // No matching spec entry: infer the type from what was observed
        match current {
            Some(c) if c.average_utilization.is_some() => "Utilization",
            Some(c) if c.average_value.is_some() => "AverageValue",
            _ => "Value",
        }
    });

    match target_type {
        "Utilization" => MetricReading::Utilization {
            current: current
                .and_then(|c| c.average_utilization)
                .map(f64::from),
            target: target.and_then(|t| t.average_utilization).map(f64::from),
        },
        "AverageValue" => MetricReading::Quantity {
            current: quantity(current.and_then(|c| c.average_value.as_ref())),
            target: quantity(target.and_then(|t| t.average_value.as_ref())),
        },
        "Value" => MetricReading::Quantity {
            current: quantity(current.and_then(|c| c.value.as_ref())),
            target: quantity(target.and_then(|t| t.value.as_ref())),
        },
        _ => MetricReading::Quantity {
            current: 0,
            target: 0,
        },
    }
}

/// Source of a spec entry, used to find the target for an observed metric
fn spec_source(spec: &v2::MetricSpec) -> MetricSource {
    match spec.type_.as_str() {
        "Resource" => match &spec.resource {
            Some(r) => MetricSource::Resource(r.name.clone()),
            None => MetricSource::Unknown(spec.type_.clone()),
        },
        "Pods" => match &spec.pods {
            Some(p) => MetricSource::Pods(p.metric.name.clone()),
            None => MetricSource::Unknown(spec.type_.clone()),
        },
        "External" => match &spec.external {
            Some(e) => MetricSource::External(e.metric.name.clone()),
            None => MetricSource::Unknown(spec.type_.clone()),
        },
        "Object" => match &spec.object {
            Some(o) => MetricSource::Object(o.metric.name.clone()),
            None => MetricSource::Unknown(spec.type_.clone()),
        },
        "ContainerResource" => match &spec.container_resource {
            Some(c) => MetricSource::ContainerResource(c.name.clone()),
            None => MetricSource::Unknown(spec.type_.clone()),
        },
        other => MetricSource::Unknown(other.to_string()),
    }
}

fn spec_target(spec: &v2::MetricSpec) -> Option<&v2::MetricTarget> {
    match spec.type_.as_str() {
        "Resource" => spec.resource.as_ref().map(|r| &r.target),
        "Pods" => spec.pods.as_ref().map(|p| &p.target),
        "External" => spec.external.as_ref().map(|e| &e.target),
        "Object" => spec.object.as_ref().map(|o| &o.target),
        "ContainerResource" => spec.container_resource.as_ref().map(|c| &c.target),
        _ => None,
    }
}

/// Source and observed value of a status entry
fn status_source(status: &v2::MetricStatus) -> (MetricSource, Option<&v2::MetricValueStatus>) {
    let unknown = || (MetricSource::Unknown(status.type_.clone()), None);
    match status.type_.as_str() {
        "Resource" => status.resource.as_ref().map_or_else(unknown, |r| {
            (MetricSource::Resource(r.name.clone()), Some(&r.current))
        }),
        "Pods" => status.pods.as_ref().map_or_else(unknown, |p| {
            (MetricSource::Pods(p.metric.name.clone()), Some(&p.current))
        }),
        "External" => status.external.as_ref().map_or_else(unknown, |e| {
            (MetricSource::External(e.metric.name.clone()), Some(&e.current))
        }),
        "Object" => status.object.as_ref().map_or_else(unknown, |o| {
            (MetricSource::Object(o.metric.name.clone()), Some(&o.current))
        }),
        "ContainerResource" => status.container_resource.as_ref().map_or_else(unknown, |c| {
            (MetricSource::ContainerResource(c.name.clone()), Some(&c.current))
        }),
        _ => unknown(),
    }
}

/// Convert an `autoscaling/v2` object
///
/// Each observed metric is paired with the spec entry of the same source,
/// falling back to the entry at the same position.
pub fn status_from_v2(hpa: &v2::HorizontalPodAutoscaler) -> AutoscalerStatus {
    let spec = hpa.spec.as_ref();
    let status = hpa.status.as_ref();
    let spec_metrics: &[v2::MetricSpec] = spec
        .and_then(|s| s.metrics.as_deref())
        .unwrap_or_default();

    let metrics = status
        .and_then(|s| s.current_metrics.as_deref())
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(i, observed)| {
            let (source, current) = status_source(observed);
            let target = spec_metrics
                .iter()
                .find(|m| spec_source(m) == source)
                .or_else(|| spec_metrics.get(i).filter(|m| m.type_ == observed.type_))
                .and_then(spec_target);
            MetricStatus::new(source, reading(target, current))
        })
        .collect();

    AutoscalerStatus {
        namespace: hpa.metadata.namespace.clone().unwrap_or_default(),
        name: hpa.metadata.name.clone().unwrap_or_default(),
        scale_target_ref: spec
            .map(|s| ScaleTargetRef::new(&s.scale_target_ref.kind, &s.scale_target_ref.name))
            .unwrap_or_else(|| ScaleTargetRef::new("", "")),
        min_replicas: spec.and_then(|s| s.min_replicas),
        max_replicas: spec.map(|s| s.max_replicas).unwrap_or(0),
        current_replicas: status.and_then(|s| s.current_replicas).unwrap_or(0),
        desired_replicas: status.map(|s| s.desired_replicas).unwrap_or(0),
        metrics,
    }
}

/// Convert an `autoscaling/v1` object, whose only metric is cpu utilization
pub fn status_from_v1(hpa: &v1::HorizontalPodAutoscaler) -> AutoscalerStatus {
    let spec = hpa.spec.as_ref();
    let status = hpa.status.as_ref();

    AutoscalerStatus {
        namespace: hpa.metadata.namespace.clone().unwrap_or_default(),
        name: hpa.metadata.name.clone().unwrap_or_default(),
        scale_target_ref: spec
            .map(|s| ScaleTargetRef::new(&s.scale_target_ref.kind, &s.scale_target_ref.name))
            .unwrap_or_else(|| ScaleTargetRef::new("", "")),
        min_replicas: spec.and_then(|s| s.min_replicas),
        max_replicas: spec.map(|s| s.max_replicas).unwrap_or(0),
        current_replicas: status.map(|s| s.current_replicas).unwrap_or(0),
        desired_replicas: status.map(|s| s.desired_replicas).unwrap_or(0),
        metrics: vec![MetricStatus::new(
            MetricSource::LegacyCpu,
            MetricReading::Utilization {
                current: status
                    .and_then(|s| s.current_cpu_utilization_percentage)
                    .map(f64::from),
                target: spec
                    .and_then(|s| s.target_cpu_utilization_percentage)
                    .map(f64::from),
            },
        )],
    }
}
