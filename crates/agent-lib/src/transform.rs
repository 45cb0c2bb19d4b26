//! Conversion of autoscaler status into telemetry events
//!
//! Everything here is pure: the caller supplies the clock reading and the
//! host identity so the same inputs always produce the same event.

use crate::models::{
    AutoscalerStatus, BeatInfo, DeploymentInfo, EventMetadata, HostInfo, HpaInfo,
    KubernetesInfo, MetricReading, MetricSet, MetricValue, MetricsBySource, TelemetryEvent,
    BEAT_NAME, BEAT_VERSION,
};
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use tracing::{debug, warn};

/// Environment variable consulted when no node name is configured
pub const NODE_NAME_ENV: &str = "NODE_NAME";

/// Identity of the reporting agent, resolved once per cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reporter {
    pub hostname: String,
    pub node_name: String,
    pub version: String,
}

impl Reporter {
    pub fn new(
        hostname: impl Into<String>,
        node_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            node_name: node_name.into(),
            version: version.into(),
        }
    }
}

/// Pick the reporting node name: config override, then environment, then hostname.
pub fn resolve_node_name(
    config_override: Option<&str>,
    env_override: Option<&str>,
    hostname: &str,
) -> String {
    config_override
        .filter(|name| !name.is_empty())
        .or_else(|| env_override.filter(|name| !name.is_empty()))
        .unwrap_or(hostname)
        .to_string()
}

/// Hostname of the machine running the agent, as the OS reports it.
pub fn local_hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

/// UTC offset as `+HH:MM`, or `Z` for UTC itself.
pub fn timezone_offset(now: &DateTime<FixedOffset>) -> String {
    if now.offset().local_minus_utc() == 0 {
        "Z".to_string()
    } else {
        now.format("%:z").to_string()
    }
}

fn metric_value(reading: &MetricReading) -> MetricValue {
    match *reading {
        MetricReading::Utilization { current, target } => MetricValue {
            current: current.map(|v| v.round() as i64).unwrap_or(0),
            target: target.map(|v| v.round() as i64).unwrap_or(0),
        },
        MetricReading::Quantity { current, target } => MetricValue { current, target },
    }
}

/// Group the reported metrics by source kind.
///
/// Sources without a slot in the event schema are skipped.
pub fn collect_metrics(status: &AutoscalerStatus) -> MetricsBySource {
    let mut metrics = MetricsBySource::new();

    for metric in &status.metrics {
        let Some((source, name)) = metric.source.event_key() else {
            warn!(
                namespace = %status.namespace,
                hpa = %status.name,
                source = %metric.source.kind(),
                "Unknown metric source type, skipping"
            );
            continue;
        };

        metrics
            .entry(source.to_string())
            .or_default()
            .insert(name.to_string(), metric_value(&metric.reading));
    }

    metrics
}

/// Build the telemetry event for one autoscaler.
pub fn transform(
    status: &AutoscalerStatus,
    reporter: &Reporter,
    now: DateTime<FixedOffset>,
) -> TelemetryEvent {
    let reference = status.scale_target_ref.reference();
    let metrics = collect_metrics(status);
    let min_replicas = status.min_replicas.unwrap_or(0);

    debug!(
        namespace = %status.namespace,
        hpa = %status.name,
        reference = %reference,
        metrics = ?metrics,
        min = min_replicas,
        max = status.max_replicas,
        replicas = status.current_replicas,
        "Autoscaler sampled"
    );

    let deployment = (status.scale_target_ref.kind == "Deployment").then(|| DeploymentInfo {
        name: status.scale_target_ref.name.clone(),
    });

    TelemetryEvent {
        metadata: EventMetadata {
            beat: BEAT_NAME.to_string(),
            version: BEAT_VERSION.to_string(),
        },
        timestamp: now
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        beat: BeatInfo {
            hostname: reporter.hostname.clone(),
            name: reporter.node_name.clone(),
            timezone: timezone_offset(&now),
            version: reporter.version.clone(),
        },
        host: HostInfo {
            name: reporter.node_name.clone(),
        },
        kubernetes: KubernetesInfo {
            namespace: status.namespace.clone(),
            hpa: HpaInfo {
                name: status.name.clone(),
                reference,
                metrics,
                minpods: min_replicas,
                maxpods: status.max_replicas,
                desired: status.desired_replicas,
                replicas: status.current_replicas,
            },
            deployment,
        },
        metricset: MetricSet::default(),
    }
}
