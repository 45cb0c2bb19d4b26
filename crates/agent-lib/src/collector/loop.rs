//! Collection loop
//!
//! Runs one cycle immediately, then one per period until shutdown. Shutdown
//! is only observed between cycles; a cycle in flight always completes.

use crate::cluster::ClusterStatus;
use crate::health::{components, ComponentHealth, HealthRegistry};
use crate::observability::StructuredLogger;
use crate::output::{Handle, OutputPool};
use crate::transform::{local_hostname, resolve_node_name, transform, Reporter, NODE_NAME_ENV};
use anyhow::Result;
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Lifecycle of a collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    /// Created, loop not started
    Idle,
    /// Cycling on the ticker
    Running,
    /// Shutdown received, releasing the ticker and output connections
    Draining,
    /// Loop has returned
    Stopped,
}

/// Settings for the collection loop
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// Time between cycles (default: 10 seconds)
    pub period: Duration,
    /// Overrides the reporting node name
    pub node_name: Option<String>,
    /// Version reported in `beat.version`
    pub version: String,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(10),
            node_name: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Outcome of one cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleStats {
    /// Namespaces returned by the cluster
    pub namespaces: usize,
    /// Namespaces whose autoscaler listing failed
    pub namespaces_failed: usize,
    /// The namespace listing itself failed
    pub listing_failed: bool,
    /// Autoscalers sampled
    pub autoscalers: usize,
    /// Events acknowledged by an output host
    pub delivered: usize,
    /// Events whose delivery failed
    pub failed: usize,
    /// Events not sent because output is disabled
    pub skipped: usize,
}

impl CycleStats {
    /// Delivery attempts made this cycle
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }

    /// Nothing failed
    pub fn is_clean(&self) -> bool {
        !self.listing_failed && self.namespaces_failed == 0 && self.failed == 0
    }
}

/// Samples autoscalers and ships them to the output pool
pub struct Collector {
    cluster: Arc<dyn ClusterStatus>,
    /// `None` when output is disabled; events are only logged
    pool: Option<Arc<OutputPool>>,
    settings: CollectorSettings,
    health: HealthRegistry,
    logger: StructuredLogger,
    state: watch::Sender<CollectorState>,
}

impl Collector {
    pub fn new(
        cluster: Arc<dyn ClusterStatus>,
        pool: Option<Arc<OutputPool>>,
        settings: CollectorSettings,
    ) -> Self {
        let hostname = local_hostname();
        let node_name = resolve_node_name(
            settings.node_name.as_deref(),
            std::env::var(NODE_NAME_ENV).ok().as_deref(),
            &hostname,
        );
        let (state, _) = watch::channel(CollectorState::Idle);

        Self {
            cluster,
            pool,
            settings,
            health: HealthRegistry::new(),
            logger: StructuredLogger::new(node_name),
            state,
        }
    }

    /// Report component health to a shared registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn state(&self) -> CollectorState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<CollectorState> {
        self.state.subscribe()
    }

    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    fn set_state(&self, state: CollectorState) {
        debug!(state = ?state, "Collector state change");
        self.state.send_replace(state);
    }

    /// Identity stamped on this cycle's events
    fn reporter(&self) -> Reporter {
        let hostname = local_hostname();
        let env_node_name = std::env::var(NODE_NAME_ENV).ok();
        let node_name = resolve_node_name(
            self.settings.node_name.as_deref(),
            env_node_name.as_deref(),
            &hostname,
        );
        Reporter::new(hostname, node_name, &self.settings.version)
    }

    /// Run until `shutdown` fires, then drain and stop
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        self.set_state(CollectorState::Running);
        info!(
            period_secs = self.settings.period.as_secs_f64(),
            output_enabled = self.pool.is_some(),
            "Starting collection loop"
        );

        let mut ticker = interval(self.settings.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            self.run_cycle().await;

            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => {
                    info!("Got the signal. Shutting down...");
                    break;
                }
            }
        }

        self.set_state(CollectorState::Draining);
        drop(ticker);
        if let Some(pool) = &self.pool {
            pool.close_all().await;
        }
        self.health
            .update(components::COLLECTOR, ComponentHealth::unhealthy("Collector stopped"))
            .await;

        self.set_state(CollectorState::Stopped);
        info!("Collection loop stopped");
    }

    /// One cycle plus its summary log and health report
    pub async fn run_cycle(&self) -> CycleStats {
        let start = Instant::now();
        let stats = self.cycle().await;
        self.logger.log_cycle(&stats, start.elapsed());
        self.report_health(&stats).await;
        stats
    }

    /// Sample every namespace once and attempt delivery of every event
    pub async fn cycle(&self) -> CycleStats {
        let mut stats = CycleStats::default();

        let namespaces = match self.cluster.list_namespaces().await {
            Ok(namespaces) => namespaces,
            Err(e) => {
                error!(error = %e, "List Namespaces error");
                stats.listing_failed = true;
                return stats;
            }
        };

        let reporter = self.reporter();
        let mut handle: Option<Handle> = None;

        for namespace in namespaces {
            stats.namespaces += 1;

            let autoscalers = match self.cluster.list_autoscalers(&namespace).await {
                Ok(autoscalers) => autoscalers,
                Err(e) => {
                    error!(
                        namespace = %namespace,
                        error = %e,
                        "List HorizontalPodAutoscalers error"
                    );
                    stats.namespaces_failed += 1;
                    continue;
                }
            };

            let now = Local::now().fixed_offset();
            for status in &autoscalers {
                stats.autoscalers += 1;
                let event = transform(status, &reporter, now);

                let Some(pool) = &self.pool else {
                    debug!(event = ?event, "Output disabled, event not shipped");
                    stats.skipped += 1;
                    continue;
                };

                match pool.deliver(&mut handle, &event).await {
                    Ok(()) => stats.delivered += 1,
                    Err(e) => {
                        warn!(
                            namespace = %namespace,
                            hpa = %status.name,
                            error = %e,
                            "Failed to deliver event"
                        );
                        stats.failed += 1;
                    }
                }
            }
        }

        stats
    }

    async fn report_health(&self, stats: &CycleStats) {
        self.health
            .update(components::COLLECTOR, ComponentHealth::healthy())
            .await;

        let cluster = if stats.listing_failed {
            ComponentHealth::unhealthy("Namespace listing failed")
        } else if stats.namespaces_failed > 0 {
            ComponentHealth::degraded(format!(
                "{} of {} namespaces failed to list",
                stats.namespaces_failed, stats.namespaces
            ))
        } else {
            ComponentHealth::healthy()
        };
        self.health.update(components::CLUSTER, cluster).await;

        if self.pool.is_some() {
            let output = if stats.failed == 0 {
                ComponentHealth::healthy()
            } else if stats.delivered == 0 {
                ComponentHealth::unhealthy(format!("All {} deliveries failed", stats.failed))
            } else {
                ComponentHealth::degraded(format!(
                    "{} of {} deliveries failed",
                    stats.failed,
                    stats.attempted()
                ))
            };
            self.health.update(components::OUTPUT, output).await;
        }
    }
}

/// Builder for creating a collector
pub struct CollectorBuilder {
    cluster: Option<Arc<dyn ClusterStatus>>,
    pool: Option<Arc<OutputPool>>,
    settings: CollectorSettings,
    health: Option<HealthRegistry>,
}

impl CollectorBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            cluster: None,
            pool: None,
            settings: CollectorSettings::default(),
            health: None,
        }
    }

    /// Set the cluster status source
    pub fn cluster(mut self, cluster: Arc<dyn ClusterStatus>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Set the output pool; without one, events are only logged
    pub fn pool(mut self, pool: Arc<OutputPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Set the collection period
    pub fn period(mut self, period: Duration) -> Self {
        self.settings.period = period;
        self
    }

    /// Set the node name override
    pub fn node_name(mut self, node_name: Option<String>) -> Self {
        self.settings.node_name = node_name.filter(|name| !name.is_empty());
        self
    }

    /// Set the version reported in events
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.settings.version = version.into();
        self
    }

    /// Set the health registry to report into
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Build the collector
    pub fn build(self) -> Result<Collector> {
        let cluster = self
            .cluster
            .ok_or_else(|| anyhow::anyhow!("Cluster status source is required"))?;
        if self.settings.period.is_zero() {
            anyhow::bail!("Collection period must be greater than zero");
        }

        let collector = Collector::new(cluster, self.pool, self.settings);
        Ok(match self.health {
            Some(health) => collector.with_health(health),
            None => collector,
        })
    }
}

impl Default for CollectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
