//! Integration tests for the collection cycle
//!
//! These drive whole cycles against an in-memory cluster and either a
//! recording output connector or a real lumberjack listener on localhost.

#[cfg(test)]
mod cycle_tests {
    use crate::cluster::ClusterStatus;
    use crate::collector::{CollectorBuilder, CycleStats};
    use crate::health::{components, ComponentStatus, HealthRegistry};
    use crate::models::{
        AutoscalerStatus, MetricReading, MetricSource, MetricStatus, ScaleTargetRef,
    };
    use crate::output::{
        Connector, LumberjackConfig, LumberjackConnector, OutputConnection, OutputPool,
        SequentialSelector, TransportError,
    };
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// In-memory cluster; namespaces in `broken` fail to list
    #[derive(Default)]
    struct FakeCluster {
        namespaces: Vec<String>,
        autoscalers: HashMap<String, Vec<AutoscalerStatus>>,
        broken: HashSet<String>,
        unreachable: bool,
    }

    impl FakeCluster {
        fn with_namespace(mut self, namespace: &str, count: usize) -> Self {
            self.namespaces.push(namespace.to_string());
            let items = (0..count)
                .map(|i| hpa(namespace, &format!("hpa-{}", i), "Deployment", "web"))
                .collect();
            self.autoscalers.insert(namespace.to_string(), items);
            self
        }

        fn with_broken_namespace(mut self, namespace: &str) -> Self {
            self.namespaces.push(namespace.to_string());
            self.broken.insert(namespace.to_string());
            self
        }
    }

    #[async_trait]
    impl ClusterStatus for FakeCluster {
        async fn list_namespaces(&self) -> Result<Vec<String>> {
            if self.unreachable {
                anyhow::bail!("connection refused");
            }
            Ok(self.namespaces.clone())
        }

        async fn list_autoscalers(&self, namespace: &str) -> Result<Vec<AutoscalerStatus>> {
            if self.broken.contains(namespace) {
                anyhow::bail!("forbidden");
            }
            Ok(self.autoscalers.get(namespace).cloned().unwrap_or_default())
        }
    }

    /// Records delivered payloads; every `fail_every`-th send fails
    #[derive(Default)]
    struct RecordingConnector {
        sent: Arc<Mutex<Vec<serde_json::Value>>>,
        sends: Arc<Mutex<usize>>,
        fail_every: usize,
    }

    struct RecordingConnection {
        sent: Arc<Mutex<Vec<serde_json::Value>>>,
        sends: Arc<Mutex<usize>>,
        fail_every: usize,
    }

    #[async_trait]
    impl Connector for RecordingConnector {
        async fn connect(&self, _host: &str) -> Result<Box<dyn OutputConnection>, TransportError> {
            Ok(Box::new(RecordingConnection {
                sent: self.sent.clone(),
                sends: self.sends.clone(),
                fail_every: self.fail_every,
            }))
        }
    }

    #[async_trait]
    impl OutputConnection for RecordingConnection {
        async fn send_batch(&mut self, events: &[Vec<u8>]) -> Result<(), TransportError> {
            let attempt = {
                let mut sends = self.sends.lock().unwrap();
                *sends += 1;
                *sends
            };
            if self.fail_every > 0 && attempt % self.fail_every == 0 {
                return Err(TransportError::Protocol("reset by peer".to_string()));
            }
            let mut sent = self.sent.lock().unwrap();
            for event in events {
                sent.push(serde_json::from_slice(event).unwrap());
            }
            Ok(())
        }

        async fn close(&mut self) {}
    }

    fn hpa(namespace: &str, name: &str, kind: &str, target: &str) -> AutoscalerStatus {
        AutoscalerStatus {
            namespace: namespace.to_string(),
            name: name.to_string(),
            scale_target_ref: ScaleTargetRef::new(kind, target),
            min_replicas: Some(1),
            max_replicas: 5,
            current_replicas: 2,
            desired_replicas: 2,
            metrics: vec![],
        }
    }

    fn recording_pool(connector: Arc<RecordingConnector>) -> Arc<OutputPool> {
        Arc::new(
            OutputPool::new(vec!["ls-1:5044".into(), "ls-2:5044".into()], connector)
                .with_selector(SequentialSelector::new()),
        )
    }

    #[tokio::test]
    async fn test_cycle_attempts_every_autoscaler() {
        let cluster = FakeCluster::default()
            .with_namespace("a", 2)
            .with_namespace("b", 0)
            .with_namespace("c", 3);
        let connector = Arc::new(RecordingConnector::default());

        let collector = CollectorBuilder::new()
            .cluster(Arc::new(cluster))
            .pool(recording_pool(connector.clone()))
            .build()
            .unwrap();

        let stats = collector.cycle().await;
        assert_eq!(
            stats,
            CycleStats {
                namespaces: 3,
                autoscalers: 5,
                delivered: 5,
                ..Default::default()
            }
        );
        assert_eq!(connector.sent.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_failing_namespace_does_not_block_others() {
        let cluster = FakeCluster::default()
            .with_namespace("a", 2)
            .with_broken_namespace("locked")
            .with_namespace("c", 1);
        let connector = Arc::new(RecordingConnector::default());

        let collector = CollectorBuilder::new()
            .cluster(Arc::new(cluster))
            .pool(recording_pool(connector.clone()))
            .build()
            .unwrap();

        let stats = collector.cycle().await;
        assert_eq!(stats.namespaces, 3);
        assert_eq!(stats.namespaces_failed, 1);
        assert_eq!(stats.attempted(), 3);

        let sent = connector.sent.lock().unwrap();
        let namespaces: Vec<&str> = sent
            .iter()
            .map(|e| e["kubernetes"]["namespace"].as_str().unwrap())
            .collect();
        assert_eq!(namespaces, vec!["a", "a", "c"]);
    }

    #[tokio::test]
    async fn test_delivery_failures_do_not_abort_cycle() {
        let cluster = FakeCluster::default().with_namespace("a", 4);
        let connector = Arc::new(RecordingConnector {
            fail_every: 2,
            ..Default::default()
        });

        let collector = CollectorBuilder::new()
            .cluster(Arc::new(cluster))
            .pool(recording_pool(connector.clone()))
            .build()
            .unwrap();

        let stats = collector.cycle().await;
        assert_eq!(stats.attempted(), 4);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.failed, 2);
    }

    #[tokio::test]
    async fn test_namespace_listing_failure_ends_cycle() {
        let cluster = FakeCluster {
            unreachable: true,
            ..FakeCluster::default().with_namespace("a", 2)
        };
        let health = HealthRegistry::new();

        let collector = CollectorBuilder::new()
            .cluster(Arc::new(cluster))
            .pool(recording_pool(Arc::new(RecordingConnector::default())))
            .health(health.clone())
            .build()
            .unwrap();

        let stats = collector.run_cycle().await;
        assert!(stats.listing_failed);
        assert_eq!(stats.attempted(), 0);

        let report = health.health().await;
        assert_eq!(
            report.components[components::CLUSTER].status,
            ComponentStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_output_disabled_skips_delivery() {
        let cluster = FakeCluster::default().with_namespace("a", 3);
        let collector = CollectorBuilder::new()
            .cluster(Arc::new(cluster))
            .build()
            .unwrap();

        let stats = collector.cycle().await;
        assert_eq!(stats.autoscalers, 3);
        assert_eq!(stats.skipped, 3);
        assert_eq!(stats.attempted(), 0);
    }

    #[tokio::test]
    async fn test_health_reflects_partial_delivery() {
        let cluster = FakeCluster::default().with_namespace("a", 4);
        let health = HealthRegistry::new();
        let collector = CollectorBuilder::new()
            .cluster(Arc::new(cluster))
            .pool(recording_pool(Arc::new(RecordingConnector {
                fail_every: 2,
                ..Default::default()
            })))
            .health(health.clone())
            .build()
            .unwrap();

        collector.run_cycle().await;
        let report = health.health().await;
        assert_eq!(
            report.components[components::OUTPUT].status,
            ComponentStatus::Degraded
        );
        assert_eq!(
            report.components[components::COLLECTOR].status,
            ComponentStatus::Healthy
        );
    }

    /// Accept one lumberjack session, ack each window and return the events
    async fn lumberjack_server(
        listener: tokio::net::TcpListener,
        windows: usize,
    ) -> Vec<serde_json::Value> {
        use flate2::read::ZlibDecoder;
        use std::io::Read;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut events = Vec::new();

        for _ in 0..windows {
            let mut header = [0u8; 12];
            stream.read_exact(&mut header).await.unwrap();
            assert_eq!(&header[..2], b"2W");
            assert_eq!(&header[6..8], b"2C");
            let window = u32::from_be_bytes(header[2..6].try_into().unwrap());
            let len = u32::from_be_bytes(header[8..12].try_into().unwrap()) as usize;

            let mut compressed = vec![0u8; len];
            stream.read_exact(&mut compressed).await.unwrap();
            let mut data = Vec::new();
            ZlibDecoder::new(&compressed[..])
                .read_to_end(&mut data)
                .unwrap();

            let json_len = u32::from_be_bytes(data[6..10].try_into().unwrap()) as usize;
            events.push(serde_json::from_slice(&data[10..10 + json_len]).unwrap());

            let mut ack = b"2A".to_vec();
            ack.extend_from_slice(&window.to_be_bytes());
            stream.write_all(&ack).await.unwrap();
        }

        events
    }

    #[tokio::test]
    async fn test_end_to_end_over_lumberjack() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(lumberjack_server(listener, 1));

        let mut status = hpa("prod", "api-hpa", "Deployment", "api");
        status.min_replicas = Some(2);
        status.max_replicas = 10;
        status.current_replicas = 4;
        status.desired_replicas = 4;
        status.metrics = vec![MetricStatus::new(
            MetricSource::Resource("cpu".into()),
            MetricReading::Utilization {
                current: Some(80.0),
                target: Some(60.0),
            },
        )];

        let mut cluster = FakeCluster::default();
        cluster.namespaces.push("prod".to_string());
        cluster.autoscalers.insert("prod".to_string(), vec![status]);

        let pool = OutputPool::new(
            vec![addr],
            Arc::new(LumberjackConnector::new(LumberjackConfig {
                connect_timeout: Duration::from_secs(2),
                send_timeout: Duration::from_secs(2),
                compression_level: 3,
            })),
        );

        let collector = CollectorBuilder::new()
            .cluster(Arc::new(cluster))
            .pool(Arc::new(pool))
            .node_name(Some("node-a".to_string()))
            .version("1.2.3")
            .build()
            .unwrap();

        let stats = collector.cycle().await;
        assert_eq!(stats.delivered, 1);

        let events = server.await.unwrap();
        let event = &events[0];
        assert_eq!(
            event["kubernetes"]["hpa"],
            serde_json::json!({
                "name": "api-hpa",
                "reference": "Deployment/api",
                "metrics": {"resource": {"cpu": {"current": 80, "target": 60}}},
                "minpods": 2,
                "maxpods": 10,
                "desired": 4,
                "replicas": 4,
            })
        );
        assert_eq!(event["kubernetes"]["deployment"], serde_json::json!({"name": "api"}));
        assert_eq!(event["host"]["name"], "node-a");
        assert_eq!(event["beat"]["version"], "1.2.3");
        assert_eq!(event["metricset"]["name"], "hpa");
    }
}
