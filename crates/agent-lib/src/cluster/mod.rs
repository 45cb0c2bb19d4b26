//! Access to autoscaler status in the cluster
//!
//! The collector only sees the `ClusterStatus` trait. The production
//! implementation reads HorizontalPodAutoscalers through `kube`.

mod kubernetes;
mod quantity;

pub use kubernetes::{
    connect, status_from_v1, status_from_v2, AutoscalingApiVersion, KubeClusterStatus,
};
pub use quantity::parse_quantity;

use crate::models::AutoscalerStatus;
use anyhow::Result;

use async_trait::async_trait;

/// Source of namespaces and autoscaler status
#[async_trait]
pub trait ClusterStatus: Send + Sync {
    /// List the names of all namespaces
    async fn list_namespaces(&self) -> Result<Vec<String>>;

    /// List autoscaler status objects in a namespace
    async fn list_autoscalers(&self, namespace: &str) -> Result<Vec<AutoscalerStatus>>;
}
