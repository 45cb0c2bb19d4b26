//! Library for shipping HorizontalPodAutoscaler status to Logstash
//!
//! This crate provides the core functionality for:
//! - Listing autoscaler status from the Kubernetes API
//! - Transforming it into metricbeat-compatible telemetry events
//! - Delivering events to redundant lumberjack endpoints
//! - Health checks and structured logging

pub mod cluster;
pub mod collector;
pub mod config;
pub mod health;
pub mod models;
pub mod observability;
pub mod output;
pub mod transform;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::StructuredLogger;
