//! Delivery of telemetry events to Logstash
//!
//! This module provides:
//! - A pool of lazily dialed connections to the configured output hosts
//! - Injectable host selection (random by default)
//! - A lumberjack v2 transport for Beats-compatible listeners

mod lumberjack;
mod pool;

pub use lumberjack::{encode_batch, LumberjackConfig, LumberjackConnection, LumberjackConnector};
pub use pool::{
    Handle, HostSelector, OutputHandle, OutputPool, RandomSelector, SequentialSelector,
};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by an output transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Errors surfaced by the output pool
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no output hosts configured")]
    NoHostsConfigured,

    #[error("output host {host} dial error: {source}")]
    DialFailed {
        host: String,
        #[source]
        source: TransportError,
    },

    #[error("output host {host} send error: {source}")]
    SendFailed {
        host: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Establishes connections to output hosts
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str) -> Result<Box<dyn OutputConnection>, TransportError>;
}

/// A live connection to one output host
#[async_trait]
pub trait OutputConnection: Send {
    /// Transmit a batch of serialized JSON documents and wait for the
    /// host to acknowledge all of them.
    async fn send_batch(&mut self, events: &[Vec<u8>]) -> Result<(), TransportError>;

    /// Close the underlying connection.
    async fn close(&mut self);
}
