//! Connection pool over the configured output hosts
//!
//! Connections are dialed on first use and cached per host. A connection
//! that fails mid-send is closed and evicted so the next acquire for that
//! host dials again.

use super::{Connector, OutputConnection, OutputError};
use crate::models::TelemetryEvent;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Chooses which host the next acquire goes to
pub trait HostSelector: Send + Sync {
    /// Return an index in `0..count`. `count` is never zero.
    fn select(&self, count: usize) -> usize;
}

/// Uniform random choice
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl HostSelector for RandomSelector {
    fn select(&self, count: usize) -> usize {
        rand::thread_rng().gen_range(0..count)
    }
}

/// Walks the host list in order, wrapping around
#[derive(Debug, Default)]
pub struct SequentialSelector {
    next: AtomicUsize,
}

impl SequentialSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start at the given index
    pub fn starting_at(index: usize) -> Self {
        Self {
            next: AtomicUsize::new(index),
        }
    }
}

impl HostSelector for SequentialSelector {
    fn select(&self, count: usize) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % count
    }
}

/// A connection owned by the pool
pub struct OutputHandle {
    host: String,
    id: u64,
    connection: Mutex<Box<dyn OutputConnection>>,
}

impl OutputHandle {
    /// Address of the host this handle is connected to
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Identifier unique per dial within a pool
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for OutputHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputHandle")
            .field("host", &self.host)
            .field("id", &self.id)
            .finish()
    }
}

pub type Handle = Arc<OutputHandle>;

/// Pool of connections to redundant output hosts
pub struct OutputPool {
    hosts: Vec<String>,
    connector: Arc<dyn Connector>,
    selector: Box<dyn HostSelector>,
    connections: RwLock<HashMap<String, Handle>>,
    next_id: AtomicU64,
    retry_on_send_failure: bool,
}

impl OutputPool {
    /// Create a pool with random host selection
    pub fn new(hosts: Vec<String>, connector: Arc<dyn Connector>) -> Self {
        Self {
            hosts,
            connector,
            selector: Box::new(RandomSelector),
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            retry_on_send_failure: false,
        }
    }

    /// Replace the host selection policy
    pub fn with_selector(mut self, selector: impl HostSelector + 'static) -> Self {
        self.selector = Box::new(selector);
        self
    }

    /// Retry once on a freshly acquired handle when a send fails
    pub fn with_retry_on_send_failure(mut self, retry: bool) -> Self {
        self.retry_on_send_failure = retry;
        self
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Hosts that currently hold a live connection
    pub async fn cached_hosts(&self) -> Vec<String> {
        let connections = self.connections.read().await;
        let mut hosts: Vec<String> = connections.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    /// Select a host and return its connection, dialing if needed
    pub async fn acquire(&self) -> Result<Handle, OutputError> {
        if self.hosts.is_empty() {
            return Err(OutputError::NoHostsConfigured);
        }

        let index = self.selector.select(self.hosts.len()) % self.hosts.len();
        let host = &self.hosts[index];

        {
            let connections = self.connections.read().await;
            if let Some(handle) = connections.get(host) {
                return Ok(handle.clone());
            }
        }

        let mut connections = self.connections.write().await;
        // Another acquire may have dialed while we waited for the write lock
        if let Some(handle) = connections.get(host) {
            return Ok(handle.clone());
        }

        let connection = match self.connector.connect(host).await {
            Ok(connection) => connection,
            Err(e) => {
                error!(host = %host, error = %e, "Output host dial error");
                return Err(OutputError::DialFailed {
                    host: host.clone(),
                    source: e,
                });
            }
        };

        let handle = Arc::new(OutputHandle {
            host: host.clone(),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            connection: Mutex::new(connection),
        });
        connections.insert(host.clone(), handle.clone());

        info!(host = %host, "Connected to output host");
        Ok(handle)
    }

    /// Serialize the event and send it as a one-event batch
    ///
    /// On failure the handle is evicted and closed; the caller has to
    /// acquire again for its next event.
    pub async fn send(&self, handle: &Handle, event: &TelemetryEvent) -> Result<(), OutputError> {
        let payload = serde_json::to_vec(event)?;

        let mut connection = handle.connection.lock().await;
        match connection.send_batch(std::slice::from_ref(&payload)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(host = %handle.host, error = %e, "Output host error");
                connection.close().await;
                drop(connection);
                self.evict(handle).await;

                Err(OutputError::SendFailed {
                    host: handle.host.clone(),
                    source: e,
                })
            }
        }
    }

    /// Send the event through `current`, acquiring a handle first if the
    /// slot is empty
    ///
    /// The slot is cleared when the send fails so the caller's next event
    /// re-acquires. With retry enabled, one fresh handle is tried before
    /// giving up.
    pub async fn deliver(
        &self,
        current: &mut Option<Handle>,
        event: &TelemetryEvent,
    ) -> Result<(), OutputError> {
        let handle = match current.take() {
            Some(handle) => handle,
            None => self.acquire().await?,
        };

        match self.send(&handle, event).await {
            Ok(()) => {
                *current = Some(handle);
                Ok(())
            }
            Err(OutputError::SendFailed { host, .. }) if self.retry_on_send_failure => {
                warn!(host = %host, "Retrying delivery on a fresh output handle");
                let handle = self.acquire().await?;
                self.send(&handle, event).await?;
                *current = Some(handle);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Drop the cached entry for this handle if it is still the live one
    async fn evict(&self, handle: &Handle) {
        let mut connections = self.connections.write().await;
        let is_current = connections
            .get(&handle.host)
            .is_some_and(|cached| Arc::ptr_eq(cached, handle));

        if is_current {
            connections.remove(&handle.host);
            debug!(host = %handle.host, id = handle.id, "Evicted output connection");
        }
    }

    /// Close every cached connection
    pub async fn close_all(&self) {
        let drained: Vec<Handle> = {
            let mut connections = self.connections.write().await;
            connections.drain().map(|(_, handle)| handle).collect()
        };

        for handle in drained {
            handle.connection.lock().await.close().await;
            debug!(host = %handle.host, "Closed output connection");
        }
    }
}
