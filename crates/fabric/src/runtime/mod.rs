//! Container runtime integration.
//!
//! The [`RuntimeClient`] trait is the seam between the agent and the local
//! container runtime: a push-style lifecycle event stream plus point lookups.
//! [`EventBus`] bridges that stream to internal subscribers.

mod docker;
pub mod events;
mod memory;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use fabric_common::{ContainerId, RuntimeError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use docker::DockerClient;
pub use events::{BusState, EVENT_QUEUE_DEPTH, EventBus, OverflowPolicy};
pub use memory::MemoryRuntime;

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Endpoint scheme selecting the in-process runtime.
pub const MEMORY_ENDPOINT: &str = "memory://";

/// Handle for a registered event listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Lifecycle event kind as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Container started.
    Started,
    /// Container process exited.
    Died,
    /// Container removed.
    Destroyed,
    /// Any status the agent does not act on.
    Other(String),
}

impl EventKind {
    /// Classify a runtime status string.
    #[must_use]
    pub fn from_status(status: &str) -> Self {
        match status {
            "start" | "started" => Self::Started,
            "die" | "died" => Self::Died,
            "destroy" | "destroyed" => Self::Destroyed,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => f.write_str("started"),
            Self::Died => f.write_str("died"),
            Self::Destroyed => f.write_str("destroyed"),
            Self::Other(status) => f.write_str(status),
        }
    }
}

/// A container lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEvent {
    /// Container the event is about.
    pub id: ContainerId,
    /// What happened.
    pub kind: EventKind,
    /// Unix timestamp (seconds) reported by the runtime.
    pub timestamp: i64,
}

impl RuntimeEvent {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn now(id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            id: ContainerId::new_unchecked(id),
            kind,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Container details returned by the runtime control API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Container ID.
    pub id: String,
    /// Container name.
    pub name: String,
    /// Image the container runs from.
    pub image: String,
    /// Exposed ports, container port to host port.
    #[serde(default)]
    pub ports: HashMap<u16, u16>,
    /// Labels attached to the container.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Whether the container is running.
    pub running: bool,
}

impl Container {
    /// Create a running container record with no ports or labels.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image: image.into(),
            running: true,
            ..Self::default()
        }
    }
}

/// Client for the local container runtime.
#[async_trait]
pub trait RuntimeClient: Send + Sync + fmt::Debug {
    /// Endpoint this client talks to, for logging.
    fn endpoint(&self) -> &str;

    /// Liveness probe.
    async fn ping(&self) -> RuntimeResult<()>;

    /// Register a listener on the runtime event stream.
    ///
    /// Events are pushed into `listener` until the listener is removed or
    /// its receiver is dropped.
    async fn add_event_listener(
        &self,
        listener: mpsc::Sender<RuntimeEvent>,
    ) -> RuntimeResult<ListenerId>;

    /// Deregister a listener.
    async fn remove_event_listener(&self, id: ListenerId) -> RuntimeResult<()>;

    /// Look up a single container.
    ///
    /// Returns [`RuntimeError::NotFound`] when the runtime has no such container.
    async fn inspect(&self, id: &str) -> RuntimeResult<Container>;

    /// List containers.
    async fn list(&self) -> RuntimeResult<Vec<Container>>;
}

/// Build a runtime client for an endpoint.
///
/// `memory://` selects the in-process runtime; anything else is treated as a
/// Docker Engine API endpoint.
///
/// # Errors
///
/// Returns an error if the endpoint scheme is not supported.
pub fn connect(endpoint: &str) -> RuntimeResult<Arc<dyn RuntimeClient>> {
    if endpoint.starts_with(MEMORY_ENDPOINT) {
        tracing::info!("Using the in-process container runtime");
        return Ok(Arc::new(MemoryRuntime::new()));
    }
    Ok(Arc::new(DockerClient::new(endpoint)?))
}
