//! Container lifecycle event bus.
//!
//! Bridges the runtime's push-style event stream to at most one creation
//! listener and one destruction listener. The bus owns a single background
//! task for its whole lifetime:
//!
//! ```text
//! Idle --start--> Running --shutdown signal--> ShuttingDown --deregistered--> Stopped
//! ```
//!
//! There is no way back to `Running`; a bus is used once per process.

use std::sync::Arc;
use std::time::Duration;

use fabric_common::{ContainerId, RuntimeError, ShutdownSignal};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use super::{Container, EventKind, ListenerId, RuntimeClient, RuntimeEvent, RuntimeResult};

/// Capacity of the queue between the runtime event stream and the bus.
pub const EVENT_QUEUE_DEPTH: usize = 5;

/// Sender half of a subscriber channel.
pub type ListenerChannel = mpsc::Sender<ContainerId>;

/// Event bus lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// Constructed, not yet processing.
    Idle,
    /// Processing runtime events.
    Running,
    /// Shutdown observed, deregistering from the runtime.
    ShuttingDown,
    /// Processing task has exited.
    Stopped,
}

/// What to do when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Drop the event that does not fit.
    #[default]
    DropNewest,
    /// Wait up to `timeout_ms` for space, then drop the event.
    BlockWithTimeout {
        /// Longest the processing loop may stall on one subscriber.
        timeout_ms: u64,
    },
}

#[derive(Debug, Default)]
struct Subscriptions {
    creation: Option<ListenerChannel>,
    destruction: Option<ListenerChannel>,
}

/// Container lifecycle event bus.
#[derive(Debug)]
pub struct EventBus {
    runtime: Arc<dyn RuntimeClient>,
    subscriptions: Arc<RwLock<Subscriptions>>,
    shutdown: ShutdownSignal,
    state: watch::Receiver<BusState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// State owned by the background processing task.
struct EventProcessor {
    runtime: Arc<dyn RuntimeClient>,
    listener: ListenerId,
    events: mpsc::Receiver<RuntimeEvent>,
    subscriptions: Arc<RwLock<Subscriptions>>,
    shutdown: ShutdownSignal,
    state: watch::Sender<BusState>,
    overflow: OverflowPolicy,
}

impl EventBus {
    /// Probe the runtime, register on its event stream and start processing.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime does not answer the liveness probe or
    /// refuses the listener registration.
    pub async fn start(
        runtime: Arc<dyn RuntimeClient>,
        overflow: OverflowPolicy,
    ) -> RuntimeResult<Self> {
        tracing::info!(endpoint = runtime.endpoint(), "Starting the container event bus");

        if let Err(e) = runtime.ping().await {
            tracing::error!(error = %e, "Failed to ping the container runtime");
            return Err(e);
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let listener = match runtime.add_event_listener(events_tx).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(error = %e, "Failed to register as a runtime event listener");
                return Err(e);
            }
        };

        let (state_tx, state_rx) = watch::channel(BusState::Idle);
        let subscriptions = Arc::new(RwLock::new(Subscriptions::default()));
        let shutdown = ShutdownSignal::new();

        let processor = EventProcessor {
            runtime: runtime.clone(),
            listener,
            events: events_rx,
            subscriptions: subscriptions.clone(),
            shutdown: shutdown.clone(),
            state: state_tx,
            overflow,
        };
        processor.state.send_replace(BusState::Running);
        let task = tokio::spawn(processor.run());

        Ok(Self {
            runtime,
            subscriptions,
            shutdown,
            state: state_rx,
            task: Mutex::new(Some(task)),
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BusState {
        *self.state.borrow()
    }

    /// Send the ID of every started container to `channel`.
    ///
    /// Replaces any previous creation listener.
    pub fn register_creation_listener(&self, channel: ListenerChannel) {
        tracing::debug!("Setting the channel for creation events");
        self.subscriptions.write().creation = Some(channel);
    }

    /// Send the ID of every destroyed container to `channel`.
    ///
    /// Replaces any previous destruction listener.
    pub fn register_destruction_listener(&self, channel: ListenerChannel) {
        tracing::debug!("Setting the channel for destruction events");
        self.subscriptions.write().destruction = Some(channel);
    }

    /// Check whether the runtime knows a container.
    ///
    /// # Errors
    ///
    /// A missing container is `Ok(false)`; any other runtime failure is
    /// returned as an error.
    pub async fn exists(&self, id: &str) -> RuntimeResult<bool> {
        match self.runtime.inspect(id).await {
            Ok(_) => Ok(true),
            Err(RuntimeError::NotFound { .. }) => Ok(false),
            Err(e) => {
                tracing::warn!(container_id = id, error = %e, "Failed to look up container");
                Err(e)
            }
        }
    }

    /// Retrieve a single container.
    ///
    /// # Errors
    ///
    /// Returns the runtime error, including [`RuntimeError::NotFound`].
    pub async fn get(&self, id: &str) -> RuntimeResult<Container> {
        self.runtime.inspect(id).await.inspect_err(|e| {
            tracing::error!(container_id = id, error = %e, "Failed to retrieve container");
        })
    }

    /// List containers known to the runtime.
    ///
    /// # Errors
    ///
    /// Returns the runtime error.
    pub async fn list(&self) -> RuntimeResult<Vec<Container>> {
        self.runtime.list().await.inspect_err(|e| {
            tracing::error!(error = %e, "Failed to retrieve the list of containers");
        })
    }

    /// Stop processing and wait for the task to reach [`BusState::Stopped`].
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.shutdown.trigger() {
            tracing::info!("Shutting down the container event bus");
        }

        let mut state = self.state.clone();
        // Errors only if the task is gone, which also means it has stopped.
        let _ = state.wait_for(|s| *s == BusState::Stopped).await;

        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Event processor task failed");
            }
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

impl EventProcessor {
    async fn run(mut self) {
        tracing::info!("Starting the events processor for runtime events");

        loop {
            // Biased: a ready shutdown always wins over a ready event.
            tokio::select! {
                biased;
                () = self.shutdown.wait() => {
                    tracing::info!("Received a shutdown signal, closing up resources");
                    break;
                }
                event = self.events.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => {
                        tracing::warn!("Runtime closed the event stream");
                        self.shutdown.trigger();
                        break;
                    }
                },
            }
        }

        self.state.send_replace(BusState::ShuttingDown);
        if let Err(e) = self.runtime.remove_event_listener(self.listener).await {
            tracing::warn!(error = %e, "Failed to remove runtime event listener");
        }
        self.state.send_replace(BusState::Stopped);
        tracing::info!("Exiting the events processor loop");
    }

    async fn dispatch(&self, event: RuntimeEvent) {
        tracing::debug!(
            container_id = %event.id.short(),
            kind = %event.kind,
            "Received a runtime event"
        );

        let (channel, target) = match event.kind {
            EventKind::Started => (self.subscriptions.read().creation.clone(), "creation"),
            EventKind::Destroyed => (
                self.subscriptions.read().destruction.clone(),
                "destruction",
            ),
            EventKind::Died | EventKind::Other(_) => return,
        };

        if let Some(channel) = channel {
            forward(&channel, event.id, self.overflow, target).await;
        }
    }
}

/// Hand one container ID to a subscriber without letting it stall the loop.
async fn forward(
    channel: &ListenerChannel,
    id: ContainerId,
    overflow: OverflowPolicy,
    target: &'static str,
) {
    match overflow {
        OverflowPolicy::DropNewest => match channel.try_send(id) {
            Ok(()) => {}
            Err(TrySendError::Full(id)) => {
                tracing::warn!(container_id = %id.short(), target, "Subscriber queue full, dropping event");
            }
            Err(TrySendError::Closed(id)) => {
                tracing::warn!(container_id = %id.short(), target, "Subscriber channel closed, dropping event");
            }
        },
        OverflowPolicy::BlockWithTimeout { timeout_ms } => {
            match channel
                .send_timeout(id, Duration::from_millis(timeout_ms))
                .await
            {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(id)) => {
                    tracing::warn!(
                        container_id = %id.short(),
                        target,
                        timeout_ms,
                        "Subscriber did not accept event in time, dropping event"
                    );
                }
                Err(SendTimeoutError::Closed(id)) => {
                    tracing::warn!(container_id = %id.short(), target, "Subscriber channel closed, dropping event");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MemoryRuntime;

    async fn running_bus(runtime: &Arc<MemoryRuntime>) -> EventBus {
        EventBus::start(runtime.clone(), OverflowPolicy::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn start_registers_listener() {
        let runtime = Arc::new(MemoryRuntime::new());
        let bus = running_bus(&runtime).await;
        assert_eq!(bus.state(), BusState::Running);
        assert_eq!(runtime.listener_count(), 1);
        bus.shutdown().await;
        assert_eq!(runtime.listener_count(), 0);
    }

    #[tokio::test]
    async fn start_fails_when_runtime_offline() {
        let runtime = Arc::new(MemoryRuntime::new());
        runtime.set_online(false);
        let err = EventBus::start(runtime.clone(), OverflowPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Unavailable { .. }));
        assert_eq!(runtime.listener_count(), 0);
    }

    #[tokio::test]
    async fn start_fails_when_listener_rejected() {
        let runtime = Arc::new(MemoryRuntime::new());
        runtime.reject_listeners(true);
        let err = EventBus::start(runtime, OverflowPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ListenerRejected { .. }));
    }

    #[tokio::test]
    async fn full_subscriber_does_not_stall_loop() {
        let runtime = Arc::new(MemoryRuntime::new());
        let bus = running_bus(&runtime).await;

        let (tx, mut rx) = mpsc::channel(1);
        bus.register_creation_listener(tx);

        // Nobody reads rx while these are emitted; only the first fits.
        for i in 0..(EVENT_QUEUE_DEPTH * 3) {
            runtime
                .emit(RuntimeEvent::now(format!("c{i}"), EventKind::Started))
                .await;
        }

        // The loop is still alive: shutdown completes.
        tokio::time::timeout(Duration::from_secs(2), bus.shutdown())
            .await
            .expect("shutdown should not hang");
        assert_eq!(rx.recv().await.unwrap().as_str(), "c0");
    }

    #[tokio::test]
    async fn block_with_timeout_waits_for_slow_subscriber() {
        let runtime = Arc::new(MemoryRuntime::new());
        let bus = EventBus::start(
            runtime.clone(),
            OverflowPolicy::BlockWithTimeout { timeout_ms: 500 },
        )
        .await
        .unwrap();

        let (tx, mut rx) = mpsc::channel(1);
        bus.register_creation_listener(tx);

        runtime
            .emit(RuntimeEvent::now("c1", EventKind::Started))
            .await;
        runtime
            .emit(RuntimeEvent::now("c2", EventKind::Started))
            .await;

        assert_eq!(rx.recv().await.unwrap().as_str(), "c1");
        assert_eq!(rx.recv().await.unwrap().as_str(), "c2");
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn closed_stream_stops_the_bus() {
        let runtime = Arc::new(MemoryRuntime::new());
        let bus = running_bus(&runtime).await;
        // Removing the runtime side drops the only sender.
        runtime.remove_event_listener(ListenerId(1)).await.unwrap();

        let mut state = bus.state.clone();
        tokio::time::timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == BusState::Stopped),
        )
        .await
        .expect("bus should stop")
        .unwrap();
    }
}
