//! In-process container runtime.
//!
//! Holds containers in memory and pushes whatever events it is told to emit.
//! Used by tests and by `fabricd --runtime memory://` on hosts without a
//! container engine.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use fabric_common::RuntimeError;
use tokio::sync::mpsc;

use super::{
    Container, EventKind, ListenerId, MEMORY_ENDPOINT, RuntimeClient, RuntimeEvent, RuntimeResult,
};

/// In-memory runtime.
#[derive(Debug)]
pub struct MemoryRuntime {
    containers: DashMap<String, Container>,
    listeners: DashMap<ListenerId, mpsc::Sender<RuntimeEvent>>,
    next_listener: AtomicU64,
    online: AtomicBool,
    accept_listeners: AtomicBool,
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self {
            containers: DashMap::new(),
            listeners: DashMap::new(),
            next_listener: AtomicU64::new(1),
            online: AtomicBool::new(true),
            accept_listeners: AtomicBool::new(true),
        }
    }
}

impl MemoryRuntime {
    /// Create an empty, reachable runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the runtime becoming (un)reachable.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Make subsequent listener registrations fail.
    pub fn reject_listeners(&self, reject: bool) {
        self.accept_listeners.store(!reject, Ordering::SeqCst);
    }

    /// Number of registered event listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Add or replace a container without emitting an event.
    pub fn insert(&self, container: Container) {
        self.containers.insert(container.id.clone(), container);
    }

    /// Push an event to every registered listener.
    ///
    /// Waits for queue space like a real event stream would. Listeners whose
    /// receiver is gone are dropped. Returns the number of listeners reached.
    pub async fn emit(&self, event: RuntimeEvent) -> usize {
        let listeners: Vec<_> = self
            .listeners
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut delivered = 0;
        for (id, listener) in listeners {
            if listener.send(event.clone()).await.is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(listener = id.0, "Dropping closed event listener");
                self.listeners.remove(&id);
            }
        }
        delivered
    }

    /// Record a started container and emit a `start` event for it.
    pub async fn start_container(&self, container: Container) -> usize {
        let id = container.id.clone();
        self.insert(container);
        self.emit(RuntimeEvent::now(id, EventKind::Started)).await
    }

    /// Mark a container as exited and emit a `die` event.
    pub async fn kill_container(&self, id: &str) -> usize {
        if let Some(mut container) = self.containers.get_mut(id) {
            container.running = false;
        }
        self.emit(RuntimeEvent::now(id, EventKind::Died)).await
    }

    /// Remove a container and emit a `destroy` event.
    pub async fn destroy_container(&self, id: &str) -> usize {
        self.containers.remove(id);
        self.emit(RuntimeEvent::now(id, EventKind::Destroyed)).await
    }

    fn ensure_online(&self) -> RuntimeResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RuntimeError::Unavailable {
                endpoint: MEMORY_ENDPOINT.to_string(),
                message: "runtime is offline".to_string(),
            })
        }
    }
}

#[async_trait]
impl RuntimeClient for MemoryRuntime {
    fn endpoint(&self) -> &str {
        MEMORY_ENDPOINT
    }

    async fn ping(&self) -> RuntimeResult<()> {
        self.ensure_online()
    }

    async fn add_event_listener(
        &self,
        listener: mpsc::Sender<RuntimeEvent>,
    ) -> RuntimeResult<ListenerId> {
        self.ensure_online()?;
        if !self.accept_listeners.load(Ordering::SeqCst) {
            return Err(RuntimeError::ListenerRejected {
                message: "listener registration disabled".to_string(),
            });
        }
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        self.listeners.insert(id, listener);
        Ok(id)
    }

    async fn remove_event_listener(&self, id: ListenerId) -> RuntimeResult<()> {
        self.listeners.remove(&id);
        Ok(())
    }

    async fn inspect(&self, id: &str) -> RuntimeResult<Container> {
        self.ensure_online()?;
        self.containers
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RuntimeError::NotFound { id: id.to_string() })
    }

    async fn list(&self) -> RuntimeResult<Vec<Container>> {
        self.ensure_online()?;
        let mut containers: Vec<_> = self
            .containers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        containers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(containers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inspect_distinguishes_missing_and_offline() {
        let runtime = MemoryRuntime::new();
        runtime.insert(Container::new("c1", "web", "nginx"));

        assert_eq!(runtime.inspect("c1").await.unwrap().name, "web");
        assert!(runtime.inspect("c2").await.unwrap_err().is_not_found());

        runtime.set_online(false);
        let err = runtime.inspect("c1").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn emit_reaches_listeners_and_prunes_closed_ones() {
        let runtime = MemoryRuntime::new();
        let (tx, mut rx) = mpsc::channel(4);
        let (closed_tx, closed_rx) = mpsc::channel(4);
        runtime.add_event_listener(tx).await.unwrap();
        runtime.add_event_listener(closed_tx).await.unwrap();
        drop(closed_rx);

        let reached = runtime
            .start_container(Container::new("c1", "web", "nginx"))
            .await;
        assert_eq!(reached, 1);
        assert_eq!(runtime.listener_count(), 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.id.as_str(), "c1");
        assert_eq!(event.kind, EventKind::Started);
    }

    #[tokio::test]
    async fn rejected_listener_registration() {
        let runtime = MemoryRuntime::new();
        runtime.reject_listeners(true);
        let (tx, _rx) = mpsc::channel(1);
        let err = runtime.add_event_listener(tx).await.unwrap_err();
        assert!(matches!(err, RuntimeError::ListenerRejected { .. }));
    }
}
