//! Node agent lifecycle.
//!
//! [`Fabric`] wires the authorization gate, the container event bus and the
//! membership coordinator together. Startup order is gate, bus, coordinator;
//! a failure part way through tears down what was already built. Every
//! privileged operation is checked by the gate before it touches anything.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fabric_common::FabricResult;

use crate::auth::{Action, AuthGate, SessionId};
use crate::config::FabricConfig;
use crate::membership::{Coordinator, Member};
use crate::runtime::events::ListenerChannel;
use crate::runtime::{self, BusState, Container, EventBus, RuntimeClient};

/// A running node agent.
#[derive(Debug)]
pub struct Fabric {
    gate: AuthGate,
    events: EventBus,
    membership: Coordinator,
    stopped: AtomicBool,
}

impl Fabric {
    /// Start the agent against the configured runtime endpoint.
    ///
    /// # Errors
    ///
    /// Returns the first configuration, authorization, runtime or join error.
    pub async fn start(config: FabricConfig) -> FabricResult<Self> {
        config.validate()?;
        let runtime = runtime::connect(&config.runtime.endpoint)?;
        Self::start_with(config, runtime).await
    }

    /// Start the agent against an existing runtime client.
    ///
    /// # Errors
    ///
    /// Returns the first configuration, authorization, runtime or join error.
    pub async fn start_with(
        config: FabricConfig,
        runtime: Arc<dyn RuntimeClient>,
    ) -> FabricResult<Self> {
        config.validate()?;
        let cluster = config.cluster_config()?;

        let gate = AuthGate::from_config(&config.auth)?;
        let events = EventBus::start(runtime, config.runtime.overflow).await?;

        let membership = match Coordinator::start(
            &cluster,
            config.cluster.bootstrap,
            &config.cluster.members,
            &config.cluster.join,
        )
        .await
        {
            Ok(membership) => membership,
            Err(e) => {
                tracing::error!(error = %e, "Membership failed to start, tearing down the event bus");
                events.shutdown().await;
                return Err(e.into());
            }
        };

        tracing::info!(
            member = %membership.local_member().id,
            profile = %cluster.profile,
            auth = gate.strategy(),
            "Fabric node started"
        );
        Ok(Self {
            gate,
            events,
            membership,
            stopped: AtomicBool::new(false),
        })
    }

    /// Open a session.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`](fabric_common::AuthError) if the credentials are
    /// refused.
    pub async fn login(&self, user: &str, token: &str) -> FabricResult<SessionId> {
        Ok(self.gate.login(user, token).await?)
    }

    /// Close a session.
    ///
    /// Returns true if the session was open.
    ///
    /// # Errors
    ///
    /// Returns the strategy's error.
    pub async fn logout(&self, session: &SessionId) -> FabricResult<bool> {
        Ok(self.gate.logout(session).await?)
    }

    /// Cluster members, sorted by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the session may not list members.
    pub async fn members(&self, session: &SessionId) -> FabricResult<Vec<Member>> {
        self.gate.check(session, Action::ListMembers).await?;
        Ok(self.membership.members())
    }

    /// Send a message to the cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the session may not broadcast.
    pub async fn broadcast(&self, session: &SessionId, message: &str) -> FabricResult<()> {
        self.gate.check(session, Action::Broadcast).await?;
        self.membership.broadcast(message)
    }

    /// Containers on this node.
    ///
    /// # Errors
    ///
    /// Returns an error if the session may not list containers or the
    /// runtime fails.
    pub async fn list_containers(&self, session: &SessionId) -> FabricResult<Vec<Container>> {
        self.gate.check(session, Action::ListContainers).await?;
        Ok(self.events.list().await?)
    }

    /// A single container.
    ///
    /// # Errors
    ///
    /// Returns an error if the session may not inspect containers or the
    /// runtime fails, including when the container does not exist.
    pub async fn container(&self, session: &SessionId, id: &str) -> FabricResult<Container> {
        self.gate.check(session, Action::InspectContainer).await?;
        Ok(self.events.get(id).await?)
    }

    /// Whether the runtime knows a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the session may not inspect containers or the
    /// runtime cannot answer.
    pub async fn container_exists(&self, session: &SessionId, id: &str) -> FabricResult<bool> {
        self.gate.check(session, Action::InspectContainer).await?;
        Ok(self.events.exists(id).await?)
    }

    /// Receive the ids of started containers on `channel`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session may not watch containers.
    pub async fn watch_creations(
        &self,
        session: &SessionId,
        channel: ListenerChannel,
    ) -> FabricResult<()> {
        self.gate.check(session, Action::WatchContainers).await?;
        self.events.register_creation_listener(channel);
        Ok(())
    }

    /// Receive the ids of destroyed containers on `channel`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session may not watch containers.
    pub async fn watch_destructions(
        &self,
        session: &SessionId,
        channel: ListenerChannel,
    ) -> FabricResult<()> {
        self.gate.check(session, Action::WatchContainers).await?;
        self.events.register_destruction_listener(channel);
        Ok(())
    }

    /// Stop the event bus, then leave the cluster.
    ///
    /// Later calls only log.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!("Fabric node already shut down");
            return;
        }
        tracing::info!("Shutting down the Fabric node");
        self.events.shutdown().await;
        self.membership.leave().await;
        tracing::info!("Fabric node stopped");
    }

    /// Returns true once [`Fabric::shutdown`] has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    // Ungated views only; cluster and container data goes through the gate.

    /// Lifecycle state of the container event bus.
    #[must_use]
    pub fn bus_state(&self) -> BusState {
        self.events.state()
    }

    /// This node as advertised to peers.
    #[must_use]
    pub fn local_member(&self) -> Member {
        self.membership.local_member()
    }

    /// Returns true once this node has left the cluster.
    #[must_use]
    pub fn has_left(&self) -> bool {
        self.membership.has_left()
    }

    /// Name of the active authorization strategy.
    #[must_use]
    pub fn auth_strategy(&self) -> &'static str {
        self.gate.strategy()
    }
}
