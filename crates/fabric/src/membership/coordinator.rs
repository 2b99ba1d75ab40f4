//! Membership coordinator.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use fabric_common::{FabricResult, JoinError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{
    ClusterConfig, GossipProtocol, Member, MemberStatus, MembershipEvent, MembershipProtocol,
    ProfileTimings, resolve_seeds,
};

/// What to do when the initial join reaches no seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum JoinPolicy {
    /// Give up after one attempt and let the supervisor restart the agent.
    #[default]
    FailFast,
    /// Retry with exponential backoff.
    Retry {
        /// Total attempts, including the first.
        attempts: u32,
        /// Delay before the second attempt.
        backoff_ms: u64,
        /// Upper bound on the delay between attempts.
        max_backoff_ms: u64,
    },
}

impl JoinPolicy {
    fn schedule(self) -> (u32, Duration, Duration) {
        match self {
            Self::FailFast => (1, Duration::ZERO, Duration::ZERO),
            Self::Retry {
                attempts,
                backoff_ms,
                max_backoff_ms,
            } => (
                attempts.max(1),
                Duration::from_millis(backoff_ms),
                Duration::from_millis(max_backoff_ms.max(backoff_ms)),
            ),
        }
    }
}

/// Owns the membership protocol instance for the life of the agent.
#[derive(Debug)]
pub struct Coordinator {
    protocol: Arc<dyn MembershipProtocol>,
    leave_timeout: Duration,
    watcher: JoinHandle<()>,
    left: AtomicBool,
}

impl Coordinator {
    /// Bind the gossip protocol and bootstrap or join a cluster.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::Bind`] if the gossip socket cannot be bound, and
    /// the join errors documented on [`Coordinator::start_with`].
    pub async fn start(
        config: &ClusterConfig,
        bootstrapping: bool,
        seeds: &[String],
        policy: &JoinPolicy,
    ) -> Result<Self, JoinError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let protocol = GossipProtocol::bind(config, events_tx).await?;
        Self::start_with(
            Arc::new(protocol),
            events_rx,
            config.timings,
            bootstrapping,
            seeds,
            policy,
        )
        .await
    }

    /// Bootstrap or join using an existing protocol instance.
    ///
    /// A bootstrapping node never contacts `seeds`. Otherwise each join
    /// attempt is bounded by `timings.join_timeout`; a timeout counts as zero
    /// contacts. On failure the protocol is told to leave before the error is
    /// returned.
    ///
    /// # Errors
    ///
    /// - [`JoinError::NoValidSeeds`] if no seed survives validation.
    /// - [`JoinError::NoPeersReachable`] if every attempt reached nobody.
    pub async fn start_with(
        protocol: Arc<dyn MembershipProtocol>,
        events: mpsc::UnboundedReceiver<MembershipEvent>,
        timings: ProfileTimings,
        bootstrapping: bool,
        seeds: &[String],
        policy: &JoinPolicy,
    ) -> Result<Self, JoinError> {
        let local = protocol.local_member();
        let coordinator = Self {
            protocol,
            leave_timeout: timings.leave_timeout,
            watcher: tokio::spawn(watch_membership(events)),
            left: AtomicBool::new(false),
        };

        if bootstrapping {
            if !seeds.is_empty() {
                tracing::info!(seeds = seeds.len(), "Bootstrapping, ignoring seed members");
            }
            tracing::info!(member = %local.id, "Bootstrapped a new cluster");
            return Ok(coordinator);
        }

        match coordinator.join(seeds, timings.join_timeout, *policy).await {
            Ok(contacted) => {
                tracing::info!(member = %local.id, contacted, "Joined the cluster");
                Ok(coordinator)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to join the cluster");
                coordinator.leave().await;
                Err(e)
            }
        }
    }

    async fn join(
        &self,
        seeds: &[String],
        join_timeout: Duration,
        policy: JoinPolicy,
    ) -> Result<usize, JoinError> {
        let default_port = self.protocol.local_member().port;
        let resolved = resolve_seeds(seeds, default_port, join_timeout).await;
        if resolved.is_empty() {
            return Err(JoinError::NoValidSeeds);
        }

        let (attempts, mut backoff, max_backoff) = policy.schedule();
        let mut attempt = 1;
        loop {
            match self.join_once(&resolved, join_timeout).await {
                Err(e @ JoinError::NoPeersReachable { .. }) if attempt < attempts => {
                    tracing::warn!(attempt, attempts, ?backoff, error = %e, "Join attempt failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn join_once(
        &self,
        seeds: &[SocketAddr],
        join_timeout: Duration,
    ) -> Result<usize, JoinError> {
        tracing::debug!(?seeds, "Contacting seed members");
        let contacted = match tokio::time::timeout(join_timeout, self.protocol.join(seeds)).await
        {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(?join_timeout, "Join attempt timed out");
                0
            }
        };
        if contacted == 0 {
            return Err(JoinError::NoPeersReachable {
                attempted: seeds.len(),
            });
        }
        Ok(contacted)
    }

    /// Point-in-time view of the cluster, sorted by member id.
    #[must_use]
    pub fn members(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self
            .protocol
            .members()
            .into_iter()
            .filter(|member| member.status != MemberStatus::Left)
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    /// This node as advertised to peers.
    #[must_use]
    pub fn local_member(&self) -> Member {
        self.protocol.local_member()
    }

    /// Send a message to the cluster.
    ///
    /// Not wired to the gossip layer: the message is logged and dropped.
    ///
    /// # Errors
    ///
    /// Currently never fails.
    #[allow(clippy::unnecessary_wraps, clippy::unused_self)]
    pub fn broadcast(&self, message: &str) -> FabricResult<()> {
        tracing::debug!(bytes = message.len(), "Broadcast is not wired, dropping message");
        Ok(())
    }

    /// Leave the cluster, bounded by the profile's leave timeout.
    ///
    /// Best effort: failures are logged. Later calls do nothing.
    pub async fn leave(&self) {
        if self.left.swap(true, Ordering::SeqCst) {
            tracing::debug!("Already left the cluster");
            return;
        }

        match tokio::time::timeout(self.leave_timeout, self.protocol.leave(self.leave_timeout))
            .await
        {
            Ok(Ok(())) => tracing::debug!("Membership protocol left"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to leave the cluster gracefully"),
            Err(_) => tracing::warn!(timeout = ?self.leave_timeout, "Leave timed out"),
        }
        self.watcher.abort();
    }

    /// Returns true once [`Coordinator::leave`] has been called.
    #[must_use]
    pub fn has_left(&self) -> bool {
        self.left.load(Ordering::SeqCst)
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

async fn watch_membership(mut events: mpsc::UnboundedReceiver<MembershipEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            MembershipEvent::Joined(member) => {
                tracing::info!(member = %member.id, "Member joined");
            }
            MembershipEvent::Left(member) => {
                tracing::info!(member = %member.id, "Member left");
            }
            MembershipEvent::Updated(member) => {
                tracing::debug!(
                    member = %member.id,
                    status = %member.status,
                    incarnation = member.incarnation,
                    "Member updated"
                );
            }
        }
    }
    tracing::debug!("Membership event channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::ClusterProfile;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Protocol double that records calls and replays scripted join results.
    #[derive(Debug)]
    struct FakeProtocol {
        local: Member,
        peers: Mutex<Vec<Member>>,
        answers: Mutex<VecDeque<usize>>,
        join_delay: Duration,
        joins: Mutex<Vec<Vec<SocketAddr>>>,
        leaves: AtomicUsize,
    }

    impl FakeProtocol {
        fn new(answers: &[usize]) -> Arc<Self> {
            Arc::new(Self {
                local: Member::new("10.0.0.1:7946".parse().unwrap()),
                peers: Mutex::new(Vec::new()),
                answers: Mutex::new(answers.iter().copied().collect()),
                join_delay: Duration::ZERO,
                joins: Mutex::new(Vec::new()),
                leaves: AtomicUsize::new(0),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            let mut fake = Arc::try_unwrap(Self::new(&[1])).unwrap();
            fake.join_delay = delay;
            Arc::new(fake)
        }
    }

    #[async_trait]
    impl MembershipProtocol for FakeProtocol {
        fn local_member(&self) -> Member {
            self.local.clone()
        }

        fn members(&self) -> Vec<Member> {
            let mut members = vec![self.local.clone()];
            members.extend(self.peers.lock().iter().cloned());
            members
        }

        async fn join(&self, seeds: &[SocketAddr]) -> Result<usize, JoinError> {
            self.joins.lock().push(seeds.to_vec());
            tokio::time::sleep(self.join_delay).await;
            Ok(self.answers.lock().pop_front().unwrap_or(0))
        }

        async fn leave(&self, _timeout: Duration) -> Result<(), JoinError> {
            self.leaves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn timings() -> ProfileTimings {
        let mut timings = ClusterProfile::Local.timings();
        timings.join_timeout = Duration::from_millis(200);
        timings
    }

    async fn start(
        fake: &Arc<FakeProtocol>,
        bootstrapping: bool,
        seeds: &[&str],
        policy: JoinPolicy,
    ) -> Result<Coordinator, JoinError> {
        let (_tx, rx) = mpsc::unbounded_channel();
        let seeds: Vec<String> = seeds.iter().map(ToString::to_string).collect();
        Coordinator::start_with(fake.clone(), rx, timings(), bootstrapping, &seeds, &policy).await
    }

    #[tokio::test]
    async fn bootstrap_never_contacts_seeds() {
        let fake = FakeProtocol::new(&[]);
        let coordinator = start(&fake, true, &["10.0.0.2:7946"], JoinPolicy::FailFast)
            .await
            .unwrap();
        assert!(fake.joins.lock().is_empty());
        assert_eq!(coordinator.members(), vec![fake.local.clone()]);
    }

    #[tokio::test]
    async fn malformed_seeds_are_skipped() {
        let fake = FakeProtocol::new(&[1]);
        start(&fake, false, &["bad seed", "10.0.0.2", "10.0.0.3:8000"], JoinPolicy::FailFast)
            .await
            .unwrap();

        let joins = fake.joins.lock();
        assert_eq!(joins.len(), 1);
        // Port-less seeds default to the local advertise port.
        assert_eq!(
            joins[0],
            vec![
                "10.0.0.2:7946".parse::<SocketAddr>().unwrap(),
                "10.0.0.3:8000".parse().unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn no_valid_seeds() {
        for seeds in [&[][..], &["", "not a host"][..]] {
            let fake = FakeProtocol::new(&[1]);
            let result = start(&fake, false, seeds, JoinPolicy::FailFast).await;
            assert!(matches!(result, Err(JoinError::NoValidSeeds)));
            assert!(fake.joins.lock().is_empty());
            assert_eq!(fake.leaves.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn zero_contacts_is_unreachable() {
        let fake = FakeProtocol::new(&[0]);
        let result = start(&fake, false, &["10.0.0.2", "10.0.0.3"], JoinPolicy::FailFast).await;
        assert!(matches!(
            result,
            Err(JoinError::NoPeersReachable { attempted: 2 })
        ));
        assert_eq!(fake.leaves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn join_timeout_counts_as_zero_contacts() {
        let fake = FakeProtocol::slow(Duration::from_secs(30));
        let result = start(&fake, false, &["10.0.0.2"], JoinPolicy::FailFast).await;
        assert!(matches!(result, Err(JoinError::NoPeersReachable { .. })));
    }

    #[tokio::test]
    async fn retry_recovers() {
        let fake = FakeProtocol::new(&[0, 0, 2]);
        let policy = JoinPolicy::Retry {
            attempts: 3,
            backoff_ms: 1,
            max_backoff_ms: 2,
        };
        start(&fake, false, &["10.0.0.2"], policy).await.unwrap();
        assert_eq!(fake.joins.lock().len(), 3);
        assert_eq!(fake.leaves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retry_exhausted_returns_last_error() {
        let fake = FakeProtocol::new(&[0, 0]);
        let policy = JoinPolicy::Retry {
            attempts: 2,
            backoff_ms: 1,
            max_backoff_ms: 1,
        };
        let result = start(&fake, false, &["10.0.0.2"], policy).await;
        assert!(matches!(
            result,
            Err(JoinError::NoPeersReachable { attempted: 1 })
        ));
        assert_eq!(fake.joins.lock().len(), 2);
    }

    #[tokio::test]
    async fn members_are_sorted_and_exclude_left() {
        let fake = FakeProtocol::new(&[]);
        fake.peers.lock().extend([
            Member::new("10.0.0.9:7946".parse().unwrap()),
            Member::new("10.0.0.0:7946".parse().unwrap()),
            Member::new("10.0.0.5:7946".parse().unwrap()).with_status(MemberStatus::Left),
        ]);
        let coordinator = start(&fake, true, &[], JoinPolicy::FailFast).await.unwrap();

        let ids: Vec<String> = coordinator.members().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["10.0.0.0:7946", "10.0.0.1:7946", "10.0.0.9:7946"]);
    }

    #[tokio::test]
    async fn broadcast_is_accepted() {
        let fake = FakeProtocol::new(&[]);
        let coordinator = start(&fake, true, &[], JoinPolicy::FailFast).await.unwrap();
        assert!(coordinator.broadcast("hello").is_ok());
    }

    #[tokio::test]
    async fn leave_is_idempotent() {
        let fake = FakeProtocol::new(&[]);
        let coordinator = start(&fake, true, &[], JoinPolicy::FailFast).await.unwrap();
        coordinator.leave().await;
        coordinator.leave().await;
        assert!(coordinator.has_left());
        assert_eq!(fake.leaves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn join_policy_config() {
        let policy: JoinPolicy = serde_json::from_str(
            r#"{"policy":"retry","attempts":5,"backoff_ms":100,"max_backoff_ms":2000}"#,
        )
        .unwrap();
        assert_eq!(
            policy,
            JoinPolicy::Retry {
                attempts: 5,
                backoff_ms: 100,
                max_backoff_ms: 2000,
            }
        );
        assert_eq!(JoinPolicy::default(), JoinPolicy::FailFast);
    }
}
