//! SWIM-style gossip over UDP.
//!
//! Every node runs a receive loop and a probe loop. The probe loop pings one
//! random peer per interval; a peer that misses its ack becomes suspect and,
//! if it stays silent for the suspicion timeout, is declared left. Acks carry
//! the sender's member list so views converge without a separate gossip round.
//!
//! Suspicion is local: members learned from a peer's list start out alive.
//! A node that finds itself listed as suspect bumps its incarnation, and the
//! higher incarnation clears the suspicion wherever it spreads.
//!
//! With a shared secret, each datagram is `HMAC-SHA256(body) || body`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use fabric_common::{JoinError, ShutdownSignal};
use hmac::{Hmac, Mac};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use super::{
    ClusterConfig, Member, MemberStatus, MembershipEvent, MembershipProtocol, ProfileTimings,
    SecretKey,
};

type HmacSha256 = Hmac<Sha256>;

const TAG_LENGTH: usize = 32;
const MAX_DATAGRAM: usize = 65_507;
const RECEIVE_BACKOFF: Duration = Duration::from_millis(100);

/// Wire message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum Message {
    Join {
        from: Member,
        seq: u64,
    },
    JoinAck {
        from: Member,
        seq: u64,
        members: Vec<Member>,
    },
    Ping {
        from: Member,
        seq: u64,
    },
    Ack {
        from: Member,
        seq: u64,
        members: Vec<Member>,
    },
    Leave {
        from: Member,
    },
}

#[derive(Debug)]
struct PeerState {
    member: Member,
    suspect_since: Option<Instant>,
}

/// An outstanding request, completed only by an ack from its target.
#[derive(Debug)]
struct Pending {
    target: SocketAddr,
    waiter: oneshot::Sender<()>,
}

#[derive(Debug)]
struct Inner {
    socket: UdpSocket,
    local: Member,
    incarnation: AtomicU64,
    secret: Option<SecretKey>,
    timings: ProfileTimings,
    peers: DashMap<String, PeerState>,
    events: mpsc::UnboundedSender<MembershipEvent>,
    pending: DashMap<u64, Pending>,
    seq: AtomicU64,
    shutdown: ShutdownSignal,
}

/// UDP gossip membership protocol instance.
#[derive(Debug)]
pub struct GossipProtocol {
    inner: Arc<Inner>,
}

impl GossipProtocol {
    /// Bind the gossip socket and start the receive and probe loops.
    ///
    /// Membership changes are pushed onto `events`.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::Bind`] if the socket cannot be bound.
    pub async fn bind(
        config: &ClusterConfig,
        events: mpsc::UnboundedSender<MembershipEvent>,
    ) -> Result<Self, JoinError> {
        let bind = SocketAddr::new(config.bind_addr, config.bind_port);
        let socket = UdpSocket::bind(bind).await.map_err(|source| JoinError::Bind {
            address: bind.to_string(),
            source,
        })?;
        let bound = socket.local_addr().map_err(|source| JoinError::Bind {
            address: bind.to_string(),
            source,
        })?;

        let advertise_ip = match config.advertise_addr {
            Some(addr) => addr,
            None if !config.bind_addr.is_unspecified() => config.bind_addr,
            None => outbound_ip(config.bind_addr).await,
        };
        let advertise_port = match config.advertise_port {
            0 => bound.port(),
            port => port,
        };
        let local = Member::new(SocketAddr::new(advertise_ip, advertise_port));

        tracing::info!(
            bind = %bound,
            advertise = %local.id,
            profile = %config.profile,
            authenticated = config.secret.is_some(),
            "Gossip socket bound"
        );

        let inner = Arc::new(Inner {
            socket,
            incarnation: AtomicU64::new(local.incarnation),
            local,
            secret: config.secret.clone(),
            timings: config.timings,
            peers: DashMap::new(),
            events,
            pending: DashMap::new(),
            seq: AtomicU64::new(1),
            shutdown: ShutdownSignal::new(),
        });
        tokio::spawn(receive_loop(inner.clone()));
        tokio::spawn(probe_loop(inner.clone()));

        Ok(Self { inner })
    }
}

impl Drop for GossipProtocol {
    fn drop(&mut self) {
        self.inner.shutdown.trigger();
    }
}

#[async_trait]
impl MembershipProtocol for GossipProtocol {
    fn local_member(&self) -> Member {
        self.inner.local_member()
    }

    fn members(&self) -> Vec<Member> {
        let mut members = vec![self.inner.local_member()];
        members.extend(self.inner.peers.iter().map(|peer| peer.member.clone()));
        members
    }

    async fn join(&self, seeds: &[SocketAddr]) -> Result<usize, JoinError> {
        if self.inner.shutdown.is_triggered() {
            return Err(JoinError::Protocol {
                message: "gossip instance has left".to_string(),
            });
        }

        let local = self.inner.local.socket_addr();
        let attempts = seeds
            .iter()
            .filter(|seed| **seed != local)
            .map(|seed| {
                let from = self.inner.local_member();
                self.inner.request(
                    *seed,
                    move |seq| Message::Join { from, seq },
                    self.inner.timings.join_timeout,
                )
            });
        let answered = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|acked| *acked)
            .count();

        tracing::debug!(seeds = seeds.len(), answered, "Join round finished");
        Ok(answered)
    }

    async fn leave(&self, timeout: Duration) -> Result<(), JoinError> {
        let peers: Vec<SocketAddr> = self
            .inner
            .peers
            .iter()
            .map(|peer| peer.member.socket_addr())
            .collect();
        let message = Message::Leave {
            from: self.inner.local_member(),
        };

        let announce = futures::future::join_all(
            peers.iter().map(|peer| self.inner.send(*peer, &message)),
        );
        if tokio::time::timeout(timeout, announce).await.is_err() {
            tracing::warn!(?timeout, "Leave announcement timed out");
        }

        self.inner.shutdown.trigger();
        self.inner.peers.clear();
        tracing::info!(notified = peers.len(), "Left the cluster");
        Ok(())
    }
}

impl Inner {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn local_member(&self) -> Member {
        let mut member = self.local.clone();
        member.incarnation = self.incarnation.load(Ordering::Acquire);
        member
    }

    /// Answer a suspicion about this node with a newer incarnation.
    fn refute(&self, suspected: u64) {
        let current = self.incarnation.load(Ordering::Acquire);
        if suspected < current {
            return;
        }
        let next = suspected + 1;
        if self
            .incarnation
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!(incarnation = next, "Refuting suspicion about this node");
        }
    }

    fn mac(&self) -> Option<HmacSha256> {
        let key = self.secret.as_ref()?;
        HmacSha256::new_from_slice(key.as_bytes()).ok()
    }

    fn encode(&self, message: &Message) -> Option<Vec<u8>> {
        let body = match serde_json::to_vec(message) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize gossip message");
                return None;
            }
        };
        let Some(mut mac) = self.mac() else {
            return Some(body);
        };
        mac.update(&body);
        let mut datagram = mac.finalize().into_bytes().to_vec();
        datagram.extend_from_slice(&body);
        Some(datagram)
    }

    fn decode(&self, datagram: &[u8], src: SocketAddr) -> Option<Message> {
        let body = match self.mac() {
            None => datagram,
            Some(mut mac) => {
                if datagram.len() < TAG_LENGTH {
                    tracing::debug!(%src, "Dropping datagram without authentication tag");
                    return None;
                }
                let (tag, body) = datagram.split_at(TAG_LENGTH);
                mac.update(body);
                if mac.verify_slice(tag).is_err() {
                    tracing::debug!(%src, "Dropping datagram with invalid authentication tag");
                    return None;
                }
                body
            }
        };
        match serde_json::from_slice(body) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::debug!(%src, error = %e, "Dropping malformed gossip datagram");
                None
            }
        }
    }

    async fn send(&self, target: SocketAddr, message: &Message) -> bool {
        let Some(datagram) = self.encode(message) else {
            return false;
        };
        match self.socket.send_to(&datagram, target).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(%target, error = %e, "Failed to send gossip datagram");
                false
            }
        }
    }

    /// Send a message built around a fresh sequence number and wait for the
    /// matching ack.
    async fn request(
        &self,
        target: SocketAddr,
        build: impl FnOnce(u64) -> Message + Send,
        wait: Duration,
    ) -> bool {
        let seq = self.next_seq();
        let (waiter, rx) = oneshot::channel();
        self.pending.insert(seq, Pending { target, waiter });

        let acked = self.send(target, &build(seq)).await
            && matches!(tokio::time::timeout(wait, rx).await, Ok(Ok(())));
        self.pending.remove(&seq);
        acked
    }

    fn snapshot(&self) -> Vec<Member> {
        let mut members = vec![self.local_member()];
        members.extend(
            self.peers
                .iter()
                .filter(|peer| peer.member.status != MemberStatus::Left)
                .map(|peer| peer.member.clone()),
        );
        members
    }

    fn notify(&self, event: MembershipEvent) {
        // Nobody listening only happens during teardown.
        let _ = self.events.send(event);
    }

    /// Record direct contact from `member`.
    fn observe(&self, member: Member) {
        if member.id == self.local.id {
            return;
        }
        let member = member.with_status(MemberStatus::Alive);
        match self.peers.entry(member.id.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(PeerState {
                    member: member.clone(),
                    suspect_since: None,
                });
                tracing::debug!(member = %member.id, "Discovered peer");
                self.notify(MembershipEvent::Joined(member));
            }
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                let changed = state.member != member;
                state.member = member.clone();
                state.suspect_since = None;
                if changed {
                    self.notify(MembershipEvent::Updated(member));
                }
            }
        }
    }

    /// Fold a member list received from a peer into the local view.
    ///
    /// The sender's opinion of a member's liveness is not adopted; only its
    /// incarnation is.
    fn merge(&self, members: Vec<Member>) {
        for member in members {
            if member.id == self.local.id {
                if member.status == MemberStatus::Suspect {
                    self.refute(member.incarnation);
                }
                continue;
            }
            if member.status == MemberStatus::Left {
                continue;
            }
            let member = member.with_status(MemberStatus::Alive);
            match self.peers.entry(member.id.clone()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(PeerState {
                        member: member.clone(),
                        suspect_since: None,
                    });
                    self.notify(MembershipEvent::Joined(member));
                }
                Entry::Occupied(mut occupied) => {
                    let state = occupied.get_mut();
                    if member.incarnation > state.member.incarnation {
                        state.member = member.clone();
                        state.suspect_since = None;
                        self.notify(MembershipEvent::Updated(member));
                    }
                }
            }
        }
    }

    /// Complete the request `seq` if the ack came from the peer it was sent to.
    ///
    /// A seed may answer from an address other than the one it was reached
    /// on, so the advertised endpoint in the ack also counts.
    fn complete(&self, seq: u64, src: SocketAddr, advertised: SocketAddr) {
        let removed = self.pending.remove_if(&seq, |_, pending| {
            pending.target == src || pending.target == advertised
        });
        match removed {
            Some((_, pending)) => {
                let _ = pending.waiter.send(());
            }
            None if self.pending.contains_key(&seq) => {
                tracing::debug!(%src, seq, "Ignoring ack from a peer that was not asked");
            }
            None => {}
        }
    }

    async fn handle(&self, message: Message, src: SocketAddr) {
        match message {
            Message::Join { from, seq } => {
                tracing::info!(member = %from.id, "Join request received");
                self.observe(from);
                let reply = Message::JoinAck {
                    from: self.local_member(),
                    seq,
                    members: self.snapshot(),
                };
                self.send(src, &reply).await;
            }
            Message::Ping { from, seq } => {
                self.observe(from);
                let reply = Message::Ack {
                    from: self.local_member(),
                    seq,
                    members: self.snapshot(),
                };
                self.send(src, &reply).await;
            }
            Message::JoinAck { from, seq, members } | Message::Ack { from, seq, members } => {
                let advertised = from.socket_addr();
                self.observe(from);
                self.merge(members);
                self.complete(seq, src, advertised);
            }
            Message::Leave { from } => {
                if let Some((_, state)) = self.peers.remove(&from.id) {
                    tracing::info!(member = %from.id, "Peer left the cluster");
                    self.notify(MembershipEvent::Left(
                        state.member.with_status(MemberStatus::Left),
                    ));
                }
            }
        }
    }

    fn probe_target(&self) -> Option<Member> {
        let candidates: Vec<Member> = self
            .peers
            .iter()
            .filter(|peer| {
                matches!(
                    peer.member.status,
                    MemberStatus::Alive | MemberStatus::Suspect
                )
            })
            .map(|peer| peer.member.clone())
            .collect();
        candidates.choose(&mut rand::thread_rng()).cloned()
    }

    fn suspect(&self, id: &str) {
        let Some(mut state) = self.peers.get_mut(id) else {
            return;
        };
        if state.member.status == MemberStatus::Suspect {
            state.suspect_since.get_or_insert_with(Instant::now);
            return;
        }
        state.member.status = MemberStatus::Suspect;
        state.suspect_since = Some(Instant::now());
        let member = state.member.clone();
        drop(state);

        tracing::warn!(member = %member.id, "Peer missed a probe, marking suspect");
        self.notify(MembershipEvent::Updated(member));
    }

    fn reap_suspects(&self) {
        let expired: Vec<String> = self
            .peers
            .iter()
            .filter(|peer| {
                peer.suspect_since
                    .is_some_and(|since| since.elapsed() >= self.timings.suspicion_timeout)
            })
            .map(|peer| peer.key().clone())
            .collect();

        for id in expired {
            if let Some((_, state)) = self.peers.remove(&id) {
                tracing::warn!(member = %id, "Suspect peer timed out, declaring it left");
                self.notify(MembershipEvent::Left(
                    state.member.with_status(MemberStatus::Left),
                ));
            }
        }
    }
}

async fn receive_loop(inner: Arc<Inner>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let received = tokio::select! {
            biased;
            () = inner.shutdown.wait() => break,
            received = inner.socket.recv_from(&mut buf) => received,
        };
        match received {
            Ok((len, src)) => {
                if let Some(message) = inner.decode(&buf[..len], src) {
                    inner.handle(message, src).await;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to receive gossip datagram");
                tokio::time::sleep(RECEIVE_BACKOFF).await;
            }
        }
    }
    tracing::debug!("Gossip receive loop stopped");
}

async fn probe_loop(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(inner.timings.probe_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            () = inner.shutdown.wait() => break,
            _ = ticker.tick() => {}
        }

        inner.reap_suspects();
        let Some(target) = inner.probe_target() else {
            continue;
        };
        let from = inner.local_member();
        let acked = tokio::select! {
            biased;
            () = inner.shutdown.wait() => break,
            acked = inner.request(
                target.socket_addr(),
                move |seq| Message::Ping { from, seq },
                inner.timings.probe_timeout,
            ) => acked,
        };
        if !acked {
            inner.suspect(&target.id);
        }
    }
    tracing::debug!("Gossip probe loop stopped");
}

/// Address of the interface that routes outbound traffic, or loopback.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
async fn outbound_ip(bind: IpAddr) -> IpAddr {
    let (local, probe, loopback): (SocketAddr, SocketAddr, IpAddr) = if bind.is_ipv6() {
        (
            (Ipv6Addr::UNSPECIFIED, 0).into(),
            (Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888), 80).into(),
            Ipv6Addr::LOCALHOST.into(),
        )
    } else {
        (
            (Ipv4Addr::UNSPECIFIED, 0).into(),
            (Ipv4Addr::new(8, 8, 8, 8), 80).into(),
            Ipv4Addr::LOCALHOST.into(),
        )
    };

    let routed = async {
        let socket = UdpSocket::bind(local).await.ok()?;
        socket.connect(probe).await.ok()?;
        socket.local_addr().ok().map(|addr| addr.ip())
    };
    match routed.await {
        Some(ip) if !ip.is_unspecified() => ip,
        _ => {
            tracing::warn!(%loopback, "No outbound interface found, advertising loopback");
            loopback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::configure;

    fn local_config(secret: &str) -> ClusterConfig {
        configure("local", "127.0.0.1", 0, "", 0, secret).unwrap()
    }

    async fn node(config: &ClusterConfig) -> (GossipProtocol, mpsc::UnboundedReceiver<MembershipEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (GossipProtocol::bind(config, tx).await.unwrap(), rx)
    }

    async fn next_event(
        rx: &mut mpsc::UnboundedReceiver<MembershipEvent>,
        wanted: impl Fn(&MembershipEvent) -> bool,
    ) -> MembershipEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.unwrap();
                if wanted(&event) {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn advertises_bound_port() {
        let (gossip, _rx) = node(&local_config("")).await;
        let local = gossip.local_member();
        assert_eq!(local.addr, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_ne!(local.port, 0);
        assert_eq!(gossip.members(), vec![local]);
    }

    #[tokio::test]
    async fn two_nodes_see_each_other() {
        let (seed, mut seed_rx) = node(&local_config("")).await;
        let (joiner, _joiner_rx) = node(&local_config("")).await;

        let contacted = joiner
            .join(&[seed.local_member().socket_addr()])
            .await
            .unwrap();
        assert_eq!(contacted, 1);

        let joined = next_event(&mut seed_rx, |e| matches!(e, MembershipEvent::Joined(_))).await;
        assert_eq!(joined.member().id, joiner.local_member().id);

        let ids: Vec<String> = joiner.members().into_iter().map(|m| m.id).collect();
        assert!(ids.contains(&seed.local_member().id));
    }

    #[tokio::test]
    async fn join_skips_self() {
        let (gossip, _rx) = node(&local_config("")).await;
        let contacted = gossip.join(&[gossip.local_member().socket_addr()]).await.unwrap();
        assert_eq!(contacted, 0);
    }

    #[tokio::test]
    async fn mismatched_secrets_cannot_join() {
        let (seed, _seed_rx) = node(&local_config("alpha")).await;
        let (joiner, _joiner_rx) = node(&local_config("beta")).await;
        let contacted = joiner
            .join(&[seed.local_member().socket_addr()])
            .await
            .unwrap();
        assert_eq!(contacted, 0);
        assert_eq!(seed.members().len(), 1);
    }

    #[tokio::test]
    async fn shared_secret_can_join() {
        let (seed, _seed_rx) = node(&local_config("alpha")).await;
        let (joiner, _joiner_rx) = node(&local_config("alpha")).await;
        let contacted = joiner
            .join(&[seed.local_member().socket_addr()])
            .await
            .unwrap();
        assert_eq!(contacted, 1);
    }

    #[tokio::test]
    async fn leave_is_announced() {
        let (seed, mut seed_rx) = node(&local_config("")).await;
        let (joiner, _joiner_rx) = node(&local_config("")).await;
        joiner
            .join(&[seed.local_member().socket_addr()])
            .await
            .unwrap();

        joiner.leave(Duration::from_secs(1)).await.unwrap();
        let left = next_event(&mut seed_rx, |e| matches!(e, MembershipEvent::Left(_))).await;
        assert_eq!(left.member().id, joiner.local_member().id);
        assert_eq!(left.member().status, MemberStatus::Left);
        assert!(joiner.join(&[seed.local_member().socket_addr()]).await.is_err());
    }

    fn fast_timings() -> ProfileTimings {
        ProfileTimings {
            probe_interval: Duration::from_millis(50),
            probe_timeout: Duration::from_millis(50),
            suspicion_timeout: Duration::from_millis(200),
            join_timeout: Duration::from_secs(1),
            leave_timeout: Duration::from_secs(1),
        }
    }

    fn unreachable_member() -> Member {
        Member::new("127.0.0.1:9".parse().unwrap())
    }

    #[tokio::test]
    async fn silent_peer_is_suspected_then_reaped() {
        let (seed, mut seed_rx) = node(&local_config("").with_timings(fast_timings())).await;
        let (joiner, _joiner_rx) = node(&local_config("")).await;
        joiner
            .join(&[seed.local_member().socket_addr()])
            .await
            .unwrap();
        let id = joiner.local_member().id;
        drop(joiner);

        let suspect = next_event(&mut seed_rx, |e| {
            matches!(e, MembershipEvent::Updated(m) if m.status == MemberStatus::Suspect)
        })
        .await;
        assert_eq!(suspect.member().id, id);

        let left = next_event(&mut seed_rx, |e| matches!(e, MembershipEvent::Left(_))).await;
        assert_eq!(left.member().id, id);
        assert_eq!(seed.members().len(), 1);
    }

    #[tokio::test]
    async fn suspect_learned_from_a_peer_is_reaped() {
        let (gossip, mut rx) = node(&local_config("").with_timings(fast_timings())).await;
        let dead = unreachable_member().with_status(MemberStatus::Suspect);
        gossip.inner.merge(vec![dead.clone()]);

        let joined = next_event(&mut rx, |e| matches!(e, MembershipEvent::Joined(_))).await;
        assert_eq!(joined.member().status, MemberStatus::Alive);

        let left = next_event(&mut rx, |e| matches!(e, MembershipEvent::Left(_))).await;
        assert_eq!(left.member().id, dead.id);
        assert_eq!(gossip.members(), vec![gossip.local_member()]);
    }

    #[tokio::test]
    async fn suspect_without_timestamp_starts_its_timer() {
        let (gossip, _rx) = node(&local_config("")).await;
        let member = unreachable_member().with_status(MemberStatus::Suspect);
        gossip.inner.peers.insert(
            member.id.clone(),
            PeerState {
                member: member.clone(),
                suspect_since: None,
            },
        );

        gossip.inner.suspect(&member.id);
        assert!(gossip.inner.peers.get(&member.id).unwrap().suspect_since.is_some());
    }

    #[tokio::test]
    async fn suspicion_about_self_is_refuted() {
        let (gossip, _rx) = node(&local_config("")).await;
        let local = gossip.local_member();
        assert_eq!(local.incarnation, 1);

        gossip
            .inner
            .merge(vec![local.clone().with_status(MemberStatus::Suspect)]);
        assert_eq!(gossip.local_member().incarnation, 2);
        assert_eq!(gossip.local_member().status, MemberStatus::Alive);

        // Stale suspicion does not bump again.
        gossip.inner.merge(vec![local.with_status(MemberStatus::Suspect)]);
        assert_eq!(gossip.local_member().incarnation, 2);
    }

    #[tokio::test]
    async fn newer_incarnation_clears_suspicion() {
        let (gossip, mut rx) = node(&local_config("")).await;
        let member = unreachable_member();
        gossip.inner.merge(vec![member.clone()]);
        gossip.inner.suspect(&member.id);

        let mut refuted = member.clone();
        refuted.incarnation = 2;
        gossip.inner.merge(vec![refuted]);

        let updated = next_event(&mut rx, |e| {
            matches!(e, MembershipEvent::Updated(m) if m.incarnation == 2)
        })
        .await;
        assert_eq!(updated.member().status, MemberStatus::Alive);
        let state = gossip.inner.peers.get(&member.id).unwrap();
        assert!(state.suspect_since.is_none());
    }

    #[tokio::test]
    async fn ack_only_completes_its_own_target() {
        let (gossip, _rx) = node(&local_config("")).await;
        let target: SocketAddr = "127.0.0.1:7001".parse().unwrap();
        let stranger: SocketAddr = "127.0.0.1:7002".parse().unwrap();
        let (waiter, mut rx) = oneshot::channel();
        gossip.inner.pending.insert(42, Pending { target, waiter });

        gossip.inner.complete(42, stranger, stranger);
        assert!(rx.try_recv().is_err());
        assert!(gossip.inner.pending.contains_key(&42));

        gossip.inner.complete(42, stranger, target);
        assert!(rx.try_recv().is_ok());
        assert!(gossip.inner.pending.is_empty());
    }
}
