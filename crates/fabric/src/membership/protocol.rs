//! Membership protocol seam.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use fabric_common::JoinError;

use super::Member;

/// A gossip membership protocol instance.
///
/// Implementations push [`MembershipEvent`](super::MembershipEvent)s onto the
/// channel they were constructed with; the trait only covers the calls the
/// coordinator makes.
#[async_trait]
pub trait MembershipProtocol: Send + Sync + fmt::Debug {
    /// This node as advertised to peers.
    fn local_member(&self) -> Member;

    /// Every member this node currently knows about, including itself.
    fn members(&self) -> Vec<Member>;

    /// Contact `seeds` and return how many answered.
    async fn join(&self, seeds: &[SocketAddr]) -> Result<usize, JoinError>;

    /// Announce departure to known peers and stop background work.
    async fn leave(&self, timeout: Duration) -> Result<(), JoinError>;
}
