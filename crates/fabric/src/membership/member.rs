//! Cluster member records and membership change notifications.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Liveness status of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    /// Announced but not yet confirmed.
    Joining,
    /// Answering probes.
    Alive,
    /// Missed a probe; will be declared left unless it answers.
    Suspect,
    /// Left gracefully or was declared dead.
    Left,
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            Self::Joining => "joining",
            Self::Alive => "alive",
            Self::Suspect => "suspect",
            Self::Left => "left",
        };
        f.write_str(status)
    }
}

/// A node in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// `addr:port` of the advertised gossip endpoint.
    pub id: String,
    /// Advertised address.
    pub addr: IpAddr,
    /// Advertised gossip port.
    pub port: u16,
    /// Liveness status.
    pub status: MemberStatus,
    /// Incarnation number, bumped by the node itself to refute suspicion.
    pub incarnation: u64,
}

impl Member {
    /// Create an alive member for an advertised endpoint.
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            id: Self::id_for(addr),
            addr: addr.ip(),
            port: addr.port(),
            status: MemberStatus::Alive,
            incarnation: 1,
        }
    }

    /// Member identifier for an endpoint.
    #[must_use]
    pub fn id_for(addr: SocketAddr) -> String {
        addr.to_string()
    }

    /// Gossip endpoint of this member.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }

    /// Returns a copy with a different status.
    #[must_use]
    pub fn with_status(mut self, status: MemberStatus) -> Self {
        self.status = status;
        self
    }
}

/// Membership change reported by the protocol instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    /// A node became known.
    Joined(Member),
    /// A node left or was declared dead.
    Left(Member),
    /// A known node changed status or incarnation.
    Updated(Member),
}

impl MembershipEvent {
    /// The member this event is about.
    #[must_use]
    pub const fn member(&self) -> &Member {
        match self {
            Self::Joined(member) | Self::Left(member) | Self::Updated(member) => member,
        }
    }
}
