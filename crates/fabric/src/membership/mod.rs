//! Cluster membership.
//!
//! [`Coordinator`] owns a [`MembershipProtocol`] instance, drives the initial
//! bootstrap or join, and drains the protocol's [`MembershipEvent`] channel on
//! its own task. [`GossipProtocol`] is the UDP implementation used in
//! production.

mod config;
mod coordinator;
mod gossip;
mod member;
mod protocol;
mod seeds;

pub use config::{
    ClusterConfig, ClusterProfile, DEFAULT_BIND_ADDR, DEFAULT_BIND_PORT, DEFAULT_PROFILE,
    ProfileTimings, SecretKey, configure,
};
pub use coordinator::{Coordinator, JoinPolicy};
pub use gossip::GossipProtocol;
pub use member::{Member, MemberStatus, MembershipEvent};
pub use protocol::MembershipProtocol;
pub use seeds::{Seed, parse_seed, resolve_seeds};
