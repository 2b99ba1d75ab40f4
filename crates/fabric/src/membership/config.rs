//! Cluster configuration and timing profiles.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use fabric_common::ConfigError;
use serde::{Deserialize, Serialize};

/// Default gossip port.
pub const DEFAULT_BIND_PORT: u16 = 7946;
/// Default gossip bind address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
/// Default cluster profile.
pub const DEFAULT_PROFILE: &str = "lan";

/// Named bundle of timing defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterProfile {
    /// Single host, loopback latencies.
    Local,
    /// Same datacenter.
    Lan,
    /// Across datacenters.
    Wan,
}

impl FromStr for ClusterProfile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "lan" => Ok(Self::Lan),
            "wan" => Ok(Self::Wan),
            _ => Err(ConfigError::UnsupportedProfile {
                profile: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ClusterProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::Lan => "lan",
            Self::Wan => "wan",
        };
        f.write_str(name)
    }
}

/// Protocol timings selected by a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileTimings {
    /// Time between failure-detection probes.
    pub probe_interval: Duration,
    /// How long to wait for a probe ack.
    pub probe_timeout: Duration,
    /// How long a member stays suspect before it is declared left.
    pub suspicion_timeout: Duration,
    /// Upper bound on one join attempt.
    pub join_timeout: Duration,
    /// Upper bound on a graceful leave.
    pub leave_timeout: Duration,
}

impl ClusterProfile {
    /// Timing defaults for this profile.
    #[must_use]
    pub const fn timings(self) -> ProfileTimings {
        match self {
            Self::Local => ProfileTimings {
                probe_interval: Duration::from_secs(1),
                probe_timeout: Duration::from_millis(200),
                suspicion_timeout: Duration::from_secs(3),
                join_timeout: Duration::from_secs(1),
                leave_timeout: Duration::from_secs(1),
            },
            Self::Lan => ProfileTimings {
                probe_interval: Duration::from_secs(1),
                probe_timeout: Duration::from_millis(500),
                suspicion_timeout: Duration::from_secs(4),
                join_timeout: Duration::from_secs(10),
                leave_timeout: Duration::from_secs(5),
            },
            Self::Wan => ProfileTimings {
                probe_interval: Duration::from_secs(5),
                probe_timeout: Duration::from_secs(3),
                suspicion_timeout: Duration::from_secs(30),
                join_timeout: Duration::from_secs(30),
                leave_timeout: Duration::from_secs(10),
            },
        }
    }
}

/// Shared gossip secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(Vec<u8>);

impl SecretKey {
    /// Key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Configuration handed to the membership protocol instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Selected profile.
    pub profile: ClusterProfile,
    /// Timings, defaulted from the profile.
    pub timings: ProfileTimings,
    /// Address the gossip socket binds to.
    pub bind_addr: IpAddr,
    /// Port the gossip socket binds to. 0 picks a free port.
    pub bind_port: u16,
    /// Address advertised to peers. `None` derives it from the bind address.
    pub advertise_addr: Option<IpAddr>,
    /// Port advertised to peers. 0 uses the bound port.
    pub advertise_port: u16,
    /// Shared secret; only nodes with the same secret can gossip.
    pub secret: Option<SecretKey>,
}

impl ClusterConfig {
    /// Override the profile timings.
    #[must_use]
    pub fn with_timings(mut self, timings: ProfileTimings) -> Self {
        self.timings = timings;
        self
    }
}

/// Build a [`ClusterConfig`] from a profile name and endpoint settings.
///
/// An empty `advertise_addr` means "derive from the bind address", an
/// `advertise_port` of 0 means "same as the bind port", and an empty
/// `secret` disables gossip authentication.
///
/// # Errors
///
/// Returns [`ConfigError::UnsupportedProfile`] for unknown profiles and
/// [`ConfigError::InvalidAddress`] for unparsable addresses.
pub fn configure(
    profile: &str,
    bind_addr: &str,
    bind_port: u16,
    advertise_addr: &str,
    advertise_port: u16,
    secret: &str,
) -> Result<ClusterConfig, ConfigError> {
    let profile: ClusterProfile = profile.parse()?;

    let parse_ip = |address: &str| {
        address
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidAddress {
                address: address.to_string(),
            })
    };
    let bind_addr = parse_ip(bind_addr)?;
    let advertise_addr = match advertise_addr.trim() {
        "" => None,
        address => Some(parse_ip(address)?),
    };
    let advertise_port = if advertise_port == 0 {
        bind_port
    } else {
        advertise_port
    };
    let secret = (!secret.is_empty()).then(|| SecretKey(secret.as_bytes().to_vec()));

    Ok(ClusterConfig {
        profile,
        timings: profile.timings(),
        bind_addr,
        bind_port,
        advertise_addr,
        advertise_port,
        secret,
    })
}
