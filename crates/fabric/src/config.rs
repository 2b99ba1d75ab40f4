//! Agent configuration.
//!
//! A [`FabricConfig`] is assembled once at startup from command-line flags
//! and an optional YAML file, then handed by value to
//! [`Fabric::start`](crate::Fabric::start). File values win over flags.
//!
//! ```yaml
//! cluster:
//!   members: 10.0.0.1:7946,10.0.0.2
//!   profile: wan
//!   join:
//!     policy: retry
//!     attempts: 5
//!     backoff_ms: 500
//!     max_backoff_ms: 10000
//! runtime:
//!   endpoint: unix:///var/run/docker.sock
//!   overflow:
//!     policy: block-with-timeout
//!     timeout_ms: 50
//! auth:
//!   strategy: credentials
//!   users:
//!     - user: ops
//!       token_sha256: 9f86d0...
//!       actions: [list-members, list-containers]
//! ```

use std::fmt;
use std::path::Path;

use fabric_common::ConfigError;
use serde::{Deserialize, Deserializer, Serialize};

use crate::auth::AuthConfig;
use crate::membership::{
    ClusterConfig, DEFAULT_BIND_ADDR, DEFAULT_BIND_PORT, DEFAULT_PROFILE, JoinPolicy, configure,
};
use crate::runtime::OverflowPolicy;

/// Default container runtime endpoint.
pub const DEFAULT_RUNTIME_ENDPOINT: &str = "unix:///var/run/docker.sock";

/// Complete agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    /// Cluster membership settings.
    pub cluster: ClusterSettings,
    /// Container runtime settings.
    pub runtime: RuntimeSettings,
    /// Authorization strategy.
    pub auth: AuthConfig,
}

/// Cluster membership settings, before validation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Start a new cluster instead of joining one.
    pub bootstrap: bool,
    /// Seed members to join. A YAML list or a comma-separated string.
    #[serde(deserialize_with = "member_list")]
    pub members: Vec<String>,
    /// Cluster profile name.
    pub profile: String,
    /// Gossip bind address.
    pub bind_address: String,
    /// Gossip bind port.
    pub bind_port: u16,
    /// Advertised address. Empty derives it from the bind address.
    pub advertise_address: String,
    /// Advertised port. 0 uses the bind port.
    pub advertise_port: u16,
    /// Shared gossip secret. Empty disables gossip authentication.
    pub secret: String,
    /// What to do when the initial join reaches nobody.
    pub join: JoinPolicy,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            bootstrap: false,
            members: Vec::new(),
            profile: DEFAULT_PROFILE.to_string(),
            bind_address: DEFAULT_BIND_ADDR.to_string(),
            bind_port: DEFAULT_BIND_PORT,
            advertise_address: String::new(),
            advertise_port: 0,
            secret: String::new(),
            join: JoinPolicy::default(),
        }
    }
}

impl fmt::Debug for ClusterSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterSettings")
            .field("bootstrap", &self.bootstrap)
            .field("members", &self.members)
            .field("profile", &self.profile)
            .field("bind_address", &self.bind_address)
            .field("bind_port", &self.bind_port)
            .field("advertise_address", &self.advertise_address)
            .field("advertise_port", &self.advertise_port)
            .field("secret", &(!self.secret.is_empty()).then_some("<redacted>"))
            .field("join", &self.join)
            .finish()
    }
}

/// Container runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Runtime endpoint: `tcp://`, `http(s)://` or `memory://`.
    pub endpoint: String,
    /// Subscriber queue overflow policy.
    pub overflow: OverflowPolicy,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_RUNTIME_ENDPOINT.to_string(),
            overflow: OverflowPolicy::default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MemberList {
    List(Vec<String>),
    Joined(String),
}

fn member_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let members = match MemberList::deserialize(deserializer)? {
        MemberList::List(members) => members,
        MemberList::Joined(joined) => joined.split(',').map(str::to_string).collect(),
    };
    Ok(members
        .into_iter()
        .map(|member| member.trim().to_string())
        .filter(|member| !member.is_empty())
        .collect())
}

impl FabricConfig {
    /// Load a config file on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileNotFound`] or [`ConfigError::Parse`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::default().overlay_file(path)
    }

    /// Apply a config file on top of this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileNotFound`] or [`ConfigError::Parse`].
    pub fn overlay_file(self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound {
                    path: shown.clone(),
                }
            } else {
                ConfigError::Parse {
                    path: shown.clone(),
                    message: e.to_string(),
                }
            }
        })?;
        tracing::debug!(path = %shown, "Loading config file");
        self.overlay(&yaml, &shown)
    }

    /// Apply YAML settings on top of this configuration.
    ///
    /// Sections merge key by key; a key present in `yaml` replaces the
    /// current value wholesale.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if `yaml` is malformed or has values of
    /// the wrong type.
    pub fn overlay(self, yaml: &str, source: &str) -> Result<Self, ConfigError> {
        let parse_error = |message: String| ConfigError::Parse {
            path: source.to_string(),
            message,
        };

        if yaml.trim().is_empty() {
            return Ok(self);
        }
        let overrides: serde_yaml::Value =
            serde_yaml::from_str(yaml).map_err(|e| parse_error(e.to_string()))?;
        let mut merged = serde_yaml::to_value(&self).map_err(|e| parse_error(e.to_string()))?;

        match overrides {
            serde_yaml::Value::Null => return Ok(self),
            serde_yaml::Value::Mapping(sections) => {
                merge_sections(&mut merged, sections);
            }
            _ => return Err(parse_error("expected a mapping at the top level".to_string())),
        }

        serde_yaml::from_value(merged).map_err(|e| parse_error(e.to_string()))
    }

    /// Check the settings that can be checked without touching the network.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingMembers`] when neither bootstrap mode nor
    /// any member is configured, and the errors of
    /// [`FabricConfig::cluster_config`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.cluster.bootstrap && self.cluster.members.is_empty() {
            return Err(ConfigError::MissingMembers);
        }
        if self.runtime.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "runtime endpoint must not be empty".to_string(),
            });
        }
        self.cluster_config().map(|_| ())
    }

    /// Build the membership protocol configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedProfile`] or
    /// [`ConfigError::InvalidAddress`].
    pub fn cluster_config(&self) -> Result<ClusterConfig, ConfigError> {
        let cluster = &self.cluster;
        configure(
            &cluster.profile,
            &cluster.bind_address,
            cluster.bind_port,
            &cluster.advertise_address,
            cluster.advertise_port,
            &cluster.secret,
        )
    }

    /// Start a new cluster.
    #[must_use]
    pub fn with_bootstrap(mut self, bootstrap: bool) -> Self {
        self.cluster.bootstrap = bootstrap;
        self
    }

    /// Set the seed members.
    #[must_use]
    pub fn with_members<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cluster.members = members.into_iter().map(Into::into).collect();
        self
    }

    /// Set the cluster profile.
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.cluster.profile = profile.into();
        self
    }

    /// Set the gossip bind address and port.
    #[must_use]
    pub fn with_bind(mut self, address: impl Into<String>, port: u16) -> Self {
        self.cluster.bind_address = address.into();
        self.cluster.bind_port = port;
        self
    }

    /// Set the advertised address and port.
    #[must_use]
    pub fn with_advertise(mut self, address: impl Into<String>, port: u16) -> Self {
        self.cluster.advertise_address = address.into();
        self.cluster.advertise_port = port;
        self
    }

    /// Set the gossip secret.
    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.cluster.secret = secret.into();
        self
    }

    /// Set the join failure policy.
    #[must_use]
    pub const fn with_join_policy(mut self, policy: JoinPolicy) -> Self {
        self.cluster.join = policy;
        self
    }

    /// Set the container runtime endpoint.
    #[must_use]
    pub fn with_runtime(mut self, endpoint: impl Into<String>) -> Self {
        self.runtime.endpoint = endpoint.into();
        self
    }

    /// Set the subscriber overflow policy.
    #[must_use]
    pub const fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.runtime.overflow = overflow;
        self
    }

    /// Set the authorization strategy.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }
}

fn merge_sections(base: &mut serde_yaml::Value, sections: serde_yaml::Mapping) {
    let Some(base) = base.as_mapping_mut() else {
        return;
    };
    for (section, value) in sections {
        let nested = base.get(&section).is_some_and(serde_yaml::Value::is_mapping);
        match value {
            serde_yaml::Value::Mapping(keys) if nested => {
                if let Some(current) = base
                    .get_mut(&section)
                    .and_then(serde_yaml::Value::as_mapping_mut)
                {
                    for (key, value) in keys {
                        current.insert(key, value);
                    }
                }
            }
            value => {
                base.insert(section, value);
            }
        }
    }
}
