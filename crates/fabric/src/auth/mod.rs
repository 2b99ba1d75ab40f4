//! Authorization gate.
//!
//! Every privileged operation goes through [`AuthGate::check`]. The gate is
//! generic over the [`Authenticator`] strategy chosen by [`AuthConfig`] at
//! startup:
//! - `plain`: allow everything (development and tests)
//! - `deny`: refuse everything
//! - `credentials`: static user list with hashed tokens
//! - `introspection`: RFC 7662 token introspection endpoint

mod credentials;
mod introspection;
mod session;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fabric_common::AuthError;
use serde::{Deserialize, Serialize};

pub use credentials::{CredentialAuthenticator, UserCredential, token_digest};
pub use introspection::{IntrospectionAuthenticator, IntrospectionConfig};
pub use session::DEFAULT_SESSION_TTL;

/// Opaque session identifier handed out on login.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an existing session string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random session ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Get the session ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Privileged operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Read the cluster member list.
    ListMembers,
    /// Send a message to the cluster.
    Broadcast,
    /// List containers on this node.
    ListContainers,
    /// Look up a single container.
    InspectContainer,
    /// Subscribe to container lifecycle events.
    WatchContainers,
}

impl Action {
    /// Every action, in id order.
    pub const ALL: [Self; 5] = [
        Self::ListMembers,
        Self::Broadcast,
        Self::ListContainers,
        Self::InspectContainer,
        Self::WatchContainers,
    ];

    /// Stable numeric action ID.
    #[must_use]
    pub const fn id(self) -> u32 {
        match self {
            Self::ListMembers => 1,
            Self::Broadcast => 2,
            Self::ListContainers => 3,
            Self::InspectContainer => 4,
            Self::WatchContainers => 5,
        }
    }

    /// OAuth scope that grants this action.
    #[must_use]
    pub const fn scope(self) -> &'static str {
        match self {
            Self::ListMembers => "members:read",
            Self::Broadcast => "members:write",
            Self::ListContainers | Self::InspectContainer => "containers:read",
            Self::WatchContainers => "containers:watch",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ListMembers => "list-members",
            Self::Broadcast => "broadcast",
            Self::ListContainers => "list-containers",
            Self::InspectContainer => "inspect-container",
            Self::WatchContainers => "watch-containers",
        };
        f.write_str(name)
    }
}

/// Authentication and authorization strategy.
#[async_trait]
pub trait Authenticator: Send + Sync + fmt::Debug {
    /// Strategy name, for logging.
    fn name(&self) -> &'static str;

    /// Validate credentials and open a session.
    async fn authenticate_login(&self, user: &str, token: &str) -> Result<SessionId, AuthError>;

    /// Check whether the session may perform `action`.
    async fn authorize(&self, session: &SessionId, action: Action) -> Result<bool, AuthError>;

    /// Close a session. Returns true if it was open.
    ///
    /// Stateless strategies have nothing to close.
    async fn logout(&self, _session: &SessionId) -> Result<bool, AuthError> {
        Ok(false)
    }
}

/// Session handed out by [`AllowAll`].
const PLAIN_SESSION: &str = "11111111";

/// Accepts every login and allows every action.
#[derive(Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl Authenticator for AllowAll {
    fn name(&self) -> &'static str {
        "plain"
    }

    async fn authenticate_login(&self, _user: &str, _token: &str) -> Result<SessionId, AuthError> {
        Ok(SessionId::new(PLAIN_SESSION))
    }

    async fn authorize(&self, _session: &SessionId, _action: Action) -> Result<bool, AuthError> {
        Ok(true)
    }
}

/// Rejects every login and refuses every action.
#[derive(Debug, Default)]
pub struct DenyAll;

#[async_trait]
impl Authenticator for DenyAll {
    fn name(&self) -> &'static str {
        "deny"
    }

    async fn authenticate_login(&self, user: &str, _token: &str) -> Result<SessionId, AuthError> {
        Err(AuthError::InvalidCredentials {
            user: user.to_string(),
        })
    }

    async fn authorize(&self, _session: &SessionId, _action: Action) -> Result<bool, AuthError> {
        Ok(false)
    }
}

const fn default_session_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL.as_secs()
}

/// Strategy selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum AuthConfig {
    /// [`AllowAll`].
    #[default]
    Plain,
    /// [`DenyAll`].
    Deny,
    /// [`CredentialAuthenticator`].
    Credentials {
        /// Known users.
        #[serde(default)]
        users: Vec<UserCredential>,
        /// Session lifetime in seconds.
        #[serde(default = "default_session_ttl_secs")]
        session_ttl_secs: u64,
    },
    /// [`IntrospectionAuthenticator`].
    Introspection(IntrospectionConfig),
}

impl AuthConfig {
    /// Select a strategy by name, as given on the command line.
    ///
    /// Only strategies that need no further settings can be selected this
    /// way; the others must come from the config file.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnsupportedStrategy`] for anything else.
    pub fn from_name(name: &str) -> Result<Self, AuthError> {
        match name {
            "plain" => Ok(Self::Plain),
            "deny" => Ok(Self::Deny),
            other => Err(AuthError::UnsupportedStrategy {
                name: other.to_string(),
            }),
        }
    }

    /// Build the configured strategy.
    ///
    /// # Errors
    ///
    /// Returns an error if the strategy cannot be constructed.
    pub fn build(&self) -> Result<Arc<dyn Authenticator>, AuthError> {
        let strategy: Arc<dyn Authenticator> = match self {
            Self::Plain => Arc::new(AllowAll),
            Self::Deny => Arc::new(DenyAll),
            Self::Credentials {
                users,
                session_ttl_secs,
            } => Arc::new(
                CredentialAuthenticator::new(users.clone())
                    .with_session_ttl(Duration::from_secs(*session_ttl_secs)),
            ),
            Self::Introspection(config) => {
                Arc::new(IntrospectionAuthenticator::new(config.clone())?)
            }
        };
        Ok(strategy)
    }
}

/// The single entry point for authorization decisions.
#[derive(Debug, Clone)]
pub struct AuthGate {
    strategy: Arc<dyn Authenticator>,
}

impl AuthGate {
    /// Wrap a strategy.
    #[must_use]
    pub fn new(strategy: Arc<dyn Authenticator>) -> Self {
        Self { strategy }
    }

    /// Build the gate from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the strategy cannot be constructed.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let strategy = config.build()?;
        tracing::info!(strategy = strategy.name(), "Initialized the authorization gate");
        Ok(Self::new(strategy))
    }

    /// Name of the active strategy.
    #[must_use]
    pub fn strategy(&self) -> &'static str {
        self.strategy.name()
    }

    /// Validate credentials and open a session.
    ///
    /// # Errors
    ///
    /// Returns the strategy's error.
    pub async fn login(&self, user: &str, token: &str) -> Result<SessionId, AuthError> {
        self.strategy
            .authenticate_login(user, token)
            .await
            .inspect_err(|e| tracing::warn!(user, error = %e, "Login refused"))
    }

    /// Close a session.
    ///
    /// # Errors
    ///
    /// Returns the strategy's error.
    pub async fn logout(&self, session: &SessionId) -> Result<bool, AuthError> {
        let closed = self.strategy.logout(session).await?;
        tracing::debug!(closed, "Logout");
        Ok(closed)
    }

    /// Allow `action` for `session` or refuse it.
    ///
    /// A `false` decision and any strategy error are treated the same way.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Denied`] whenever the action is not explicitly
    /// allowed.
    pub async fn check(&self, session: &SessionId, action: Action) -> Result<(), AuthError> {
        match self.strategy.authorize(session, action).await {
            Ok(true) => {
                tracing::trace!(%action, "Action authorized");
                Ok(())
            }
            Ok(false) => {
                tracing::warn!(%action, "Action refused");
                Err(AuthError::Denied {
                    action: action.to_string(),
                })
            }
            Err(e) => {
                tracing::warn!(%action, error = %e, "Authorization failed, refusing action");
                Err(AuthError::Denied {
                    action: action.to_string(),
                })
            }
        }
    }
}
