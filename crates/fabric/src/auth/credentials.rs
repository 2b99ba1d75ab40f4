//! Credential-store backed authenticator.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use fabric_common::AuthError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::session::{DEFAULT_SESSION_TTL, SessionStore};
use super::{Action, Authenticator, SessionId};

/// Hex-encoded SHA-256 of a token, as stored in the credential list.
#[must_use]
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// A known user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredential {
    /// Login name.
    pub user: String,
    /// Hex SHA-256 digest of the user's token.
    pub token_sha256: String,
    /// Actions the user may perform.
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl UserCredential {
    /// Create a credential from a plaintext token.
    #[must_use]
    pub fn new(user: impl Into<String>, token: &str, actions: Vec<Action>) -> Self {
        Self {
            user: user.into(),
            token_sha256: token_digest(token),
            actions,
        }
    }

    /// Compare `token` against the stored digest in constant time.
    ///
    /// A stored digest that is not valid hex never matches.
    fn matches(&self, token: &str) -> bool {
        let Ok(expected) = hex::decode(&self.token_sha256) else {
            tracing::warn!(user = %self.user, "Stored token digest is not valid hex");
            return false;
        };
        let actual = Sha256::digest(token.as_bytes());
        expected.as_slice().ct_eq(actual.as_slice()).into()
    }
}

/// Authenticates against a fixed list of users and tracks open sessions.
#[derive(Debug)]
pub struct CredentialAuthenticator {
    users: HashMap<String, UserCredential>,
    sessions: SessionStore<String>,
}

impl CredentialAuthenticator {
    /// Create an authenticator over `users`.
    #[must_use]
    pub fn new(users: Vec<UserCredential>) -> Self {
        let users = users
            .into_iter()
            .map(|credential| (credential.user.clone(), credential))
            .collect();
        Self {
            users,
            sessions: SessionStore::new(DEFAULT_SESSION_TTL),
        }
    }

    /// Set how long a session stays valid after login.
    #[must_use]
    pub const fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.sessions.set_ttl(ttl);
        self
    }
}

#[async_trait]
impl Authenticator for CredentialAuthenticator {
    fn name(&self) -> &'static str {
        "credentials"
    }

    async fn authenticate_login(&self, user: &str, token: &str) -> Result<SessionId, AuthError> {
        let valid = self
            .users
            .get(user)
            .is_some_and(|credential| credential.matches(token));
        if !valid {
            return Err(AuthError::InvalidCredentials {
                user: user.to_string(),
            });
        }

        let session = self.sessions.open(user.to_string(), None);
        tracing::debug!(user, "Opened session");
        Ok(session)
    }

    async fn authorize(&self, session: &SessionId, action: Action) -> Result<bool, AuthError> {
        let user = self.sessions.with(session, String::clone)?;
        Ok(self
            .users
            .get(&user)
            .is_some_and(|credential| credential.actions.contains(&action)))
    }

    async fn logout(&self, session: &SessionId) -> Result<bool, AuthError> {
        Ok(self.sessions.close(session))
    }
}
