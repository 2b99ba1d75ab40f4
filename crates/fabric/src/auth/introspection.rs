//! OAuth 2.0 token introspection (RFC 7662) authenticator.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fabric_common::AuthError;
use serde::{Deserialize, Serialize};

use super::session::SessionStore;
use super::{Action, Authenticator, SessionId};

const fn default_timeout_secs() -> u64 {
    5
}

const fn default_session_ttl_secs() -> u64 {
    300
}

/// Introspection endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionConfig {
    /// Introspection endpoint URL.
    pub endpoint: String,
    /// Client ID for HTTP basic auth against the endpoint.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Client secret for HTTP basic auth against the endpoint.
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// How long granted scopes are trusted before the token must be
    /// introspected again. A token's own `exp` shortens this.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

impl IntrospectionConfig {
    /// Create settings for an endpoint with no client credentials.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client_id: None,
            client_secret: None,
            timeout_secs: default_timeout_secs(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    active: bool,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    /// Expiry as seconds since the Unix epoch.
    #[serde(default)]
    exp: Option<i64>,
}

impl IntrospectionResponse {
    /// Local deadline for the token, or `Err` if it has already expired.
    fn deadline(&self) -> Result<Option<Instant>, ()> {
        let Some(exp) = self.exp else {
            return Ok(None);
        };
        let remaining = exp - chrono::Utc::now().timestamp();
        match u64::try_from(remaining) {
            Ok(secs) if secs > 0 => Ok(Some(Instant::now() + Duration::from_secs(secs))),
            _ => Err(()),
        }
    }
}

#[derive(Debug)]
struct Grant {
    user: String,
    scopes: HashSet<String>,
}

/// Validates tokens against an introspection endpoint and authorizes by scope.
#[derive(Debug)]
pub struct IntrospectionAuthenticator {
    config: IntrospectionConfig,
    http: reqwest::Client,
    sessions: SessionStore<Grant>,
}

impl IntrospectionAuthenticator {
    /// Create an authenticator for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Backend`] if the HTTP client cannot be built.
    pub fn new(config: IntrospectionConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AuthError::Backend {
                message: e.to_string(),
            })?;
        let sessions = SessionStore::new(Duration::from_secs(config.session_ttl_secs));
        Ok(Self {
            config,
            http,
            sessions,
        })
    }

    async fn introspect(&self, token: &str) -> Result<IntrospectionResponse, AuthError> {
        let mut request = self
            .http
            .post(&self.config.endpoint)
            .form(&[("token", token), ("token_type_hint", "access_token")]);
        if let Some(client_id) = &self.config.client_id {
            request = request.basic_auth(client_id, self.config.client_secret.as_deref());
        }

        let response = request.send().await.map_err(|e| AuthError::Backend {
            message: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(AuthError::Backend {
                message: format!("introspection endpoint returned {}", response.status()),
            });
        }
        response.json().await.map_err(|e| AuthError::Backend {
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl Authenticator for IntrospectionAuthenticator {
    fn name(&self) -> &'static str {
        "introspection"
    }

    async fn authenticate_login(&self, user: &str, token: &str) -> Result<SessionId, AuthError> {
        let introspected = self.introspect(token).await?;
        let invalid = || AuthError::InvalidCredentials {
            user: user.to_string(),
        };

        if !introspected.active {
            return Err(invalid());
        }
        let Ok(deadline) = introspected.deadline() else {
            tracing::debug!(user, "Introspected token has expired");
            return Err(invalid());
        };
        let subject = introspected.username.or(introspected.sub);
        if subject.as_deref().is_some_and(|subject| subject != user) {
            return Err(invalid());
        }

        let scopes = introspected
            .scope
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let session = self.sessions.open(
            Grant {
                user: user.to_string(),
                scopes,
            },
            deadline,
        );
        tracing::debug!(user, "Opened session from introspected token");
        Ok(session)
    }

    async fn authorize(&self, session: &SessionId, action: Action) -> Result<bool, AuthError> {
        self.sessions.with(session, |grant| {
            let allowed = grant.scopes.contains(action.scope());
            tracing::trace!(user = %grant.user, %action, allowed, "Checked scope");
            allowed
        })
    }

    async fn logout(&self, session: &SessionId) -> Result<bool, AuthError> {
        Ok(self.sessions.close(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Read a full request (headers plus content-length body).
    async fn drain_request(stream: &mut tokio::net::TcpStream) {
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let Ok(n) = stream.read(&mut chunk).await else { return };
            if n == 0 {
                return;
            }
            request.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&request);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if request.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    /// Serve one canned JSON response per connection.
    async fn introspection_stub(body: impl Into<String>) -> String {
        let body = body.into();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                drain_request(&mut stream).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}/introspect")
    }

    #[tokio::test]
    async fn active_token_grants_scopes() {
        let endpoint = introspection_stub(
            r#"{"active":true,"username":"ops","scope":"members:read containers:read"}"#,
        )
        .await;
        let auth = IntrospectionAuthenticator::new(IntrospectionConfig::new(endpoint)).unwrap();

        let session = auth.authenticate_login("ops", "tok").await.unwrap();
        assert!(auth.authorize(&session, Action::ListMembers).await.unwrap());
        assert!(auth.authorize(&session, Action::InspectContainer).await.unwrap());
        assert!(!auth.authorize(&session, Action::Broadcast).await.unwrap());
    }

    #[tokio::test]
    async fn inactive_or_foreign_token_is_rejected() {
        let endpoint = introspection_stub(r#"{"active":false}"#).await;
        let auth = IntrospectionAuthenticator::new(IntrospectionConfig::new(endpoint)).unwrap();
        assert!(matches!(
            auth.authenticate_login("ops", "tok").await,
            Err(AuthError::InvalidCredentials { .. })
        ));

        let endpoint = introspection_stub(r#"{"active":true,"sub":"someone-else"}"#).await;
        let auth = IntrospectionAuthenticator::new(IntrospectionConfig::new(endpoint)).unwrap();
        assert!(auth.authenticate_login("ops", "tok").await.is_err());
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let exp = chrono::Utc::now().timestamp() - 10;
        let endpoint = introspection_stub(format!(
            r#"{{"active":true,"username":"ops","scope":"members:read","exp":{exp}}}"#
        ))
        .await;
        let auth = IntrospectionAuthenticator::new(IntrospectionConfig::new(endpoint)).unwrap();
        assert!(matches!(
            auth.authenticate_login("ops", "tok").await,
            Err(AuthError::InvalidCredentials { .. })
        ));
    }

    #[tokio::test]
    async fn grant_lapses_at_token_expiry() {
        let exp = chrono::Utc::now().timestamp() + 2;
        let endpoint = introspection_stub(format!(
            r#"{{"active":true,"username":"ops","scope":"members:read","exp":{exp}}}"#
        ))
        .await;
        let auth = IntrospectionAuthenticator::new(IntrospectionConfig::new(endpoint)).unwrap();

        let session = auth.authenticate_login("ops", "tok").await.unwrap();
        assert!(auth.authorize(&session, Action::ListMembers).await.unwrap());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(matches!(
            auth.authorize(&session, Action::ListMembers).await,
            Err(AuthError::UnknownSession)
        ));
    }

    #[tokio::test]
    async fn logout_drops_the_grant() {
        let endpoint =
            introspection_stub(r#"{"active":true,"username":"ops","scope":"members:read"}"#).await;
        let auth = IntrospectionAuthenticator::new(IntrospectionConfig::new(endpoint)).unwrap();

        let session = auth.authenticate_login("ops", "tok").await.unwrap();
        assert!(auth.logout(&session).await.unwrap());
        assert!(auth.authorize(&session, Action::ListMembers).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_backend_error() {
        let mut config = IntrospectionConfig::new("http://127.0.0.1:1/introspect");
        config.timeout_secs = 1;
        let auth = IntrospectionAuthenticator::new(config).unwrap();
        assert!(matches!(
            auth.authenticate_login("ops", "tok").await,
            Err(AuthError::Backend { .. })
        ));
    }
}
