//! Error types for the Fabric node agent.
//!
//! Each startup phase and subsystem has its own enum so callers can match on
//! the failure class; [`FabricError`] wraps them for the orchestrator and the
//! daemon.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`FabricError`].
pub type FabricResult<T> = Result<T, FabricError>;

/// Configuration errors. Always fatal at startup.
#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    /// Cluster profile is not one of local, lan or wan.
    #[error("Unsupported cluster profile: {profile}")]
    #[diagnostic(
        code(fabric::config::unsupported_profile),
        help("Supported profiles are 'local', 'lan' and 'wan'")
    )]
    UnsupportedProfile {
        /// The rejected profile name.
        profile: String,
    },

    /// An address could not be parsed.
    #[error("Invalid address: {address}")]
    #[diagnostic(code(fabric::config::invalid_address))]
    InvalidAddress {
        /// The rejected address.
        address: String,
    },

    /// Neither bootstrap mode nor any member to join was configured.
    #[error("No members to join and bootstrap mode is not enabled")]
    #[diagnostic(
        code(fabric::config::missing_members),
        help("Pass --bootstrap to start a new cluster or --members to join one")
    )]
    MissingMembers,

    /// Config file does not exist.
    #[error("Config file not found: {path}")]
    #[diagnostic(code(fabric::config::file_not_found))]
    FileNotFound {
        /// The missing path.
        path: String,
    },

    /// Config file could not be parsed.
    #[error("Failed to parse config file {path}: {message}")]
    #[diagnostic(code(fabric::config::parse))]
    Parse {
        /// The file being parsed.
        path: String,
        /// Parser message.
        message: String,
    },

    /// Any other invalid setting.
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(fabric::config::invalid))]
    Invalid {
        /// The error message.
        message: String,
    },
}

/// Cluster join errors.
#[derive(Error, Diagnostic, Debug)]
pub enum JoinError {
    /// Every seed was malformed, or none were given.
    #[error("No valid seed members to join")]
    #[diagnostic(
        code(fabric::join::no_valid_seeds),
        help("Seeds must be host, host:port, ip:port or [ipv6]:port")
    )]
    NoValidSeeds,

    /// No seed answered the join request.
    #[error("Failed to join cluster: none of {attempted} seed(s) reachable")]
    #[diagnostic(code(fabric::join::unreachable))]
    NoPeersReachable {
        /// Number of seeds contacted.
        attempted: usize,
    },

    /// The gossip socket could not be bound.
    #[error("Failed to bind gossip socket on {address}: {source}")]
    #[diagnostic(code(fabric::join::bind))]
    Bind {
        /// The bind address.
        address: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The membership protocol reported a failure.
    #[error("Membership protocol error: {message}")]
    #[diagnostic(code(fabric::join::protocol))]
    Protocol {
        /// The error message.
        message: String,
    },
}

/// Container runtime errors.
#[derive(Error, Diagnostic, Debug)]
pub enum RuntimeError {
    /// Container not found. A normal negative result for lookups.
    #[error("No such container: {id}")]
    #[diagnostic(code(fabric::runtime::not_found))]
    NotFound {
        /// The container ID that was not found.
        id: String,
    },

    /// Runtime endpoint could not be reached.
    #[error("Container runtime unavailable at {endpoint}: {message}")]
    #[diagnostic(
        code(fabric::runtime::unavailable),
        help("Check that the container runtime is running and the endpoint is correct")
    )]
    Unavailable {
        /// The endpoint that was contacted.
        endpoint: String,
        /// Transport error message.
        message: String,
    },

    /// Runtime answered with an error status.
    #[error("Container runtime error ({status}): {message}")]
    #[diagnostic(code(fabric::runtime::api))]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message reported by the runtime.
        message: String,
    },

    /// Event listener registration was refused.
    #[error("Event listener rejected: {message}")]
    #[diagnostic(code(fabric::runtime::listener_rejected))]
    ListenerRejected {
        /// The error message.
        message: String,
    },

    /// Runtime response could not be decoded.
    #[error("Failed to decode runtime response: {message}")]
    #[diagnostic(code(fabric::runtime::decode))]
    Decode {
        /// The error message.
        message: String,
    },
}

impl RuntimeError {
    /// Returns true if this error means the container does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }
}

/// Authorization errors. Every variant is a refusal.
#[derive(Error, Diagnostic, Debug)]
pub enum AuthError {
    /// Login credentials were rejected.
    #[error("Invalid credentials for user: {user}")]
    #[diagnostic(code(fabric::auth::invalid_credentials))]
    InvalidCredentials {
        /// The user that failed to log in.
        user: String,
    },

    /// Session ID is not known to the authenticator.
    #[error("Unknown session")]
    #[diagnostic(code(fabric::auth::unknown_session), help("Log in again"))]
    UnknownSession,

    /// The action was refused.
    #[error("Permission denied: {action}")]
    #[diagnostic(code(fabric::auth::denied))]
    Denied {
        /// The refused action.
        action: String,
    },

    /// Authorization backend failed.
    #[error("Authorization backend error: {message}")]
    #[diagnostic(code(fabric::auth::backend))]
    Backend {
        /// The error message.
        message: String,
    },

    /// Configured strategy does not exist.
    #[error("Authenticator not found or supported: {name}")]
    #[diagnostic(
        code(fabric::auth::unsupported),
        help("Supported authenticators are 'plain', 'deny', 'credentials' and 'introspection'")
    )]
    UnsupportedStrategy {
        /// The strategy name.
        name: String,
    },
}

/// Top-level errors for the Fabric node agent.
#[derive(Error, Diagnostic, Debug)]
pub enum FabricError {
    /// Configuration error.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    /// Cluster join error.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Join(#[from] JoinError),

    /// Container runtime error.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Runtime(#[from] RuntimeError),

    /// Authorization error.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Auth(#[from] AuthError),

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(fabric::io))]
    Io(#[from] std::io::Error),

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(fabric::internal),
        help("This is a bug, please report it at https://github.com/fabric-containers/fabric/issues")
    )]
    Internal {
        /// The error message.
        message: String,
    },
}
