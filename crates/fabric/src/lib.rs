//! # Fabric
//!
//! Per-node agent for a container cluster. It joins a gossip membership
//! group, bridges the local container runtime's lifecycle events to
//! in-process subscribers, and puts every privileged operation behind an
//! authorization gate.
//!
//! ## Modules
//!
//! - [`auth`]: authorization gate and authenticator strategies
//! - [`config`]: agent configuration from flags and YAML
//! - [`membership`]: cluster coordinator and the UDP gossip protocol
//! - [`runtime`]: container runtime clients and the event bus
//! - [`orchestrator`]: startup, privileged operations and shutdown
//!
//! ## Example
//!
//! ```rust,no_run
//! use fabric::{Fabric, FabricConfig};
//!
//! # async fn example() -> fabric_common::FabricResult<()> {
//! let config = FabricConfig::default()
//!     .with_bootstrap(true)
//!     .with_runtime("memory://");
//! let node = Fabric::start(config).await?;
//!
//! let session = node.login("ops", "token").await?;
//! for member in node.members(&session).await? {
//!     println!("{} {}", member.id, member.status);
//! }
//! node.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod auth;
pub mod config;
pub mod membership;
pub mod orchestrator;
pub mod runtime;

pub use config::FabricConfig;
pub use orchestrator::Fabric;
