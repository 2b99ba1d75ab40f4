//! # fabric-common
//!
//! Shared types for the Fabric node agent.
//!
//! This crate provides the pieces every other Fabric crate leans on:
//! - The error taxonomy (configuration, join, runtime, authorization)
//! - Container ID validation
//! - The single-use shutdown signal

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod shutdown;

pub use error::{AuthError, ConfigError, FabricError, FabricResult, JoinError, RuntimeError};
pub use id::ContainerId;
pub use shutdown::ShutdownSignal;
