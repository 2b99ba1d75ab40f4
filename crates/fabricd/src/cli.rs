//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Result;
use fabric::auth::AuthConfig;
use fabric::config::DEFAULT_RUNTIME_ENDPOINT;
use fabric::membership::{DEFAULT_BIND_ADDR, DEFAULT_BIND_PORT, DEFAULT_PROFILE};
use fabric::{Fabric, FabricConfig};
use fabric_common::FabricResult;

/// Fabric node agent
#[derive(Parser, Debug)]
#[command(name = "fabricd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Start a new cluster instead of joining one
    #[arg(long)]
    pub bootstrap: bool,

    /// Seed members to join, comma separated (host, host:port, ip:port, [ipv6]:port)
    #[arg(long, env = "FABRIC_MEMBERS", value_delimiter = ',')]
    pub members: Vec<String>,

    /// Cluster profile: local, lan or wan
    #[arg(long, env = "FABRIC_PROFILE", default_value = DEFAULT_PROFILE)]
    pub profile: String,

    /// Address the gossip socket binds to
    #[arg(long, default_value = DEFAULT_BIND_ADDR)]
    pub bind_address: String,

    /// Port the gossip socket binds to
    #[arg(long, default_value_t = DEFAULT_BIND_PORT)]
    pub bind_port: u16,

    /// Address advertised to peers [default: derived from the bind address]
    #[arg(long, default_value = "", hide_default_value = true)]
    pub advertise_address: String,

    /// Port advertised to peers [default: the bind port]
    #[arg(long, default_value_t = 0, hide_default_value = true)]
    pub advertise_port: u16,

    /// Shared gossip secret
    #[arg(long, env = "FABRIC_SECRET", default_value = "", hide_default_value = true, hide_env_values = true)]
    pub secret: String,

    /// Container runtime endpoint (unix://, tcp://, http(s):// or memory://)
    #[arg(long, env = "FABRIC_RUNTIME", default_value = DEFAULT_RUNTIME_ENDPOINT)]
    pub runtime: String,

    /// Authorization strategy: plain or deny. Other strategies come from --config
    #[arg(long, default_value = "plain")]
    pub auth: String,

    /// YAML config file; its values override flags
    #[arg(short, long, env = "FABRIC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Build the agent configuration: flags first, then the config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the auth strategy is unknown, the config file
    /// cannot be read, or the result does not validate.
    pub fn into_config(self) -> FabricResult<FabricConfig> {
        let auth = AuthConfig::from_name(&self.auth)?;
        let mut config = FabricConfig::default()
            .with_bootstrap(self.bootstrap)
            .with_members(self.members)
            .with_profile(self.profile)
            .with_bind(self.bind_address, self.bind_port)
            .with_advertise(self.advertise_address, self.advertise_port)
            .with_secret(self.secret)
            .with_runtime(self.runtime)
            .with_auth(auth);

        if let Some(path) = &self.config {
            config = config.overlay_file(path)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Run the agent until a termination signal arrives.
    ///
    /// # Errors
    ///
    /// Returns the startup error, if any.
    pub async fn execute(self) -> Result<()> {
        let config = self.into_config()?;
        tracing::debug!(
            bootstrap = config.cluster.bootstrap,
            members = config.cluster.members.len(),
            profile = %config.cluster.profile,
            runtime = %config.runtime.endpoint,
            "Resolved configuration"
        );

        let node = Fabric::start(config).await?;
        let signal = shutdown_signal().await?;
        tracing::info!(signal, "Received termination signal");
        node.shutdown().await;
        Ok(())
    }
}

/// Wait for SIGINT, SIGTERM, SIGHUP or SIGQUIT.
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut quit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        interrupted = tokio::signal::ctrl_c() => {
            interrupted?;
            "SIGINT"
        }
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
        _ = quit.recv() => "SIGQUIT",
    };
    Ok(name)
}
