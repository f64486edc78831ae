//! modrelay CLI binary.
//!
//! Starts proxy instances for the servers in the config file. Mods are an
//! embedding concern: this binary runs the relay bare, third-party tooling
//! links against the library and supplies its own [`modrelay::ModSupplier`].
//!
//! # Commands
//!
//! - `start` - Start proxy instances for configured servers
//! - `check-config` - Validate the configuration and print a summary

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use modrelay::packet::builtin::default_registry;
use modrelay::{
    HttpSessionService, NoopSessionService, ProxyKeyPair, ProxyRegistry, RelayConfig, SessionDeps,
    SessionProfile, SessionService, VERSION,
};

#[derive(Parser)]
#[command(name = "modrelay")]
#[command(version = VERSION)]
#[command(about = "Protocol-aware interception proxy with mod hooks", long_about = None)]
struct Cli {
    /// Config file path (default: the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start proxy instances for configured servers
    Start {
        /// Only start the server with this id
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Validate the configuration and print a summary
    CheckConfig,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("modrelay=info")),
        )
        .init();

    let cli = Cli::parse();

    let path = cli
        .config
        .or_else(RelayConfig::default_path)
        .context("no config path given and no platform config directory")?;
    let config = RelayConfig::from_file(&path)
        .with_context(|| format!("loading config from {}", path.display()))?;

    match cli.command {
        Commands::Start { server } => run_start(&config, server.as_deref()),
        Commands::CheckConfig => run_check(&config),
    }
}

fn run_start(config: &RelayConfig, only: Option<&str>) -> anyhow::Result<()> {
    let keys = Arc::new(ProxyKeyPair::generate()?);
    let auth: Arc<dyn SessionService> = if config.auth.offline {
        Arc::new(NoopSessionService)
    } else {
        Arc::new(HttpSessionService::with_endpoint(&config.auth.session_endpoint))
    };

    let deps = SessionDeps {
        registry: Arc::new(default_registry()),
        keys,
        auth,
        profile: Arc::new(SessionProfile {
            access_token: config.profile.access_token.clone(),
            profile_id: config.profile.profile_id,
        }),
        mods: Arc::new(Vec::new()),
    };

    let registry = ProxyRegistry::new();
    let mut started = 0usize;

    for entry in &config.servers {
        if only.is_some_and(|id| id != entry.id) {
            continue;
        }
        let (host, port) = entry.remote_addr()?;
        registry.start(&entry.id, entry.local_port, host, port, deps.clone())?;
        started += 1;
    }

    if started == 0 {
        match only {
            Some(id) => bail!("no server with id {id:?} in the config"),
            None => bail!("no servers configured"),
        }
    }

    tracing::info!(instances = started, "relay running");
    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}

fn run_check(config: &RelayConfig) -> anyhow::Result<()> {
    for entry in &config.servers {
        let (host, port) = entry
            .remote_addr()
            .with_context(|| format!("server {:?}", entry.id))?;
        println!(
            "{}: localhost:{} -> {}:{}{}",
            entry.id,
            entry.local_port,
            host,
            port,
            if entry.name.is_empty() {
                String::new()
            } else {
                format!("  ({})", entry.name)
            }
        );
    }

    if config.profile.access_token.is_empty() {
        println!("warning: no access token configured (set MODRELAY_ACCESS_TOKEN)");
    }

    println!("{} server(s), config OK", config.servers.len());
    Ok(())
}
