//! apns-push - send notifications through the legacy binary push gateway.

use std::path::PathBuf;

use apns_cli::{Config, expiry_after};
use apns_core::{Aps, DeviceToken, Endpoint, Notification, Payload};
use apns_crypto::Identity;
use apns_push::{Connection as _, PushCoordinator, TlsProvider};
use clap::{Parser, Subcommand};
use color_eyre::eyre::WrapErr as _;

#[derive(Parser)]
#[command(name = "apns-push")]
#[command(about = "Send notifications through the legacy binary push gateway", long_about = None)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, env = "APNS_PUSH_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Use the sandbox gateway regardless of config
    #[arg(long, global = true)]
    sandbox: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one notification to one or more devices
    Send {
        /// Hex device token (repeatable)
        #[arg(long = "token", required = true)]
        tokens: Vec<String>,

        /// Alert text
        #[arg(long)]
        alert: Option<String>,

        /// Badge number
        #[arg(long)]
        badge: Option<u32>,

        /// Sound name
        #[arg(long)]
        sound: Option<String>,

        /// Seconds the gateway may keep retrying an offline device
        #[arg(long)]
        ttl: Option<u32>,
    },

    /// List devices the feedback service reports as unreachable
    Feedback,
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).wrap_err("failed to load config")?;
    let identity = Identity::from_files(&config.certificate, &config.private_key)?;

    match apns_crypto::expires_at(identity.leaf()) {
        Ok(expiry) if expiry < chrono::Utc::now() => {
            tracing::warn!(%expiry, "push certificate has expired");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "could not read certificate expiry"),
    }

    let endpoint = resolve_endpoint(cli.sandbox, &config, &identity);
    match apns_crypto::extract_topic_from_cert(identity.leaf()) {
        Ok(topic) => tracing::info!(%endpoint, %topic, "using gateway"),
        Err(e) => {
            tracing::info!(%endpoint, "using gateway");
            tracing::warn!(error = %e, "could not read topic from certificate");
        }
    }

    let provider = TlsProvider::new(&identity)?
        .with_connect_timeout(config.connect_timeout())
        .with_read_timeout(config.read_timeout());

    match cli.command {
        Commands::Send {
            tokens,
            alert,
            badge,
            sound,
            ttl,
        } => {
            let aps = Aps {
                alert,
                badge,
                sound,
                ..Default::default()
            };
            cmd_send(provider, endpoint, &config, tokens, aps, ttl).await
        }
        Commands::Feedback => cmd_feedback(provider, endpoint).await,
    }
}

fn resolve_endpoint(sandbox_flag: bool, config: &Config, identity: &Identity) -> Endpoint {
    if sandbox_flag {
        return Endpoint::Sandbox;
    }
    if let Some(sandbox) = config.sandbox {
        return Endpoint::from_sandbox(sandbox);
    }
    match apns_crypto::certificate_endpoint(identity.leaf()) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            tracing::warn!(error = %e, "could not infer environment from certificate");
            Endpoint::Production
        }
    }
}

async fn cmd_send(
    provider: TlsProvider,
    endpoint: Endpoint,
    config: &Config,
    tokens: Vec<String>,
    aps: Aps,
    ttl: Option<u32>,
) -> color_eyre::eyre::Result<()> {
    let tokens = tokens
        .iter()
        .map(|t| DeviceToken::from_hex(t).wrap_err_with(|| format!("bad token {}", t)))
        .collect::<color_eyre::eyre::Result<Vec<_>>>()?;

    let payload = Payload::new(&aps, Default::default())?;
    let mut notification = Notification::new(tokens, payload)?;
    if let Some(ttl) = ttl {
        notification = notification.with_expiry(expiry_after(chrono::Utc::now(), ttl)?);
    }

    let coordinator =
        PushCoordinator::new(provider, endpoint).with_grace_period(config.grace_period());

    let mut batch = vec![notification];
    coordinator.push(&mut batch).await?;

    let mut failed = false;
    for notification in &batch {
        for (token, outcome) in notification.results() {
            println!("{}  {}", token, outcome);
            failed |= !outcome.is_success();
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_feedback(provider: TlsProvider, endpoint: Endpoint) -> color_eyre::eyre::Result<()> {
    let mut connection = provider.open_feedback(endpoint).await?;
    let entries = apns_push::read_feedback(&mut connection).await;
    connection.close().await;

    for entry in entries? {
        println!("{}  {}", entry.token, entry.timestamp.to_rfc3339());
    }
    Ok(())
}
