//! zmq-pubsub demo service: entry point.
//!
//! Runs both ends of the transport in one process:
//!
//! 1. A publisher [`Connection`] bound on the configured address.
//! 2. A [`ChannelServer`] with handlers for `test` and `test2`, each served
//!    by its own subscriber connection to the same address.
//! 3. A [`PeriodicPublisher`] that sends a message on `test` every second and
//!    on `test2` every two seconds.
//!
//! The handlers log what they receive (`action1 - ...`, `action2 - ...`).
//! Ctrl+C stops the publisher tasks and closes every connection.
//!
//! # Usage
//!
//! ```text
//! zmq-pubsub [OPTIONS]
//!
//! Options:
//!   --config <PATH>       TOML config file [default: zmq-pubsub.toml]
//!   --address <ADDR>      Endpoint to bind and connect to
//!   --postfix <POSTFIX>   Channel postfix
//!   --curve-path <DIR>    Key directory for every configured CURVE section
//!   --no-publisher        Only run the channel server
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable             | Flag        |
//! |----------------------|-------------|
//! | `ZMQ_PUBSUB_CONFIG`  | `--config`  |
//! | `ZMQ_ADDRESS`        | `--address` |
//!
//! `RUST_LOG` overrides the config file's `log_level`.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use futures_util::future::join_all;
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use zmq_pubsub::application::demo_publisher::{PeriodicPublisher, Publish};
use zmq_pubsub::infrastructure::socket::zmq_socket::ZmqSocketFactory;
use zmq_pubsub::infrastructure::storage::config::{load_config, AppConfig, DEFAULT_CONFIG_FILE};
use zmq_pubsub::{ChannelServer, Connection, HandlerRegistry, HandlerResult};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Channel-multiplexed ZeroMQ pub/sub demo service.
#[derive(Debug, Parser)]
#[command(
    name = "zmq-pubsub",
    about = "Channel-multiplexed ZeroMQ publish/subscribe demo service",
    version
)]
struct Cli {
    /// TOML configuration file.  A missing file means built-in defaults.
    #[arg(long, env = "ZMQ_PUBSUB_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Endpoint the publisher binds and the channel server connects to,
    /// e.g. `tcp://127.0.0.1:5555`.
    #[arg(long, env = "ZMQ_ADDRESS")]
    address: Option<String>,

    /// Delimiter appended to channel names on the wire.
    #[arg(long)]
    postfix: Option<String>,

    /// Absolute key directory, applied to every configured CURVE section.
    #[arg(long)]
    curve_path: Option<PathBuf>,

    /// Do not start the demo publisher.
    #[arg(long)]
    no_publisher: bool,
}

impl Cli {
    /// Applies command-line values on top of the file configuration.
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(address) = &self.address {
            config.transport.address = address.clone();
        }
        if let Some(postfix) = &self.postfix {
            config.transport.postfix = postfix.clone();
        }
        if let Some(path) = &self.curve_path {
            for curve in [&mut config.transport.curve, &mut config.publisher.curve]
                .into_iter()
                .flatten()
            {
                curve.path = Some(path.clone());
            }
        }
        if self.no_publisher {
            config.publisher.enabled = false;
        }
    }
}

/// Logs a received payload the way the demo controller does.
fn log_action(action: &str, result: HandlerResult) {
    match result {
        Ok(Value::String(text)) => info!("{action} - {text}"),
        Ok(other) => info!("{action} - {other}"),
        Err(e) => warn!("{action} - could not decode message: {e}"),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    cli.apply_overrides(&mut config);

    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("zmq-pubsub starting on {}", config.transport.address);
    if config.transport.curve.is_some() && !ZmqSocketFactory::curve_supported() {
        warn!("CURVE is configured but the linked libzmq was built without it");
    }

    let factory = Arc::new(ZmqSocketFactory::new());

    // ── Publisher ─────────────────────────────────────────────────────────────
    let publisher = if config.publisher.enabled {
        let mut publisher = Connection::new(&config.publisher_options(), &*factory)
            .context("invalid publisher configuration")?;
        publisher
            .bind()
            .await
            .context("failed to bind the publisher")?;
        Some(Arc::new(publisher))
    } else {
        None
    };

    // ── Channel server ────────────────────────────────────────────────────────
    let mut registry = HandlerRegistry::new();
    registry.register_handler("test", |result| log_action("action1", result))?;
    registry.register_handler("test2", |result| log_action("action2", result))?;

    let mut server = ChannelServer::new(config.server_options(), registry, factory.clone())
        .context("invalid channel server configuration")?;
    server
        .listen(|channel, result| match result {
            Ok(()) => info!("listening on channel: {channel}"),
            Err(e) => error!("channel {channel} is unavailable: {e}"),
        })
        .await?;

    // ── Demo traffic ──────────────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let tasks = match &publisher {
        Some(publisher) => {
            let target: Arc<dyn Publish> = Arc::clone(publisher) as Arc<dyn Publish>;
            PeriodicPublisher::new(config.schedules()).spawn(target, Arc::clone(&running))
        }
        None => Vec::new(),
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("received Ctrl+C, shutting down");

    // ── Shutdown ──────────────────────────────────────────────────────────────
    running.store(false, Ordering::Relaxed);
    for task in &tasks {
        task.abort();
    }
    for result in join_all(tasks).await {
        match result {
            Err(e) if !e.is_cancelled() => error!("demo publisher task failed: {e}"),
            _ => {}
        }
    }

    let report = server.close();
    if !report.is_clean() {
        warn!(
            "{} of {} channel connections failed to close",
            report.failures.len(),
            report.attempted
        );
    }

    if let Some(publisher) = publisher {
        match Arc::try_unwrap(publisher) {
            Ok(mut publisher) => publisher.close()?,
            Err(_) => warn!("publisher still shared at shutdown; it closes when dropped"),
        }
    }

    info!("zmq-pubsub stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
