//! MIDI Relay
//!
//! Forwards live notes from a local MIDI controller to a remote server over
//! WebSocket or UDP/OSC.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use midi_relay::cli::{self, Prompt};
use midi_relay::config::{warn_unconventional_port, AppConfig};
use midi_relay::device::{
    describe_ports, find_port_index, DeviceError, InputDevice, MidirDevice, EVENT_QUEUE_CAPACITY,
};
use midi_relay::forwarder;
use midi_relay::session::Session;
use midi_relay::transport::TransportKind;

const DEFAULT_CONFIG_PATH: &str = "midi-relay.yaml";

/// MIDI Relay - forward live MIDI notes to a remote server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: midi-relay.yaml if present)
    #[arg(short, long, env = "MIDI_RELAY_CONFIG")]
    config: Option<String>,

    /// Remote host
    #[arg(long, env = "MIDI_RELAY_HOST")]
    host: Option<String>,

    /// Remote port (usually 3902 or 3907); asked for when missing
    #[arg(short, long, env = "MIDI_RELAY_PORT")]
    port: Option<u16>,

    /// Transport: websocket or udp
    #[arg(short, long, env = "MIDI_RELAY_TRANSPORT")]
    transport: Option<TransportKind>,

    /// MIDI input index; asked for when missing
    #[arg(short, long)]
    device: Option<usize>,

    /// MIDI input name (case-insensitive substring)
    #[arg(long)]
    device_name: Option<String>,

    /// Reconnect interval in milliseconds
    #[arg(long)]
    reconnect_ms: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Also write daily-rotated log files to this directory
    #[arg(long, env = "MIDI_RELAY_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// List available MIDI inputs and exit
    #[arg(long)]
    list_ports: bool,

    /// Write the resolved settings back to the configuration file
    #[arg(long)]
    save_config: bool,
}

impl Args {
    /// Apply command-line overrides on top of the file configuration
    fn apply(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.remote.host = host.clone();
        }
        if let Some(port) = self.port {
            config.remote.port = Some(port);
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if let Some(index) = self.device {
            config.device.index = Some(index);
        }
        if let Some(name) = &self.device_name {
            config.device.name = Some(name.clone());
        }
        if let Some(interval) = self.reconnect_ms {
            config.reconnect.interval_ms = interval;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Keep the file writer alive until exit
    let _log_guard = init_logging(&args)?;

    info!("Starting MIDI Relay v{}...", env!("CARGO_PKG_VERSION"));

    let device = MidirDevice::new("midi-relay");
    let port_names = device
        .enumerate()
        .context("Failed to list MIDI inputs")?;

    if args.list_ports {
        cli::print_ports(&describe_ports(port_names));
        return Ok(());
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let mut config = AppConfig::load_or_default(&config_path, args.config.is_some()).await?;
    args.apply(&mut config);
    config.validate()?;

    let needs_prompt = config.remote.port.is_none()
        || (config.device.index.is_none() && config.device.name.is_none());
    let mut prompt = if needs_prompt {
        Some(Prompt::new()?)
    } else {
        None
    };

    let port = match config.remote.port {
        Some(port) => port,
        None => {
            let port = ask(&mut prompt)?.remote_port()?;
            config.remote.port = Some(port);
            port
        }
    };
    warn_unconventional_port(port);

    let device_index = resolve_device_index(&config, &port_names, &mut prompt)?;
    config.device.index = Some(device_index);

    if args.save_config {
        config.save(&config_path).await?;
        info!("Settings saved to {}", config_path);
    }

    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let session = Session::establish(&config, port, Box::new(device), device_index, event_tx)
        .await?;
    let forwarder = session.forwarder();

    info!("Ready to forward MIDI events!");
    forwarder::run(&forwarder, event_rx, shutdown_signal()).await;

    info!("Shutting down...");
    let report = session.shutdown().await;
    if !report.is_clean() {
        warn!("Some resources were not released cleanly");
    }
    info!("Events: {}", forwarder.stats());
    info!("MIDI Relay shutdown complete");

    Ok(())
}

fn ask(prompt: &mut Option<Prompt>) -> Result<&mut Prompt> {
    prompt.as_mut().context("No interactive prompt available")
}

/// Pick the MIDI input from config or by asking
fn resolve_device_index(
    config: &AppConfig,
    port_names: &[String],
    prompt: &mut Option<Prompt>,
) -> Result<usize> {
    if let Some(index) = config.device.index {
        if index >= port_names.len() {
            return Err(DeviceError::NoSuchPort {
                index,
                available: port_names.len(),
            }
            .into());
        }
        return Ok(index);
    }

    if let Some(name) = &config.device.name {
        return find_port_index(port_names, name)
            .ok_or_else(|| DeviceError::NoMatchingPort(name.clone()).into());
    }

    if port_names.is_empty() {
        anyhow::bail!("No MIDI inputs found");
    }

    let ports = describe_ports(port_names.to_vec());
    ask(prompt)?.device_index(&ports)
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "midi-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    if args.log_json {
        registry
            .with(fmt::layer().json().with_target(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .init();
    }

    Ok(guard)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install CTRL+C signal handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (control-c), shutting down gracefully"),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully"),
    }
}
