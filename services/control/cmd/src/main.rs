//! Capture control client binary.
//!
//! Connects to a remote capture/control service, establishes a session,
//! prints the server's identity and state, and optionally streams update
//! messages until interrupted or disconnected.

use anyhow::{anyhow, Context};
use clap::Parser;
use control_session::ControlMessenger;
use control_wire::{paths, ControlUpdate};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::{parse_optional_duration, ClientConfig};
use logging::ControlLogFormatter;

/// Update paths printed when subscribed
const WATCHED_UPDATES: &[&str] = &[
    paths::SESSION_STOPPED,
    paths::RECORDING_STARTED,
    paths::RECORDING_STOPPED,
    paths::TAKE_ADDED,
    paths::TAKE_REMOVED,
    paths::TAKE_UPDATED,
    paths::DISK_CAPACITY,
    paths::BATTERY,
    paths::THERMALS,
];

/// Command-line client for a remote capture/control service
#[derive(Parser, Debug)]
#[command(name = "capture-control", version, about = "Drive a remote capture/control service")]
struct Args {
    /// Control server host, overrides the config file
    #[arg(long)]
    server: Option<String>,

    /// Control server port, overrides the config file
    #[arg(long)]
    port: Option<u16>,

    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Keep-alive interval, e.g. 5s
    #[arg(long)]
    keep_alive_interval: Option<humantime::Duration>,

    /// Request timeout, e.g. 10s, or `none` to wait until disconnect
    #[arg(long)]
    request_timeout: Option<String>,

    /// List stored takes after connecting
    #[arg(long)]
    takes: bool,

    /// Subscribe to update messages and print them
    #[arg(long)]
    subscribe: bool,

    /// Stay connected until Ctrl-C or server disconnect
    #[arg(long)]
    watch: bool,
}

impl Args {
    /// Apply command-line overrides on top of file and environment settings
    fn apply_to(&self, config: &mut ClientConfig) -> anyhow::Result<()> {
        if let Some(server) = &self.server {
            config.server_address = server.clone();
        }
        if let Some(port) = self.port {
            config.server_port = port;
        }
        if let Some(interval) = self.keep_alive_interval {
            config.keep_alive_interval = interval.into();
        }
        if let Some(timeout) = &self.request_timeout {
            config.request_timeout = parse_optional_duration(timeout)
                .ok_or_else(|| anyhow!("invalid --request-timeout {:?}", timeout))?;
        }
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("capture_control={}", args.log_level).parse()?)
        .add_directive(format!("control_session={}", args.log_level).parse()?)
        .add_directive(format!("control_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .event_format(ControlLogFormatter::new("control"))
        .init();

    info!("Starting capture-control v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ClientConfig::load_from_file(&args.config)?;
    args.apply_to(&mut config)?;

    let messenger = ControlMessenger::tcp(config.messenger_config())?;

    let (disconnect_tx, mut disconnect_rx) = mpsc::unbounded_channel();
    messenger.register_disconnect_handler(move |reason| {
        component_warn!("session", "{}", reason);
        let _ = disconnect_tx.send(reason.to_string());
    });

    messenger
        .start(&config.server_address, config.server_port)
        .await
        .with_context(|| format!("failed to connect to {}:{}", config.server_address, config.server_port))?;

    let result = run(&messenger, &args, &mut disconnect_rx).await;

    if messenger.is_running() && messenger.session_id().is_some() {
        if let Err(e) = messenger.stop_session().await {
            component_warn!("session", "Failed to stop session: {}", e);
        }
    }
    messenger.stop();
    info!("capture-control finished");

    result
}

async fn run(
    messenger: &ControlMessenger,
    args: &Args,
    disconnects: &mut mpsc::UnboundedReceiver<String>,
) -> anyhow::Result<()> {
    messenger
        .start_session()
        .await
        .context("failed to start session")?;
    component_info!(
        "session",
        "Session established: {}",
        messenger.session_id().unwrap_or_default()
    );

    let server = messenger.get_server_information().await?;
    println!("Server:   {} ({})", server.name, server.id);
    println!("Model:    {}", server.model);
    println!("Platform: {} {}", server.platform_name, server.platform_version);
    println!("Software: {} {}", server.software_name, server.software_version);

    let state = messenger.get_state().await?;
    println!("Recording: {}", if state.is_recording { "yes" } else { "no" });
    if !state.platform_state.is_null() {
        println!("Platform state: {}", state.platform_state);
    }

    if args.takes {
        let names = messenger.get_take_list().await?;
        println!("Takes ({}):", names.len());
        for take in messenger.get_take_metadata(names).await? {
            println!(
                "  {}  slate={} take={} frames={} files={}",
                take.name,
                take.slate_name,
                take.take_number,
                take.num_frames,
                take.files.len()
            );
        }
    }

    if args.subscribe {
        for path in WATCHED_UPDATES {
            messenger.register_update_handler(path, print_update);
        }
        messenger.subscribe().await?;
        component_info!("cli", "Subscribed to updates");
    }

    if args.watch {
        component_info!("cli", "Watching, press Ctrl-C to exit");
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for Ctrl-C")?;
                component_info!("cli", "Interrupted, shutting down");
            }
            Some(reason) = disconnects.recv() => {
                return Err(anyhow!(reason));
            }
        }
    }

    if args.subscribe && messenger.is_running() {
        messenger.unsubscribe().await?;
    }

    Ok(())
}

fn print_update(update: ControlUpdate) {
    let path = update.address_path();
    match update {
        ControlUpdate::SessionStopped => println!("{}: session stopped by server", path),
        ControlUpdate::RecordingStarted => println!("{}: recording", path),
        ControlUpdate::RecordingStopped(take)
        | ControlUpdate::TakeAdded(take)
        | ControlUpdate::TakeRemoved(take)
        | ControlUpdate::TakeUpdated(take) => println!("{}: {}", path, take.take_name),
        ControlUpdate::DiskCapacity(disk) => println!(
            "{}: {} of {} bytes free",
            path, disk.remaining, disk.total
        ),
        ControlUpdate::Battery(battery) => println!("{}: {:.0}%", path, battery.level * 100.0),
        ControlUpdate::Thermals(thermals) => println!("{}: {}", path, thermals.state),
    }
}
