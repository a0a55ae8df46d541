//! Serial MIDI bridge
//!
//! Connects a MIDI device on a serial line to host MIDI ports.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use serial_midi_bridge::bridge::StopFlag;
use serial_midi_bridge::config::AppConfig;
use serial_midi_bridge::router::MAX_PORTS;

/// Serial MIDI bridge - expose a serial MIDI device as host MIDI ports
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to an optional YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial device to use [default: /dev/ttyUSB0]
    #[arg(short, long)]
    serial_device: Option<String>,

    /// Serial port baud rate [default: 115200]
    #[arg(short, long)]
    baudrate: Option<u32>,

    /// Name of the MIDI client on the host bus [default: ttymidi]
    #[arg(short, long)]
    name: Option<String>,

    /// Number of logical ports multiplexed over the serial line
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=MAX_PORTS as i64))]
    ports: Option<u8>,

    /// Log every event passing through the bridge
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Don't log anything
    #[arg(short, long)]
    quiet: bool,

    /// Print bytes read from serial as hex and do nothing else
    #[arg(short, long)]
    print_only: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn log_level(&self) -> &str {
        if self.quiet {
            "off"
        } else if self.verbose {
            "debug"
        } else {
            self.log_level.as_str()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    // Module targets tell the inbound and outbound event lines apart
    init_logging(args.log_level(), args.verbose)?;

    let config = load_config(&args).await?;
    info!(
        "Serial MIDI bridge starting on {} ({} port(s))",
        config.serial.device, config.bridge.ports
    );

    let stop = StopFlag::new();
    tokio::spawn(shutdown_signal(stop.clone()));

    run(&args, config, stop).await?;

    info!("Serial MIDI bridge shutdown complete");
    Ok(())
}

/// File values first, then command-line overrides
async fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let config = AppConfig::load(path).await?;
            info!("Configuration loaded from {}", path.display());
            config
        }
        None => AppConfig::default(),
    };

    if let Some(device) = &args.serial_device {
        config.serial.device = device.clone();
    }
    if let Some(baud_rate) = args.baudrate {
        config.serial.baud_rate = baud_rate;
    }
    if let Some(name) = &args.name {
        config.bus.client_name = name.clone();
    }
    if let Some(ports) = args.ports {
        config.bridge.ports = ports;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Open the device, run the selected mode, then restore the line settings
#[cfg(unix)]
async fn run(args: &Args, config: AppConfig, stop: StopFlag) -> Result<()> {
    use serial_midi_bridge::sniffer;
    use serial_midi_bridge::transport::open_tty;

    let (mut reader, writer, line) = open_tty(&config.serial.device, config.serial.baud_rate)
        .with_context(|| format!("Failed to open serial device {}", config.serial.device))?;

    let result = if args.print_only {
        let mut out = std::io::stdout();
        sniffer::run_print_only(&mut reader, &mut out, config.bridge.read_timeout(), &stop)
            .await
            .map(|_| ())
            .map_err(anyhow::Error::from)
    } else {
        run_bridge(&config, reader, writer, stop).await
    };

    // Both loops have been joined by now
    line.restore()
        .context("Failed to restore serial line settings")?;
    result
}

#[cfg(unix)]
async fn run_bridge(
    config: &AppConfig,
    reader: impl serial_midi_bridge::transport::SerialReader + 'static,
    writer: impl serial_midi_bridge::transport::SerialWriter + 'static,
    stop: StopFlag,
) -> Result<()> {
    use serial_midi_bridge::bridge::Bridge;
    use serial_midi_bridge::bus::virtual_port::open_virtual_ports;

    // Ports stay registered until `_ports` is dropped at the end of the run
    let (_ports, sink, source) = open_virtual_ports(
        &config.bus.client_name,
        config.bridge.ports,
        config.bridge.sysex_buffer_size,
    )
    .await
    .context("Failed to create virtual MIDI ports")?;

    let bridge = Bridge::with_stop_flag(config.bridge.clone(), stop)?;
    let report = bridge.run(reader, writer, sink, source).await?;
    info!(
        "Forwarded {} event(s) to the bus and {} to serial",
        report.inbound.stats.events, report.outbound.stats.events
    );
    Ok(())
}

#[cfg(not(unix))]
async fn run(_args: &Args, _config: AppConfig, _stop: StopFlag) -> Result<()> {
    anyhow::bail!("Serial devices and virtual MIDI ports are only supported on unix hosts")
}

fn init_logging(level: &str, with_target: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(with_target)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal(stop: StopFlag) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    stop.request_stop();
}
