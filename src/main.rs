use clap::Parser;
use ecu_link::bus::RtuConnector;
use ecu_link::config::{ConfigLoader, LogFormat};
use ecu_link::dispatcher::{EcuDispatcher, LinkEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Link monitor for the boiler test-bench ECU dispatcher.",
    long_about = "Connects to the boiler ECU over Modbus RTU, keeps the link alive and \
prints connection and ping events until interrupted. Useful for cabling checks and \
bench bring-up before the full test sequence runs."
)]
struct Args {
    /// Path to the configuration file (default: standard resolution order).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured serial port.
    #[arg(short, long)]
    port: Option<String>,

    /// Override the configured slave id.
    #[arg(long)]
    slave: Option<u8>,

    /// List available serial ports and exit.
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.list_ports {
        for port in serialport::available_ports()? {
            println!("{}", port.port_name);
        }
        return Ok(());
    }

    let loader = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let mut config = loader.into_config();
    if let Some(port) = args.port {
        config.serial.port = port;
    }
    if let Some(slave) = args.slave {
        config.device.slave_id = slave;
    }
    config.validate()?;

    init_tracing(&config);

    info!(
        port = %config.serial.port,
        baud = config.serial.baud,
        slave = config.device.slave_id,
        "starting ECU link monitor"
    );

    let connector = Arc::new(RtuConnector::new(&config));
    let dispatcher = EcuDispatcher::spawn(config, connector);
    let mut events = dispatcher.subscribe();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Ok(LinkEvent::ConnectionOpened) => info!("link opened"),
                Ok(LinkEvent::ConnectionConfirmed) => info!("device confirmed"),
                Ok(LinkEvent::ConnectionLost) => warn!("link lost; reconnecting"),
                Ok(LinkEvent::PingReceived(snapshot)) => {
                    info!(
                        base = snapshot.base_address,
                        registers = ?snapshot.registers,
                        "ping"
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    info!("shutting down");
    dispatcher.shutdown().await;
    Ok(())
}

/// Initialize the tracing subscriber from the logging section.
fn init_tracing(config: &ecu_link::Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

// --- Graceful Shutdown Handler ---
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, starting graceful shutdown");
}
