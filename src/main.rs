//! FPGA LED GW - Rust implementation
//!
//! Drives the 12 FPGA status LEDs (3 boards x DAN/NATE/BEN/LOADED) from MQTT.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use fpga_led_gw::bus::BusConnectionManager;
use fpga_led_gw::config::AppConfig;
use fpga_led_gw::drivers::{ConsoleBackend, GpioBackend, OutputDriver, PinctrlBackend};
use fpga_led_gw::pins::PinRegistry;
use fpga_led_gw::router::CommandRouter;

const LAMP_TEST_ON: Duration = Duration::from_millis(300);
const LAMP_TEST_OFF: Duration = Duration::from_millis(100);

/// Time left to the outbound pump to flush the final status events
const SHUTDOWN_FLUSH: Duration = Duration::from_millis(200);

/// FPGA LED Gateway - toggle FPGA status LEDs over MQTT
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<String>,

    /// MQTT broker host
    #[arg(long, env = "MQTT_HOST")]
    host: Option<String>,

    /// MQTT broker port
    #[arg(long, env = "MQTT_PORT")]
    port: Option<u16>,

    /// MQTT client identifier
    #[arg(long, env = "MQTT_CLIENT_ID")]
    client_id: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log GPIO operations instead of running pinctrl
    #[arg(long)]
    dry_run: bool,

    /// Light every LED in turn before connecting
    #[arg(long)]
    lamp_test: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Parse command line arguments
    let args = Args::parse();

    let config = load_config(&args).await?;

    // Initialize logging; the guard keeps the file writer alive
    let _log_guard = init_logging(&args.log_level, config.logging.file.as_deref())?;

    info!("🚀 Starting FPGA LED GW...");
    match &args.config {
        Some(path) => info!("Configuration file: {}", path),
        None => info!("No configuration file, using defaults"),
    }

    let registry = PinRegistry::default();
    info!("📍 Pin mapping:");
    for line in registry.describe() {
        info!("   {}", line);
    }
    info!("UDN2981A Logic: LOW=LED ON, HIGH=LED OFF");

    let backend: Arc<dyn GpioBackend> = if args.dry_run {
        warn!("Dry run: GPIO operations are only logged");
        Arc::new(ConsoleBackend::new())
    } else {
        Arc::new(PinctrlBackend::new(
            config.gpio.program.clone(),
            config.gpio.use_sudo,
        ))
    };

    let (router, events) =
        CommandRouter::new(registry, OutputDriver::new(backend), config.router_options());
    let router = Arc::new(router);

    // Client and outbound pump exist before startup writes so their events drain
    let bus_options = config.bus_options();
    let (manager, bus) = BusConnectionManager::new(&bus_options, router.clone(), events);

    prepare_outputs(&router, &config).await;

    info!(
        "Connecting to MQTT broker at {}:{} as '{}'",
        bus_options.host, bus_options.port, bus_options.client_id
    );
    let bus_task = tokio::spawn(manager.run());

    shutdown_signal().await;

    info!("🛑 Shutting down...");
    router.stop_accepting();

    let failures = router.drive_all(false).await;
    for (output, e) in &failures {
        warn!("Could not turn off {} during shutdown: {}", output, e);
    }
    if failures.is_empty() {
        info!("All LEDs turned OFF");
    }
    tokio::time::sleep(SHUTDOWN_FLUSH).await;

    bus.shutdown();
    if let Err(e) = bus_task.await {
        warn!("MQTT task ended abnormally: {}", e);
    }

    info!("FPGA LED GW shutdown complete");
    Ok(())
}

/// Load the configuration file (if any) and apply command line overrides
async fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path).await?,
        None => AppConfig::default(),
    };

    if let Some(host) = &args.host {
        config.mqtt.host = host.clone();
    }
    if let Some(port) = args.port {
        config.mqtt.port = port;
    }
    if let Some(client_id) = &args.client_id {
        config.mqtt.client_id = client_id.clone();
    }
    if args.lamp_test {
        config.startup.lamp_test = true;
    }

    config
        .validate()
        .context("Invalid configuration after command line overrides")?;
    Ok(config)
}

/// Bring the hardware in line with the initial all-off state
async fn prepare_outputs(router: &CommandRouter, config: &AppConfig) {
    if config.startup.lamp_test {
        router.lamp_test(LAMP_TEST_ON, LAMP_TEST_OFF).await;
    }

    if config.startup.drive_off {
        info!("Initializing all LEDs to OFF...");
        let failures = router.drive_all(false).await;
        for (output, e) in &failures {
            warn!("Could not initialize {}: {}", output, e);
        }
        info!(
            "✅ {} of {} LEDs initialized",
            router.registry().len() - failures.len(),
            router.registry().len()
        );
    }
}

fn init_logging(level: &str, file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let (file_layer, guard) = match file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", path.display()))?;

            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
