//! `zwbridge` – mesh network to MQTT bridge.
//!
//! 1. Loads `~/.zwbridge/config.toml` (or `--config`), applies environment
//!    and flag overrides.
//! 2. Brings up the device bus from the `[[nodes]]` manifest.
//! 3. Connects to the broker and starts forwarding published events.
//! 4. Runs the bridge until **Ctrl-C**, then shuts down in order: reactor,
//!    timers, device bus, broker connection, trace export.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use zwbridge_hal::sim::SimDeviceBus;
use zwbridge_hal::{DeviceBusEvent, NodeInfo};
use zwbridge_middleware::{EventBus, EventPublisher, MessageBus, MqttAdapter, spawn_forwarder};
use zwbridge_runtime::{Bridge, telemetry};
use zwbridge_types::{BridgeError, NodeId};

/// Time the forwarder gets to hand over events published during shutdown.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "zwbridge", version, about = "Bridge a Z-Wave mesh to MQTT")]
struct Cli {
    /// Configuration file (default `~/.zwbridge/config.toml`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Radio controller device path.
    #[arg(long, value_name = "PATH")]
    device: Option<String>,

    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, value_name = "LEVEL")]
    log: Option<String>,

    /// Broker URL, `tcp://host[:port]`.
    #[arg(long, value_name = "URL")]
    mqtt: Option<String>,

    /// Write a default configuration file and exit.
    #[arg(long)]
    init: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Tracing first: the OTLP exporter must exist before the runtime does.
    let _guard = telemetry::init_tracing("zwbridge", cli.log.as_deref());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), BridgeError> {
    let path = cli.config.clone().unwrap_or_else(config::config_path);

    if cli.init {
        config::save_to(&config::Config::default(), &path)?;
        info!("wrote default configuration to {}", path.display());
        return Ok(());
    }

    let mut cfg = config::load_or_default(&path)?;
    if let Some(device) = cli.device {
        cfg.device_path = device;
    }
    if let Some(mqtt) = cli.mqtt {
        cfg.mqtt_url = mqtt;
    }
    info!(config = %path.display(), "configuration loaded");
    tracing::debug!(?cfg);

    // ── Device bus ────────────────────────────────────────────────────────
    let (device_bus, device_events) = build_device_bus(&cfg);
    let device_bus = Arc::new(device_bus);
    info!(
        device = %cfg.device_path,
        nodes = cfg.nodes.len(),
        "device bus ready (simulated controller)"
    );

    // ── Engine ────────────────────────────────────────────────────────────
    let publisher = EventPublisher::new(cfg.topic_prefix.clone(), EventBus::default());
    let bridge = Bridge::new(
        cfg.protocol.clone(),
        device_bus.clone(),
        publisher.clone(),
        cfg.bridge_settings(),
    );

    // ── Message bus ───────────────────────────────────────────────────────
    info!(mqtt = %cfg.mqtt_url, "connecting to MQTT broker");
    let (mqtt, inbound) = MqttAdapter::connect(cfg.mqtt_settings()?).await?;
    let mqtt: Arc<dyn MessageBus> = Arc::new(mqtt);
    let forwarder = spawn_forwarder(&publisher, mqtt.clone());

    // ── Ctrl-C ────────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the process with SIGKILL");
    }

    device_bus.announce_all()?;
    info!("waiting for configuration on the message bus");
    bridge.run(device_events, inbound, shutdown_rx).await;

    // ── Shutdown ──────────────────────────────────────────────────────────
    bridge.shutdown();
    tokio::time::sleep(DRAIN_GRACE).await;
    forwarder.abort();
    if let Err(e) = mqtt.disconnect().await {
        warn!("MQTT disconnect failed: {e}");
    }
    info!("zwbridge stopped");
    Ok(())
}

/// Build the device bus from the `[[nodes]]` manifest.
fn build_device_bus(
    cfg: &config::Config,
) -> (SimDeviceBus, mpsc::UnboundedReceiver<DeviceBusEvent>) {
    cfg.nodes
        .iter()
        .fold(SimDeviceBus::builder(), |builder, node| {
            builder.with_node_info(NodeInfo {
                node: NodeId(node.id),
                product: node
                    .product
                    .clone()
                    .unwrap_or_else(|| "Unknown product".to_string()),
                manufacturer: "Unknown manufacturer".to_string(),
                capabilities: node.capabilities.iter().map(String::as_str).collect(),
            })
        })
        .build()
}
