pub mod bridge;
pub mod config;
pub mod controller;
pub mod stream;

use crate::bridge::{Bridge, StopReason};
use crate::config::BridgeConfig;
use crate::controller::{CollectorHandle, DeviceProfile};
use crate::stream::client::StreamClient;
use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = BridgeConfig::load().wrap_err("Invalid configuration")?;
    info!("Configuration: {:?}", config);

    let shutdown = CancellationToken::new();
    let (event_sender, event_receiver) = mpsc::channel(1000);

    // Fatal when no supported gamepad is present
    let collector = CollectorHandle::spawn(
        Some(config.collector_settings()),
        event_sender,
        shutdown.clone(),
    )
    .wrap_err("Failed to start the event collector")?;

    let device = collector.device_info();
    info!("Using {} - {}", device.path.display(), device.name);
    let profile = DeviceProfile::for_family(device.family)?;

    let client = StreamClient::new(config.client_settings()?);
    let bridge = Bridge::new(profile, client, config.bridge_settings()?);

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                signal_token.cancel();
            }
            Err(e) => error!("Unable to listen for Ctrl-C: {}", e),
        }
    });

    let reason = bridge.run(event_receiver, shutdown.clone()).await;
    shutdown.cancel();

    if collector.is_finished() {
        info!("Event Collector stopped");
    } else {
        debug!("Event Collector still parked on the device, released at exit");
    }

    match reason {
        StopReason::Shutdown => Ok(()),
        StopReason::DeviceLost => Err(eyre!(
            "Input device {} stopped delivering events",
            device.path.display()
        )),
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|value| value.parse::<Level>().ok())
        .unwrap_or(Level::INFO);

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
