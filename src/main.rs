use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use simple_logger::SimpleLogger;
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tokio::time::Instant;

mod audio;
mod client;
mod color;
mod config;
mod controller;
mod error;
mod lights;
mod painter;
mod show;

use audio::Microphone;
use client::{Incoming, MqttClient};
use color::gamma::Gamma;
use config::LampConfig;
use controller::Controller;
use lights::SharedSink;
use painter::{PainterRegistry, Resources};

/// Inbound publishes buffered between the transport and the controller
const INBOUND_CAPACITY: usize = 100;

const REPORT_PERIOD: Duration = Duration::from_secs(60);

/// How long the transport gets to flush and disconnect at exit
const TRANSPORT_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(version, about = "An LED lamp controlled over MQTT")]
struct Args {
    /// Path to the lamp's TOML configuration
    #[arg(short, long, default_value = "/etc/lamp.toml")]
    config: PathBuf,

    /// Overrides the level picked by the config's `debug` flag
    #[arg(long)]
    log_level: Option<log::LevelFilter>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = LampConfig::load(&args.config)?;

    let level = args.log_level.unwrap_or(if config.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    });
    SimpleLogger::new().with_level(level).init()?;

    // Shows share the strip through Rc/RefCell, so everything runs on this one thread
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Error building the runtime")?;

    LocalSet::new().block_on(&rt, run(config))
}

async fn run(config: LampConfig) -> Result<()> {
    let sink = open_sink(&config)?;

    let gamma = if config.led.gamma {
        Gamma::new()
    } else {
        Gamma::linear()
    };
    let mic = Microphone::new(config.audio.clone());
    let painters =
        PainterRegistry::with_defaults(Resources::new(mic, config.audio.clone(), gamma));

    let (outbox, outbound) = mpsc::unbounded_channel();
    let (inbound_tx, mut inbound) = mpsc::channel(INBOUND_CAPACITY);
    let mut controller = Controller::new(&config, sink, painters, outbox);

    let client = MqttClient::new(&config, controller.topics().subscriptions());
    let transport = tokio::spawn(client.run(inbound_tx, outbound));

    let mut report = tokio::time::interval(REPORT_PERIOD);
    report.tick().await;

    log::info!("Lamp {} running", config.name);

    loop {
        let restore_deadline = controller.restore_deadline();

        tokio::select! {
            incoming = inbound.recv() => match incoming {
                Some(Incoming::Connected) => controller.connected(),
                Some(Incoming::Publish { topic, payload }) => controller.handle(&topic, &payload).await,
                None => {
                    log::error!("Transport has stopped");
                    break;
                }
            },
            _ = restore_expiry(restore_deadline) => {
                log::info!("No retained state after {:?}, starting fresh", config.show.restore_timeout());
                controller.finish_restore().await;
            }
            _ = report.tick() => controller.report(),
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, shutting down");
                break;
            }
        }
    }

    controller.shutdown().await;
    controller.report();
    // Closing the outbox tells the transport to disconnect
    drop(controller);

    match tokio::time::timeout(TRANSPORT_GRACE, transport).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => log::error!("Transport task failed: {}", e),
        Err(_) => log::warn!("Transport did not close within {:?}", TRANSPORT_GRACE),
    }

    Ok(())
}

/// Resolves at `deadline`, or never if there isn't one.
async fn restore_expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(feature = "ws281x")]
fn open_sink(config: &LampConfig) -> Result<SharedSink> {
    let sink = lights::Ws281xSink::open(&config.led)?;
    Ok(Rc::new(RefCell::new(sink)))
}

#[cfg(not(feature = "ws281x"))]
fn open_sink(config: &LampConfig) -> Result<SharedSink> {
    log::warn!("Built without the ws281x feature, painting into memory only");
    Ok(Rc::new(RefCell::new(lights::MemorySink::new(
        config.led.count,
        config.led.brightness,
    ))))
}
