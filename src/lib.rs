pub mod capture;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod models;
pub mod normalize;
pub mod render;
pub mod settings;
pub mod utils;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use capture::{CaptureController, ClientActor, ClientHandle};
use device::{event_channel, DeviceApi, DeviceScript, ScriptedDevice};
use settings::{ClientSettings, SettingsStore};

pub use error::{ClientError, ClientResult};

const SAMPLE_WAIT: Duration = Duration::from_secs(10);

pub fn run() -> Result<()> {
    let store = SettingsStore::from_env()?;
    let settings = store.get()?;

    // RUST_LOG still wins over the configured level.
    env_logger::Builder::new()
        .filter_level(if settings.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .init();

    info!(
        "fingerprint-demo starting up (settings: {})",
        store.path().display()
    );

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(demo(settings))
}

async fn demo(settings: ClientSettings) -> Result<()> {
    let (events_tx, events_rx) = event_channel();

    let api: Option<Arc<dyn DeviceApi>> = match load_script(&settings) {
        Ok(script) => Some(Arc::new(ScriptedDevice::new(script, events_tx))),
        Err(err) => {
            error!("device service unavailable: {err:#}");
            None
        }
    };

    let controller = CaptureController::new(api, &settings);
    let cancel = CancellationToken::new();
    let (client, task) = ClientActor::spawn(controller, events_rx, cancel.clone());

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted; stopping capture");
                cancel.cancel();
            }
        });
    }

    tokio::select! {
        result = run_session(&client, &settings) => {
            if let Err(err) = result {
                warn!("demo session ended early: {err}");
            }
        }
        _ = cancel.cancelled() => {}
    }

    cancel.cancel();
    let controller = task.await.context("client task failed to join")?;
    for entry in controller.activity_log().entries() {
        println!("{}", render::log_line(entry));
    }
    Ok(())
}

fn load_script(settings: &ClientSettings) -> Result<DeviceScript> {
    match &settings.device_script {
        Some(path) => DeviceScript::load(path),
        None => Ok(DeviceScript::demo()),
    }
}

async fn run_session(client: &ClientHandle, settings: &ClientSettings) -> ClientResult<()> {
    let devices = client.enumerate_devices().await?;
    println!("{}", render::device_list(&devices));

    if !devices.is_empty() {
        let report = client.device_report(0).await?;
        let details = &report.descriptor.details;
        println!(
            "Device 0: {} {} (serial {}, firmware {}, driver {}) formats: {:?}",
            details.manufacturer,
            details.model,
            details.serial_number,
            details.firmware_version,
            details.driver_version,
            report.supported_formats
        );
    }

    client.start_capture(settings.sample_format).await?;
    println!("{}", render::session_line(&client.snapshot()));

    let goal = settings.sample_goal as u64;
    if client.wait_for_samples(goal, SAMPLE_WAIT).await.is_none() {
        warn!("fewer than {goal} sample(s) arrived before the capture ended or timed out");
    }

    client.stop_capture().await?;
    println!("{}", render::session_line(&client.snapshot()));

    let recent = client
        .recent_samples(settings.history_display_limit)
        .await?;
    for preview in render::sample_grid(&recent) {
        println!("{preview}");
    }

    let path = client
        .export_diagnostics(settings.export_dir.clone())
        .await?;
    println!("Diagnostics written to {}", path.display());
    Ok(())
}
