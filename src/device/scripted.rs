//! In-process device service that replays a fixed script.
//!
//! Stands in for the vendor service in the demo binary and in tests: it
//! answers enumeration from the script, records every call it receives, and
//! pushes the scripted capture events through its [`EventSender`] when an
//! acquisition starts.

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
    sync::{Mutex, MutexGuard},
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::SampleFormat;

use super::{DeviceApi, DeviceEvent, EventSender};

const DEMO_PNG_B64URL: &str = "iVBORw0KGgoAAAANSUhEUgAAAAQAAAAECAAAAACMmsGiAAAAGklEQVR4nGNgsKnYwiAS0HOCQSNlwR0Q7wMAPpQHgYda8QgAAAAASUVORK5CYII";

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ScriptedEventKind {
    DeviceConnected,
    DeviceDisconnected,
    SamplesAcquired,
    QualityReported,
    ErrorOccurred,
    CommunicationFailed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptedEvent {
    pub kind: ScriptedEventKind,
    #[serde(default)]
    pub payload: Value,
}

impl ScriptedEvent {
    pub fn new(kind: ScriptedEventKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    fn to_event(&self) -> DeviceEvent {
        let payload = self.payload.clone();
        match self.kind {
            ScriptedEventKind::DeviceConnected => DeviceEvent::DeviceConnected(payload),
            ScriptedEventKind::DeviceDisconnected => DeviceEvent::DeviceDisconnected(payload),
            ScriptedEventKind::SamplesAcquired => DeviceEvent::SamplesAcquired(payload),
            ScriptedEventKind::QualityReported => DeviceEvent::QualityReported(payload),
            ScriptedEventKind::ErrorOccurred => DeviceEvent::ErrorOccurred(payload),
            ScriptedEventKind::CommunicationFailed => DeviceEvent::CommunicationFailed(payload),
        }
    }
}

/// What the scripted service answers with.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceScript {
    /// Raw enumeration response, shapes and casing untouched.
    pub devices: Vec<Value>,
    /// Extra info keyed by device id. Enables `get_device_info` when present.
    pub device_info: HashMap<String, Value>,
    /// Delivered in order after each successful start.
    pub capture_events: Vec<ScriptedEvent>,
    pub supported_formats: Option<Vec<SampleFormat>>,
    pub requires_subscription: bool,
}

impl DeviceScript {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read device script from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid device script in {}", path.display()))
    }

    /// One reader that returns three PNG samples over two events and a
    /// quality report.
    pub fn demo() -> Self {
        let reader_id = "{5F1D8A52-7E3C-4C8E-9B0A-3C2D1E4F5A6B}";
        let first = json!([{ "Data": DEMO_PNG_B64URL, "Quality": 82 }]).to_string();

        Self {
            devices: vec![json!({
                "DeviceId": reader_id,
                "Name": "Demo Fingerprint Reader",
                "DeviceType": "Optical",
            })],
            device_info: HashMap::from([(
                reader_id.to_string(),
                json!({
                    "modelName": "Demo Optical Sensor",
                    "firmwareVersion": "1.0.3",
                    "serialNumber": "DEMO-0001",
                }),
            )]),
            capture_events: vec![
                ScriptedEvent::new(
                    ScriptedEventKind::SamplesAcquired,
                    json!({ "deviceId": reader_id, "samples": first }),
                ),
                ScriptedEvent::new(ScriptedEventKind::QualityReported, json!({ "quality": 82 })),
                ScriptedEvent::new(
                    ScriptedEventKind::SamplesAcquired,
                    json!({ "deviceId": reader_id, "samples": [DEMO_PNG_B64URL, DEMO_PNG_B64URL] }),
                ),
            ],
            supported_formats: None,
            requires_subscription: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Enumerate,
    DeviceInfo,
    Subscribe,
    StartAcquisition,
    StopAcquisition,
    Unsubscribe,
}

/// One request received by the scripted service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Enumerate,
    DeviceInfo(String),
    Subscribe,
    StartAcquisition(SampleFormat),
    StopAcquisition,
    Unsubscribe,
}

#[derive(Default)]
struct Behaviour {
    calls: Vec<DeviceCall>,
    failing: HashSet<CallKind>,
    hanging: HashSet<CallKind>,
}

pub struct ScriptedDevice {
    script: DeviceScript,
    events: EventSender,
    behaviour: Mutex<Behaviour>,
}

impl ScriptedDevice {
    pub fn new(script: DeviceScript, events: EventSender) -> Self {
        Self {
            script,
            events,
            behaviour: Mutex::new(Behaviour::default()),
        }
    }

    /// Make every later call of `kind` fail.
    pub fn fail(&self, kind: CallKind) {
        self.lock().failing.insert(kind);
    }

    /// Make every later call of `kind` never resolve.
    pub fn hang(&self, kind: CallKind) {
        self.lock().hanging.insert(kind);
    }

    pub fn recover(&self, kind: CallKind) {
        let mut behaviour = self.lock();
        behaviour.failing.remove(&kind);
        behaviour.hanging.remove(&kind);
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.lock().calls.clone()
    }

    /// Deliver an event as if the service raised it on its own.
    pub fn emit(&self, event: DeviceEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| anyhow!("event channel closed"))
    }

    fn lock(&self) -> MutexGuard<'_, Behaviour> {
        match self.behaviour.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn record(&self, call: DeviceCall, kind: CallKind) -> Result<()> {
        let (fails, hangs) = {
            let mut behaviour = self.lock();
            debug!("scripted device received {call:?}");
            behaviour.calls.push(call);
            (
                behaviour.failing.contains(&kind),
                behaviour.hanging.contains(&kind),
            )
        };

        if hangs {
            std::future::pending::<()>().await;
        }
        if fails {
            bail!("scripted {kind:?} failure");
        }
        Ok(())
    }

    fn deliver(&self, event: DeviceEvent) {
        if self.events.send(event).is_err() {
            warn!("scripted device has no listener; dropping event");
        }
    }
}

#[async_trait]
impl DeviceApi for ScriptedDevice {
    async fn enumerate_devices(&self) -> Result<Vec<Value>> {
        self.record(DeviceCall::Enumerate, CallKind::Enumerate).await?;
        Ok(self.script.devices.clone())
    }

    fn supports_device_info(&self) -> bool {
        !self.script.device_info.is_empty()
    }

    async fn get_device_info(&self, device_id: &str) -> Result<Value> {
        self.record(DeviceCall::DeviceInfo(device_id.to_string()), CallKind::DeviceInfo)
            .await?;
        self.script
            .device_info
            .get(device_id)
            .cloned()
            .ok_or_else(|| anyhow!("no info for device {device_id}"))
    }

    async fn start_acquisition(&self, format: SampleFormat) -> Result<()> {
        self.record(DeviceCall::StartAcquisition(format), CallKind::StartAcquisition)
            .await?;

        self.deliver(DeviceEvent::AcquisitionStarted(json!({})));
        for event in &self.script.capture_events {
            self.deliver(event.to_event());
        }
        Ok(())
    }

    async fn stop_acquisition(&self) -> Result<()> {
        self.record(DeviceCall::StopAcquisition, CallKind::StopAcquisition)
            .await?;
        self.deliver(DeviceEvent::AcquisitionStopped(json!({})));
        Ok(())
    }

    fn supports_subscription(&self) -> bool {
        self.script.requires_subscription
    }

    async fn subscribe(&self) -> Result<()> {
        self.record(DeviceCall::Subscribe, CallKind::Subscribe).await
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.record(DeviceCall::Unsubscribe, CallKind::Unsubscribe).await
    }

    fn supported_formats(&self) -> Vec<SampleFormat> {
        self.script
            .supported_formats
            .clone()
            .unwrap_or_else(|| SampleFormat::ALL.to_vec())
    }
}
