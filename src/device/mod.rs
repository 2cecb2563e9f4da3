//! Boundary to the external fingerprint device service.
//!
//! The service is consumed through [`DeviceApi`] for request/response calls
//! and delivers callbacks as [`DeviceEvent`]s on an unbounded channel that
//! the client drains in order.

pub mod scripted;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::models::SampleFormat;

pub use scripted::{
    CallKind, DeviceCall, DeviceScript, ScriptedDevice, ScriptedEvent, ScriptedEventKind,
};

#[async_trait]
pub trait DeviceApi: Send + Sync {
    async fn enumerate_devices(&self) -> Result<Vec<Value>>;

    /// Whether [`get_device_info`](Self::get_device_info) may be called.
    fn supports_device_info(&self) -> bool {
        false
    }

    async fn get_device_info(&self, _device_id: &str) -> Result<Value> {
        anyhow::bail!("device info is not supported by this device service")
    }

    async fn start_acquisition(&self, format: SampleFormat) -> Result<()>;

    async fn stop_acquisition(&self) -> Result<()>;

    /// Whether the service wants explicit subscribe/unsubscribe calls.
    fn supports_subscription(&self) -> bool {
        false
    }

    async fn subscribe(&self) -> Result<()> {
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<()> {
        Ok(())
    }

    fn supported_formats(&self) -> Vec<SampleFormat> {
        SampleFormat::ALL.to_vec()
    }
}

/// Callback from the device service, carrying its payload untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    DeviceConnected(Value),
    DeviceDisconnected(Value),
    SamplesAcquired(Value),
    QualityReported(Value),
    AcquisitionStarted(Value),
    AcquisitionStopped(Value),
    ErrorOccurred(Value),
    CommunicationFailed(Value),
}

impl DeviceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceEvent::DeviceConnected(_) => "device-connected",
            DeviceEvent::DeviceDisconnected(_) => "device-disconnected",
            DeviceEvent::SamplesAcquired(_) => "samples-acquired",
            DeviceEvent::QualityReported(_) => "quality-reported",
            DeviceEvent::AcquisitionStarted(_) => "acquisition-started",
            DeviceEvent::AcquisitionStopped(_) => "acquisition-stopped",
            DeviceEvent::ErrorOccurred(_) => "error-occurred",
            DeviceEvent::CommunicationFailed(_) => "communication-failed",
        }
    }

    pub fn payload(&self) -> &Value {
        match self {
            DeviceEvent::DeviceConnected(payload)
            | DeviceEvent::DeviceDisconnected(payload)
            | DeviceEvent::SamplesAcquired(payload)
            | DeviceEvent::QualityReported(payload)
            | DeviceEvent::AcquisitionStarted(payload)
            | DeviceEvent::AcquisitionStopped(payload)
            | DeviceEvent::ErrorOccurred(payload)
            | DeviceEvent::CommunicationFailed(payload) => payload,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<DeviceEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<DeviceEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
