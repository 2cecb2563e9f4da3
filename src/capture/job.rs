//! Device-service calls detached from the controller.
//!
//! Every controller operation that talks to the device service is split into
//! a synchronous `begin_*` that validates and records the transition, a job
//! holding only what the external calls need, and a `finish_*` that applies
//! the outcome. A running job borrows nothing from the controller, so the
//! client task keeps draining device events while it waits.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use serde_json::Value;
use tokio::time;

use crate::{
    device::DeviceApi,
    diagnostics::merge_info,
    error::ClientError,
    models::{DeviceDescriptor, SampleFormat},
    normalize::{device::MISSING_ID, raw_device_id},
};

pub(super) enum CallError {
    Failed(anyhow::Error),
    TimedOut(Duration),
}

impl CallError {
    pub(super) fn into_client(self, wrap: fn(String) -> ClientError) -> ClientError {
        match self {
            CallError::Failed(err) => wrap(format!("{err:#}")),
            CallError::TimedOut(limit) => ClientError::CommunicationFailed(format!(
                "no response within {} ms",
                limit.as_millis()
            )),
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Failed(err) => write!(f, "{err:#}"),
            CallError::TimedOut(limit) => write!(f, "no response within {} ms", limit.as_millis()),
        }
    }
}

async fn call<T, F>(limit: Option<Duration>, fut: F) -> Result<T, CallError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match limit {
        Some(limit) => match time::timeout(limit, fut).await {
            Ok(result) => result.map_err(CallError::Failed),
            Err(_) => Err(CallError::TimedOut(limit)),
        },
        None => fut.await.map_err(CallError::Failed),
    }
}

pub(super) struct EnumerateJob {
    pub(super) api: Arc<dyn DeviceApi>,
    pub(super) limit: Option<Duration>,
}

pub(super) struct EnumerateOutcome {
    /// Raw responses with any device info merged over them.
    pub(super) devices: Result<Vec<Value>, CallError>,
    pub(super) warnings: Vec<String>,
}

impl EnumerateJob {
    pub(super) async fn run(self) -> EnumerateOutcome {
        let raw_devices = match call(self.limit, self.api.enumerate_devices()).await {
            Ok(devices) => devices,
            Err(err) => {
                return EnumerateOutcome {
                    devices: Err(err),
                    warnings: Vec::new(),
                }
            }
        };

        let mut warnings = Vec::new();
        let mut enriched = Vec::with_capacity(raw_devices.len());
        for raw in raw_devices {
            match raw_device_id(&raw) {
                Some(id) if self.api.supports_device_info() => {
                    match call(self.limit, self.api.get_device_info(&id)).await {
                        Ok(info) => enriched.push(merge_info(&raw, &info)),
                        Err(err) => {
                            warnings.push(format!("Device info unavailable for {id}: {err}"));
                            enriched.push(raw);
                        }
                    }
                }
                _ => enriched.push(raw),
            }
        }

        EnumerateOutcome {
            devices: Ok(enriched),
            warnings,
        }
    }
}

pub(super) struct StartJob {
    pub(super) api: Arc<dyn DeviceApi>,
    pub(super) limit: Option<Duration>,
    pub(super) session_id: String,
    pub(super) format: SampleFormat,
    pub(super) subscribe: bool,
}

pub(super) struct StartOutcome {
    pub(super) session_id: String,
    /// `None` when the service needs no subscription.
    pub(super) subscribed: Option<Result<(), CallError>>,
    pub(super) started: Result<(), CallError>,
}

impl StartJob {
    pub(super) async fn run(self) -> StartOutcome {
        let subscribed = if self.subscribe {
            Some(call(self.limit, self.api.subscribe()).await)
        } else {
            None
        };
        let started = call(self.limit, self.api.start_acquisition(self.format)).await;

        StartOutcome {
            session_id: self.session_id,
            subscribed,
            started,
        }
    }
}

pub(super) struct StopJob {
    pub(super) api: Arc<dyn DeviceApi>,
    pub(super) limit: Option<Duration>,
    pub(super) unsubscribe: bool,
}

pub(super) struct StopOutcome {
    pub(super) stopped: Result<(), CallError>,
    /// Only attempted after a successful stop.
    pub(super) unsubscribed: Option<Result<(), CallError>>,
}

impl StopJob {
    pub(super) async fn run(self) -> StopOutcome {
        let stopped = call(self.limit, self.api.stop_acquisition()).await;
        let unsubscribed = if stopped.is_ok() && self.unsubscribe {
            Some(call(self.limit, self.api.unsubscribe()).await)
        } else {
            None
        };

        StopOutcome {
            stopped,
            unsubscribed,
        }
    }
}

pub(super) struct ReportJob {
    pub(super) api: Option<Arc<dyn DeviceApi>>,
    pub(super) limit: Option<Duration>,
    pub(super) index: usize,
    pub(super) descriptor: DeviceDescriptor,
}

pub(super) struct ReportOutcome {
    pub(super) index: usize,
    pub(super) descriptor: DeviceDescriptor,
    pub(super) extra_info: Option<Result<Value, CallError>>,
    pub(super) supported_formats: Vec<SampleFormat>,
}

impl ReportJob {
    pub(super) async fn run(self) -> ReportOutcome {
        let mut extra_info = None;
        let mut supported_formats = Vec::new();

        if let Some(api) = &self.api {
            if api.supports_device_info() && self.descriptor.id != MISSING_ID {
                extra_info = Some(call(self.limit, api.get_device_info(&self.descriptor.id)).await);
            }
            supported_formats = api.supported_formats();
        }

        ReportOutcome {
            index: self.index,
            descriptor: self.descriptor,
            extra_info,
            supported_formats,
        }
    }
}
