use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use log::debug;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    device::{DeviceApi, DeviceEvent},
    diagnostics::{merge_info, DeviceReport, DiagnosticExport},
    error::{ClientError, ClientResult},
    models::{DeviceDescriptor, Quality, SampleFormat, SamplePayload, SampleRecord},
    normalize::{
        normalize_device_with, normalize_quality_event, normalize_samples, sample_reader,
        ConnectionPolicy, FieldProbe,
    },
    settings::ClientSettings,
    utils::logging::{ActivityLog, LogLevel},
};

use super::{
    job::{
        EnumerateJob, EnumerateOutcome, ReportJob, ReportOutcome, StartJob, StartOutcome,
        StopJob, StopOutcome,
    },
    CaptureSession, CaptureState, SampleHistory,
};

const EVENT_DEVICE: FieldProbe = FieldProbe::new(&["deviceId", "DeviceId", "reader", "id"]);
const EVENT_ERROR: FieldProbe = FieldProbe::new(&["error", "Error", "message", "Message"]);

/// What the presentation layer sees after every state change.
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientSnapshot {
    pub session: CaptureSession,
    pub devices: Vec<DeviceDescriptor>,
    pub latest_sample: Option<SampleRecord>,
    pub service_connected: bool,
}

/// Follow-up work an applied device event asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum EventFollowUp {
    Nothing,
    RefreshDevices,
}

/// Owns the capture session and is its only mutator.
///
/// Operator actions and device events are both fed through `&mut self`, so
/// they are handled one at a time in the order they arrive. Device-service
/// calls run as detached jobs between a `begin_*` and a `finish_*` step; the
/// async operations below simply run both steps back to back.
pub struct CaptureController {
    api: Option<Arc<dyn DeviceApi>>,
    session: CaptureSession,
    history: SampleHistory,
    devices: Vec<DeviceDescriptor>,
    last_report: Option<DeviceReport>,
    service_connected: bool,
    log: ActivityLog,
    connection_policy: ConnectionPolicy,
    call_timeout: Option<Duration>,
    debug: bool,
    snapshot_tx: watch::Sender<ClientSnapshot>,
}

impl CaptureController {
    /// `api` is `None` when the device service could not be set up; every
    /// device operation then fails with `ApiUnavailable`.
    pub fn new(api: Option<Arc<dyn DeviceApi>>, settings: &ClientSettings) -> Self {
        let (snapshot_tx, _) = watch::channel(ClientSnapshot::default());
        let mut log = ActivityLog::new(settings.log_capacity);
        match api {
            Some(_) => log.success("Fingerprint device API initialized"),
            None => log.error("Fingerprint device API not available"),
        }

        Self {
            api,
            session: CaptureSession::new(),
            history: SampleHistory::new(),
            devices: Vec::new(),
            last_report: None,
            service_connected: false,
            log,
            connection_policy: ConnectionPolicy::from_assumption(
                settings.assume_connected_when_unreported,
            ),
            call_timeout: settings.call_timeout(),
            debug: settings.debug,
            snapshot_tx,
        }
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn state(&self) -> CaptureState {
        self.session.state
    }

    pub fn history(&self) -> &SampleHistory {
        &self.history
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn activity_log(&self) -> &ActivityLog {
        &self.log
    }

    pub fn service_connected(&self) -> bool {
        self.service_connected
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            session: self.session.clone(),
            devices: self.devices.clone(),
            latest_sample: self.history.latest().cloned(),
            service_connected: self.service_connected,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub async fn enumerate_devices(&mut self) -> ClientResult<Vec<DeviceDescriptor>> {
        let job = self.begin_enumerate()?;
        let outcome = job.run().await;
        self.finish_enumerate(outcome)
    }

    pub(super) fn begin_enumerate(&mut self) -> ClientResult<EnumerateJob> {
        let api = self.api()?;
        self.log.info("Enumerating devices...");
        Ok(EnumerateJob {
            api,
            limit: self.call_timeout,
        })
    }

    pub(super) fn finish_enumerate(
        &mut self,
        outcome: EnumerateOutcome,
    ) -> ClientResult<Vec<DeviceDescriptor>> {
        for warning in outcome.warnings {
            self.log.warning(warning);
        }

        let raw_devices = match outcome.devices {
            Ok(devices) => devices,
            Err(err) => {
                let err = err.into_client(ClientError::DeviceEnumerationFailed);
                self.log.error(err.to_string());
                self.devices.clear();
                self.service_connected = false;
                self.publish();
                return Err(err);
            }
        };

        if self.debug {
            debug!("enumeration response: {raw_devices:?}");
        }

        self.devices = raw_devices
            .iter()
            .enumerate()
            .map(|(index, raw)| normalize_device_with(raw, index, self.connection_policy))
            .collect();
        self.service_connected = true;
        self.log
            .success(format!("Found {} device(s)", self.devices.len()));
        self.publish();

        Ok(self.devices.clone())
    }

    pub async fn start(&mut self, format: SampleFormat) -> ClientResult<()> {
        let job = self.begin_start(format)?;
        let outcome = job.run().await;
        self.finish_start(outcome)
    }

    /// Moves the session to `Starting`.
    pub(super) fn begin_start(&mut self, format: SampleFormat) -> ClientResult<StartJob> {
        let api = self.api()?;
        if self.session.state.in_session() {
            self.log.warning("Capture already in progress");
            return Err(ClientError::AlreadyCapturing);
        }

        self.log
            .info(format!("Starting capture with format: {format}"));
        let session_id = Uuid::new_v4().to_string();
        self.session.begin(session_id.clone(), format, Utc::now());
        self.publish();

        Ok(StartJob {
            subscribe: api.supports_subscription(),
            api,
            limit: self.call_timeout,
            session_id,
            format,
        })
    }

    /// The session may have been forced back to `Idle` while the device was
    /// being started; that session is not revived.
    pub(super) fn finish_start(&mut self, outcome: StartOutcome) -> ClientResult<()> {
        match outcome.subscribed {
            Some(Ok(())) => self.log.info("Subscribed to device events"),
            Some(Err(err)) => self
                .log
                .warning(format!("Event subscription warning: {err}")),
            None => {}
        }

        let still_starting = self.session.state == CaptureState::Starting
            && self.session.session_id.as_deref() == Some(outcome.session_id.as_str());
        if !still_starting {
            let err = ClientError::AcquisitionStartFailed(
                "capture session ended before the device answered".into(),
            );
            self.log.warning(err.to_string());
            return Err(err);
        }

        match outcome.started {
            Ok(()) => {
                self.session.activate();
                self.log
                    .info("Capture started; waiting for device samples");
                self.publish();
                Ok(())
            }
            Err(err) => Err(self.abort_session(err.into_client(ClientError::AcquisitionStartFailed))),
        }
    }

    /// Stopping while idle is a no-op and issues no device call.
    pub async fn stop(&mut self) -> ClientResult<()> {
        match self.begin_stop() {
            Some(job) => {
                let outcome = job.run().await;
                self.finish_stop(outcome)
            }
            None => Ok(()),
        }
    }

    /// `None` when there is nothing to ask the device for.
    pub(super) fn begin_stop(&mut self) -> Option<StopJob> {
        if matches!(
            self.session.state,
            CaptureState::Idle | CaptureState::Stopping
        ) {
            return None;
        }

        let Some(api) = self.api.clone() else {
            self.session.reset();
            self.publish();
            return None;
        };

        self.log.info("Stopping capture...");
        self.session.begin_stop();
        self.publish();

        Some(StopJob {
            unsubscribe: api.supports_subscription(),
            api,
            limit: self.call_timeout,
        })
    }

    pub(super) fn finish_stop(&mut self, outcome: StopOutcome) -> ClientResult<()> {
        if let Err(err) = outcome.stopped {
            return Err(self.abort_session(err.into_client(ClientError::AcquisitionStopFailed)));
        }

        match outcome.unsubscribed {
            Some(Ok(())) => self.log.info("Unsubscribed from device events"),
            Some(Err(err)) => self
                .log
                .warning(format!("Event unsubscription warning: {err}")),
            None => {}
        }

        self.session.reset();
        self.log.success("Capture stopped");
        self.publish();
        Ok(())
    }

    pub fn clear_samples(&mut self) {
        self.history.clear();
        self.session.clear_counters();
        self.log.info("Sample history cleared");
        self.publish();
    }

    /// Empties the activity log, leaving a single entry that says so.
    pub fn clear_log(&mut self) {
        self.log.clear();
        self.log.info("Log cleared");
    }

    pub async fn handle_event(&mut self, event: DeviceEvent) -> ClientResult<()> {
        if self.apply_event(event)? == EventFollowUp::RefreshDevices {
            self.refresh_devices().await;
        }
        Ok(())
    }

    /// Apply a device event to the session without calling the device.
    pub(super) fn apply_event(&mut self, event: DeviceEvent) -> ClientResult<EventFollowUp> {
        if self.debug {
            debug!("device event {}: {}", event.name(), event.payload());
        }

        match event {
            DeviceEvent::DeviceConnected(payload) => {
                self.log
                    .success(format!("Device connected: {}", event_device(&payload)));
                self.service_connected = true;
                self.publish();
                Ok(EventFollowUp::RefreshDevices)
            }
            DeviceEvent::DeviceDisconnected(payload) => {
                self.log
                    .warning(format!("Device disconnected: {}", event_device(&payload)));
                self.service_connected = false;
                self.publish();
                Ok(EventFollowUp::RefreshDevices)
            }
            DeviceEvent::SamplesAcquired(payload) => {
                self.accept_samples(&payload)?;
                Ok(EventFollowUp::Nothing)
            }
            DeviceEvent::QualityReported(payload) => {
                let quality = normalize_quality_event(&payload);
                match quality.score() {
                    Some(score) => {
                        self.session.record_quality(quality);
                        self.log
                            .push(quality_level(score), format!("Device quality: {score}%"));
                        self.publish();
                    }
                    None => self
                        .log
                        .info(format!("Quality event without a numeric value: {payload}")),
                }
                Ok(EventFollowUp::Nothing)
            }
            DeviceEvent::AcquisitionStarted(_) => {
                self.log.info("Fingerprint acquisition started");
                Ok(EventFollowUp::Nothing)
            }
            DeviceEvent::AcquisitionStopped(_) => {
                self.log.info("Fingerprint acquisition stopped");
                if matches!(
                    self.session.state,
                    CaptureState::Starting | CaptureState::Active
                ) {
                    self.session.reset();
                    self.publish();
                }
                Ok(EventFollowUp::Nothing)
            }
            DeviceEvent::ErrorOccurred(payload) => {
                let detail = EVENT_ERROR
                    .find_in(&payload)
                    .map(value_text)
                    .unwrap_or_else(|| payload.to_string());
                self.log.error(format!("Error occurred: {detail}"));
                Ok(EventFollowUp::Nothing)
            }
            DeviceEvent::CommunicationFailed(payload) => {
                let detail = EVENT_ERROR
                    .find_in(&payload)
                    .map(value_text)
                    .unwrap_or_else(|| "communication with device failed".to_string());
                self.service_connected = false;
                let err = ClientError::CommunicationFailed(detail);
                if self.session.state.in_session() {
                    Err(self.abort_session(err))
                } else {
                    self.log.error(err.to_string());
                    self.publish();
                    Err(err)
                }
            }
        }
    }

    /// Detail report for the device at `index` of the last enumeration. The
    /// report is kept for the next diagnostic export.
    pub async fn device_report(&mut self, index: usize) -> ClientResult<DeviceReport> {
        let job = self.begin_report(index)?;
        let outcome = job.run().await;
        Ok(self.finish_report(outcome))
    }

    pub(super) fn begin_report(&mut self, index: usize) -> ClientResult<ReportJob> {
        let Some(descriptor) = self.devices.get(index).cloned() else {
            self.log.error("Device not found");
            return Err(ClientError::DeviceNotFound(index));
        };
        self.log.info(format!(
            "Loading detailed information for device: {}",
            descriptor.name
        ));

        Ok(ReportJob {
            api: self.api.clone(),
            limit: self.call_timeout,
            index,
            descriptor,
        })
    }

    pub(super) fn finish_report(&mut self, outcome: ReportOutcome) -> DeviceReport {
        let mut info = outcome.descriptor.raw.clone();
        match outcome.extra_info {
            Some(Ok(extra)) => info = merge_info(&info, &extra),
            Some(Err(err)) => self.log.warning(format!(
                "Some device information could not be retrieved: {err}"
            )),
            None => {}
        }

        let report = DeviceReport {
            descriptor: normalize_device_with(&info, outcome.index, self.connection_policy),
            info,
            supported_formats: outcome.supported_formats,
            generated_at: Utc::now(),
        };
        self.last_report = Some(report.clone());
        report
    }

    pub fn export_diagnostics(&mut self, dir: &Path) -> ClientResult<PathBuf> {
        let now = Utc::now();
        let export = DiagnosticExport::new(self.last_report.clone(), self.api.is_some(), now);
        match export.write_to(dir, now) {
            Ok(path) => {
                self.log.success(format!(
                    "Device information exported to {}",
                    path.display()
                ));
                Ok(path)
            }
            Err(err) => {
                let err = ClientError::Export(format!("{err:#}"));
                self.log.error(err.to_string());
                Err(err)
            }
        }
    }

    /// Force the session back to `Idle` without asking the device, e.g. when
    /// the client shuts down while a device call is still outstanding.
    pub(super) fn abandon_session(&mut self, err: ClientError) {
        if self.session.state.in_session() {
            self.abort_session(err);
        }
    }

    fn accept_samples(&mut self, payload: &Value) -> ClientResult<()> {
        let Some(format) = self
            .session
            .format
            .filter(|_| self.session.state.in_session())
        else {
            self.log
                .warning("Ignoring samples received outside a capture session");
            return Ok(());
        };

        let samples = match normalize_samples(payload, format) {
            Ok(samples) => samples,
            Err(err) => {
                self.log.error(err.to_string());
                return Err(err);
            }
        };

        self.log.success(format!(
            "Acquired {} sample(s) from {}",
            samples.len(),
            sample_reader(payload)
        ));

        for sample in samples {
            let record = SampleRecord::accept(
                sample,
                self.history.next_sequence_id(),
                format,
                Utc::now(),
            );

            match record.quality {
                Quality::Score(score) => {
                    self.session.record_quality(record.quality);
                    self.log
                        .push(quality_level(score), format!("Sample quality: {score}%"));
                }
                Quality::NotAvailable => self
                    .log
                    .info("No quality data available in this sample"),
            }
            if record.payload == SamplePayload::Absent {
                self.log.warning("Sample data is missing or invalid");
            }

            self.session.sample_count += 1;
            self.history.push(record);
        }

        self.publish();
        Ok(())
    }

    async fn refresh_devices(&mut self) {
        if let Err(err) = self.enumerate_devices().await {
            debug!("device list refresh failed: {err}");
        }
    }

    /// Logs `err`, forces the session back to `Idle` and hands `err` back.
    fn abort_session(&mut self, err: ClientError) -> ClientError {
        self.log.error(err.to_string());
        self.session.reset();
        self.publish();
        err
    }

    fn api(&mut self) -> ClientResult<Arc<dyn DeviceApi>> {
        match &self.api {
            Some(api) => Ok(Arc::clone(api)),
            None => {
                self.log.error("API not available");
                Err(ClientError::ApiUnavailable)
            }
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

fn quality_level(score: u8) -> LogLevel {
    if score > 50 {
        LogLevel::Success
    } else if score > 25 {
        LogLevel::Warning
    } else {
        LogLevel::Error
    }
}

fn event_device(payload: &Value) -> String {
    EVENT_DEVICE
        .find_in(payload)
        .map(value_text)
        .unwrap_or_else(|| "unknown".to_string())
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
