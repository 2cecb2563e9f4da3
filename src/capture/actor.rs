//! Single task that owns the [`CaptureController`].
//!
//! Operator commands and device events are drained by one loop so the session
//! has exactly one writer. Device events are handled in delivery order and
//! ahead of pending commands.
//!
//! At most one device-service call is outstanding at a time. While it runs
//! the loop keeps applying device events and watching for cancellation;
//! commands that need the device wait in a backlog until the call settles.

use std::{collections::VecDeque, future::Future, path::PathBuf, pin::Pin, time::Duration};

use log::{debug, info, warn};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;

use crate::{
    device::{DeviceEvent, EventReceiver},
    diagnostics::DeviceReport,
    error::{ClientError, ClientResult},
    models::{DeviceDescriptor, SampleFormat, SampleRecord},
    utils::logging::LogEntry,
};

use super::{
    controller::EventFollowUp,
    job::{EnumerateOutcome, ReportOutcome, StartOutcome, StopOutcome},
    CaptureController, ClientSnapshot,
};

const COMMAND_QUEUE_DEPTH: usize = 32;
/// How long shutdown waits for the device to confirm a stop.
const SHUTDOWN_STOP_LIMIT: Duration = Duration::from_secs(2);

type Reply<T> = oneshot::Sender<T>;
type Work<T> = Pin<Box<dyn Future<Output = T> + Send>>;

enum ClientCommand {
    EnumerateDevices(Reply<ClientResult<Vec<DeviceDescriptor>>>),
    StartCapture {
        format: SampleFormat,
        reply: Reply<ClientResult<()>>,
    },
    StopCapture(Reply<ClientResult<()>>),
    ClearSamples(Reply<()>),
    ClearLog(Reply<()>),
    DeviceReport {
        index: usize,
        reply: Reply<ClientResult<DeviceReport>>,
    },
    ExportDiagnostics {
        dir: PathBuf,
        reply: Reply<ClientResult<PathBuf>>,
    },
    RecentSamples {
        limit: usize,
        reply: Reply<Vec<SampleRecord>>,
    },
    ActivityLog(Reply<Vec<LogEntry>>),
}

impl ClientCommand {
    fn needs_device(&self) -> bool {
        matches!(
            self,
            ClientCommand::EnumerateDevices(_)
                | ClientCommand::StartCapture { .. }
                | ClientCommand::StopCapture(_)
                | ClientCommand::DeviceReport { .. }
        )
    }
}

/// The outstanding device-service call and whoever waits for it.
enum InFlight {
    Refresh(Work<EnumerateOutcome>),
    Enumerate {
        work: Work<EnumerateOutcome>,
        reply: Reply<ClientResult<Vec<DeviceDescriptor>>>,
    },
    Start {
        work: Work<StartOutcome>,
        reply: Reply<ClientResult<()>>,
    },
    Stop {
        work: Work<StopOutcome>,
        reply: Reply<ClientResult<()>>,
    },
    Report {
        work: Work<ReportOutcome>,
        reply: Reply<ClientResult<DeviceReport>>,
    },
}

impl InFlight {
    /// Drop the call and answer its caller with `err`.
    fn abandon(self, err: ClientError) {
        match self {
            InFlight::Refresh(_) => {}
            InFlight::Enumerate { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            InFlight::Start { reply, .. } | InFlight::Stop { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            InFlight::Report { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

enum Queued {
    Command(ClientCommand),
    Refresh,
}

pub struct ClientActor;

impl ClientActor {
    /// Move `controller` onto its own task. The task ends when `cancel`
    /// fires or every [`ClientHandle`] is dropped, stopping an active capture
    /// on the way out, and hands the controller back.
    pub fn spawn(
        controller: CaptureController,
        events: EventReceiver,
        cancel: CancellationToken,
    ) -> (ClientHandle, JoinHandle<CaptureController>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let snapshots = controller.subscribe();
        let handle = tokio::spawn(client_loop(controller, rx, events, cancel));

        (ClientHandle { tx, snapshots }, handle)
    }
}

async fn client_loop(
    mut controller: CaptureController,
    mut commands: mpsc::Receiver<ClientCommand>,
    mut events: EventReceiver,
    cancel: CancellationToken,
) -> CaptureController {
    let mut events_open = true;
    let mut in_flight: Option<InFlight> = None;
    let mut backlog: VecDeque<Queued> = VecDeque::new();

    loop {
        if in_flight.is_none() {
            in_flight = resume_backlog(&mut controller, &mut backlog);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("client loop shutting down");
                break;
            }
            event = events.recv(), if events_open => match event {
                Some(event) => on_event(&mut controller, event, &mut in_flight, &mut backlog),
                None => {
                    warn!("device event channel closed");
                    events_open = false;
                }
            },
            _ = settle(&mut in_flight, &mut controller), if in_flight.is_some() => {}
            command = commands.recv() => match command {
                Some(command) if in_flight.is_some() && command.needs_device() => {
                    backlog.push_back(Queued::Command(command));
                }
                Some(command) => in_flight = dispatch(&mut controller, command),
                None => break,
            },
        }
    }

    // Callers still waiting on a dropped call see the client as stopped.
    drop(in_flight);
    backlog.clear();
    shutdown(&mut controller).await;
    controller
}

fn on_event(
    controller: &mut CaptureController,
    event: DeviceEvent,
    in_flight: &mut Option<InFlight>,
    backlog: &mut VecDeque<Queued>,
) {
    let name = event.name();
    match controller.apply_event(event) {
        Ok(EventFollowUp::Nothing) => {}
        Ok(EventFollowUp::RefreshDevices) => {
            if in_flight.is_some() {
                backlog.push_back(Queued::Refresh);
            } else {
                *in_flight = refresh(controller);
            }
        }
        Err(err @ ClientError::CommunicationFailed(_)) => {
            if let Some(call) = in_flight.take() {
                warn!("abandoning outstanding device call: {err}");
                call.abandon(err);
            }
        }
        Err(err) => debug!("{name} event not applied: {err}"),
    }
}

/// Wait for the outstanding call and apply its outcome. The call stays in
/// `slot` until it has finished, so dropping this future loses nothing.
async fn settle(slot: &mut Option<InFlight>, controller: &mut CaptureController) {
    match slot {
        Some(InFlight::Refresh(work)) => {
            let outcome = work.await;
            *slot = None;
            if let Err(err) = controller.finish_enumerate(outcome) {
                debug!("device list refresh failed: {err}");
            }
        }
        Some(InFlight::Enumerate { work, .. }) => {
            let outcome = work.await;
            if let Some(InFlight::Enumerate { reply, .. }) = slot.take() {
                let _ = reply.send(controller.finish_enumerate(outcome));
            }
        }
        Some(InFlight::Start { work, .. }) => {
            let outcome = work.await;
            if let Some(InFlight::Start { reply, .. }) = slot.take() {
                let _ = reply.send(controller.finish_start(outcome));
            }
        }
        Some(InFlight::Stop { work, .. }) => {
            let outcome = work.await;
            if let Some(InFlight::Stop { reply, .. }) = slot.take() {
                let _ = reply.send(controller.finish_stop(outcome));
            }
        }
        Some(InFlight::Report { work, .. }) => {
            let outcome = work.await;
            if let Some(InFlight::Report { reply, .. }) = slot.take() {
                let _ = reply.send(Ok(controller.finish_report(outcome)));
            }
        }
        None => std::future::pending::<()>().await,
    }
}

/// Run the command, or start its device call and hand that back.
fn dispatch(controller: &mut CaptureController, command: ClientCommand) -> Option<InFlight> {
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        ClientCommand::EnumerateDevices(reply) => match controller.begin_enumerate() {
            Ok(job) => Some(InFlight::Enumerate {
                work: Box::pin(job.run()),
                reply,
            }),
            Err(err) => {
                let _ = reply.send(Err(err));
                None
            }
        },
        ClientCommand::StartCapture { format, reply } => match controller.begin_start(format) {
            Ok(job) => Some(InFlight::Start {
                work: Box::pin(job.run()),
                reply,
            }),
            Err(err) => {
                let _ = reply.send(Err(err));
                None
            }
        },
        ClientCommand::StopCapture(reply) => match controller.begin_stop() {
            Some(job) => Some(InFlight::Stop {
                work: Box::pin(job.run()),
                reply,
            }),
            None => {
                let _ = reply.send(Ok(()));
                None
            }
        },
        ClientCommand::DeviceReport { index, reply } => match controller.begin_report(index) {
            Ok(job) => Some(InFlight::Report {
                work: Box::pin(job.run()),
                reply,
            }),
            Err(err) => {
                let _ = reply.send(Err(err));
                None
            }
        },
        ClientCommand::ClearSamples(reply) => {
            controller.clear_samples();
            let _ = reply.send(());
            None
        }
        ClientCommand::ClearLog(reply) => {
            controller.clear_log();
            let _ = reply.send(());
            None
        }
        ClientCommand::ExportDiagnostics { dir, reply } => {
            let _ = reply.send(controller.export_diagnostics(&dir));
            None
        }
        ClientCommand::RecentSamples { limit, reply } => {
            let _ = reply.send(controller.history().recent(limit).to_vec());
            None
        }
        ClientCommand::ActivityLog(reply) => {
            let _ = reply.send(controller.activity_log().snapshot());
            None
        }
    }
}

fn refresh(controller: &mut CaptureController) -> Option<InFlight> {
    match controller.begin_enumerate() {
        Ok(job) => Some(InFlight::Refresh(Box::pin(job.run()))),
        Err(err) => {
            debug!("device list refresh skipped: {err}");
            None
        }
    }
}

fn resume_backlog(
    controller: &mut CaptureController,
    backlog: &mut VecDeque<Queued>,
) -> Option<InFlight> {
    while let Some(queued) = backlog.pop_front() {
        let started = match queued {
            Queued::Command(command) => dispatch(controller, command),
            Queued::Refresh => refresh(controller),
        };
        if started.is_some() {
            return started;
        }
    }
    None
}

async fn shutdown(controller: &mut CaptureController) {
    if let Some(job) = controller.begin_stop() {
        match time::timeout(SHUTDOWN_STOP_LIMIT, job.run()).await {
            Ok(outcome) => {
                if let Err(err) = controller.finish_stop(outcome) {
                    warn!("capture stop during shutdown failed: {err}");
                }
            }
            Err(_) => warn!("device did not confirm the stop during shutdown"),
        }
    }
    controller.abandon_session(ClientError::AcquisitionStopFailed(
        "client shut down before the device confirmed the stop".into(),
    ));
}

/// Cloneable front door to the client task.
#[derive(Clone)]
pub struct ClientHandle {
    tx: mpsc::Sender<ClientCommand>,
    snapshots: watch::Receiver<ClientSnapshot>,
}

impl ClientHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> ClientCommand) -> ClientResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| ClientError::ClientStopped)?;
        rx.await.map_err(|_| ClientError::ClientStopped)
    }

    pub async fn enumerate_devices(&self) -> ClientResult<Vec<DeviceDescriptor>> {
        self.request(ClientCommand::EnumerateDevices).await?
    }

    pub async fn start_capture(&self, format: SampleFormat) -> ClientResult<()> {
        self.request(|reply| ClientCommand::StartCapture { format, reply })
            .await?
    }

    pub async fn stop_capture(&self) -> ClientResult<()> {
        self.request(ClientCommand::StopCapture).await?
    }

    pub async fn clear_samples(&self) -> ClientResult<()> {
        self.request(ClientCommand::ClearSamples).await
    }

    pub async fn clear_log(&self) -> ClientResult<()> {
        self.request(ClientCommand::ClearLog).await
    }

    pub async fn device_report(&self, index: usize) -> ClientResult<DeviceReport> {
        self.request(|reply| ClientCommand::DeviceReport { index, reply })
            .await?
    }

    pub async fn export_diagnostics(&self, dir: PathBuf) -> ClientResult<PathBuf> {
        self.request(|reply| ClientCommand::ExportDiagnostics { dir, reply })
            .await?
    }

    pub async fn recent_samples(&self, limit: usize) -> ClientResult<Vec<SampleRecord>> {
        self.request(|reply| ClientCommand::RecentSamples { limit, reply })
            .await
    }

    pub async fn activity_log(&self) -> ClientResult<Vec<LogEntry>> {
        self.request(ClientCommand::ActivityLog).await
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until the current session has accepted `count` samples. Returns
    /// the snapshot that satisfied it, or `None` on timeout or if the session
    /// ended first.
    pub async fn wait_for_samples(&self, count: u64, limit: Duration) -> Option<ClientSnapshot> {
        let mut rx = self.snapshots.clone();
        let waited = time::timeout(
            limit,
            rx.wait_for(|snapshot| {
                snapshot.session.sample_count >= count || !snapshot.session.state.in_session()
            }),
        )
        .await;

        let reached = match waited {
            Ok(Ok(snapshot)) if snapshot.session.sample_count >= count => Some(snapshot.clone()),
            _ => None,
        };
        reached
    }
}
