use thiserror::Error;

/// Failures surfaced by the capture client.
///
/// Normalization failures (`InvalidPayload`) only ever drop the offending
/// event. Session failures propagate to the caller of the action and leave
/// the session `Idle`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("fingerprint device API is not available")]
    ApiUnavailable,

    #[error("capture already in progress")]
    AlreadyCapturing,

    #[error("device enumeration failed: {0}")]
    DeviceEnumerationFailed(String),

    #[error("invalid sample payload: {0}")]
    InvalidPayload(String),

    #[error("capture start failed: {0}")]
    AcquisitionStartFailed(String),

    #[error("capture stop failed: {0}")]
    AcquisitionStopFailed(String),

    #[error("communication with the device service failed: {0}; reinstall or reconnect the device service")]
    CommunicationFailed(String),

    #[error("device {0} not found")]
    DeviceNotFound(usize),

    #[error("diagnostic export failed: {0}")]
    Export(String),

    #[error("client task is no longer running")]
    ClientStopped,
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
