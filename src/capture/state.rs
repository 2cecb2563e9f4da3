use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Quality, SampleFormat, SampleRecord};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CaptureState {
    Idle,
    Starting,
    Active,
    Stopping,
}

impl Default for CaptureState {
    fn default() -> Self {
        CaptureState::Idle
    }
}

impl CaptureState {
    /// A session exists from the start request until the stop resolves.
    pub fn in_session(&self) -> bool {
        !matches!(self, CaptureState::Idle)
    }
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSession {
    pub state: CaptureState,
    pub session_id: Option<String>,
    pub format: Option<SampleFormat>,
    pub sample_count: u64,
    pub started_at: Option<DateTime<Utc>>,
    /// Latest device-reported quality, from a sample or a quality event.
    pub last_quality: Quality,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, session_id: String, format: SampleFormat, started_at: DateTime<Utc>) {
        *self = Self {
            state: CaptureState::Starting,
            session_id: Some(session_id),
            format: Some(format),
            sample_count: 0,
            started_at: Some(started_at),
            last_quality: Quality::NotAvailable,
        };
    }

    pub fn activate(&mut self) {
        self.state = CaptureState::Active;
    }

    pub fn begin_stop(&mut self) {
        self.state = CaptureState::Stopping;
    }

    /// Back to `Idle`. The last session's count and quality stay visible
    /// until the next start or a clear.
    pub fn reset(&mut self) {
        self.state = CaptureState::Idle;
        self.session_id = None;
        self.format = None;
        self.started_at = None;
    }

    pub fn record_quality(&mut self, quality: Quality) {
        if quality.score().is_some() {
            self.last_quality = quality;
        }
    }

    pub fn clear_counters(&mut self) {
        self.sample_count = 0;
        self.last_quality = Quality::NotAvailable;
    }
}

/// Accepted samples in arrival order. Unbounded; the operator view caps what
/// it displays with [`recent`](Self::recent).
#[derive(Debug, Clone, Default)]
pub struct SampleHistory {
    records: Vec<SampleRecord>,
    next_sequence: u64,
}

impl SampleHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence ids start at 1 and are never handed out twice, even across
    /// [`clear`](Self::clear).
    pub fn next_sequence_id(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    pub fn push(&mut self, record: SampleRecord) {
        self.records.push(record);
    }

    pub fn latest(&self) -> Option<&SampleRecord> {
        self.records.last()
    }

    pub fn recent(&self, limit: usize) -> &[SampleRecord] {
        let start = self.records.len().saturating_sub(limit);
        &self.records[start..]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
