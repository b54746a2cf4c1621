//! Progress snapshot computation and throughput tracking.

use std::time::Instant;

use chunklift_model::{PartStatus, ProgressSnapshot, UploadPart, UploadSession};

/// Tracks bytes confirmed during the current run for rate/ETA estimates.
///
/// Only bytes observed by *this* runtime count; parts uploaded before a
/// restart would skew the rate.
#[derive(Debug)]
pub(crate) struct SpeedTracker {
    started: Instant,
    bytes: u64,
}

impl SpeedTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            bytes: 0,
        }
    }

    pub fn add(&mut self, bytes: u64) {
        self.bytes += bytes;
    }

    /// Average throughput since the runtime started, if any bytes moved.
    pub fn bytes_per_second(&self) -> Option<u64> {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        if self.bytes == 0 || elapsed_ms == 0 {
            return None;
        }
        Some(self.bytes * 1000 / elapsed_ms)
    }
}

/// Builds a progress snapshot from the persisted session and parts.
pub fn build_snapshot(
    session: &UploadSession,
    parts: &[UploadPart],
    current_part: Option<u32>,
    bytes_per_second: Option<u64>,
) -> ProgressSnapshot {
    let uploaded_bytes: u64 = parts
        .iter()
        .filter(|p| p.status == PartStatus::Uploaded)
        .map(|p| p.range.len())
        .sum();
    let uploaded_parts = parts
        .iter()
        .filter(|p| p.status == PartStatus::Uploaded)
        .count() as u32;

    let overall_progress = if session.total_bytes == 0 {
        0.0
    } else {
        uploaded_bytes as f64 / session.total_bytes as f64
    };

    let eta_ms = bytes_per_second.and_then(|bps| {
        if bps == 0 {
            return None;
        }
        let remaining = session.total_bytes.saturating_sub(uploaded_bytes);
        Some(remaining * 1000 / bps)
    });

    ProgressSnapshot {
        session_id: session.session_id.clone(),
        file_name: session.file_name.clone(),
        total_bytes: session.total_bytes,
        uploaded_bytes,
        total_parts: session.total_parts,
        uploaded_parts,
        current_part,
        current_part_progress: if current_part.is_some() { 0.0 } else { 1.0 },
        overall_progress,
        status: session.status,
        bytes_per_second,
        eta_ms,
        error: session.error_message.clone(),
    }
}
