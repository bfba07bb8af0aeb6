//! Data models for remote GPU metrics
//!
//! All types are GUI-free and serializable so front ends can print them as
//! JSON without an intermediate representation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::FetchError;

/// One GPU as reported by a single `nvidia-smi` row.
///
/// Readings are produced only by [`super::ReadingParser`] and are read-only
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuReading {
    index: u32,
    name: String,
    utilization_percent: f32,
    memory_used_mb: u64,
    memory_total_mb: u64,
    memory_percent: f32,
    temperature_c: i32,
    power_draw_w: f32,
}

impl GpuReading {
    pub(crate) fn new(
        index: u32,
        name: String,
        utilization_percent: f32,
        memory_used_mb: u64,
        memory_total_mb: u64,
        temperature_c: i32,
        power_draw_w: f32,
    ) -> Self {
        Self {
            index,
            name,
            utilization_percent,
            memory_used_mb,
            memory_total_mb,
            memory_percent: memory_percent(memory_used_mb, memory_total_mb),
            temperature_c,
            power_draw_w,
        }
    }

    /// Device index as reported by the driver
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Product name (e.g. "Tesla T4")
    pub fn name(&self) -> &str {
        &self.name
    }

    /// GPU utilization (0.0–100.0)
    pub const fn utilization_percent(&self) -> f32 {
        self.utilization_percent
    }

    /// Used framebuffer memory (MiB)
    pub const fn memory_used_mb(&self) -> u64 {
        self.memory_used_mb
    }

    /// Total framebuffer memory (MiB)
    pub const fn memory_total_mb(&self) -> u64 {
        self.memory_total_mb
    }

    /// Memory usage as a percentage (0.0–100.0), 0 when total is unknown
    pub const fn memory_percent(&self) -> f32 {
        self.memory_percent
    }

    /// Core temperature (°C)
    pub const fn temperature_c(&self) -> i32 {
        self.temperature_c
    }

    /// Board power draw (W)
    pub const fn power_draw_w(&self) -> f32 {
        self.power_draw_w
    }
}

fn memory_percent(used_mb: u64, total_mb: u64) -> f32 {
    if total_mb == 0 {
        return 0.0;
    }
    ((used_mb as f64 / total_mb as f64) * 100.0).clamp(0.0, 100.0) as f32
}

/// Outcome of one polling attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum SnapshotStatus {
    /// At least one reading was parsed
    Ok,
    /// The remote command succeeded but no row could be parsed
    Empty,
    /// Transport or remote failure
    Error(FetchError),
}

/// The result of one polling attempt against a host.
///
/// `status` is [`SnapshotStatus::Ok`] exactly when `readings` is non-empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Readings in the order the remote host reported them
    pub readings: Vec<GpuReading>,
    /// Host the readings were taken from
    pub hostname: String,
    /// When the fetch completed
    pub captured_at: DateTime<Utc>,
    /// Outcome of the fetch
    pub status: SnapshotStatus,
}

impl Snapshot {
    /// Builds a snapshot from parsed readings, deriving `Ok` or `Empty`
    #[must_use]
    pub fn from_readings(hostname: impl Into<String>, readings: Vec<GpuReading>) -> Self {
        let status = if readings.is_empty() {
            SnapshotStatus::Empty
        } else {
            SnapshotStatus::Ok
        };
        Self {
            readings,
            hostname: hostname.into(),
            captured_at: Utc::now(),
            status,
        }
    }

    /// Builds a failed snapshot with no readings
    #[must_use]
    pub fn failed(hostname: impl Into<String>, error: FetchError) -> Self {
        let status = if error == FetchError::Empty {
            SnapshotStatus::Empty
        } else {
            SnapshotStatus::Error(error)
        };
        Self {
            readings: Vec::new(),
            hostname: hostname.into(),
            captured_at: Utc::now(),
            status,
        }
    }

    /// Returns true if the snapshot carries readings
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == SnapshotStatus::Ok
    }

    /// Returns the failure of this snapshot, if any.
    ///
    /// An empty snapshot reports [`FetchError::Empty`].
    #[must_use]
    pub fn error(&self) -> Option<FetchError> {
        match &self.status {
            SnapshotStatus::Ok => None,
            SnapshotStatus::Empty => Some(FetchError::Empty),
            SnapshotStatus::Error(err) => Some(err.clone()),
        }
    }

    /// Utilization of the first two GPUs, the values shown in the icon
    #[must_use]
    pub fn icon_percentages(&self) -> Vec<f32> {
        if !self.is_ok() {
            return Vec::new();
        }
        self.readings
            .iter()
            .take(2)
            .map(GpuReading::utilization_percent)
            .collect()
    }
}
