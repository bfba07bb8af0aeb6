//! Plain-text renderings of a snapshot for terminals and menus

use std::fmt::Write as _;

use chrono::Local;

use super::metrics::{GpuReading, Snapshot};
use crate::icon::clamp_percent;

/// Default width of [`progress_bar`] in characters
pub const PROGRESS_BAR_WIDTH: usize = 25;

const FILLED: char = '▓';
const EMPTY: char = '░';

/// Headline shown when the latest fetch failed
pub const ERROR_HEADLINE: &str = "Failed to connect to GPU server";

/// Text gauge such as `▓▓▓▓░░░░░░ 40%`.
///
/// The filled part is truncated, never rounded up, so 99.9% never shows
/// a full bar.
#[must_use]
pub fn progress_bar(percent: f32, width: usize) -> String {
    let percent = clamp_percent(percent);
    let filled = ((width as f64 * f64::from(percent)) / 100.0).floor() as usize;
    let filled = filled.min(width);

    let mut bar = String::with_capacity(width * 3 + 6);
    bar.extend(std::iter::repeat_n(FILLED, filled));
    bar.extend(std::iter::repeat_n(EMPTY, width - filled));
    let _ = write!(bar, " {}%", percent as u32);
    bar
}

/// Label shown next to the status icon, e.g. ` 62%/35%`.
///
/// The second value is 0 when only one GPU is present. Returns `None`
/// when the snapshot has no readings.
#[must_use]
pub fn title_label(snapshot: &Snapshot) -> Option<String> {
    if !snapshot.is_ok() {
        return None;
    }
    let first = snapshot.readings.first()?.utilization_percent();
    let second = snapshot
        .readings
        .get(1)
        .map_or(0.0, GpuReading::utilization_percent);
    Some(format!(" {}%/{}%", first as u32, second as u32))
}

/// Error-state lines: headline, then a hint naming the host and the cause
#[must_use]
pub fn error_lines(snapshot: &Snapshot) -> Option<Vec<String>> {
    let err = snapshot.error()?;
    Some(vec![
        format!("⚠️  {ERROR_HEADLINE}"),
        format!("Check SSH access to {}", snapshot.hostname),
        err.to_string(),
    ])
}

/// Multi-line report of every GPU in the snapshot
#[must_use]
pub fn format_summary(snapshot: &Snapshot) -> String {
    if let Some(lines) = error_lines(snapshot) {
        return lines.join("\n");
    }

    let mut out = format!(
        "Server: {} (Updated: {})\n",
        snapshot.hostname,
        snapshot.captured_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    );
    for gpu in &snapshot.readings {
        let _ = write!(
            out,
            "\nGPU {}: {}\n  Utilization: {:.0}%\n  Memory: {} MB / {} MB ({:.0}%)\n  Temperature: {}°C\n  Power: {:.1}W\n",
            gpu.index(),
            gpu.name(),
            gpu.utilization_percent(),
            gpu.memory_used_mb(),
            gpu.memory_total_mb(),
            gpu.memory_percent(),
            gpu.temperature_c(),
            gpu.power_draw_w(),
        );
    }
    out
}

/// Compact gauge panel for the first two GPUs, as shown in a status menu
#[must_use]
pub fn format_panel(snapshot: &Snapshot) -> String {
    if let Some(lines) = error_lines(snapshot) {
        return lines.join("\n");
    }

    let mut out = format!(
        "Updated: {}\n",
        snapshot.captured_at.with_timezone(&Local).format("%H:%M:%S")
    );
    for slot in 0..2 {
        match snapshot.readings.get(slot) {
            Some(gpu) => {
                let _ = write!(
                    out,
                    "\nGPU {}\n  Util: {}\n  Mem:  {}\n  {:.1}GB/{:.1}GB | {}°C | {:.1}W\n",
                    gpu.index(),
                    progress_bar(gpu.utilization_percent(), PROGRESS_BAR_WIDTH),
                    progress_bar(gpu.memory_percent(), PROGRESS_BAR_WIDTH),
                    gpu.memory_used_mb() as f64 / 1024.0,
                    gpu.memory_total_mb() as f64 / 1024.0,
                    gpu.temperature_c(),
                    gpu.power_draw_w(),
                );
            }
            None => {
                let _ = write!(out, "\nGPU {slot}: Not available\n");
            }
        }
    }
    out
}
