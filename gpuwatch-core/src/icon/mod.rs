//! Status icon rendering
//!
//! Maps GPU utilization to a small square PNG: one or two vertical bars
//! coloured by load band, or a red cross when there is nothing to show.
//! Rendering is a pure function of the input percentages.

mod render;

use serde::Serialize;
use thiserror::Error;

use crate::monitoring::Snapshot;

pub use render::{BarRect, DEFAULT_ICON_SIZE, IconRenderer};

/// Errors from icon rendering
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IconError {
    /// The PNG encoder rejected the image
    #[error("Failed to encode icon PNG: {0}")]
    Encode(String),
}

/// Utilization band that selects the fill colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorBand {
    /// Below 50%
    Low,
    /// 50% up to (not including) 80%
    Medium,
    /// 80% and above
    High,
}

impl ColorBand {
    /// Band for a percentage (expects a clamped value)
    #[must_use]
    pub fn for_percent(percent: f32) -> Self {
        if percent < 50.0 {
            Self::Low
        } else if percent < 80.0 {
            Self::Medium
        } else {
            Self::High
        }
    }

    /// Fill colour as RGBA
    #[must_use]
    pub const fn rgba(self) -> [u8; 4] {
        match self {
            Self::Low => [0x48, 0xbb, 0x78, 0xff],
            Self::Medium => [0xed, 0x89, 0x36, 0xff],
            Self::High => [0xf5, 0x65, 0x65, 0xff],
        }
    }
}

/// One bar of the icon
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BarSpec {
    /// Utilization in 0..=100
    pub percent: f32,
    /// Fill colour band
    pub band: ColorBand,
}

impl BarSpec {
    /// Builds a bar, clamping `percent` to 0..=100 (NaN becomes 0)
    #[must_use]
    pub fn new(percent: f32) -> Self {
        let percent = clamp_percent(percent);
        Self {
            percent,
            band: ColorBand::for_percent(percent),
        }
    }
}

/// What to draw: no bars (error glyph), one bar or two bars
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RenderSpec {
    bars: Vec<BarSpec>,
}

impl RenderSpec {
    /// Maximum number of bars drawn
    pub const MAX_BARS: usize = 2;

    /// Builds a spec from raw percentages; values beyond the second are ignored
    #[must_use]
    pub fn from_percentages(percentages: &[f32]) -> Self {
        Self {
            bars: percentages
                .iter()
                .take(Self::MAX_BARS)
                .map(|&p| BarSpec::new(p))
                .collect(),
        }
    }

    /// Spec for a snapshot: the first two GPUs when the fetch succeeded,
    /// the error glyph otherwise
    #[must_use]
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self::from_percentages(&snapshot.icon_percentages())
    }

    /// Bars to draw, left to right
    #[must_use]
    pub fn bars(&self) -> &[BarSpec] {
        &self.bars
    }

    /// Returns true if the error glyph is drawn
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.bars.is_empty()
    }
}

/// Clamps to 0..=100, mapping NaN to 0
#[must_use]
pub fn clamp_percent(percent: f32) -> f32 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}
