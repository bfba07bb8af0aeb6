//! Parser for `nvidia-smi` CSV output
//!
//! The remote query returns one device per line with seven comma-separated
//! fields and no header or unit suffixes. A malformed line is skipped and
//! logged; it never invalidates the rest of the batch.

use std::str::FromStr;

use super::metrics::GpuReading;

/// Errors that can occur while parsing a single CSV row
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonitoringError {
    /// Row has fewer than the required seven fields
    #[error("Expected {expected} fields, found {found}")]
    FieldCount {
        /// Number of fields the query contract requires
        expected: usize,
        /// Number of fields in the row
        found: usize,
    },
    /// A numeric field could not be converted
    #[error("Invalid {field} value: {value:?}")]
    InvalidNumber {
        /// Name of the offending column
        field: &'static str,
        /// Raw field text
        value: String,
    },
}

/// Result type for parsing operations
pub type MonitoringResult<T> = Result<T, MonitoringError>;

/// Remote command that lists every GPU as one CSV row.
///
/// Column order: index, name, utilization %, memory used MiB, memory total
/// MiB, temperature °C, power draw W.
pub const GPU_QUERY_COMMAND: &str = concat!(
    "nvidia-smi ",
    "--query-gpu=index,name,utilization.gpu,memory.used,memory.total,temperature.gpu,power.draw ",
    "--format=csv,noheader,nounits",
);

/// Number of columns requested by [`GPU_QUERY_COMMAND`]
pub const FIELD_COUNT: usize = 7;

/// Stateless parser for `nvidia-smi` query output
pub struct ReadingParser;

impl ReadingParser {
    /// Parses the full output of [`GPU_QUERY_COMMAND`].
    ///
    /// Blank lines are ignored. Rows that fail [`Self::parse_line`] are
    /// dropped with a warning. The returned readings keep input order.
    #[must_use]
    pub fn parse(output: &str) -> Vec<GpuReading> {
        let mut readings = Vec::new();
        let mut skipped = 0usize;

        for (line_no, line) in output.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match Self::parse_line(line) {
                Ok(reading) => readings.push(reading),
                Err(err) => {
                    skipped += 1;
                    tracing::warn!(
                        line = line_no + 1,
                        raw = %line.trim(),
                        error = %err,
                        "Skipping malformed GPU row"
                    );
                }
            }
        }

        if skipped > 0 {
            tracing::debug!(
                parsed = readings.len(),
                skipped,
                "Parsed GPU query output with skipped rows"
            );
        }

        readings
    }

    /// Parses a single CSV row into a [`GpuReading`].
    ///
    /// Format: `0, Tesla T4, 62.0, 4096, 16384, 58, 45.2`
    ///
    /// # Errors
    ///
    /// Returns [`MonitoringError::FieldCount`] for rows with fewer than seven
    /// fields and [`MonitoringError::InvalidNumber`] when a numeric column
    /// does not parse (e.g. `[N/A]` power readings).
    pub fn parse_line(line: &str) -> MonitoringResult<GpuReading> {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < FIELD_COUNT {
            return Err(MonitoringError::FieldCount {
                expected: FIELD_COUNT,
                found: parts.len(),
            });
        }

        let index = Self::number(parts[0], "index")?;
        let utilization: f32 = Self::number(parts[2], "utilization")?;
        let memory_used = Self::number(parts[3], "memory.used")?;
        let memory_total = Self::number(parts[4], "memory.total")?;
        let temperature = Self::number(parts[5], "temperature")?;
        let power: f32 = Self::number(parts[6], "power.draw")?;

        if !utilization.is_finite() {
            return Err(MonitoringError::InvalidNumber {
                field: "utilization",
                value: parts[2].to_string(),
            });
        }

        Ok(GpuReading::new(
            index,
            parts[1].to_string(),
            utilization.clamp(0.0, 100.0),
            memory_used,
            memory_total,
            temperature,
            power,
        ))
    }

    fn number<T: FromStr>(value: &str, field: &'static str) -> MonitoringResult<T> {
        value.parse().map_err(|_| MonitoringError::InvalidNumber {
            field,
            value: value.to_string(),
        })
    }
}
