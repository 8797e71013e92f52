//! Price history loading.
//!
//! Accepts a JSON array (`.json`) or JSON Lines (`.jsonl`, `.ndjson`) of
//! `{ts, open, high, low, close, volume?}` objects. Every bar is checked
//! before replay starts; a single bad bar rejects the file.

use std::fmt;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::fills::Bar;

/// Supported history formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarFormat {
    /// One JSON array.
    JsonArray,
    /// One JSON object per line.
    JsonLines,
}

impl BarFormat {
    /// Format implied by a file extension.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(Self::JsonArray),
            "jsonl" | "ndjson" => Some(Self::JsonLines),
            _ => None,
        }
    }
}

/// Defect found in a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BarDefect {
    /// A price is zero or negative.
    NonPositivePrice,
    /// High is below open or close.
    HighBelowBody,
    /// Low is above open or close.
    LowAboveBody,
    /// Volume is negative.
    NegativeVolume,
    /// Timestamp not after the previous bar.
    NotIncreasing,
}

impl fmt::Display for BarDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositivePrice => write!(f, "NON_POSITIVE_PRICE"),
            Self::HighBelowBody => write!(f, "HIGH_BELOW_BODY"),
            Self::LowAboveBody => write!(f, "LOW_ABOVE_BODY"),
            Self::NegativeVolume => write!(f, "NEGATIVE_VOLUME"),
            Self::NotIncreasing => write!(f, "NOT_INCREASING"),
        }
    }
}

/// Errors raised while loading price history.
#[derive(Debug, Error)]
pub enum BarLoadError {
    /// File could not be read.
    #[error("failed to read bars {path}: {source}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Extension is not a supported format.
    #[error("unsupported price history format: {path}")]
    UnsupportedFormat {
        /// Offending path.
        path: String,
    },

    /// JSON could not be parsed.
    #[error("failed to parse bars (line {line:?}): {source}")]
    Parse {
        /// Line number for JSON Lines input.
        line: Option<usize>,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A bar failed validation.
    #[error("invalid bar at ts {ts}: {defect}")]
    Invalid {
        /// Bar timestamp.
        ts: i64,
        /// Defect.
        defect: BarDefect,
    },

    /// No bars in the input.
    #[error("price history is empty")]
    Empty,
}

/// Load and validate bars from a file; the format follows the extension.
pub fn load_bars(path: &Path) -> Result<Vec<Bar>, BarLoadError> {
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(BarFormat::from_extension)
        .ok_or_else(|| BarLoadError::UnsupportedFormat {
            path: path.display().to_string(),
        })?;
    let text = std::fs::read_to_string(path).map_err(|source| BarLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_bars(&text, format)
}

/// Parse and validate bars from text.
pub fn parse_bars(text: &str, format: BarFormat) -> Result<Vec<Bar>, BarLoadError> {
    let bars: Vec<Bar> = match format {
        BarFormat::JsonArray => {
            serde_json::from_str(text).map_err(|source| BarLoadError::Parse { line: None, source })?
        }
        BarFormat::JsonLines => text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|source| BarLoadError::Parse {
                    line: Some(i + 1),
                    source,
                })
            })
            .collect::<Result<_, _>>()?,
    };
    validate_bars(&bars)?;
    Ok(bars)
}

/// Check OHLC consistency and strictly increasing timestamps.
pub fn validate_bars(bars: &[Bar]) -> Result<(), BarLoadError> {
    if bars.is_empty() {
        return Err(BarLoadError::Empty);
    }
    let mut prev_ts: Option<i64> = None;
    for bar in bars {
        let invalid = |defect| BarLoadError::Invalid { ts: bar.ts, defect };
        if [bar.open, bar.high, bar.low, bar.close]
            .iter()
            .any(|p| *p <= Decimal::ZERO)
        {
            return Err(invalid(BarDefect::NonPositivePrice));
        }
        if bar.high < bar.open.max(bar.close) {
            return Err(invalid(BarDefect::HighBelowBody));
        }
        if bar.low > bar.open.min(bar.close) {
            return Err(invalid(BarDefect::LowAboveBody));
        }
        if bar.volume.is_some_and(|v| v < Decimal::ZERO) {
            return Err(invalid(BarDefect::NegativeVolume));
        }
        if prev_ts.is_some_and(|prev| bar.ts <= prev) {
            return Err(invalid(BarDefect::NotIncreasing));
        }
        prev_ts = Some(bar.ts);
    }
    Ok(())
}
