//! OpenBCI raw EXG CSV layout
//!
//! ## File Format
//!
//! ```text
//! %OpenBCI Raw EXG Data
//! %Number of channels = 16
//! %Sample Rate = 125 Hz
//! %Board = OpenBCI_GUI$BoardCytonSerialDaisy
//! Sample Index,EXG Channel 0,...,EXG Channel 15,Accel Channel 0,...,Annotations
//! 0,12.5,-3.0,...,0,0,...,0,T1
//! ```
//!
//! Fields are separated by `,` and lines end with `\r\n`. Sixteen auxiliary
//! columns the source never produces are written as `0`. The column order and
//! count are consumed by external analysis tooling and must not change.

use crate::marker::Marker;
use std::fmt::Write as _;
use std::io::BufRead;
use thiserror::Error;

/// Record terminator
pub const LINE_TERMINATOR: &str = "\r\n";

/// Field separator
pub const DELIMITER: char = ',';

/// Auxiliary columns following the EXG channels, in file order
pub const AUX_COLUMNS: [&str; 16] = [
    "Accel Channel 0",
    "Accel Channel 1",
    "Accel Channel 2",
    "Other",
    "Other.1",
    "Other.2",
    "Other.3",
    "Other.4",
    "Other.5",
    "Other.6",
    "Analog Channel 0",
    "Analog Channel 1",
    "Analog Channel 2",
    "Timestamp",
    "Other.7",
    "Timestamp (Formatted)",
];

/// Header and row layout for a given channel count and rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingFormat {
    pub channel_count: usize,
    pub sample_rate: u32,
}

impl RecordingFormat {
    pub fn new(channel_count: usize, sample_rate: u32) -> Self {
        Self {
            channel_count,
            sample_rate,
        }
    }

    /// Board identity written in the `%Board` line
    pub fn board_identity(&self) -> &'static str {
        match self.channel_count {
            16 => "OpenBCI_GUI$BoardCytonSerialDaisy",
            8 => "OpenBCI_GUI$BoardCytonSerial",
            _ => "OpenBCI_GUI$BoardSynthetic",
        }
    }

    /// Metadata lines plus the column header row, terminators included
    pub fn header(&self) -> String {
        let mut out = String::new();
        out.push_str("%OpenBCI Raw EXG Data");
        out.push_str(LINE_TERMINATOR);
        let _ = write!(out, "%Number of channels = {}{}", self.channel_count, LINE_TERMINATOR);
        let _ = write!(out, "%Sample Rate = {} Hz{}", self.sample_rate, LINE_TERMINATOR);
        let _ = write!(out, "%Board = {}{}", self.board_identity(), LINE_TERMINATOR);
        out.push_str(&self.column_names().join(","));
        out.push_str(LINE_TERMINATOR);
        out
    }

    /// Full column header, `Sample Index` through `Annotations`
    pub fn column_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.column_count());
        names.push("Sample Index".to_string());
        names.extend((0..self.channel_count).map(|i| format!("EXG Channel {i}")));
        names.extend(AUX_COLUMNS.iter().map(|s| s.to_string()));
        names.push("Annotations".to_string());
        names
    }

    pub fn column_count(&self) -> usize {
        self.channel_count + AUX_COLUMNS.len() + 2
    }

    /// One data row, terminator included
    pub fn format_row(&self, index: u64, channels: &[f64], marker: Option<Marker>) -> String {
        let mut row = String::with_capacity(16 * (self.channel_count + AUX_COLUMNS.len()));
        let _ = write!(row, "{index}");
        for &value in channels {
            row.push(DELIMITER);
            push_value(&mut row, value);
        }
        for _ in 0..AUX_COLUMNS.len() {
            row.push(DELIMITER);
            row.push('0');
        }
        row.push(DELIMITER);
        if let Some(marker) = marker {
            row.push_str(marker.code());
        }
        row.push_str(LINE_TERMINATOR);
        row
    }
}

/// Shortest round-trip decimal as the OpenBCI tooling writes it
///
/// Integral values keep one decimal (`-3.0`). Decimal exponents below -4 or
/// from 16 up switch to scientific notation with a signed two-digit exponent
/// (`1e-05`, `2.5e+16`).
fn push_value(out: &mut String, value: f64) {
    if !value.is_finite() {
        let _ = write!(out, "{value}");
        return;
    }
    let scientific = format!("{value:e}");
    let (mantissa, exponent) = scientific
        .split_once('e')
        .and_then(|(m, e)| Some((m, e.parse::<i32>().ok()?)))
        .unwrap_or((scientific.as_str(), 0));

    if value != 0.0 && !(-4..16).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        let _ = write!(out, "{mantissa}e{sign}{:02}", exponent.unsigned_abs());
    } else if value.fract() == 0.0 {
        let _ = write!(out, "{value:.1}");
    } else {
        let _ = write!(out, "{value}");
    }
}

/// Errors while re-reading a recording
#[derive(Error, Debug)]
pub enum RecordingParseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing header line: {0}")]
    MissingHeader(&'static str),

    #[error("line {line}: {message}")]
    BadRow { line: usize, message: String },
}

/// One parsed data row
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRow {
    pub index: u64,
    pub channels: Vec<f64>,
    pub marker: Option<Marker>,
}

/// A recording re-read from disk
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub format: RecordingFormat,
    pub board: String,
    pub rows: Vec<RecordedRow>,
}

impl Recording {
    /// `(sample index, marker)` for every annotated row
    pub fn markers(&self) -> Vec<(u64, Marker)> {
        self.rows
            .iter()
            .filter_map(|r| r.marker.map(|m| (r.index, m)))
            .collect()
    }
}

/// Parse a recording written by [`RecordingFormat`]
pub fn read_recording<R: BufRead>(reader: R) -> Result<Recording, RecordingParseError> {
    let mut channel_count = None;
    let mut sample_rate = None;
    let mut board = None;
    let mut columns_seen = false;
    let mut rows = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = i + 1;

        if let Some(meta) = line.strip_prefix('%') {
            if let Some(v) = meta.strip_prefix("Number of channels = ") {
                channel_count = v.trim().parse::<usize>().ok();
            } else if let Some(v) = meta.strip_prefix("Sample Rate = ") {
                sample_rate = v.trim().trim_end_matches("Hz").trim().parse::<u32>().ok();
            } else if let Some(v) = meta.strip_prefix("Board = ") {
                board = Some(v.trim().to_string());
            }
            continue;
        }

        let channels_n = channel_count.ok_or(RecordingParseError::MissingHeader("Number of channels"))?;

        if !columns_seen {
            if !line.starts_with("Sample Index") {
                return Err(RecordingParseError::MissingHeader("column header"));
            }
            columns_seen = true;
            continue;
        }

        if line.is_empty() {
            continue;
        }

        rows.push(parse_row(&line, channels_n, line_no)?);
    }

    let channel_count = channel_count.ok_or(RecordingParseError::MissingHeader("Number of channels"))?;
    let sample_rate = sample_rate.ok_or(RecordingParseError::MissingHeader("Sample Rate"))?;
    Ok(Recording {
        format: RecordingFormat::new(channel_count, sample_rate),
        board: board.ok_or(RecordingParseError::MissingHeader("Board"))?,
        rows,
    })
}

fn parse_row(line: &str, channel_count: usize, line_no: usize) -> Result<RecordedRow, RecordingParseError> {
    let bad = |message: String| RecordingParseError::BadRow {
        line: line_no,
        message,
    };

    let fields: Vec<&str> = line.split(DELIMITER).collect();
    let expected = channel_count + AUX_COLUMNS.len() + 2;
    if fields.len() != expected {
        return Err(bad(format!("expected {expected} fields, got {}", fields.len())));
    }

    let index = fields[0]
        .trim()
        .parse::<u64>()
        .map_err(|e| bad(format!("sample index: {e}")))?;
    let channels = fields[1..=channel_count]
        .iter()
        .map(|f| f.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| bad(format!("channel value: {e}")))?;
    let annotation = fields[expected - 1].trim();
    let marker = if annotation.is_empty() {
        None
    } else {
        Some(annotation.parse::<Marker>().map_err(|e| bad(e.to_string()))?)
    };

    Ok(RecordedRow {
        index,
        channels,
        marker,
    })
}
