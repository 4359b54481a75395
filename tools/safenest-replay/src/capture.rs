//! Accelerometer capture files.
//!
//! A capture is CSV with a header row and one sample per line:
//!
//! ```text
//! timestamp_ms,x,y,z
//! 0,0.12,-0.30,9.79
//! 20,0.10,-0.28,9.81
//! ```
//!
//! Timestamps are milliseconds from the start of the recording and must not
//! go backwards. Gaps are fine.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("cannot open capture: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed capture: {0}")]
    Csv(#[from] csv::Error),

    #[error("row {row}: timestamp {timestamp_ms} ms is before previous {previous_ms} ms")]
    OutOfOrder {
        row: usize,
        previous_ms: u64,
        timestamp_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CaptureRow {
    pub timestamp_ms: u64,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl CaptureRow {
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

pub fn load(path: &Path) -> Result<Vec<CaptureRow>, CaptureError> {
    read(File::open(path)?)
}

pub fn read(reader: impl Read) -> Result<Vec<CaptureRow>, CaptureError> {
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(reader);

    let mut rows: Vec<CaptureRow> = Vec::new();
    for (index, record) in csv.deserialize().enumerate() {
        let row: CaptureRow = record?;
        if let Some(previous) = rows.last() {
            if row.timestamp_ms < previous.timestamp_ms {
                return Err(CaptureError::OutOfOrder {
                    row: index + 1,
                    previous_ms: previous.timestamp_ms,
                    timestamp_ms: row.timestamp_ms,
                });
            }
        }
        rows.push(row);
    }
    Ok(rows)
}
