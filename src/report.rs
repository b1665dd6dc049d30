use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::time::Duration;

use camino::Utf8Path;
use serde::{Serialize, Serializer};

use crate::compare::{ComparisonResult, LocalComparisonResult};
use crate::error::MagvalError;

/// Elapsed time serialized as fractional seconds.
#[derive(Debug, Clone, Copy)]
pub struct Seconds(pub Duration);

impl Serialize for Seconds {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0.as_secs_f64())
    }
}

/// Appends one JSON document per line and flushes after each record, so a
/// run interrupted mid-batch still leaves every completed record on disk.
pub struct ReportWriter<W: Write> {
    inner: W,
}

impl ReportWriter<BufWriter<File>> {
    pub fn append(path: &Utf8Path) -> Result<Self, MagvalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| MagvalError::Filesystem(format!("{path}: {err}")))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> ReportWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write<T: Serialize>(&mut self, record: &T) -> Result<(), MagvalError> {
        let line =
            serde_json::to_string(record).map_err(|err| MagvalError::Report(err.to_string()))?;
        self.inner
            .write_all(line.as_bytes())
            .and_then(|()| self.inner.write_all(b"\n"))
            .and_then(|()| self.inner.flush())
            .map_err(|err| MagvalError::Report(err.to_string()))
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Serializable form of a server-to-server comparison. Vector columns are
/// written as row lists so the record stays plain JSON.
#[derive(Debug, Serialize)]
pub struct ComparisonRecord {
    pub info: crate::compare::ComparisonInfo,
    pub timestamps: Vec<String>,
    pub tested: std::collections::BTreeMap<String, Vec<[f64; 3]>>,
    pub reference: std::collections::BTreeMap<String, Vec<[f64; 3]>>,
}

impl From<&ComparisonResult> for ComparisonRecord {
    fn from(result: &ComparisonResult) -> Self {
        Self {
            info: result.info.clone(),
            timestamps: iso_timestamps(&result.timestamps),
            tested: rows_of(&result.tested),
            reference: rows_of(&result.reference),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LocalComparisonRecord {
    pub info: crate::compare::ComparisonInfo,
    pub timestamps: Vec<String>,
    pub tested: std::collections::BTreeMap<String, Vec<[f64; 3]>>,
    pub local: std::collections::BTreeMap<String, Vec<[f64; 3]>>,
    pub reread: std::collections::BTreeMap<String, Vec<[f64; 3]>>,
}

impl From<&LocalComparisonResult> for LocalComparisonRecord {
    fn from(result: &LocalComparisonResult) -> Self {
        Self {
            info: result.info.clone(),
            timestamps: iso_timestamps(&result.timestamps),
            tested: rows_of(&result.tested),
            local: rows_of(&result.local),
            reread: rows_of(&result.reread),
        }
    }
}

fn iso_timestamps(times: &[chrono::DateTime<chrono::Utc>]) -> Vec<String> {
    times
        .iter()
        .map(|time| time.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string())
        .collect()
}

fn rows_of(
    columns: &std::collections::BTreeMap<String, ndarray::Array2<f64>>,
) -> std::collections::BTreeMap<String, Vec<[f64; 3]>> {
    columns
        .iter()
        .map(|(name, array)| {
            let rows = array
                .rows()
                .into_iter()
                .map(|row| [row[0], row[1], row[2]])
                .collect();
            (name.clone(), rows)
        })
        .collect()
}
