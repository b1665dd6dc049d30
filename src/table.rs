use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::Deserialize;

use crate::error::MagvalError;
use crate::time_util::{
    CDF_EPOCH_TYPE, cdf_rawtime_to_mjd2000, epoch_ns_to_mjd2000, mjd2000_to_datetime,
    parse_datetime,
};

/// Time column of a decoded table, kept in its wire encoding so the exact
/// epoch conversions stay observable.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeColumn {
    /// int64 nanoseconds since the Unix epoch.
    EpochNs(Vec<i64>),
    /// Raw vendor epoch values with their CDF data-type code.
    CdfRaw { values: Array1<f64>, cdf_type: u32 },
}

impl TimeColumn {
    pub fn len(&self) -> usize {
        match self {
            TimeColumn::EpochNs(values) => values.len(),
            TimeColumn::CdfRaw { values, .. } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mjd2000(&self) -> Result<Array1<f64>, MagvalError> {
        match self {
            TimeColumn::EpochNs(values) => Ok(values
                .iter()
                .map(|&ns| epoch_ns_to_mjd2000(ns))
                .collect::<Array1<f64>>()),
            TimeColumn::CdfRaw { values, cdf_type } => cdf_rawtime_to_mjd2000(values, *cdf_type),
        }
    }

    pub fn datetimes(&self) -> Result<Vec<DateTime<Utc>>, MagvalError> {
        Ok(self
            .mjd2000()?
            .iter()
            .map(|&mjd| mjd2000_to_datetime(mjd))
            .collect())
    }

    /// Exact value equality. Mixed encodings compare through MJD2000.
    pub fn values_equal(&self, other: &TimeColumn) -> bool {
        match (self, other) {
            (TimeColumn::EpochNs(a), TimeColumn::EpochNs(b)) => a == b,
            (
                TimeColumn::CdfRaw {
                    values: a,
                    cdf_type: ta,
                },
                TimeColumn::CdfRaw {
                    values: b,
                    cdf_type: tb,
                },
            ) => ta == tb && a == b,
            _ => match (self.mjd2000(), other.mjd2000()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Scalar(Array1<f64>),
    Vector(Array2<f64>),
}

/// A decoded data response: a time column, named scalar/vector columns and
/// the list of product source files the server used.
#[derive(Debug, Clone)]
pub struct DataTable {
    pub timestamps: TimeColumn,
    columns: BTreeMap<String, Column>,
    pub sources: Vec<String>,
}

impl DataTable {
    pub fn new(timestamps: TimeColumn, sources: Vec<String>) -> Self {
        Self {
            timestamps,
            columns: BTreeMap::new(),
            sources,
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn insert_scalar(&mut self, name: &str, values: Array1<f64>) {
        self.columns.insert(name.to_string(), Column::Scalar(values));
    }

    pub fn insert_vector(&mut self, name: &str, values: Array2<f64>) {
        self.columns.insert(name.to_string(), Column::Vector(values));
    }

    pub fn scalar(&self, name: &str) -> Result<&Array1<f64>, MagvalError> {
        match self.columns.get(name) {
            Some(Column::Scalar(values)) => Ok(values),
            _ => Err(MagvalError::MissingColumn(name.to_string())),
        }
    }

    pub fn vector(&self, name: &str) -> Result<&Array2<f64>, MagvalError> {
        match self.columns.get(name) {
            Some(Column::Vector(values)) => Ok(values),
            _ => Err(MagvalError::MissingColumn(name.to_string())),
        }
    }

    /// Sample coordinates as (latitude deg, longitude deg, radius km) rows.
    /// The Radius column is delivered in metres.
    pub fn coords(&self) -> Result<Array2<f64>, MagvalError> {
        let lat = self.scalar("Latitude")?;
        let lon = self.scalar("Longitude")?;
        let radius = self.scalar("Radius")?;
        let mut coords = Array2::zeros((lat.len(), 3));
        for i in 0..lat.len() {
            coords[[i, 0]] = lat[i];
            coords[[i, 1]] = lon[i];
            coords[[i, 2]] = radius[i] * 1e-3;
        }
        Ok(coords)
    }

    pub fn times_mjd2000(&self) -> Result<Array1<f64>, MagvalError> {
        self.timestamps.mjd2000()
    }

    /// Decode a JSON data payload. The expected layout is the HAPI-style
    /// one: a `parameters` list describing name, type and optional vector
    /// size, then row-major `data`. Timestamps arrive as ISO strings
    /// (`isotime`), int64 nanoseconds (`x_epoch_ns`) or raw CDF_EPOCH
    /// values (`x_cdf_epoch`).
    pub fn from_json(bytes: &[u8]) -> Result<Self, MagvalError> {
        let payload: JsonPayload = serde_json::from_slice(bytes)
            .map_err(|err| MagvalError::TableDecode(err.to_string()))?;
        let time_param = payload
            .parameters
            .first()
            .ok_or_else(|| MagvalError::TableDecode("empty parameter list".to_string()))?;

        let rows = payload.data.len();
        let mut iso_times: Vec<i64> = Vec::with_capacity(rows);
        let mut raw_times: Vec<f64> = Vec::with_capacity(rows);

        let mut scalars: Vec<(usize, String, Vec<f64>)> = Vec::new();
        let mut vectors: Vec<(usize, String, usize, Vec<f64>)> = Vec::new();
        for (index, parameter) in payload.parameters.iter().enumerate().skip(1) {
            match parameter.size.as_deref() {
                None | Some([]) | Some([1]) => {
                    scalars.push((index, parameter.name.clone(), Vec::with_capacity(rows)));
                }
                Some([width]) => {
                    vectors.push((
                        index,
                        parameter.name.clone(),
                        *width,
                        Vec::with_capacity(rows * width),
                    ));
                }
                Some(other) => {
                    return Err(MagvalError::TableDecode(format!(
                        "unsupported parameter shape {other:?} for {}",
                        parameter.name
                    )));
                }
            }
        }

        for row in &payload.data {
            let cell = row
                .first()
                .ok_or_else(|| MagvalError::TableDecode("empty data row".to_string()))?;
            match time_param.type_.as_str() {
                "isotime" => {
                    let text = cell.as_str().ok_or_else(|| {
                        MagvalError::TableDecode("non-string isotime value".to_string())
                    })?;
                    let time = parse_datetime(text)?;
                    iso_times.push(time.timestamp_nanos_opt().ok_or_else(|| {
                        MagvalError::TableDecode(format!("timestamp out of range: {text}"))
                    })?);
                }
                "x_epoch_ns" => {
                    iso_times.push(cell.as_i64().ok_or_else(|| {
                        MagvalError::TableDecode("non-integer epoch value".to_string())
                    })?);
                }
                "x_cdf_epoch" => {
                    raw_times.push(cell.as_f64().ok_or_else(|| {
                        MagvalError::TableDecode("non-numeric CDF epoch value".to_string())
                    })?);
                }
                other => {
                    return Err(MagvalError::TableDecode(format!(
                        "unsupported time encoding: {other}"
                    )));
                }
            }
            for (index, name, values) in &mut scalars {
                let cell = row.get(*index).ok_or_else(|| {
                    MagvalError::TableDecode(format!("short data row for {name}"))
                })?;
                values.push(cell.as_f64().ok_or_else(|| {
                    MagvalError::TableDecode(format!("non-numeric value in {name}"))
                })?);
            }
            for (index, name, width, values) in &mut vectors {
                let cell = row.get(*index).ok_or_else(|| {
                    MagvalError::TableDecode(format!("short data row for {name}"))
                })?;
                let elements = cell.as_array().ok_or_else(|| {
                    MagvalError::TableDecode(format!("non-array value in {name}"))
                })?;
                if elements.len() != *width {
                    return Err(MagvalError::TableDecode(format!(
                        "expected {width} components in {name}, got {}",
                        elements.len()
                    )));
                }
                for element in elements {
                    values.push(element.as_f64().ok_or_else(|| {
                        MagvalError::TableDecode(format!("non-numeric component in {name}"))
                    })?);
                }
            }
        }

        let timestamps = match time_param.type_.as_str() {
            "x_cdf_epoch" => TimeColumn::CdfRaw {
                values: Array1::from(raw_times),
                cdf_type: time_param.cdf_type.unwrap_or(CDF_EPOCH_TYPE),
            },
            _ => TimeColumn::EpochNs(iso_times),
        };

        let mut table = DataTable::new(timestamps, payload.sources);
        for (_, name, values) in scalars {
            table.insert_scalar(&name, Array1::from(values));
        }
        for (_, name, width, values) in vectors {
            let array = Array2::from_shape_vec((rows, width), values)
                .map_err(|err| MagvalError::TableDecode(err.to_string()))?;
            table.insert_vector(&name, array);
        }
        Ok(table)
    }
}

#[derive(Debug, Deserialize)]
struct JsonPayload {
    parameters: Vec<JsonParameter>,
    data: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    sources: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct JsonParameter {
    name: String,
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    size: Option<Vec<usize>>,
    #[serde(default, rename = "x_cdfType")]
    cdf_type: Option<u32>,
}
