use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{ModelExpression, TimeWindow};
use crate::error::MagvalError;
use crate::table::DataTable;

/// A collection data request for the OWS interface.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionRequest {
    pub collection: String,
    pub measurements: Vec<String>,
    pub auxiliaries: Vec<String>,
    pub models: Vec<ModelExpression>,
    pub filters: Vec<String>,
    pub sampling_step: Option<String>,
    pub asynchronous: bool,
}

impl CollectionRequest {
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            measurements: vec!["B_NEC".to_string()],
            auxiliaries: Vec::new(),
            models: Vec::new(),
            filters: Vec::new(),
            sampling_step: Some("PT60S".to_string()),
            asynchronous: false,
        }
    }

    pub fn with_models(mut self, models: Vec<ModelExpression>) -> Self {
        self.models = models;
        self
    }

    pub fn with_auxiliaries(mut self, auxiliaries: Vec<String>) -> Self {
        self.auxiliaries = auxiliaries;
        self
    }

    pub fn with_filters(mut self, filters: Vec<String>) -> Self {
        self.filters = filters;
        self
    }
}

/// A fetched table together with the wall-clock request duration.
#[derive(Debug, Clone)]
pub struct TableFetch {
    pub table: DataTable,
    pub elapsed: Duration,
}

/// Seam over data providers: remote OWS servers, persisted files, or local
/// evaluation backends in tests.
pub trait DataSource: Send + Sync {
    fn fetch_table(
        &self,
        request: &CollectionRequest,
        window: &TimeWindow,
    ) -> Result<TableFetch, MagvalError>;

    /// Provenance label used in comparison records.
    fn label(&self) -> String;
}

#[derive(Clone)]
pub struct OwsHttpClient {
    client: Client,
    base_url: String,
    data_file: Option<Utf8PathBuf>,
}

impl OwsHttpClient {
    pub fn new(base_url: &str) -> Result<Self, MagvalError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("magval/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| MagvalError::OwsHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| MagvalError::OwsHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            data_file: None,
        })
    }

    /// Persist the raw response payload to the given file before decoding.
    pub fn with_data_file(mut self, path: &Utf8Path) -> Self {
        self.data_file = Some(path.to_owned());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn submit(
        &self,
        request: &CollectionRequest,
        window: &TimeWindow,
    ) -> Result<Vec<u8>, MagvalError> {
        let body = RequestBody {
            collection: &request.collection,
            begin_time: window.start.to_rfc3339(),
            end_time: window.end.to_rfc3339(),
            measurements: &request.measurements,
            auxiliaries: &request.auxiliaries,
            models: request
                .models
                .iter()
                .map(ModelExpression::request_string)
                .collect(),
            filters: &request.filters,
            sampling_step: request.sampling_step.as_deref(),
            asynchronous: request.asynchronous,
            format: "application/json",
        };
        let url = format!("{}/ows", self.base_url);
        debug!(%url, collection = %request.collection, "ows data request");
        let response = crate::hapi::send_with_retries(|| self.client.post(&url).json(&body))
            .map_err(|err| MagvalError::OwsHttp(err.to_string()))?;

        let status = response.status().as_u16();
        if status == 202 {
            let accepted: AcceptedJob = response
                .json()
                .map_err(|err| MagvalError::TableDecode(err.to_string()))?;
            return self.poll_job(&accepted.location);
        }
        if status != 200 {
            let message = response
                .text()
                .unwrap_or_else(|_| "OWS request failed".to_string());
            return Err(MagvalError::OwsStatus { status, message });
        }
        Ok(response
            .bytes()
            .map_err(|err| MagvalError::OwsHttp(err.to_string()))?
            .to_vec())
    }

    /// Poll an asynchronous job until its result is available.
    fn poll_job(&self, location: &str) -> Result<Vec<u8>, MagvalError> {
        const POLL_INTERVAL: Duration = Duration::from_secs(2);
        const MAX_POLLS: usize = 300;
        for _ in 0..MAX_POLLS {
            let response = self
                .client
                .get(location)
                .send()
                .map_err(|err| MagvalError::OwsHttp(err.to_string()))?;
            match response.status().as_u16() {
                200 => {
                    return Ok(response
                        .bytes()
                        .map_err(|err| MagvalError::OwsHttp(err.to_string()))?
                        .to_vec());
                }
                202 => thread::sleep(POLL_INTERVAL),
                status => {
                    let message = response
                        .text()
                        .unwrap_or_else(|_| "asynchronous job failed".to_string());
                    return Err(MagvalError::OwsStatus { status, message });
                }
            }
        }
        Err(MagvalError::OwsHttp(format!(
            "asynchronous job did not finish: {location}"
        )))
    }
}

impl DataSource for OwsHttpClient {
    fn fetch_table(
        &self,
        request: &CollectionRequest,
        window: &TimeWindow,
    ) -> Result<TableFetch, MagvalError> {
        let request_start = Instant::now();
        let bytes = self.submit(request, window)?;
        let elapsed = request_start.elapsed();
        info!(
            url = %self.base_url,
            elapsed_s = elapsed.as_secs_f64(),
            "ows request complete"
        );
        if let Some(path) = &self.data_file {
            write_bytes_atomic(path, &bytes)?;
        }
        Ok(TableFetch {
            table: DataTable::from_json(&bytes)?,
            elapsed,
        })
    }

    fn label(&self) -> String {
        self.base_url.clone()
    }
}

/// Re-reads a previously persisted raw payload from disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: Utf8PathBuf,
}

impl FileSource {
    pub fn new(path: &Utf8Path) -> Self {
        Self {
            path: path.to_owned(),
        }
    }
}

impl DataSource for FileSource {
    fn fetch_table(
        &self,
        _request: &CollectionRequest,
        _window: &TimeWindow,
    ) -> Result<TableFetch, MagvalError> {
        let read_start = Instant::now();
        let bytes = fs::read(self.path.as_std_path())
            .map_err(|err| MagvalError::Filesystem(format!("read {}: {err}", self.path)))?;
        Ok(TableFetch {
            table: DataTable::from_json(&bytes)?,
            elapsed: read_start.elapsed(),
        })
    }

    fn label(&self) -> String {
        format!("file:{}", self.path)
    }
}

pub(crate) fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), MagvalError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| MagvalError::Filesystem(err.to_string()))?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(tmp_path.as_std_path(), content)
        .map_err(|err| MagvalError::Filesystem(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| MagvalError::Filesystem(err.to_string()))?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct RequestBody<'a> {
    collection: &'a str,
    begin_time: String,
    end_time: String,
    measurements: &'a [String],
    auxiliaries: &'a [String],
    models: Vec<String>,
    filters: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    sampling_step: Option<&'a str>,
    asynchronous: bool,
    format: &'a str,
}

#[derive(Debug, Deserialize)]
struct AcceptedJob {
    location: String,
}
