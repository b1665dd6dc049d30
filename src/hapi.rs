use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::debug;

use crate::domain::{Capabilities, DatasetInfo, TimeWindow};
use crate::error::MagvalError;
use crate::time_util::{parse_datetime, parse_duration};

/// Raw result of a timed data request. Non-200 statuses are carried in the
/// value so liveness drivers can report them and move on.
#[derive(Debug, Clone)]
pub struct DataResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub elapsed: Duration,
}

impl DataResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

pub trait HapiClient: Send + Sync {
    fn capabilities(&self, base_url: &str) -> Result<Capabilities, MagvalError>;
    fn catalog(&self, base_url: &str) -> Result<Vec<String>, MagvalError>;
    fn info(&self, base_url: &str, dataset: &str) -> Result<DatasetInfo, MagvalError>;
    fn fetch_range(
        &self,
        base_url: &str,
        dataset: &str,
        window: &TimeWindow,
        format: &str,
    ) -> Result<DataResponse, MagvalError>;
}

#[derive(Clone)]
pub struct HapiHttpClient {
    client: Client,
}

impl HapiHttpClient {
    pub fn new() -> Result<Self, MagvalError> {
        Self::with_timeout(Duration::from_secs(300))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, MagvalError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("magval/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| MagvalError::HapiHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| MagvalError::HapiHttp(err.to_string()))?;
        Ok(Self { client })
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, MagvalError> {
        let response = send_with_retries(|| self.client.get(url))
            .map_err(|err| MagvalError::HapiHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "HAPI request failed".to_string());
            return Err(MagvalError::HapiStatus { status, message });
        }
        response
            .json()
            .map_err(|err| MagvalError::HapiDecode(err.to_string()))
    }
}

impl HapiClient for HapiHttpClient {
    fn capabilities(&self, base_url: &str) -> Result<Capabilities, MagvalError> {
        self.get_json(&format!("{base_url}/hapi/capabilities"))
    }

    fn catalog(&self, base_url: &str) -> Result<Vec<String>, MagvalError> {
        let payload: CatalogPayload = self.get_json(&format!("{base_url}/hapi/catalog"))?;
        Ok(payload.catalog.into_iter().map(|item| item.id).collect())
    }

    fn info(&self, base_url: &str, dataset: &str) -> Result<DatasetInfo, MagvalError> {
        let payload: InfoPayload =
            self.get_json(&format!("{base_url}/hapi/info?dataset={dataset}"))?;
        Ok(DatasetInfo {
            id: dataset.to_string(),
            start_date: parse_datetime(&payload.start_date)?,
            stop_date: parse_datetime(&payload.stop_date)?,
            max_time_selection: parse_duration(&payload.max_time_selection)?,
        })
    }

    fn fetch_range(
        &self,
        base_url: &str,
        dataset: &str,
        window: &TimeWindow,
        format: &str,
    ) -> Result<DataResponse, MagvalError> {
        let url = format!(
            "{base_url}/hapi/data?dataset={dataset}\
             &start={start}&stop={stop}&format={format}&include=header",
            start = window.start.format("%Y-%m-%dT%H:%M:%SZ"),
            stop = window.end.format("%Y-%m-%dT%H:%M:%SZ"),
        );
        debug!(%url, "hapi data request");
        let request_start = Instant::now();
        let response = send_with_retries(|| self.client.get(&url))
            .map_err(|err| MagvalError::HapiHttp(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|err| MagvalError::HapiHttp(err.to_string()))?
            .to_vec();
        Ok(DataResponse {
            status,
            body,
            elapsed: request_start.elapsed(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CatalogPayload {
    catalog: Vec<CatalogItem>,
}

#[derive(Debug, Deserialize)]
struct CatalogItem {
    id: String,
}

#[derive(Debug, Deserialize)]
struct InfoPayload {
    #[serde(rename = "startDate")]
    start_date: String,
    #[serde(rename = "stopDate")]
    stop_date: String,
    #[serde(rename = "x_maxTimeSelection")]
    max_time_selection: String,
}

pub(crate) fn send_with_retries<F>(
    mut make_req: F,
) -> Result<reqwest::blocking::Response, reqwest::Error>
where
    F: FnMut() -> reqwest::blocking::RequestBuilder,
{
    const MAX_RETRIES: usize = 3;
    const BASE_DELAY_MS: u64 = 200;
    let mut attempt = 0usize;
    loop {
        match make_req().send() {
            Ok(response) => {
                let status = response.status().as_u16();
                if attempt < MAX_RETRIES && is_retryable_status(status) {
                    thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                    attempt += 1;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                if attempt < MAX_RETRIES && is_retryable_error(&err) {
                    thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                    attempt += 1;
                    continue;
                }
                return Err(err);
            }
        }
    }
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
