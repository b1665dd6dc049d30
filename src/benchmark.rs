use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{ModelExpression, TimeWindow};
use crate::error::MagvalError;
use crate::ows::{CollectionRequest, DataSource};
use crate::report::Seconds;

/// One named request variant to time. A case changes the request shape
/// (model list, auxiliaries, filters) while collection and window stay
/// fixed across the whole set.
#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkCase {
    pub description: String,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub auxiliaries: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BenchmarkRecord {
    pub timestamp: DateTime<Utc>,
    pub server_url: String,
    pub collection: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub request_duration: Seconds,
    pub number_of_samples: usize,
    pub description: String,
}

/// Build the collection request a benchmark case describes.
pub fn case_request(collection: &str, case: &BenchmarkCase) -> Result<CollectionRequest, MagvalError> {
    let mut models = Vec::with_capacity(case.models.len());
    for expression in &case.models {
        models.push(ModelExpression::from_str(expression)?);
    }
    Ok(CollectionRequest::new(collection)
        .with_models(models)
        .with_auxiliaries(case.auxiliaries.clone())
        .with_filters(case.filters.clone()))
}

/// Run one case against the source and record the wall-clock duration of
/// the data request.
pub fn run_case(
    source: &dyn DataSource,
    collection: &str,
    window: &TimeWindow,
    case: &BenchmarkCase,
) -> Result<BenchmarkRecord, MagvalError> {
    let request = case_request(collection, case)?;
    info!(case = %case.description, window = %window, "running benchmark case");
    let fetch = source.fetch_table(&request, window)?;
    let record = BenchmarkRecord {
        timestamp: Utc::now(),
        server_url: source.label(),
        collection: collection.to_string(),
        start_time: window.start,
        end_time: window.end,
        request_duration: Seconds(fetch.elapsed),
        number_of_samples: fetch.table.len(),
        description: case.description.clone(),
    };
    info!(
        case = %case.description,
        seconds = fetch.elapsed.as_secs_f64(),
        samples = record.number_of_samples,
        "benchmark case finished"
    );
    Ok(record)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ndarray::Array1;

    use super::*;
    use crate::ows::TableFetch;
    use crate::table::{DataTable, TimeColumn};

    struct FixedSource;

    impl DataSource for FixedSource {
        fn fetch_table(
            &self,
            request: &CollectionRequest,
            _window: &TimeWindow,
        ) -> Result<TableFetch, MagvalError> {
            assert_eq!(request.measurements, vec!["B_NEC".to_string()]);
            let mut table = DataTable::new(TimeColumn::EpochNs(vec![0, 60_000_000_000]), vec![]);
            table.insert_scalar("Latitude", Array1::zeros(2));
            Ok(TableFetch {
                table,
                elapsed: Duration::from_millis(250),
            })
        }

        fn label(&self) -> String {
            "https://example.test".to_string()
        }
    }

    fn window() -> TimeWindow {
        use chrono::TimeZone;
        TimeWindow::new(
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 1, 2, 24, 0).unwrap(),
        )
    }

    #[test]
    fn record_carries_timing_and_sample_count() {
        let case = BenchmarkCase {
            description: "B_NEC only".to_string(),
            models: vec![],
            auxiliaries: vec![],
            filters: vec![],
        };
        let record = run_case(&FixedSource, "SW_OPER_MAGA_LR_1B", &window(), &case).unwrap();
        assert_eq!(record.number_of_samples, 2);
        assert_eq!(record.collection, "SW_OPER_MAGA_LR_1B");
        assert_eq!(record.server_url, "https://example.test");
        assert!((record.request_duration.0.as_secs_f64() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn case_models_are_parsed_as_expressions() {
        let case = BenchmarkCase {
            description: "core field".to_string(),
            models: vec![
                "CHAOS-Core".to_string(),
                "Custom = 'CHAOS-Core' + 'CHAOS-Static'".to_string(),
            ],
            auxiliaries: vec!["F107".to_string()],
            filters: vec!["Flags_B != 255".to_string()],
        };
        let request = case_request("SW_OPER_MAGA_LR_1B", &case).unwrap();
        assert_eq!(request.models.len(), 2);
        assert_eq!(request.models[0].request_string(), "CHAOS-Core");
        assert_eq!(
            request.models[1].request_string(),
            "Custom = 'CHAOS-Core' + 'CHAOS-Static'"
        );
        assert_eq!(request.filters.len(), 1);
    }

    #[test]
    fn invalid_case_model_is_an_error() {
        let case = BenchmarkCase {
            description: "broken".to_string(),
            models: vec!["=".to_string()],
            auxiliaries: vec![],
            filters: vec![],
        };
        assert!(case_request("SW_OPER_MAGA_LR_1B", &case).is_err());
    }
}
