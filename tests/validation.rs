use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;

use magval::app;
use magval::compare;
use magval::config::ValidationPlan;
use magval::domain::{Capabilities, DatasetInfo, ModelExpression, TimeWindow};
use magval::error::MagvalError;
use magval::hapi::{DataResponse, HapiClient};
use magval::ows::{CollectionRequest, DataSource, TableFetch};
use magval::report::ReportWriter;
use magval::table::{DataTable, TimeColumn};

struct FixedHapi;

impl HapiClient for FixedHapi {
    fn capabilities(&self, _base_url: &str) -> Result<Capabilities, MagvalError> {
        Ok(Capabilities {
            output_formats: vec!["json".to_string()],
        })
    }

    fn catalog(&self, _base_url: &str) -> Result<Vec<String>, MagvalError> {
        Ok(vec!["SW_OPER_MAGA_LR_1B".to_string()])
    }

    fn info(&self, _base_url: &str, dataset: &str) -> Result<DatasetInfo, MagvalError> {
        Ok(DatasetInfo {
            id: dataset.to_string(),
            start_date: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            stop_date: Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap(),
            max_time_selection: chrono::Duration::hours(24),
        })
    }

    fn fetch_range(
        &self,
        _base_url: &str,
        _dataset: &str,
        _window: &TimeWindow,
        _format: &str,
    ) -> Result<DataResponse, MagvalError> {
        Ok(DataResponse {
            status: 200,
            body: Vec::new(),
            elapsed: Duration::from_millis(1),
        })
    }
}

/// Serves fixed-shape tables and records every requested window.
struct RecordingSource {
    radius_offset: f64,
    windows: Mutex<Vec<TimeWindow>>,
}

impl RecordingSource {
    fn new(radius_offset: f64) -> Self {
        Self {
            radius_offset,
            windows: Mutex::new(Vec::new()),
        }
    }
}

impl DataSource for RecordingSource {
    fn fetch_table(
        &self,
        request: &CollectionRequest,
        window: &TimeWindow,
    ) -> Result<TableFetch, MagvalError> {
        self.windows.lock().unwrap().push(*window);
        let mut table = DataTable::new(TimeColumn::EpochNs(vec![0, 60_000_000_000]), vec![]);
        table.insert_scalar("Latitude", Array1::from(vec![-30.0, 45.0]));
        table.insert_scalar("Longitude", Array1::from(vec![10.0, 120.0]));
        table.insert_scalar(
            "Radius",
            Array1::from(vec![
                6_820_000.0 + self.radius_offset,
                6_820_050.0 + self.radius_offset,
            ]),
        );
        for model in &request.models {
            table.insert_vector(
                &format!("B_NEC_{}", model.name),
                Array2::from_shape_vec((2, 3), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
            );
        }
        Ok(TableFetch {
            table,
            elapsed: Duration::from_millis(3),
        })
    }

    fn label(&self) -> String {
        "recording".to_string()
    }
}

fn chaos_core_plan() -> Vec<ValidationPlan> {
    vec![ValidationPlan {
        collection: "SW_OPER_MAGA_LR_1B".to_string(),
        models: vec![ModelExpression::from_str("CHAOS-Core").unwrap()],
        selection: None,
    }]
}

#[test]
fn validation_window_follows_the_sampling_policy() {
    let tested = RecordingSource::new(0.0);
    let reference = RecordingSource::new(0.0);
    let mut rng = StdRng::seed_from_u64(42);
    let mut writer = ReportWriter::new(Vec::new());

    let summary = app::run_validation(
        &tested,
        &reference,
        &FixedHapi,
        "https://example.test",
        &chaos_core_plan(),
        &mut rng,
        &mut writer,
    )
    .unwrap();
    assert_eq!(summary.succeeded, 1);

    // no explicit selection, so a tenth of the PT24H limit
    let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let stop = Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap();
    for window in tested.windows.lock().unwrap().iter() {
        assert_eq!(window.duration(), chrono::Duration::minutes(144));
        assert!(window.start >= start);
        assert!(window.end <= stop);
    }
}

#[test]
fn both_sources_see_the_same_window() {
    let tested = RecordingSource::new(0.0);
    let reference = RecordingSource::new(0.0);
    let mut rng = StdRng::seed_from_u64(5);
    let mut writer = ReportWriter::new(Vec::new());

    app::run_validation(
        &tested,
        &reference,
        &FixedHapi,
        "https://example.test",
        &chaos_core_plan(),
        &mut rng,
        &mut writer,
    )
    .unwrap();

    let tested_windows = tested.windows.lock().unwrap();
    let reference_windows = reference.windows.lock().unwrap();
    assert_eq!(*tested_windows, *reference_windows);
}

#[test]
fn matching_servers_produce_a_comparison_record() {
    let tested = RecordingSource::new(0.0);
    let reference = RecordingSource::new(0.0);
    let window = TimeWindow::new(
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2020, 1, 1, 2, 24, 0).unwrap(),
    );
    let request = CollectionRequest::new("SW_OPER_MAGA_LR_1B")
        .with_models(vec![ModelExpression::from_str("CHAOS-Core").unwrap()]);

    let result = compare::compare_servers(&tested, &reference, &request, &window).unwrap();
    assert_eq!(result.timestamps.len(), 2);
    assert_eq!(result.tested["CHAOS-Core"], result.reference["CHAOS-Core"]);
    assert_eq!(result.info.collection, "SW_OPER_MAGA_LR_1B");
}

#[test]
fn radius_mismatch_aborts_and_names_the_field() {
    let tested = RecordingSource::new(0.5);
    let reference = RecordingSource::new(0.0);
    let window = TimeWindow::new(
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2020, 1, 1, 2, 24, 0).unwrap(),
    );
    let request = CollectionRequest::new("SW_OPER_MAGA_LR_1B")
        .with_models(vec![ModelExpression::from_str("CHAOS-Core").unwrap()]);

    let err = compare::compare_servers(&tested, &reference, &request, &window).unwrap_err();
    match err {
        MagvalError::Validation {
            field, collection, ..
        } => {
            assert_eq!(field, "Radius");
            assert_eq!(collection, "SW_OPER_MAGA_LR_1B");
        }
        other => panic!("expected a validation error, got {other}"),
    }
}

#[test]
fn batch_continues_after_a_mismatch() {
    let tested = RecordingSource::new(0.5);
    let reference = RecordingSource::new(0.0);
    let mut rng = StdRng::seed_from_u64(9);
    let mut writer = ReportWriter::new(Vec::new());

    let mut plans = chaos_core_plan();
    plans.push(plans[0].clone());
    let summary = app::run_validation(
        &tested,
        &reference,
        &FixedHapi,
        "https://example.test",
        &plans,
        &mut rng,
        &mut writer,
    )
    .unwrap();
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.failed, 2);
}
