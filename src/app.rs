use std::io::Write;

use rand::Rng;
use tracing::{info, warn};

use crate::benchmark;
use crate::compare::{self, MODEL_AUXILIARIES};
use crate::config::{BenchmarkPlan, ValidationPlan};
use crate::domain::{DatasetInfo, TimeWindow};
use crate::error::MagvalError;
use crate::hapi::HapiClient;
use crate::ows::{CollectionRequest, DataSource};
use crate::registry::ModelRegistry;
use crate::report::{ComparisonRecord, LocalComparisonRecord, ReportWriter};
use crate::sources::ArchiveFetcher;

/// Counts of a batch run; per-item recoverable failures are logged and
/// tallied instead of aborting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn success(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    fn failure(&mut self) {
        self.attempted += 1;
        self.failed += 1;
    }
}

/// Liveness sweep: enumerate the server's datasets and issue one sample
/// data request per dataset and output format. Per-dataset and per-format
/// errors are logged and skipped.
pub fn run_hapi_test<R: Rng>(
    client: &dyn HapiClient,
    base_url: &str,
    rng: &mut R,
) -> Result<BatchSummary, MagvalError> {
    let capabilities = client.capabilities(base_url)?;
    info!(formats = ?capabilities.output_formats, "server capabilities");
    let datasets = client.catalog(base_url)?;
    info!(count = datasets.len(), "catalog listed");

    let mut summary = BatchSummary::default();
    for dataset in &datasets {
        let dataset_info = match client.info(base_url, dataset) {
            Ok(dataset_info) => dataset_info,
            Err(err) if err.is_recoverable() => {
                warn!(%dataset, error = %err, "info request failed");
                summary.failure();
                continue;
            }
            Err(err) => return Err(err),
        };
        let window = dataset_info.random_window(rng);
        info!(%dataset, %window, "sampling dataset");

        for format in &capabilities.output_formats {
            match client.fetch_range(base_url, dataset, &window, format) {
                Ok(response) if response.is_success() => {
                    info!(
                        %dataset,
                        %format,
                        bytes = response.body.len(),
                        seconds = response.elapsed.as_secs_f64(),
                        "data request ok"
                    );
                    summary.success();
                }
                Ok(response) => {
                    warn!(
                        %dataset,
                        %format,
                        status = response.status,
                        seconds = response.elapsed.as_secs_f64(),
                        "data request rejected"
                    );
                    summary.failure();
                }
                Err(err) if err.is_recoverable() => {
                    warn!(%dataset, %format, error = %err, "data request failed");
                    summary.failure();
                }
                Err(err) => return Err(err),
            }
        }
    }
    Ok(summary)
}

/// Run every configured benchmark case against one shared random window of
/// the collection's valid range, appending one record per case.
pub fn run_benchmark<R: Rng, W: Write>(
    source: &dyn DataSource,
    hapi: &dyn HapiClient,
    base_url: &str,
    plan: &BenchmarkPlan,
    rng: &mut R,
    writer: &mut ReportWriter<W>,
) -> Result<BatchSummary, MagvalError> {
    let dataset_info = hapi.info(base_url, &plan.collection)?;
    let window = sample_window(&dataset_info, Some(plan.selection), rng);
    info!(collection = %plan.collection, %window, "benchmark window");

    let mut summary = BatchSummary::default();
    for case in &plan.cases {
        match benchmark::run_case(source, &plan.collection, &window, case) {
            Ok(record) => {
                writer.write(&record)?;
                summary.success();
            }
            Err(err) if err.is_recoverable() => {
                warn!(case = %case.description, error = %err, "benchmark case failed");
                summary.failure();
            }
            Err(err) => return Err(err),
        }
    }
    Ok(summary)
}

/// Compare two servers over each configured collection/model case.
pub fn run_validation<R: Rng, W: Write>(
    tested: &dyn DataSource,
    reference: &dyn DataSource,
    hapi: &dyn HapiClient,
    base_url: &str,
    plans: &[ValidationPlan],
    rng: &mut R,
    writer: &mut ReportWriter<W>,
) -> Result<BatchSummary, MagvalError> {
    let mut summary = BatchSummary::default();
    for plan in plans {
        let outcome = validate_one(tested, reference, hapi, base_url, plan, rng, writer);
        match outcome {
            Ok(()) => summary.success(),
            Err(err) if err.is_recoverable() => {
                warn!(collection = %plan.collection, error = %err, "validation failed");
                summary.failure();
            }
            Err(err) => return Err(err),
        }
    }
    Ok(summary)
}

/// Compare a server against local model evaluation over each configured
/// case, including the persisted-file re-read inputs when given.
pub fn run_local_validation<F: ArchiveFetcher, R: Rng, W: Write>(
    server: &dyn DataSource,
    reread: Option<&dyn DataSource>,
    registry: &ModelRegistry<F>,
    hapi: &dyn HapiClient,
    base_url: &str,
    plans: &[ValidationPlan],
    rng: &mut R,
    writer: &mut ReportWriter<W>,
) -> Result<BatchSummary, MagvalError> {
    let mut summary = BatchSummary::default();
    for plan in plans {
        let outcome = (|| {
            let dataset_info = hapi.info(base_url, &plan.collection)?;
            let window = sample_window(&dataset_info, plan.selection, rng);
            let request = plan_request(plan);
            let result = compare::compare_with_local(server, reread, registry, &request, &window)?;
            writer.write(&LocalComparisonRecord::from(&result))
        })();
        match outcome {
            Ok(()) => summary.success(),
            Err(err) if err.is_recoverable() => {
                warn!(collection = %plan.collection, error = %err, "local validation failed");
                summary.failure();
            }
            Err(err) => return Err(err),
        }
    }
    Ok(summary)
}

fn validate_one<R: Rng, W: Write>(
    tested: &dyn DataSource,
    reference: &dyn DataSource,
    hapi: &dyn HapiClient,
    base_url: &str,
    plan: &ValidationPlan,
    rng: &mut R,
    writer: &mut ReportWriter<W>,
) -> Result<(), MagvalError> {
    let dataset_info = hapi.info(base_url, &plan.collection)?;
    let window = sample_window(&dataset_info, plan.selection, rng);
    info!(collection = %plan.collection, %window, "validation window");
    let request = plan_request(plan);
    let result = compare::compare_servers(tested, reference, &request, &window)?;
    writer.write(&ComparisonRecord::from(&result))
}

fn plan_request(plan: &ValidationPlan) -> CollectionRequest {
    CollectionRequest::new(&plan.collection)
        .with_models(plan.models.clone())
        .with_auxiliaries(MODEL_AUXILIARIES.iter().map(|s| s.to_string()).collect())
}

fn sample_window<R: Rng>(
    dataset_info: &DatasetInfo,
    selection: Option<chrono::Duration>,
    rng: &mut R,
) -> TimeWindow {
    match selection {
        Some(selection) => TimeWindow::new(dataset_info.start_date, dataset_info.stop_date)
            .random_subwindow(rng, selection),
        None => dataset_info.random_window(rng),
    }
}
