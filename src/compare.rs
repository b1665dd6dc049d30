use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ndarray::Array2;
use tracing::info;

use crate::domain::TimeWindow;
use crate::error::MagvalError;
use crate::magmodel::{Auxiliary, eval_models};
use crate::ows::{CollectionRequest, DataSource};
use crate::registry::ModelRegistry;
use crate::sources::ArchiveFetcher;
use crate::table::DataTable;

/// Auxiliary parameters the ionospheric models need; always requested so a
/// model list containing MIO components can be evaluated locally.
pub const MODEL_AUXILIARIES: [&str; 3] = ["F107", "SunDeclination", "SunLongitude"];

/// Provenance of one comparison run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ComparisonInfo {
    pub tested: String,
    pub reference: String,
    pub collection: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub model_names: Vec<String>,
    pub models: Vec<String>,
}

/// Field values of both sides of a server-to-server comparison, keyed by
/// model name. Produced once, never mutated.
#[derive(Debug, Clone)]
pub struct ComparisonResult {
    pub timestamps: Vec<DateTime<Utc>>,
    pub tested: BTreeMap<String, Array2<f64>>,
    pub reference: BTreeMap<String, Array2<f64>>,
    pub info: ComparisonInfo,
}

/// Server values versus local evaluation, including the re-read pass over
/// the persisted raw payload.
#[derive(Debug, Clone)]
pub struct LocalComparisonResult {
    pub timestamps: Vec<DateTime<Utc>>,
    pub tested: BTreeMap<String, Array2<f64>>,
    pub local: BTreeMap<String, Array2<f64>>,
    pub reread: BTreeMap<String, Array2<f64>>,
    pub info: ComparisonInfo,
}

/// Fetch the same window from two servers and compare the per-model field
/// columns. Coordinates and timestamps must match exactly.
pub fn compare_servers(
    tested: &dyn DataSource,
    reference: &dyn DataSource,
    request: &CollectionRequest,
    window: &TimeWindow,
) -> Result<ComparisonResult, MagvalError> {
    let reference_fetch = reference.fetch_table(request, window)?;
    let tested_fetch = tested.fetch_table(request, window)?;
    check_alignment(
        &tested_fetch.table,
        &reference_fetch.table,
        &request.collection,
        window,
    )?;

    let model_names: Vec<String> = request
        .models
        .iter()
        .map(|model| model.name.clone())
        .collect();

    let mut tested_values = BTreeMap::new();
    let mut reference_values = BTreeMap::new();
    for name in &model_names {
        let column = format!("B_NEC_{name}");
        tested_values.insert(name.clone(), tested_fetch.table.vector(&column)?.clone());
        reference_values.insert(name.clone(), reference_fetch.table.vector(&column)?.clone());
    }

    Ok(ComparisonResult {
        timestamps: reference_fetch.table.timestamps.datetimes()?,
        tested: tested_values,
        reference: reference_values,
        info: comparison_info(
            tested.label(),
            reference.label(),
            request,
            window,
            model_names,
        ),
    })
}

/// Fetch one window from a server and evaluate the same models locally,
/// both from the decoded arrays and, when a re-read source is given, from
/// the persisted raw payload.
pub fn compare_with_local<F: ArchiveFetcher>(
    server: &dyn DataSource,
    reread: Option<&dyn DataSource>,
    registry: &ModelRegistry<F>,
    request: &CollectionRequest,
    window: &TimeWindow,
) -> Result<LocalComparisonResult, MagvalError> {
    // local evaluation understands bare model names only
    let mut model_ids = Vec::with_capacity(request.models.len());
    for model in &request.models {
        model_ids.push(model.local_model_id()?);
    }

    let fetch = server.fetch_table(request, window)?;
    let table = &fetch.table;

    let mut tested = BTreeMap::new();
    for id in &model_ids {
        let column = format!("B_NEC_{id}");
        tested.insert(id.to_string(), table.vector(&column)?.clone());
    }

    let local = eval_table(registry, &model_ids, table)?;
    let reread_values = match reread {
        Some(source) => {
            let reread_fetch = source.fetch_table(request, window)?;
            check_alignment(&reread_fetch.table, table, &request.collection, window)?;
            eval_table(registry, &model_ids, &reread_fetch.table)?
        }
        None => BTreeMap::new(),
    };

    Ok(LocalComparisonResult {
        timestamps: table.timestamps.datetimes()?,
        tested,
        local,
        reread: reread_values,
        info: comparison_info(
            server.label(),
            "local-models".to_string(),
            request,
            window,
            model_ids.iter().map(|id| id.to_string()).collect(),
        ),
    })
}

fn eval_table<F: ArchiveFetcher>(
    registry: &ModelRegistry<F>,
    model_ids: &[crate::domain::ModelId],
    table: &DataTable,
) -> Result<BTreeMap<String, Array2<f64>>, MagvalError> {
    let times = table.times_mjd2000()?;
    let coords = table.coords()?;
    let aux = Auxiliary::from_table(table);

    let mut values = BTreeMap::new();
    for &id in model_ids {
        info!(model = %id, samples = times.len(), "evaluating model locally");
        let models = registry.load(id, &table.sources)?;
        values.insert(id.to_string(), eval_models(&models, &times, &coords, &aux)?);
    }
    Ok(values)
}

/// Verify that the coordinate and timestamp arrays of two tables are
/// exactly equal. The first mismatching field aborts the comparison.
pub fn check_alignment(
    tested: &DataTable,
    reference: &DataTable,
    collection: &str,
    window: &TimeWindow,
) -> Result<(), MagvalError> {
    let mismatch = |field: &str| MagvalError::Validation {
        field: field.to_string(),
        collection: collection.to_string(),
        start: window.start.to_rfc3339(),
        end: window.end.to_rfc3339(),
    };

    if !tested.timestamps.values_equal(&reference.timestamps) {
        return Err(mismatch("Timestamp"));
    }
    for field in ["Radius", "Latitude", "Longitude"] {
        if tested.scalar(field)? != reference.scalar(field)? {
            return Err(mismatch(field));
        }
    }
    Ok(())
}

fn comparison_info(
    tested: String,
    reference: String,
    request: &CollectionRequest,
    window: &TimeWindow,
    model_names: Vec<String>,
) -> ComparisonInfo {
    ComparisonInfo {
        tested,
        reference,
        collection: request.collection.clone(),
        start: window.start,
        end: window.end,
        timestamp: Utc::now(),
        model_names,
        models: request
            .models
            .iter()
            .map(|model| model.request_string())
            .collect(),
    }
}
