use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use camino::Utf8PathBuf;
use chrono::Duration;
use serde::Deserialize;

use crate::benchmark::BenchmarkCase;
use crate::compare::MODEL_AUXILIARIES;
use crate::domain::ModelExpression;
use crate::error::MagvalError;
use crate::registry::RegistryConfig;
use crate::time_util::parse_duration;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub reference_url: Option<String>,
    #[serde(default)]
    pub data_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub report_file: Option<Utf8PathBuf>,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub benchmark: Option<BenchmarkEntry>,
    #[serde(default)]
    pub validation: Vec<ValidationEntry>,
}

#[derive(Debug, Deserialize)]
pub struct BenchmarkEntry {
    pub collection: String,
    #[serde(default)]
    pub selection: Option<String>,
    #[serde(default)]
    pub cases: Vec<BenchmarkCase>,
}

#[derive(Debug, Deserialize)]
pub struct ValidationEntry {
    pub collection: String,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub selection: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BenchmarkPlan {
    pub collection: String,
    pub selection: Duration,
    pub cases: Vec<BenchmarkCase>,
}

#[derive(Debug, Clone)]
pub struct ValidationPlan {
    pub collection: String,
    pub models: Vec<ModelExpression>,
    pub selection: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub server_url: String,
    pub reference_url: Option<String>,
    pub data_dir: Utf8PathBuf,
    pub report_file: Utf8PathBuf,
    pub registry: RegistryConfig,
    pub benchmark: Option<BenchmarkPlan>,
    pub validation: Vec<ValidationPlan>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, MagvalError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("magval.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(MagvalError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| MagvalError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| MagvalError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, MagvalError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let benchmark = match config.benchmark {
            Some(entry) => {
                let selection = parse_duration(entry.selection.as_deref().unwrap_or("PT2H"))?;
                let cases = if entry.cases.is_empty() {
                    default_benchmark_cases()
                } else {
                    entry.cases
                };
                Some(BenchmarkPlan {
                    collection: entry.collection,
                    selection,
                    cases,
                })
            }
            None => None,
        };

        let validation = config
            .validation
            .into_iter()
            .map(|entry| {
                let models = entry
                    .models
                    .iter()
                    .map(|expression| ModelExpression::from_str(expression))
                    .collect::<Result<Vec<_>, MagvalError>>()?;
                let selection = entry
                    .selection
                    .as_deref()
                    .map(parse_duration)
                    .transpose()?;
                Ok(ValidationPlan {
                    collection: entry.collection,
                    models,
                    selection,
                })
            })
            .collect::<Result<Vec<_>, MagvalError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            server_url: config
                .server_url
                .unwrap_or_else(|| "https://vires.services".to_string()),
            reference_url: config.reference_url,
            data_dir: config.data_dir.unwrap_or_else(|| Utf8PathBuf::from("data")),
            report_file: config
                .report_file
                .unwrap_or_else(|| Utf8PathBuf::from("magval_report.ndjson")),
            registry: config.registry,
            benchmark,
            validation,
        })
    }
}

/// Request variants timed when the config lists none of its own.
pub fn default_benchmark_cases() -> Vec<BenchmarkCase> {
    vec![
        BenchmarkCase {
            description: "measurements only".to_string(),
            models: vec![],
            auxiliaries: vec![],
            filters: vec![],
        },
        BenchmarkCase {
            description: "core field".to_string(),
            models: vec!["CHAOS-Core".to_string()],
            auxiliaries: vec![],
            filters: vec![],
        },
        BenchmarkCase {
            description: "full CHAOS composite".to_string(),
            models: vec!["CHAOS".to_string()],
            auxiliaries: vec![],
            filters: vec![],
        },
        BenchmarkCase {
            description: "ionospheric field with auxiliaries".to_string(),
            models: vec!["MIO_SHA_2C".to_string()],
            auxiliaries: MODEL_AUXILIARIES.iter().map(|s| s.to_string()).collect(),
            filters: vec![],
        },
    ]
}
