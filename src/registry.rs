use camino::Utf8PathBuf;
use serde::Deserialize;

use crate::domain::ModelId;
use crate::error::MagvalError;
use crate::magmodel::{FieldModel, MioModel, MmaModel, ShcModel};
use crate::shc::ShcCoefficients;
use crate::sources::{ArchiveFetcher, SourceRecipe, SourceStore};
use crate::sphharm::SourceDistribution;

/// Where the model source archives live and which fixed local files the
/// non-downloadable models use. Explicit configuration, no globals.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_mco_archive")]
    pub mco_archive_base: String,
    /// Static lithospheric field coefficients, shipped locally.
    #[serde(default = "default_static_file")]
    pub static_file: String,
    /// Magnetospheric coefficient export, maintained locally.
    #[serde(default = "default_mma_file")]
    pub mma_file: String,
    /// Ionospheric coefficient export, maintained locally in the same
    /// two-block layout as the magnetospheric one.
    #[serde(default = "default_mio_file")]
    pub mio_file: String,
}

fn default_mco_archive() -> String {
    "https://swarm-diss.eo.esa.int/Level2longterm/MCO".to_string()
}

fn default_static_file() -> String {
    "CHAOS_static.shc".to_string()
}

fn default_mma_file() -> String {
    "SW_OPER_MMA_CHAOS.txt".to_string()
}

fn default_mio_file() -> String {
    "SW_OPER_MIO_CHAOS.txt".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            mco_archive_base: default_mco_archive(),
            static_file: default_static_file(),
            mma_file: default_mma_file(),
            mio_file: default_mio_file(),
        }
    }
}

/// Maps model identifiers to the source files they need and the loaded,
/// evaluable model components.
pub struct ModelRegistry<F: ArchiveFetcher> {
    store: SourceStore<F>,
    config: RegistryConfig,
}

impl<F: ArchiveFetcher> ModelRegistry<F> {
    pub fn new(store: SourceStore<F>, config: RegistryConfig) -> Self {
        Self { store, config }
    }

    /// Load every component of the given model, resolving (downloading,
    /// unpacking) source files as needed. `sources` is the product source
    /// list reported by the data server.
    pub fn load(
        &self,
        id: ModelId,
        sources: &[String],
    ) -> Result<Vec<Box<dyn FieldModel>>, MagvalError> {
        match id {
            ModelId::ChaosCore => Ok(vec![self.load_core(sources)?]),
            ModelId::ChaosStatic => Ok(vec![self.load_static()?]),
            ModelId::ChaosMmaPrimary => Ok(vec![self.load_mma(SourceDistribution::External)?]),
            ModelId::ChaosMmaSecondary => Ok(vec![self.load_mma(SourceDistribution::Internal)?]),
            ModelId::ChaosMma => Ok(vec![
                self.load_mma(SourceDistribution::Internal)?,
                self.load_mma(SourceDistribution::External)?,
            ]),
            ModelId::Chaos => Ok(vec![
                self.load_core(sources)?,
                self.load_static()?,
                self.load_mma(SourceDistribution::Internal)?,
                self.load_mma(SourceDistribution::External)?,
            ]),
            ModelId::MioSha2cPrimary => {
                Ok(vec![self.load_mio(SourceDistribution::External)?])
            }
            ModelId::MioSha2cSecondary => {
                Ok(vec![self.load_mio(SourceDistribution::Internal)?])
            }
            ModelId::MioSha2c => Ok(vec![
                self.load_mio(SourceDistribution::Internal)?,
                self.load_mio(SourceDistribution::External)?,
            ]),
        }
    }

    fn core_recipe(&self) -> Result<SourceRecipe, MagvalError> {
        Ok(SourceRecipe::new(
            &self.config.mco_archive_base,
            "^SW_OPER_MCO_SHA_2X_",
            ".shc",
        )?
        .zipped(".ZIP"))
    }

    fn load_core(&self, sources: &[String]) -> Result<Box<dyn FieldModel>, MagvalError> {
        let files = self.store.resolve(&self.core_recipe()?, sources)?;
        let file = latest(&files, "SW_OPER_MCO_SHA_2X")?;
        let coefficients = ShcCoefficients::load(file)?;
        Ok(Box::new(ShcModel::new(
            ModelId::ChaosCore.as_str(),
            coefficients,
        )))
    }

    fn load_static(&self) -> Result<Box<dyn FieldModel>, MagvalError> {
        let path = self.store.local_file(&self.config.static_file);
        let coefficients = ShcCoefficients::load(&path)?;
        Ok(Box::new(ShcModel::new(
            ModelId::ChaosStatic.as_str(),
            coefficients,
        )))
    }

    fn load_mma(
        &self,
        distribution: SourceDistribution,
    ) -> Result<Box<dyn FieldModel>, MagvalError> {
        let path = self.store.local_file(&self.config.mma_file);
        let text = std::fs::read_to_string(path.as_std_path())
            .map_err(|err| MagvalError::ModelFile(format!("read {path}: {err}")))?;
        let parts = TwoPartFile::parse(&text)?;
        let name = match distribution {
            SourceDistribution::External => ModelId::ChaosMmaPrimary.as_str(),
            SourceDistribution::Internal => ModelId::ChaosMmaSecondary.as_str(),
        };
        Ok(Box::new(MmaModel::new(
            name,
            parts.select(distribution),
            distribution,
        )))
    }

    fn load_mio(
        &self,
        distribution: SourceDistribution,
    ) -> Result<Box<dyn FieldModel>, MagvalError> {
        let path = self.store.local_file(&self.config.mio_file);
        let text = std::fs::read_to_string(path.as_std_path())
            .map_err(|err| MagvalError::ModelFile(format!("read {path}: {err}")))?;
        let parts = TwoPartFile::parse(&text)?;
        let name = match distribution {
            SourceDistribution::External => ModelId::MioSha2cPrimary.as_str(),
            SourceDistribution::Internal => ModelId::MioSha2cSecondary.as_str(),
        };
        Ok(Box::new(MioModel::new(
            name,
            parts.select(distribution),
            distribution,
        )))
    }
}

fn latest<'a>(
    files: &'a [Utf8PathBuf],
    description: &str,
) -> Result<&'a Utf8PathBuf, MagvalError> {
    // product files carry their version in the name; the lexically last
    // one is the newest
    files.iter().max().ok_or_else(|| {
        MagvalError::ModelFile(format!("no {description} file among the product sources"))
    })
}

/// Coefficient file with separate `external` and `internal` blocks, each in
/// the SHC row layout (MMA and MIO exports).
#[derive(Debug)]
struct TwoPartFile {
    external: ShcCoefficients,
    internal: ShcCoefficients,
}

impl TwoPartFile {
    fn parse(text: &str) -> Result<Self, MagvalError> {
        let mut external = None;
        let mut internal = None;
        let mut current: Option<(&str, String)> = None;

        for line in text.lines().chain(std::iter::once("external")) {
            let trimmed = line.trim();
            if trimmed == "external" || trimmed == "internal" {
                if let Some((label, block)) = current.take() {
                    let parsed = ShcCoefficients::parse(&block)?;
                    match label {
                        "external" => external = Some(parsed),
                        _ => internal = Some(parsed),
                    }
                }
                current = Some((if trimmed == "external" { "external" } else { "internal" }, String::new()));
            } else if let Some((_, block)) = &mut current {
                block.push_str(line);
                block.push('\n');
            } else if !trimmed.is_empty() && !trimmed.starts_with('#') {
                return Err(MagvalError::ModelFile(
                    "expected an external/internal block label".to_string(),
                ));
            }
        }

        match (external, internal) {
            (Some(external), Some(internal)) => Ok(Self { external, internal }),
            _ => Err(MagvalError::ModelFile(
                "missing external or internal coefficient block".to_string(),
            )),
        }
    }

    fn select(self, distribution: SourceDistribution) -> ShcCoefficients {
        match distribution {
            SourceDistribution::External => self.external,
            SourceDistribution::Internal => self.internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;
    use ndarray::{Array1, Array2};

    use super::*;
    use crate::magmodel::{Auxiliary, eval_models};
    use crate::sphharm::REFERENCE_RADIUS_KM;

    struct NoNetwork;

    impl ArchiveFetcher for NoNetwork {
        fn fetch(&self, url: &str, _destination: &Path) -> Result<(), MagvalError> {
            Err(MagvalError::SourceDownload(format!(
                "unexpected download: {url}"
            )))
        }
    }

    const MMA_SAMPLE: &str = "\
# magnetospheric coefficient export
external
1 1 2 2 1
7000.0 7400.0
1 0 12.0 14.0
internal
1 1 2 2 1
7000.0 7400.0
1 0 4.0 5.0
";

    fn registry_with(dir: &Path) -> ModelRegistry<NoNetwork> {
        let data_dir = Utf8PathBuf::from_path_buf(dir.to_path_buf()).unwrap();
        ModelRegistry::new(
            SourceStore::with_fetcher(&data_dir, NoNetwork),
            RegistryConfig::default(),
        )
    }

    #[test]
    fn two_part_file_parses_both_blocks() {
        let parts = TwoPartFile::parse(MMA_SAMPLE).unwrap();
        assert_eq!(parts.external.times, vec![7000.0, 7400.0]);
        assert_eq!(parts.internal.times, vec![7000.0, 7400.0]);
    }

    #[test]
    fn two_part_file_requires_both_blocks() {
        let err = TwoPartFile::parse("external\n1 1 1 2 0\n2015.0\n1 0 1.0\n").unwrap_err();
        assert_matches!(err, MagvalError::ModelFile(_));
    }

    #[test]
    fn mma_composite_is_sum_of_its_parts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("SW_OPER_MMA_CHAOS.txt"), MMA_SAMPLE).unwrap();
        let registry = registry_with(dir.path());

        let combined = registry.load(ModelId::ChaosMma, &[]).unwrap();
        let primary = registry.load(ModelId::ChaosMmaPrimary, &[]).unwrap();
        let secondary = registry.load(ModelId::ChaosMmaSecondary, &[]).unwrap();
        assert_eq!(combined.len(), 2);

        let times = Array1::from(vec![7100.0, 7200.0]);
        let mut coords = Array2::zeros((2, 3));
        for i in 0..2 {
            coords[[i, 0]] = 30.0;
            coords[[i, 1]] = 45.0;
            coords[[i, 2]] = REFERENCE_RADIUS_KM + 400.0;
        }
        let aux = Auxiliary::none();
        let all = eval_models(&combined, &times, &coords, &aux).unwrap();
        let first = eval_models(&primary, &times, &coords, &aux).unwrap();
        let second = eval_models(&secondary, &times, &coords, &aux).unwrap();
        for i in 0..2 {
            for c in 0..3 {
                let sum = first[[i, c]] + second[[i, c]];
                assert!((all[[i, c]] - sum).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn mio_loads_from_the_local_export() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("SW_OPER_MIO_CHAOS.txt"), MMA_SAMPLE).unwrap();
        let registry = registry_with(dir.path());

        // local file only; the no-network fetcher would fail a download
        let combined = registry.load(ModelId::MioSha2c, &[]).unwrap();
        assert_eq!(combined.len(), 2);
        let primary = registry.load(ModelId::MioSha2cPrimary, &[]).unwrap();
        assert_eq!(primary[0].name(), ModelId::MioSha2cPrimary.as_str());
    }

    #[test]
    fn missing_mio_export_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(dir.path());
        let err = registry.load(ModelId::MioSha2c, &[]).err();
        assert_matches!(err, Some(MagvalError::ModelFile(_)));
    }

    #[test]
    fn missing_core_source_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(dir.path());
        let err = registry
            .load(ModelId::ChaosCore, &["SW_OPER_UNRELATED".to_string()])
            .err();
        assert_matches!(err, Some(MagvalError::ModelFile(_)));
    }
}
