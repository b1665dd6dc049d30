use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use reqwest::blocking::Client;
use tracing::info;
use zip::ZipArchive;

use crate::error::MagvalError;

/// Recipe describing how to materialize one family of model source files:
/// which entries of a product `sources` list belong to it, the extension of
/// the usable file, and where archives are downloaded from.
#[derive(Debug, Clone)]
pub struct SourceRecipe {
    pub archive_base: String,
    pub pattern: Regex,
    pub extension: String,
    pub zip_extension: Option<String>,
}

impl SourceRecipe {
    pub fn new(archive_base: &str, pattern: &str, extension: &str) -> Result<Self, MagvalError> {
        let pattern = Regex::new(pattern)
            .map_err(|err| MagvalError::ModelFile(format!("bad source pattern: {err}")))?;
        Ok(Self {
            archive_base: archive_base.trim_end_matches('/').to_string(),
            pattern,
            extension: extension.to_string(),
            zip_extension: None,
        })
    }

    pub fn zipped(mut self, zip_extension: &str) -> Self {
        self.zip_extension = Some(zip_extension.to_string());
        self
    }
}

/// Fetches a remote archive into a local file. Seam for tests.
pub trait ArchiveFetcher: Send + Sync {
    fn fetch(&self, url: &str, destination: &Path) -> Result<(), MagvalError>;
}

pub struct HttpArchiveFetcher {
    client: Client,
}

impl HttpArchiveFetcher {
    pub fn new() -> Result<Self, MagvalError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| MagvalError::SourceDownload(err.to_string()))?;
        Ok(Self { client })
    }
}

impl ArchiveFetcher for HttpArchiveFetcher {
    fn fetch(&self, url: &str, destination: &Path) -> Result<(), MagvalError> {
        info!(%url, "downloading model source archive");
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| MagvalError::SourceDownload(err.to_string()))?;
        if !response.status().is_success() {
            return Err(MagvalError::SourceDownload(format!(
                "{url}: status {}",
                response.status().as_u16()
            )));
        }
        let mut file = fs::File::create(destination)
            .map_err(|err| MagvalError::Filesystem(err.to_string()))?;
        io::copy(&mut response, &mut file)
            .map_err(|err| MagvalError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Local cache of model source files under a data directory. Resolution is
/// idempotent: an extracted file short-circuits everything, an archive on
/// disk skips only the download.
pub struct SourceStore<F: ArchiveFetcher> {
    data_dir: Utf8PathBuf,
    fetcher: F,
}

impl SourceStore<HttpArchiveFetcher> {
    pub fn new(data_dir: &Utf8Path) -> Result<Self, MagvalError> {
        Ok(Self::with_fetcher(data_dir, HttpArchiveFetcher::new()?))
    }
}

impl<F: ArchiveFetcher> SourceStore<F> {
    pub fn with_fetcher(data_dir: &Utf8Path, fetcher: F) -> Self {
        Self {
            data_dir: data_dir.to_owned(),
            fetcher,
        }
    }

    /// Local path of a fixed (already materialized) source file.
    pub fn local_file(&self, file_name: &str) -> Utf8PathBuf {
        self.data_dir.join(file_name)
    }

    /// Materialize every source matched by the recipe pattern and return
    /// the local file paths, in the order the sources were listed.
    pub fn resolve(
        &self,
        recipe: &SourceRecipe,
        sources: &[String],
    ) -> Result<Vec<Utf8PathBuf>, MagvalError> {
        sources
            .iter()
            .filter(|source| recipe.pattern.is_match(source))
            .map(|source| self.ensure_file(source, recipe))
            .collect()
    }

    fn ensure_file(&self, name: &str, recipe: &SourceRecipe) -> Result<Utf8PathBuf, MagvalError> {
        let target = self.data_dir.join(format!("{name}{}", recipe.extension));
        if target.as_std_path().exists() {
            return Ok(target);
        }
        fs::create_dir_all(self.data_dir.as_std_path())
            .map_err(|err| MagvalError::Filesystem(err.to_string()))?;

        let download_extension = recipe.zip_extension.as_deref().unwrap_or(&recipe.extension);
        let downloaded = self.data_dir.join(format!("{name}{download_extension}"));
        if !downloaded.as_std_path().exists() {
            let url = format!(
                "{}/{}",
                recipe.archive_base,
                downloaded.file_name().unwrap_or(name)
            );
            // download to a temp name so a concurrent resolver never sees
            // a partial archive
            let temp = tempfile::Builder::new()
                .prefix(".magval-download")
                .tempfile_in(self.data_dir.as_std_path())
                .map_err(|err| MagvalError::Filesystem(err.to_string()))?;
            self.fetcher.fetch(&url, temp.path())?;
            temp.persist(downloaded.as_std_path())
                .map_err(|err| MagvalError::Filesystem(err.to_string()))?;
        }

        if downloaded != target {
            extract_member(&downloaded, &target)?;
            if target.as_std_path().exists() {
                fs::remove_file(downloaded.as_std_path())
                    .map_err(|err| MagvalError::Filesystem(err.to_string()))?;
            }
        }
        Ok(target)
    }
}

/// Extract exactly the archive member whose base filename matches the
/// destination's base filename.
pub fn extract_member(archive_path: &Utf8Path, destination: &Utf8Path) -> Result<(), MagvalError> {
    let file = fs::File::open(archive_path.as_std_path())
        .map_err(|err| MagvalError::Filesystem(format!("open zip {archive_path}: {err}")))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| MagvalError::Filesystem(err.to_string()))?;

    let wanted = destination
        .file_name()
        .ok_or_else(|| MagvalError::Filesystem(format!("invalid destination {destination}")))?;

    let member_index = (0..archive.len()).find(|&index| {
        archive
            .by_index(index)
            .ok()
            .and_then(|entry| {
                entry
                    .enclosed_name()
                    .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            })
            .is_some_and(|base| base == wanted)
    });
    let Some(member_index) = member_index else {
        return Err(MagvalError::ArchiveMemberNotFound {
            archive: archive_path.to_string(),
            member: wanted.to_string(),
        });
    };

    let mut entry = archive
        .by_index(member_index)
        .map_err(|err| MagvalError::Filesystem(err.to_string()))?;
    let tmp_path = destination.with_extension("tmp");
    let mut outfile = fs::File::create(tmp_path.as_std_path())
        .map_err(|err| MagvalError::Filesystem(err.to_string()))?;
    io::copy(&mut entry, &mut outfile).map_err(|err| MagvalError::Filesystem(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), destination.as_std_path())
        .map_err(|err| MagvalError::Filesystem(err.to_string()))?;
    info!(archive = %archive_path, destination = %destination, "extracted model source");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use zip::write::SimpleFileOptions;

    use super::*;

    struct CountingFetcher {
        calls: Mutex<usize>,
        payload: Vec<u8>,
    }

    impl CountingFetcher {
        fn new(payload: Vec<u8>) -> Self {
            Self {
                calls: Mutex::new(0),
                payload,
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl ArchiveFetcher for CountingFetcher {
        fn fetch(&self, _url: &str, destination: &Path) -> Result<(), MagvalError> {
            *self.calls.lock().unwrap() += 1;
            fs::write(destination, &self.payload)
                .map_err(|err| MagvalError::Filesystem(err.to_string()))?;
            Ok(())
        }
    }

    fn zip_with_member(member: &str, content: &[u8]) -> Vec<u8> {
        let mut buffer = io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer
                .start_file(member, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
            writer.finish().unwrap();
        }
        buffer.into_inner()
    }

    fn shc_recipe() -> SourceRecipe {
        SourceRecipe::new(
            "https://example.com/MCO",
            "^SW_OPER_MCO_SHA_2X_",
            ".shc",
        )
        .unwrap()
        .zipped(".ZIP")
    }

    #[test]
    fn resolve_downloads_and_extracts() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let name = "SW_OPER_MCO_SHA_2X_0801";
        let payload = zip_with_member(&format!("{name}.shc"), b"coefficients");
        let store = SourceStore::with_fetcher(&data_dir, CountingFetcher::new(payload));

        let sources = vec![name.to_string(), "SW_OPER_UNRELATED".to_string()];
        let files = store.resolve(&shc_recipe(), &sources).unwrap();

        assert_eq!(files, vec![data_dir.join(format!("{name}.shc"))]);
        assert_eq!(fs::read(files[0].as_std_path()).unwrap(), b"coefficients");
        // archive removed after extraction
        assert!(!data_dir.join(format!("{name}.ZIP")).as_std_path().exists());
        assert_eq!(store.fetcher.calls(), 1);
    }

    #[test]
    fn resolve_is_idempotent_with_zero_network_calls() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let name = "SW_OPER_MCO_SHA_2X_0801";
        let payload = zip_with_member(&format!("{name}.shc"), b"coefficients");
        let store = SourceStore::with_fetcher(&data_dir, CountingFetcher::new(payload));

        let sources = vec![name.to_string()];
        store.resolve(&shc_recipe(), &sources).unwrap();
        store.resolve(&shc_recipe(), &sources).unwrap();
        assert_eq!(store.fetcher.calls(), 1);
    }

    #[test]
    fn existing_archive_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let name = "SW_OPER_MCO_SHA_2X_0801";
        let payload = zip_with_member(&format!("{name}.shc"), b"coefficients");
        fs::write(data_dir.join(format!("{name}.ZIP")).as_std_path(), &payload).unwrap();
        let store = SourceStore::with_fetcher(&data_dir, CountingFetcher::new(Vec::new()));

        let files = store.resolve(&shc_recipe(), &[name.to_string()]).unwrap();
        assert_eq!(fs::read(files[0].as_std_path()).unwrap(), b"coefficients");
        assert_eq!(store.fetcher.calls(), 0);
    }

    #[test]
    fn missing_member_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let name = "SW_OPER_MCO_SHA_2X_0801";
        let payload = zip_with_member("something_else.txt", b"nope");
        let store = SourceStore::with_fetcher(&data_dir, CountingFetcher::new(payload));

        let err = store
            .resolve(&shc_recipe(), &[name.to_string()])
            .unwrap_err();
        assert_matches!(err, MagvalError::ArchiveMemberNotFound { .. });
    }
}
