//! Fetch and install a gzip tar module archive from object storage.
//!
//! Installation is four independent steps with no rollback: remove the old
//! module directory, extract, delete the archive, ensure the package marker.

use crate::error::{ConnectorError, ConnectorResult};
use crate::services::object_store::ObjectStorage;

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// Package marker created in every installed module directory.
pub const PACKAGE_MARKER: &str = "__init__.py";

const ARCHIVE_SUFFIXES: [&str; 2] = [".tar.gz", ".tgz"];

/// Treat a missing path as success.
///
/// Used for cleanup steps that may legitimately have nothing to remove.
pub fn ignore_not_found(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Directory names derived from an archive file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleNames {
    /// Archive file name as stored
    pub archive: String,
    /// Final module directory name (hyphens kept)
    pub dir_name: String,
    /// Importable form of the name, hyphens replaced by underscores
    pub import_name: String,
}

impl ModuleNames {
    /// Derive names from `pkg-name.tar.gz` or `pkg-name.tgz`.
    pub fn from_archive(file_name: &str) -> ConnectorResult<Self> {
        if file_name.contains(['/', '\\']) {
            return Err(ConnectorError::invalid_argument(
                format!("Archive name '{file_name}' must not contain a path separator"),
                Some("Pass the directory part as the key prefix"),
            ));
        }

        let dir_name = ARCHIVE_SUFFIXES
            .iter()
            .find_map(|suffix| file_name.strip_suffix(suffix))
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                ConnectorError::invalid_argument(
                    format!("'{file_name}' is not a .tar.gz or .tgz archive name"),
                    None,
                )
            })?;

        Ok(Self {
            archive: file_name.to_string(),
            dir_name: dir_name.to_string(),
            import_name: dir_name.replace('-', "_"),
        })
    }

    fn has_hyphen(&self) -> bool {
        self.dir_name != self.import_name
    }
}

impl ObjectStorage {
    /// Fetch `key_prefix + file_name` and install it in the current directory.
    ///
    /// Returns the installed module directory.
    pub async fn fetch_module(
        &self,
        key_prefix: &str,
        file_name: &str,
    ) -> ConnectorResult<PathBuf> {
        let cwd = std::env::current_dir()?;
        self.fetch_module_into(key_prefix, file_name, cwd).await
    }

    /// Fetch `key_prefix + file_name` and install it under `dest`.
    pub async fn fetch_module_into(
        &self,
        key_prefix: &str,
        file_name: &str,
        dest: impl AsRef<Path>,
    ) -> ConnectorResult<PathBuf> {
        let dest = dest.as_ref().to_path_buf();
        let names = ModuleNames::from_archive(file_name)?;
        if !dest.is_dir() {
            return Err(ConnectorError::invalid_argument(
                format!("Destination directory '{}' does not exist", dest.display()),
                None,
            ));
        }

        let key = format!("{key_prefix}{file_name}");
        tracing::info!(bucket = %self.bucket(), key = %key, "Fetching module archive");

        let body = self.store().get_object(self.bucket(), &key).await?;
        let archive_path = dest.join(&names.archive);
        tokio::fs::write(&archive_path, &body).await?;

        let module_dir = tokio::task::spawn_blocking(move || install(&archive_path, &dest, &names))
            .await
            .map_err(|e| ConnectorError::internal(format!("Module install task failed: {e}")))??;

        tracing::info!(key = %key, module = %module_dir.display(), "Installed module");
        Ok(module_dir)
    }
}

/// Extract a downloaded archive into `dest` and finish the module layout.
fn install(archive_path: &Path, dest: &Path, names: &ModuleNames) -> ConnectorResult<PathBuf> {
    let module_dir = dest.join(&names.dir_name);
    let import_dir = dest.join(&names.import_name);

    if names.has_hyphen() {
        tracing::debug!(module = %names.dir_name, "Module name contains hyphens");
        ignore_not_found(fs::remove_dir_all(&import_dir))?;
    }
    ignore_not_found(fs::remove_dir_all(&module_dir))?;

    tracing::debug!(archive = %archive_path.display(), dest = %dest.display(), "Extracting module");
    extract(archive_path, dest)?;

    if !module_dir.is_dir() {
        if names.has_hyphen() && import_dir.is_dir() {
            fs::rename(&import_dir, &module_dir)?;
        } else {
            return Err(ConnectorError::not_found(format!(
                "Archive '{}' did not contain a '{}' directory",
                names.archive, names.dir_name
            )));
        }
    }

    ignore_not_found(fs::remove_file(archive_path))?;

    let marker = module_dir.join(PACKAGE_MARKER);
    if !marker.exists() {
        tracing::debug!(module = %module_dir.display(), "Creating package marker");
        File::create(&marker)?;
    }

    Ok(module_dir)
}

fn extract(archive_path: &Path, dest: &Path) -> ConnectorResult<()> {
    let file = File::open(archive_path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.unpack(dest).map_err(|e| {
        ConnectorError::parse_with_source(
            format!("Failed to extract '{}'", archive_path.display()),
            e,
        )
    })
}
