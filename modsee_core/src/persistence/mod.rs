//! # Persistence
//!
//! Storage backends for projects and analysis results. A caller always picks
//! the backend explicitly and hands it to [`Project::save`] or
//! [`Project::load`]; nothing here guesses a format from a path.
//!
//! | Backend | Project | Analysis results |
//! |---|---|---|
//! | [`JsonFileAdapter`] | whole project as one JSON document | not supported |
//! | [`AttributeStoreAdapter`] | redb tables, one record per object | stored per project id |
//! | [`MseeFile`] | JSON envelope with metadata and app settings | not supported |
//!
//! Backends that cannot hold results answer every results call with
//! [`ModelError::BackendMismatch`].
//!
//! [`Project::save`]: crate::project::Project::save
//! [`Project::load`]: crate::project::Project::load

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::errors::{ModelError, ModelResult};
use crate::project::Project;
use crate::results::{AnalysisResults, AnalysisSummary};

pub mod json;
pub mod lock;
pub mod msee;
pub mod store;

pub use json::JsonFileAdapter;
pub use lock::{LockHolder, ProjectLock};
pub use msee::{MseeDocument, MseeFile, MseeMetadata, RecentFiles, RestoreMode, RestoreReport, SkippedItem};
pub use store::AttributeStoreAdapter;

/// A storage backend for projects and, optionally, analysis results.
pub trait PersistenceAdapter {
    /// Short backend name used in logs and errors
    fn name(&self) -> &'static str;

    /// Where this backend reads and writes
    fn location(&self) -> &Path;

    /// Persist the whole project, returning the path written.
    fn save_project(&self, project: &Project) -> ModelResult<PathBuf>;

    /// Read a whole project back.
    fn load_project(&self) -> ModelResult<Project>;

    fn save_analysis_results(
        &self,
        project_id: &Uuid,
        analysis_id: &str,
        results: &AnalysisResults,
    ) -> ModelResult<()> {
        let _ = (project_id, analysis_id, results);
        Err(ModelError::backend_mismatch(
            self.name(),
            "analysis results need the attribute store",
        ))
    }

    /// Results of one analysis, `Ok(None)` when absent.
    fn get_analysis_results(
        &self,
        project_id: &Uuid,
        analysis_id: &str,
    ) -> ModelResult<Option<AnalysisResults>> {
        let _ = (project_id, analysis_id);
        Err(ModelError::backend_mismatch(
            self.name(),
            "analysis results need the attribute store",
        ))
    }

    fn list_analyses(&self, project_id: &Uuid) -> ModelResult<Vec<AnalysisSummary>> {
        let _ = project_id;
        Err(ModelError::backend_mismatch(
            self.name(),
            "analysis results need the attribute store",
        ))
    }
}

/// On-disk format, for front ends that take a bare path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFormat {
    Json,
    AttributeStore,
    Msee,
}

impl StorageFormat {
    /// Guess the format from a file extension.
    ///
    /// `.msee` is the app file, `.redb`/`.h5`/`.hdf5` the attribute store,
    /// anything else plain JSON.
    pub fn from_path(path: &Path) -> StorageFormat {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "msee" => StorageFormat::Msee,
            "redb" | "h5" | "hdf5" => StorageFormat::AttributeStore,
            _ => StorageFormat::Json,
        }
    }

    /// Build the adapter for this format at `path`.
    pub fn adapter(&self, path: &Path) -> ModelResult<Box<dyn PersistenceAdapter>> {
        Ok(match self {
            StorageFormat::Json => Box::new(JsonFileAdapter::new(path)),
            StorageFormat::AttributeStore => Box::new(AttributeStoreAdapter::new(path)),
            StorageFormat::Msee => Box::new(MseeFile::new(path)),
        })
    }
}

/// Write `contents` next to `path` as `*.tmp`, sync, then rename over `path`.
///
/// An interrupted save leaves either the old file or the new one, never a
/// truncated mix.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> ModelResult<()> {
    let tmp_path = tmp_path_for(path);

    let mut tmp_file = File::create(&tmp_path).map_err(|e| {
        ModelError::file_error("create temp file", tmp_path.display().to_string(), e.to_string())
    })?;

    tmp_file.write_all(contents).map_err(|e| {
        ModelError::file_error("write temp file", tmp_path.display().to_string(), e.to_string())
    })?;

    tmp_file.sync_all().map_err(|e| {
        ModelError::file_error("sync temp file", tmp_path.display().to_string(), e.to_string())
    })?;
    drop(tmp_file);

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        ModelError::file_error("rename to final", path.display().to_string(), e.to_string())
    })
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

pub(crate) fn read_to_string(path: &Path) -> ModelResult<String> {
    fs::read_to_string(path)
        .map_err(|e| ModelError::file_error("read", path.display().to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_path() {
        assert_eq!(StorageFormat::from_path(Path::new("a/model.json")), StorageFormat::Json);
        assert_eq!(StorageFormat::from_path(Path::new("model")), StorageFormat::Json);
        assert_eq!(StorageFormat::from_path(Path::new("model.H5")), StorageFormat::AttributeStore);
        assert_eq!(StorageFormat::from_path(Path::new("model.redb")), StorageFormat::AttributeStore);
        assert_eq!(StorageFormat::from_path(Path::new("model.msee")), StorageFormat::Msee);
    }

    #[test]
    fn test_atomic_write_leaves_no_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        write_atomic(&path, b"{}").unwrap();
        write_atomic(&path, b"{\"a\": 1}").unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "{\"a\": 1}");
        assert!(!tmp_path_for(&path).exists());
        assert_eq!(tmp_path_for(&path), dir.path().join("model.json.tmp"));
    }

    #[test]
    fn test_read_missing_file_is_file_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_to_string(&dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.error_code(), "FILE_ERROR");
    }
}
