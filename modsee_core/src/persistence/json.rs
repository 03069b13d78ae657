//! # JSON Project Files
//!
//! The whole project, every stage verbatim, as one pretty-printed JSON
//! document. Saves are atomic (write `.tmp`, sync, rename) and can hold
//! a [`ProjectLock`] for the duration of the write.
//!
//! ## Example
//!
//! ```rust,no_run
//! use modsee_core::persistence::JsonFileAdapter;
//! use modsee_core::project::Project;
//!
//! let project = Project::new("Cantilever");
//! let adapter = JsonFileAdapter::new("cantilever.json").with_lock("engineer@company.com");
//! project.save(&adapter)?;
//!
//! let loaded = Project::load(&adapter)?;
//! assert_eq!(loaded.project_id, project.project_id);
//! # Ok::<(), modsee_core::errors::ModelError>(())
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{ModelError, ModelResult};
use crate::persistence::lock::{LockHolder, ProjectLock};
use crate::persistence::{read_to_string, write_atomic, PersistenceAdapter};
use crate::project::Project;

/// Reads and writes a project as a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileAdapter {
    path: PathBuf,
    lock_user: Option<String>,
}

impl JsonFileAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileAdapter {
            path: path.into(),
            lock_user: None,
        }
    }

    /// Hold an exclusive lock as `user_id` while saving.
    pub fn with_lock(mut self, user_id: impl Into<String>) -> Self {
        self.lock_user = Some(user_id.into());
        self
    }

    /// Load, also reporting who holds a live lock on the file.
    pub fn load_with_lock_check(&self) -> ModelResult<(Project, Option<LockHolder>)> {
        let project = self.load_project()?;
        Ok((project, ProjectLock::holder(&self.path)))
    }
}

impl PersistenceAdapter for JsonFileAdapter {
    fn name(&self) -> &'static str {
        "json"
    }

    fn location(&self) -> &Path {
        &self.path
    }

    fn save_project(&self, project: &Project) -> ModelResult<PathBuf> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                ModelError::file_error("create directory", parent.display().to_string(), e.to_string())
            })?;
        }

        let _lock = match &self.lock_user {
            Some(user) => Some(ProjectLock::acquire(&self.path, user.clone())?),
            None => None,
        };

        let json = serde_json::to_string_pretty(project)
            .map_err(|e| ModelError::serialization(self.path.display().to_string(), e.to_string()))?;
        write_atomic(&self.path, json.as_bytes())?;
        Ok(self.path.clone())
    }

    /// Strict load: any malformed record fails the whole file.
    fn load_project(&self) -> ModelResult<Project> {
        let contents = read_to_string(&self.path)?;
        serde_json::from_str(&contents)
            .map_err(|e| ModelError::serialization(self.path.display().to_string(), e.to_string()))
    }
}
