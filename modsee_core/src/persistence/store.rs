//! # Attribute Store
//!
//! A redb-backed store that keeps the model one record per object, next to
//! the analysis results of the project. redb gives us:
//! - ACID transactions (a save either lands whole or not at all)
//! - Crash safety (copy-on-write B-trees)
//! - Zero configuration
//!
//! ## Tables
//!
//! | Table | Key | Value |
//! |---|---|---|
//! | `project` | attribute name | attribute value (string, JSON for structs) |
//! | `stages` | stage id | stage header JSON (name, type, order, parent) |
//! | `objects` | (stage id, collection, object id) | JSON record bytes |
//! | `analyses` | (project id, analysis id) | JSON results bytes |
//!
//! Saving a project rewrites the first three tables in one transaction and
//! leaves `analyses` alone, so results survive model edits.
//!
//! The database is opened per call rather than held, so a project can save
//! through this adapter and write results to the same file in one process.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::errors::{ModelError, ModelResult};
use crate::persistence::PersistenceAdapter;
use crate::project::Project;
use crate::results::{AnalysisResults, AnalysisSummary};
use crate::stage::{Collection, Stage, StageId, StageStore};

/// Project attributes: name -> value
const PROJECT: TableDefinition<&str, &str> = TableDefinition::new("project");

/// Stage id -> stage header (a [`Stage`] without objects, as JSON)
const STAGES: TableDefinition<u32, &str> = TableDefinition::new("stages");

/// (stage id, collection key, object id) -> serialized record
const OBJECTS: TableDefinition<(u32, &str, u32), &[u8]> = TableDefinition::new("objects");

/// (project id, analysis id) -> serialized AnalysisResults
const ANALYSES: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("analyses");

fn storage_error(e: impl std::fmt::Display) -> ModelError {
    ModelError::storage(e.to_string())
}

/// Persistence adapter over a redb database file.
#[derive(Debug, Clone)]
pub struct AttributeStoreAdapter {
    path: PathBuf,
}

impl AttributeStoreAdapter {
    /// Adapter for a store at `path`. Nothing is touched until the first
    /// read or write; reading a store that does not exist fails.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        AttributeStoreAdapter { path: path.into() }
    }

    /// Open or create a store at `path`, creating its tables.
    pub fn open(path: impl Into<PathBuf>) -> ModelResult<Self> {
        let adapter = AttributeStoreAdapter::new(path);
        adapter.writable()?;
        Ok(adapter)
    }

    /// Database for writing, created with every table when missing.
    fn writable(&self) -> ModelResult<Database> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                ModelError::file_error("create directory", parent.display().to_string(), e.to_string())
            })?;
        }

        let db = Database::create(&self.path).map_err(storage_error)?;
        let write_txn = db.begin_write().map_err(storage_error)?;
        {
            write_txn.open_table(PROJECT).map_err(storage_error)?;
            write_txn.open_table(STAGES).map_err(storage_error)?;
            write_txn.open_table(OBJECTS).map_err(storage_error)?;
            write_txn.open_table(ANALYSES).map_err(storage_error)?;
        }
        write_txn.commit().map_err(storage_error)?;
        Ok(db)
    }

    /// Database for reading; a missing file is an error, never created.
    fn readable(&self) -> ModelResult<Database> {
        if !self.path.is_file() {
            return Err(ModelError::file_error(
                "open store",
                self.path.display().to_string(),
                "no such file",
            ));
        }
        Database::open(&self.path).map_err(storage_error)
    }
}

impl PersistenceAdapter for AttributeStoreAdapter {
    fn name(&self) -> &'static str {
        "attribute-store"
    }

    fn location(&self) -> &Path {
        &self.path
    }

    fn save_project(&self, project: &Project) -> ModelResult<PathBuf> {
        let serialization = |e: serde_json::Error| {
            ModelError::serialization(self.path.display().to_string(), e.to_string())
        };

        let attributes = [
            ("project_id", project.project_id.to_string()),
            ("name", project.name.clone()),
            ("description", project.description.clone()),
            ("created_at", project.created_at.to_rfc3339()),
            ("modified_at", project.modified_at.to_rfc3339()),
            (
                "model_builder_params",
                serde_json::to_string(&project.model_builder_params).map_err(serialization)?,
            ),
            (
                "analysis_settings",
                serde_json::to_string(&project.analysis_settings).map_err(serialization)?,
            ),
        ];

        let db = self.writable()?;
        let write_txn = db.begin_write().map_err(storage_error)?;
        write_txn.delete_table(PROJECT).map_err(storage_error)?;
        write_txn.delete_table(STAGES).map_err(storage_error)?;
        write_txn.delete_table(OBJECTS).map_err(storage_error)?;
        {
            let mut project_table = write_txn.open_table(PROJECT).map_err(storage_error)?;
            for (key, value) in &attributes {
                project_table.insert(*key, value.as_str()).map_err(storage_error)?;
            }

            let mut stages_table = write_txn.open_table(STAGES).map_err(storage_error)?;
            let mut objects_table = write_txn.open_table(OBJECTS).map_err(storage_error)?;
            for stage in project.stages.iter() {
                let header = serde_json::to_string(&stage.header()).map_err(serialization)?;
                stages_table.insert(stage.id, header.as_str()).map_err(storage_error)?;
                for collection in Collection::ALL {
                    for (id, record) in stage.records_json(collection).map_err(serialization)? {
                        let bytes = serde_json::to_vec(&record).map_err(serialization)?;
                        objects_table
                            .insert((stage.id, collection.key(), id), bytes.as_slice())
                            .map_err(storage_error)?;
                    }
                }
            }
        }
        write_txn.commit().map_err(storage_error)?;

        Ok(self.path.clone())
    }

    fn load_project(&self) -> ModelResult<Project> {
        let location = self.path.display().to_string();
        let malformed = |what: &str, reason: String| {
            ModelError::serialization(location.clone(), format!("{}: {}", what, reason))
        };

        let db = self.readable()?;
        let read_txn = db.begin_read().map_err(storage_error)?;

        let mut attributes = BTreeMap::new();
        {
            let table = read_txn.open_table(PROJECT).map_err(storage_error)?;
            for entry in table.iter().map_err(storage_error)? {
                let (key, value) = entry.map_err(storage_error)?;
                attributes.insert(key.value().to_string(), value.value().to_string());
            }
        }
        let attribute = |key: &str| {
            attributes
                .get(key)
                .cloned()
                .ok_or_else(|| malformed("project", format!("missing attribute '{}'", key)))
        };

        let mut project = Project::new(attribute("name")?);
        project.project_id = Uuid::parse_str(&attribute("project_id")?)
            .map_err(|e| malformed("project_id", e.to_string()))?;
        project.description = attributes.get("description").cloned().unwrap_or_default();
        project.created_at = parse_timestamp(&attribute("created_at")?)
            .map_err(|e| malformed("created_at", e))?;
        project.modified_at = parse_timestamp(&attribute("modified_at")?)
            .map_err(|e| malformed("modified_at", e))?;
        if let Some(params) = attributes.get("model_builder_params") {
            project.model_builder_params =
                serde_json::from_str(params).map_err(|e| malformed("model_builder_params", e.to_string()))?;
        }
        if let Some(settings) = attributes.get("analysis_settings") {
            project.analysis_settings =
                serde_json::from_str(settings).map_err(|e| malformed("analysis_settings", e.to_string()))?;
        }

        let mut stages: BTreeMap<StageId, Stage> = BTreeMap::new();
        {
            let table = read_txn.open_table(STAGES).map_err(storage_error)?;
            for entry in table.iter().map_err(storage_error)? {
                let (id, header) = entry.map_err(storage_error)?;
                let id = id.value();
                // Stores written before stage headers hold the bare name
                let stage = match serde_json::from_str::<Stage>(header.value()) {
                    Ok(stage) => Stage { id, ..stage },
                    Err(_) => Stage::new(id, Some(header.value())),
                };
                stages.insert(id, stage);
            }
        }
        {
            let table = read_txn.open_table(OBJECTS).map_err(storage_error)?;
            for entry in table.iter().map_err(storage_error)? {
                let (key, bytes) = entry.map_err(storage_error)?;
                let (stage_id, collection_key, id) = key.value();
                let what = format!("stage {} {} {}", stage_id, collection_key, id);
                let collection = Collection::from_key(collection_key)
                    .ok_or_else(|| malformed(&what, "unknown collection".to_string()))?;
                let stage = stages
                    .get_mut(&stage_id)
                    .ok_or_else(|| malformed(&what, "record of an unknown stage".to_string()))?;
                let record = serde_json::from_slice(bytes.value()).map_err(|e| malformed(&what, e.to_string()))?;
                stage
                    .insert_json(collection, id, record)
                    .map_err(|e| malformed(&what, e.to_string()))?;
            }
        }
        project.stages = StageStore::from(stages);
        Ok(project)
    }

    fn save_analysis_results(
        &self,
        project_id: &Uuid,
        analysis_id: &str,
        results: &AnalysisResults,
    ) -> ModelResult<()> {
        let bytes = serde_json::to_vec(results)
            .map_err(|e| ModelError::serialization(self.path.display().to_string(), e.to_string()))?;
        let project_key = project_id.to_string();

        let db = self.writable()?;
        let write_txn = db.begin_write().map_err(storage_error)?;
        {
            let mut table = write_txn.open_table(ANALYSES).map_err(storage_error)?;
            table
                .insert((project_key.as_str(), analysis_id), bytes.as_slice())
                .map_err(storage_error)?;
        }
        write_txn.commit().map_err(storage_error)?;
        tracing::debug!(analysis = analysis_id, project = %project_id, "wrote analysis results");
        Ok(())
    }

    fn get_analysis_results(
        &self,
        project_id: &Uuid,
        analysis_id: &str,
    ) -> ModelResult<Option<AnalysisResults>> {
        let project_key = project_id.to_string();
        let db = self.readable()?;
        let read_txn = db.begin_read().map_err(storage_error)?;
        let table = read_txn.open_table(ANALYSES).map_err(storage_error)?;
        let Some(bytes) = table
            .get((project_key.as_str(), analysis_id))
            .map_err(storage_error)?
        else {
            return Ok(None);
        };
        serde_json::from_slice(bytes.value())
            .map(Some)
            .map_err(|e| ModelError::serialization(self.path.display().to_string(), e.to_string()))
    }

    fn list_analyses(&self, project_id: &Uuid) -> ModelResult<Vec<AnalysisSummary>> {
        let project_key = project_id.to_string();
        let db = self.readable()?;
        let read_txn = db.begin_read().map_err(storage_error)?;
        let table = read_txn.open_table(ANALYSES).map_err(storage_error)?;

        let mut summaries = Vec::new();
        for entry in table.iter().map_err(storage_error)? {
            let (key, bytes) = entry.map_err(storage_error)?;
            let (owner, analysis_id) = key.value();
            if owner != project_key {
                continue;
            }
            let results: AnalysisResults = serde_json::from_slice(bytes.value())
                .map_err(|e| ModelError::serialization(self.path.display().to_string(), e.to_string()))?;
            summaries.push(AnalysisSummary::from_results(analysis_id, &results));
        }
        Ok(summaries)
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| e.to_string())
}
