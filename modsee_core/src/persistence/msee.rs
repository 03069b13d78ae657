//! # `.msee` Application Files
//!
//! The desktop file format: a versioned envelope around the project JSON plus
//! the application settings that were active when it was saved.
//!
//! ```text
//! {
//!   "metadata": { "file_format_version": "1.0.0", "created_by": "Modsee",
//!                 "created_at": "...", "file_path": "..." },
//!   "model": { <project JSON> },
//!   "app_settings": { ... }
//! }
//! ```
//!
//! A file written by another format version is still read; the mismatch is
//! logged and noted in the [`RestoreReport`].
//!
//! Restoring has two explicit modes:
//! - [`RestoreMode::Strict`] fails on the first malformed record
//! - [`RestoreMode::Lenient`] skips malformed records and stages and lists
//!   each one in the report
//!
//! Either way, `fix` constraints are fanned out into per-node boundary
//! conditions once the stages are restored.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use semver::Version;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::errors::{ModelError, ModelResult};
use crate::persistence::{read_to_string, write_atomic, PersistenceAdapter};
use crate::project::Project;
use crate::stage::{Collection, Stage, StageId, StageStore};

pub const FILE_EXTENSION: &str = "msee";
pub const FILE_FORMAT_VERSION: &str = "1.0.0";
pub const CREATED_BY: &str = "Modsee";

/// Envelope metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MseeMetadata {
    pub file_format_version: String,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub file_path: Option<String>,
}

impl MseeMetadata {
    fn for_path(path: &Path) -> Self {
        MseeMetadata {
            file_format_version: FILE_FORMAT_VERSION.to_string(),
            created_by: CREATED_BY.to_string(),
            created_at: Some(Utc::now()),
            file_path: Some(path.display().to_string()),
        }
    }

    /// True when the file's version differs from ours or cannot be read.
    pub fn version_mismatch(&self) -> bool {
        match (Version::parse(&self.file_format_version), Version::parse(FILE_FORMAT_VERSION)) {
            (Ok(file), Ok(ours)) => file != ours,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestoreMode {
    /// Abort on the first malformed record
    #[default]
    Strict,
    /// Skip malformed records and report them
    Lenient,
}

/// One item left out by a lenient restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    /// Dotted location inside the model, e.g. `stages.2.nodes.7`
    pub location: String,
    pub reason: String,
}

/// What a restore did besides building the project.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RestoreReport {
    pub skipped: Vec<SkippedItem>,
    /// Boundary conditions generated from `fix` constraints
    pub expanded_boundary_conditions: usize,
    /// Set when the file was written by a different format version
    pub version_warning: Option<String>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.version_warning.is_none()
    }

    fn skip(&mut self, location: impl Into<String>, reason: impl Into<String>) {
        let item = SkippedItem {
            location: location.into(),
            reason: reason.into(),
        };
        tracing::warn!(location = %item.location, reason = %item.reason, "skipped while restoring");
        self.skipped.push(item);
    }
}

/// A restored `.msee` file.
#[derive(Debug, Clone)]
pub struct MseeDocument {
    pub metadata: Option<MseeMetadata>,
    pub project: Project,
    pub app_settings: Value,
    pub report: RestoreReport,
}

/// Reads and writes `.msee` files.
#[derive(Debug, Clone)]
pub struct MseeFile {
    path: PathBuf,
    mode: RestoreMode,
    app_settings: Value,
}

impl MseeFile {
    /// `path` gets the `.msee` extension if it has another one.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let mut path = path.into();
        if path.extension().map_or(true, |e| e != FILE_EXTENSION) {
            path.set_extension(FILE_EXTENSION);
        }
        MseeFile {
            path,
            mode: RestoreMode::Strict,
            app_settings: Value::Object(Map::new()),
        }
    }

    pub fn with_mode(mut self, mode: RestoreMode) -> Self {
        self.mode = mode;
        self
    }

    /// Settings written into the envelope on save.
    pub fn with_app_settings(mut self, settings: Value) -> Self {
        self.app_settings = settings;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file and rebuild the project according to the restore mode.
    pub fn restore(&self) -> ModelResult<MseeDocument> {
        let location = self.path.display().to_string();
        let contents = read_to_string(&self.path)?;
        let mut envelope: Value = serde_json::from_str(&contents)
            .map_err(|e| ModelError::serialization(location.clone(), e.to_string()))?;

        let mut report = RestoreReport::default();

        let metadata = match envelope.get_mut("metadata").map(Value::take) {
            Some(raw) => Some(
                serde_json::from_value::<MseeMetadata>(raw)
                    .map_err(|e| ModelError::serialization(location.clone(), format!("metadata: {}", e)))?,
            ),
            None => None,
        };
        match &metadata {
            Some(meta) if meta.version_mismatch() => {
                tracing::warn!(
                    expected = FILE_FORMAT_VERSION,
                    found = %meta.file_format_version,
                    path = %location,
                    "file format version mismatch"
                );
                report.version_warning = Some(format!(
                    "file format {} read as {}",
                    meta.file_format_version, FILE_FORMAT_VERSION
                ));
            }
            Some(_) => {}
            None => {
                tracing::warn!(path = %location, "file has no metadata block");
                report.version_warning = Some("missing metadata".to_string());
            }
        }

        let model = envelope
            .get_mut("model")
            .map(Value::take)
            .ok_or_else(|| ModelError::missing_field("model"))?;
        let app_settings = envelope
            .get_mut("app_settings")
            .map(Value::take)
            .unwrap_or_else(|| Value::Object(Map::new()));

        let mut project = match self.mode {
            RestoreMode::Strict => serde_json::from_value::<Project>(model)
                .map_err(|e| ModelError::serialization(location.clone(), e.to_string()))?,
            RestoreMode::Lenient => restore_lenient(model, &mut report),
        };

        let mut expanded = 0;
        for stage_id in project.stages.stage_ids() {
            match project.stages.get_stage_mut(stage_id)?.expand_fixed_constraints() {
                Ok(count) => expanded += count,
                Err(e) if self.mode == RestoreMode::Lenient => {
                    report.skip(format!("stages.{}.constraints", stage_id), e.to_string())
                }
                Err(e) => return Err(e),
            }
        }
        report.expanded_boundary_conditions = expanded;

        tracing::info!(
            path = %location,
            mode = ?self.mode,
            stages = project.stages.len(),
            skipped = report.skipped.len(),
            "restored project file"
        );
        Ok(MseeDocument {
            metadata,
            project,
            app_settings,
            report,
        })
    }
}

impl PersistenceAdapter for MseeFile {
    fn name(&self) -> &'static str {
        "msee"
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

        let serialization = |e: serde_json::Error| ModelError::serialization(self.path.display().to_string(), e.to_string());
        let envelope = json!({
            "metadata": serde_json::to_value(MseeMetadata::for_path(&self.path)).map_err(serialization)?,
            "model": serde_json::to_value(project).map_err(serialization)?,
            "app_settings": self.app_settings,
        });
        let text = serde_json::to_string_pretty(&envelope).map_err(serialization)?;
        write_atomic(&self.path, text.as_bytes())?;
        Ok(self.path.clone())
    }

    fn load_project(&self) -> ModelResult<Project> {
        Ok(self.restore()?.project)
    }
}

/// Rebuild a project field by field, keeping whatever is well formed.
fn restore_lenient(mut model: Value, report: &mut RestoreReport) -> Project {
    let mut project = Project::new(model.get("name").and_then(Value::as_str).unwrap_or_default());

    match model.get("project_id").and_then(Value::as_str).map(Uuid::parse_str) {
        Some(Ok(id)) => project.project_id = id,
        _ => report.skip("project_id", "missing or malformed, generated a new one"),
    }
    if let Some(description) = model.get("description").and_then(Value::as_str) {
        project.description = description.to_string();
    }
    for (key, slot) in [
        ("created_at", &mut project.created_at),
        ("modified_at", &mut project.modified_at),
    ] {
        match model.get(key).map(|v| serde_json::from_value::<DateTime<Utc>>(v.clone())) {
            Some(Ok(time)) => *slot = time,
            Some(Err(e)) => report.skip(key, e.to_string()),
            None => {}
        }
    }
    if let Some(params) = model.get_mut("model_builder_params").map(Value::take) {
        match serde_json::from_value(params) {
            Ok(params) => project.model_builder_params = params,
            Err(e) => report.skip("model_builder_params", e.to_string()),
        }
    }
    if let Some(settings) = model.get_mut("analysis_settings").map(Value::take) {
        match serde_json::from_value(settings) {
            Ok(settings) => project.analysis_settings = settings,
            Err(e) => report.skip("analysis_settings", e.to_string()),
        }
    }

    let mut stages: BTreeMap<StageId, Stage> = BTreeMap::new();
    match model.get_mut("stages").map(Value::take) {
        Some(Value::Object(raw_stages)) => {
            for (key, raw) in raw_stages {
                let location = format!("stages.{}", key);
                let Ok(stage_id) = key.trim().parse::<StageId>() else {
                    report.skip(location, "stage key is not a stage number");
                    continue;
                };
                let Value::Object(mut fields) = raw else {
                    report.skip(location, "stage is not an object");
                    continue;
                };
                let name = fields.get("name").and_then(Value::as_str).map(str::to_string);
                let mut stage = Stage::new(stage_id, name.as_deref());
                restore_stage_header(&mut stage, &mut fields, &location, report);
                for collection in Collection::ALL {
                    if let Some(records) = fields.remove(collection.key()) {
                        restore_collection(&mut stage, collection, records, &location, report);
                    }
                }
                stages.insert(stage_id, stage);
            }
        }
        Some(_) => report.skip("stages", "not an object"),
        None => report.skip("stages", "missing"),
    }
    project.stages = StageStore::from(stages);
    project
}

/// Type, order, parent and parameters of a stage. A malformed field keeps
/// its default.
fn restore_stage_header(
    stage: &mut Stage,
    fields: &mut Map<String, Value>,
    stage_location: &str,
    report: &mut RestoreReport,
) {
    fn take<T: DeserializeOwned>(
        fields: &mut Map<String, Value>,
        key: &str,
        stage_location: &str,
        report: &mut RestoreReport,
    ) -> Option<T> {
        let value = fields.remove(key)?;
        serde_json::from_value(value)
            .map_err(|e| report.skip(format!("{}.{}", stage_location, key), e.to_string()))
            .ok()
    }

    if let Some(stage_type) = take(fields, "stage_type", stage_location, report) {
        stage.stage_type = stage_type;
    }
    if let Some(order) = take(fields, "order", stage_location, report) {
        stage.order = order;
    }
    if let Some(parent) = take(fields, "parent_stage_id", stage_location, report) {
        stage.parent_stage_id = parent;
    }
    if let Some(description) = take(fields, "description", stage_location, report) {
        stage.description = description;
    }
    if let Some(parameters) = take(fields, "analysis_parameters", stage_location, report) {
        stage.analysis_parameters = parameters;
    }
}

/// Accepts either an id-keyed object or a legacy list of records with `id`.
fn restore_collection(
    stage: &mut Stage,
    collection: Collection,
    records: Value,
    stage_location: &str,
    report: &mut RestoreReport,
) {
    let entries: Vec<(String, Value)> = match records {
        Value::Object(map) => map.into_iter().collect(),
        Value::Array(list) => list
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                let key = record
                    .get("id")
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| format!("#{}", index));
                (key, record)
            })
            .collect(),
        _ => {
            report.skip(format!("{}.{}", stage_location, collection), "collection is not an object");
            return;
        }
    };

    for (key, record) in entries {
        let location = format!("{}.{}.{}", stage_location, collection, key);
        let Ok(id) = key.trim_matches('"').parse::<u32>() else {
            report.skip(location, "id is not a number");
            continue;
        };
        if let Err(e) = stage.insert_json(collection, id, record) {
            report.skip(location, e.to_string());
        }
    }
}

/// Most-recent-first list of opened files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentFiles {
    files: Vec<PathBuf>,
    limit: usize,
}

impl RecentFiles {
    pub fn new(limit: usize) -> Self {
        RecentFiles {
            files: Vec::new(),
            limit,
        }
    }

    /// Move `path` to the front, dropping the oldest entries over the limit.
    pub fn add(&mut self, path: &Path) {
        let path = absolute(path);
        self.files.retain(|p| p != &path);
        self.files.insert(0, path);
        self.files.truncate(self.limit);
    }

    pub fn remove(&mut self, path: &Path) {
        let path = absolute(path);
        self.files.retain(|p| p != &path);
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
        self.files.truncate(limit);
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Load a saved list; a missing file gives an empty one.
    pub fn load(path: &Path, limit: usize) -> ModelResult<Self> {
        if !path.exists() {
            return Ok(RecentFiles::new(limit));
        }
        let contents = read_to_string(path)?;
        let mut recent: RecentFiles = serde_json::from_str(&contents)
            .map_err(|e| ModelError::serialization(path.display().to_string(), e.to_string()))?;
        recent.set_limit(limit);
        Ok(recent)
    }

    pub fn save(&self, path: &Path) -> ModelResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                ModelError::file_error("create directory", parent.display().to_string(), e.to_string())
            })?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| ModelError::serialization(path.display().to_string(), e.to_string()))?;
        write_atomic(path, text.as_bytes())
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{properties, ConstraintType};
    use crate::stage::{StageType, ROOT_STAGE};

    #[test]
    fn test_extension_is_forced() {
        assert_eq!(MseeFile::new("a/model.json").path(), Path::new("a/model.msee"));
        assert_eq!(MseeFile::new("model").path(), Path::new("model.msee"));
        assert_eq!(MseeFile::new("model.msee").path(), Path::new("model.msee"));
    }

    #[test]
    fn test_save_writes_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let file = MseeFile::new(dir.path().join("sub/project"))
            .with_app_settings(json!({"theme": "dark"}));
        let written = Project::new("Envelope").save(&file).unwrap();
        assert!(written.ends_with("project.msee"));

        let value: Value = serde_json::from_str(&fs::read_to_string(&written).unwrap()).unwrap();
        assert_eq!(value["metadata"]["file_format_version"], FILE_FORMAT_VERSION);
        assert_eq!(value["metadata"]["created_by"], CREATED_BY);
        assert_eq!(value["model"]["name"], "Envelope");
        assert_eq!(value["app_settings"]["theme"], "dark");
    }

    #[test]
    fn test_version_comparison() {
        let mut meta = MseeMetadata::for_path(Path::new("a.msee"));
        assert!(!meta.version_mismatch());
        meta.file_format_version = "1.0.1".to_string();
        assert!(meta.version_mismatch());
        meta.file_format_version = "one".to_string();
        assert!(meta.version_mismatch());
    }

    #[test]
    fn test_version_mismatch_is_only_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = MseeFile::new(dir.path().join("old.msee"));
        let project = Project::new("Old");
        let envelope = json!({
            "metadata": {"file_format_version": "2.1.0"},
            "model": serde_json::to_value(&project).unwrap(),
        });
        fs::write(file.path(), envelope.to_string()).unwrap();

        let document = file.restore().unwrap();
        assert_eq!(document.project.project_id, project.project_id);
        assert!(document.report.version_warning.is_some());
        assert!(!document.report.is_clean());
    }

    #[test]
    fn test_lenient_restore_skips_bad_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.msee");
        let envelope = json!({
            "metadata": {"file_format_version": "1.0.0"},
            "model": {
                "project_id": Uuid::new_v4().to_string(),
                "name": "Legacy",
                "stages": {
                    "0": {
                        "id": 0,
                        "name": "Stage 0",
                        "nodes": {
                            "1": {"id": 1, "coordinates": [0.0, 0.0, 0.0]},
                            "2": {"id": 2, "coordinates": "bad"}
                        },
                        "elements": [
                            {"id": 1, "type": "truss", "nodes": [1, 2]}
                        ]
                    },
                    "final": {"id": 9, "name": "Final"},
                    "3": "not a stage",
                    "4": {
                        "id": 4,
                        "name": "Modes",
                        "stage_type": "EIGEN",
                        "order": "first",
                        "parent_stage_id": 0,
                        "analysis_parameters": {"num_modes": 3}
                    }
                }
            }
        });
        fs::write(&path, envelope.to_string()).unwrap();

        let strict = MseeFile::new(&path);
        assert!(strict.restore().is_err());

        let document = MseeFile::new(&path).with_mode(RestoreMode::Lenient).restore().unwrap();
        let project = document.project;
        assert_eq!(project.name, "Legacy");
        assert_eq!(project.nodes().len(), 1);
        assert_eq!(project.elements().len(), 1);
        assert_eq!(project.stages.stage_ids(), vec![ROOT_STAGE, 4]);
        let modes = project.stages.get_stage(4).unwrap();
        assert_eq!(modes.stage_type, StageType::Eigen);
        assert_eq!(modes.order, 0);
        assert_eq!(modes.parent_stage_id, Some(ROOT_STAGE));
        assert_eq!(modes.analysis_parameter("num_modes"), Some(3.0));

        let locations: Vec<&str> = document.report.skipped.iter().map(|s| s.location.as_str()).collect();
        assert!(locations.contains(&"stages.4.order"));
        assert!(locations.contains(&"stages.0.nodes.2"));
        assert!(locations.contains(&"stages.final"));
        assert!(locations.contains(&"stages.3"));
    }

    #[test]
    fn test_restore_expands_fix_constraints() {
        let dir = tempfile::tempdir().unwrap();
        let file = MseeFile::new(dir.path().join("fixed.msee"));
        let mut project = Project::new("Fixed");
        for id in 1..=2 {
            project.add_node(id, id as f64, 0.0, 0.0, ROOT_STAGE).unwrap();
        }
        project
            .add_constraint(
                1,
                ConstraintType::Fix,
                properties([("node_ids", json!([1, 2])), ("dofs", json!([1, 1, 1]))]),
                ROOT_STAGE,
            )
            .unwrap();
        project.save(&file).unwrap();

        let document = file.restore().unwrap();
        assert_eq!(document.report.expanded_boundary_conditions, 2);
        assert_eq!(document.project.boundary_conditions().len(), 2);
    }

    #[test]
    fn test_exhausted_boundary_ids_on_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crowded.msee");
        let mut project = Project::new("Crowded");
        project.add_node(1, 0.0, 0.0, 0.0, ROOT_STAGE).unwrap();
        project
            .add_boundary_condition(u32::MAX, 1, vec![1, 1, 1], vec![0.0; 3], ROOT_STAGE)
            .unwrap();
        project
            .add_constraint(
                1,
                ConstraintType::Fix,
                properties([("node_ids", json!([1])), ("dofs", json!([1, 1, 1]))]),
                ROOT_STAGE,
            )
            .unwrap();
        project.save(&MseeFile::new(&path)).unwrap();

        let err = MseeFile::new(&path).restore().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");

        let document = MseeFile::new(&path).with_mode(RestoreMode::Lenient).restore().unwrap();
        assert_eq!(document.report.expanded_boundary_conditions, 0);
        assert_eq!(document.report.skipped[0].location, "stages.0.constraints");
        assert_eq!(document.project.boundary_conditions().len(), 1);
    }

    #[test]
    fn test_recent_files() {
        let mut recent = RecentFiles::new(2);
        recent.add(Path::new("/p/a.msee"));
        recent.add(Path::new("/p/b.msee"));
        recent.add(Path::new("/p/a.msee"));
        assert_eq!(recent.files(), &[PathBuf::from("/p/a.msee"), PathBuf::from("/p/b.msee")]);

        recent.add(Path::new("/p/c.msee"));
        assert_eq!(recent.files().len(), 2);
        assert_eq!(recent.files()[0], PathBuf::from("/p/c.msee"));

        recent.add(Path::new("relative.msee"));
        assert!(recent.files()[0].is_absolute());

        recent.clear();
        assert!(recent.files().is_empty());
    }

    #[test]
    fn test_recent_files_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("config/recent.json");
        assert!(RecentFiles::load(&store, 5).unwrap().files().is_empty());

        let mut recent = RecentFiles::new(10);
        recent.add(Path::new("/p/a.msee"));
        recent.add(Path::new("/p/b.msee"));
        recent.save(&store).unwrap();

        let loaded = RecentFiles::load(&store, 1).unwrap();
        assert_eq!(loaded.files(), &[PathBuf::from("/p/b.msee")]);
    }
}
