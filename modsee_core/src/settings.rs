//! # Application Settings
//!
//! An explicit settings store with a fixed schema. Callers own a
//! [`SettingsStore`] and pass it to whatever needs configuration; there is
//! no global instance.
//!
//! Every key has a kind and a default. Only values that differ from the
//! default are kept, so [`SettingsStore::reset`] is just a removal.
//!
//! ## Example
//!
//! ```rust
//! use modsee_core::settings::SettingsStore;
//!
//! let mut settings = SettingsStore::new();
//! assert_eq!(settings.get_int("recent_files_limit").unwrap(), 10);
//!
//! settings.set("grid/size", 2.5).unwrap();
//! assert!(settings.set("grid/size", "large").is_err());
//! assert!(settings.set("no/such/key", true).is_err());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ModelError, ModelResult};
use crate::persistence::{read_to_string, write_atomic};

/// A single setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SettingValue {
    pub fn kind(&self) -> SettingKind {
        match self {
            SettingValue::Bool(_) => SettingKind::Bool,
            SettingValue::Int(_) => SettingKind::Int,
            SettingValue::Float(_) => SettingKind::Float,
            SettingValue::Text(_) => SettingKind::Text,
        }
    }

    /// Convert to `kind`, widening integers to floats. `None` otherwise.
    fn coerce(self, kind: SettingKind) -> Option<SettingValue> {
        match (self, kind) {
            (SettingValue::Int(i), SettingKind::Float) => Some(SettingValue::Float(i as f64)),
            (value, kind) if value.kind() == kind => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{}", b),
            SettingValue::Int(i) => write!(f, "{}", i),
            SettingValue::Float(x) => write!(f, "{}", x),
            SettingValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Bool(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        SettingValue::Int(value)
    }
}

impl From<i32> for SettingValue {
    fn from(value: i32) -> Self {
        SettingValue::Int(value.into())
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        SettingValue::Float(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Text(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        SettingValue::Text(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Bool,
    Int,
    Float,
    Text,
}

impl fmt::Display for SettingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettingKind::Bool => "bool",
            SettingKind::Int => "integer",
            SettingKind::Float => "number",
            SettingKind::Text => "text",
        };
        f.write_str(name)
    }
}

/// Schema entry for one recognized key.
#[derive(Debug, Clone)]
pub struct SettingSpec {
    pub key: &'static str,
    pub default: SettingValue,
    pub description: &'static str,
}

impl SettingSpec {
    pub fn kind(&self) -> SettingKind {
        self.default.kind()
    }
}

fn spec(key: &'static str, default: impl Into<SettingValue>, description: &'static str) -> SettingSpec {
    SettingSpec {
        key,
        default: default.into(),
        description,
    }
}

static SCHEMA: Lazy<BTreeMap<&'static str, SettingSpec>> = Lazy::new(|| {
    [
        spec("auto_save/enabled", false, "Save the open project periodically"),
        spec("auto_save/interval", 5, "Minutes between automatic saves"),
        spec("recovery/enabled", true, "Keep a recovery copy of unsaved work"),
        spec("theme", "Light", "Color theme name"),
        spec("ui/font_size", "Medium", "Small, Medium or Large"),
        spec("recent_files_limit", 10, "Entries kept in the recent files list, 0 disables it"),
        spec("check_for_updates", true, "Look for new releases at startup"),
        spec("default_project_dir", "", "Directory offered for new projects, empty for the working directory"),
        spec("grid/size", 10.0, "Grid extent in model units"),
        spec("grid/divisions", 10, "Grid lines per side"),
        spec("view/node_size", 1.0, "Node glyph scale"),
        spec("view/element_width", 1.0, "Element line width"),
        spec("view/load_scale", 10.0, "Load arrow scale"),
        spec("view/deformation_scale", 1.0, "Deformed shape magnification"),
        spec("analysis/solver_timeout", 300, "Seconds before an external solver run is abandoned"),
        spec("analysis/max_stored_results", 10, "Analyses kept per project"),
    ]
    .into_iter()
    .map(|s| (s.key, s))
    .collect()
});

/// All recognized keys, sorted.
pub fn schema() -> impl Iterator<Item = &'static SettingSpec> {
    SCHEMA.values()
}

fn lookup(key: &str) -> ModelResult<&'static SettingSpec> {
    SCHEMA.get(key).ok_or_else(|| ModelError::UnknownSetting { key: key.to_string() })
}

fn mismatch(key: &str, expected: SettingKind, actual: impl fmt::Display) -> ModelError {
    ModelError::SettingTypeMismatch {
        key: key.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

/// User settings layered over the schema defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsStore {
    overrides: BTreeMap<String, SettingValue>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective value: the override if set, else the default.
    pub fn get(&self, key: &str) -> ModelResult<SettingValue> {
        let spec = lookup(key)?;
        Ok(self.overrides.get(key).cloned().unwrap_or_else(|| spec.default.clone()))
    }

    /// Set a value after checking the key and its type.
    pub fn set(&mut self, key: &str, value: impl Into<SettingValue>) -> ModelResult<()> {
        let spec = lookup(key)?;
        let value = value.into();
        let actual = value.kind();
        let value = value.coerce(spec.kind()).ok_or_else(|| mismatch(key, spec.kind(), actual))?;

        if value == spec.default {
            self.overrides.remove(key);
        } else {
            self.overrides.insert(key.to_string(), value);
        }
        tracing::debug!(key, "setting changed");
        Ok(())
    }

    pub fn reset(&mut self, key: &str) -> ModelResult<()> {
        lookup(key)?;
        self.overrides.remove(key);
        Ok(())
    }

    pub fn reset_all(&mut self) {
        self.overrides.clear();
    }

    pub fn is_default(&self, key: &str) -> bool {
        !self.overrides.contains_key(key)
    }

    pub fn get_bool(&self, key: &str) -> ModelResult<bool> {
        match self.get(key)? {
            SettingValue::Bool(b) => Ok(b),
            other => Err(mismatch(key, SettingKind::Bool, other.kind())),
        }
    }

    pub fn get_int(&self, key: &str) -> ModelResult<i64> {
        match self.get(key)? {
            SettingValue::Int(i) => Ok(i),
            other => Err(mismatch(key, SettingKind::Int, other.kind())),
        }
    }

    pub fn get_float(&self, key: &str) -> ModelResult<f64> {
        match self.get(key)? {
            SettingValue::Float(x) => Ok(x),
            SettingValue::Int(i) => Ok(i as f64),
            other => Err(mismatch(key, SettingKind::Float, other.kind())),
        }
    }

    pub fn get_str(&self, key: &str) -> ModelResult<String> {
        match self.get(key)? {
            SettingValue::Text(s) => Ok(s),
            other => Err(mismatch(key, SettingKind::Text, other.kind())),
        }
    }

    /// Every key with its effective value, as a flat JSON object.
    pub fn to_json(&self) -> Value {
        let map = SCHEMA
            .keys()
            .filter_map(|key| {
                let value = self.get(key).ok()?;
                Some((key.to_string(), serde_json::to_value(value).ok()?))
            })
            .collect();
        Value::Object(map)
    }

    /// Build from a flat JSON object. Unknown keys and mistyped values are
    /// skipped with a warning so newer files still open.
    pub fn from_json(value: &Value) -> ModelResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| ModelError::invalid_input("settings", value.to_string(), "expected a JSON object"))?;

        let mut store = SettingsStore::new();
        for (key, raw) in object {
            let parsed = match serde_json::from_value::<SettingValue>(raw.clone()) {
                Ok(parsed) => parsed,
                Err(_) => {
                    tracing::warn!(key = %key, "ignoring setting with unsupported value");
                    continue;
                }
            };
            if let Err(e) = store.set(key, parsed) {
                tracing::warn!(key = %key, error = %e, "ignoring setting");
            }
        }
        Ok(store)
    }

    /// Load from a JSON file; a missing file gives the defaults.
    pub fn load(path: &Path) -> ModelResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(SettingsStore::new());
        }
        let contents = read_to_string(path)?;
        let value: Value = serde_json::from_str(&contents)
            .map_err(|e| ModelError::serialization(path.display().to_string(), e.to_string()))?;
        Self::from_json(&value)
    }

    pub fn save(&self, path: &Path) -> ModelResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                ModelError::file_error("create directory", parent.display().to_string(), e.to_string())
            })?;
        }
        let json = serde_json::to_string_pretty(&self.to_json())
            .map_err(|e| ModelError::serialization(path.display().to_string(), e.to_string()))?;
        write_atomic(path, json.as_bytes())?;
        tracing::info!(path = %path.display(), overrides = self.overrides.len(), "saved settings");
        Ok(())
    }
}
