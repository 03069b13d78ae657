//! # Analysis Results
//!
//! Results produced by the external solver and handed back to a project.
//! Modsee never computes these; it only stores them next to the model.
//!
//! Where results live is an explicit choice of the caller, see
//! [`ResultsBackend`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ObjectId, PropertyMap};
use crate::stage::StageId;

/// One analysis run's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResults {
    /// Display name, e.g. "Stage 2 Analysis"
    #[serde(default)]
    pub name: Option<String>,

    /// Stage the analysis was run on
    #[serde(default)]
    pub stage: Option<StageId>,

    /// When the results were recorded
    pub timestamp: DateTime<Utc>,

    /// Pseudo-time of each recorded step
    #[serde(default)]
    pub time_steps: Vec<f64>,

    /// Per node: one displacement vector per time step
    #[serde(default)]
    pub node_displacements: BTreeMap<ObjectId, Vec<Vec<f64>>>,

    /// Per element: one force vector per time step
    #[serde(default)]
    pub element_forces: BTreeMap<ObjectId, Vec<Vec<f64>>>,

    /// Solver parameters and other run metadata
    #[serde(default)]
    pub analysis_info: PropertyMap,
}

impl AnalysisResults {
    pub fn new(name: impl Into<String>) -> Self {
        AnalysisResults {
            name: Some(name.into()),
            stage: None,
            timestamp: Utc::now(),
            time_steps: Vec::new(),
            node_displacements: BTreeMap::new(),
            element_forces: BTreeMap::new(),
            analysis_info: PropertyMap::new(),
        }
    }

    pub fn for_stage(mut self, stage: StageId) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn step_count(&self) -> usize {
        self.time_steps.len()
    }

    /// Largest absolute displacement component over all nodes and steps
    pub fn max_abs_displacement(&self) -> f64 {
        self.node_displacements
            .values()
            .flatten()
            .flatten()
            .fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }
}

/// Listing entry returned when no specific analysis is requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub id: String,
    pub name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AnalysisSummary {
    pub fn from_results(id: impl Into<String>, results: &AnalysisResults) -> Self {
        AnalysisSummary {
            id: id.into(),
            name: results.name.clone(),
            timestamp: results.timestamp,
        }
    }
}

/// Where a project keeps analysis results.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResultsBackend {
    /// Kept on the project for the life of the process
    #[default]
    InMemory,
    /// Written through to the attribute store at this path
    AttributeStore(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_abs_displacement() {
        let mut results = AnalysisResults::new("Stage 2 Analysis").for_stage(2);
        results.time_steps = vec![0.0, 1.0];
        results.node_displacements.insert(7, vec![vec![0.0, -0.001], vec![0.0, -0.004]]);
        results.node_displacements.insert(4, vec![vec![0.002, 0.0]]);
        assert_eq!(results.step_count(), 2);
        assert!((results.max_abs_displacement() - 0.004).abs() < 1e-12);
        assert_eq!(results.stage, Some(2));
    }

    #[test]
    fn test_summary_from_results() {
        let results = AnalysisResults::new("Run");
        let summary = AnalysisSummary::from_results("analysis_1", &results);
        assert_eq!(summary.id, "analysis_1");
        assert_eq!(summary.name.as_deref(), Some("Run"));
        assert_eq!(summary.timestamp, results.timestamp);
    }

    #[test]
    fn test_default_backend_is_memory() {
        assert_eq!(ResultsBackend::default(), ResultsBackend::InMemory);
    }
}
