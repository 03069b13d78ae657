//! Rendering boundary.
//!
//! A renderer is handed the project after every change and draws stage 0.
//! It only reads; nothing flows back into the model.

use serde::Serialize;

use crate::model::ObjectId;
use crate::project::Project;
use crate::stage::Stage;

/// A 3D scene consumer. Implementations read [`Project::root_stage`].
pub trait RenderingAdapter {
    fn update_model(&mut self, project: &Project);
}

/// Axis-aligned bounding box of node coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl BoundingBox {
    /// Inverted box, grows with [`BoundingBox::include`]
    fn empty() -> Self {
        BoundingBox {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    fn include(&mut self, point: &[f64; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(point[axis]);
            self.max[axis] = self.max[axis].max(point[axis]);
        }
    }

    pub fn size(&self) -> [f64; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    pub fn center(&self) -> [f64; 3] {
        [
            (self.min[0] + self.max[0]) / 2.0,
            (self.min[1] + self.max[1]) / 2.0,
            (self.min[2] + self.max[2]) / 2.0,
        ]
    }
}

/// What a renderer would put on screen: per-kind counts and extents.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SceneSummary {
    pub stage_name: String,
    pub nodes: usize,
    pub elements: usize,
    pub boundary_conditions: usize,
    pub loads: usize,
    /// `None` when the stage has no nodes
    pub bounds: Option<BoundingBox>,
    /// Elements that could not be drawn because a node is missing
    pub undrawable_elements: Vec<ObjectId>,
    pub updates: usize,
}

impl SceneSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_stage(stage: &Stage) -> Self {
        let mut summary = SceneSummary::new();
        summary.refresh(stage);
        summary
    }

    fn refresh(&mut self, stage: &Stage) {
        self.stage_name = stage.name.clone();
        self.nodes = stage.nodes.len();
        self.elements = stage.elements.len();
        self.boundary_conditions = stage.boundary_conditions.len();
        self.loads = stage.loads.len();

        self.bounds = if stage.nodes.is_empty() {
            None
        } else {
            let mut bounds = BoundingBox::empty();
            for node in stage.nodes.values() {
                bounds.include(&node.coordinates);
            }
            Some(bounds)
        };

        self.undrawable_elements = stage
            .elements
            .values()
            .filter(|e| e.nodes.iter().any(|n| !stage.nodes.contains_key(n)))
            .map(|e| e.id)
            .collect();
    }
}

impl RenderingAdapter for SceneSummary {
    fn update_model(&mut self, project: &Project) {
        self.refresh(project.root_stage());
        self.updates += 1;
        tracing::debug!(
            nodes = self.nodes,
            elements = self.elements,
            undrawable = self.undrawable_elements.len(),
            "scene updated"
        );
    }
}
