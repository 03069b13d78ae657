//! Record types stored in stage collections.

use serde::{Deserialize, Serialize};

use super::types::{
    ConstraintType, ElementType, LoadType, MaterialType, PatternType, RecorderType, SectionType,
    TimeSeriesType, TransformationType,
};
use super::{ModelType, ObjectId, PropertyMap};
use crate::errors::{ModelError, ModelResult};

/// A point in space with lumped mass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: ObjectId,

    /// Global coordinates [x, y, z]
    pub coordinates: [f64; 3],

    /// Lumped mass per DOF [ux, uy, uz, rx, ry, rz]
    #[serde(default)]
    pub mass: [f64; 6],
}

impl Node {
    pub fn new(id: ObjectId, x: f64, y: f64, z: f64) -> Self {
        Node {
            id,
            coordinates: [x, y, z],
            mass: [0.0; 6],
        }
    }

    /// True when any mass component is non-zero
    pub fn has_mass(&self) -> bool {
        self.mass.iter().any(|m| *m != 0.0)
    }
}

/// A finite element connecting nodes of the same stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ObjectId,

    #[serde(rename = "type")]
    pub element_type: ElementType,

    /// Connectivity, in the element's local node order
    pub nodes: Vec<ObjectId>,

    #[serde(default)]
    pub material: Option<ObjectId>,

    #[serde(default)]
    pub section: Option<ObjectId>,
}

impl Element {
    pub fn new(
        id: ObjectId,
        element_type: ElementType,
        nodes: Vec<ObjectId>,
        material: Option<ObjectId>,
        section: Option<ObjectId>,
    ) -> ModelResult<Self> {
        if nodes.is_empty() {
            return Err(ModelError::invalid_input(
                "nodes",
                "[]",
                format!("element {} needs at least one node", id),
            ));
        }
        Ok(Element {
            id,
            element_type,
            nodes,
            material,
            section,
        })
    }
}

/// A typed definition carrying a property map.
///
/// Materials, sections, constraints, transformations and time series all
/// share this shape; the type parameter pins the closed variant set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition<T> {
    pub id: ObjectId,

    #[serde(rename = "type")]
    pub kind: T,

    #[serde(default)]
    pub properties: PropertyMap,
}

impl<T: ModelType> Definition<T> {
    /// Factory: build a definition after checking the variant's required
    /// properties.
    ///
    /// # Example
    ///
    /// ```rust
    /// use modsee_core::model::{Material, MaterialType, PropertyMap};
    ///
    /// let mut props = PropertyMap::new();
    /// props.insert("E".to_string(), 2.0e11.into());
    /// let steel = Material::build(1, MaterialType::Elastic, props).unwrap();
    /// assert_eq!(steel.number("E"), Some(2.0e11));
    ///
    /// assert!(Material::build(2, MaterialType::Steel01, PropertyMap::new()).is_err());
    /// ```
    pub fn build(id: ObjectId, kind: T, properties: PropertyMap) -> ModelResult<Self> {
        for key in kind.required_properties() {
            if !properties.contains_key(*key) {
                return Err(ModelError::missing_field(format!("{}.{}", kind, key)));
            }
        }
        Ok(Definition { id, kind, properties })
    }
}

impl<T> Definition<T> {
    /// Numeric property, if present and numeric
    pub fn number(&self, key: &str) -> Option<f64> {
        self.properties.get(key).and_then(|v| v.as_f64())
    }

    /// List of numbers, if present and every entry is numeric
    pub fn numbers(&self, key: &str) -> Option<Vec<f64>> {
        let values = self.properties.get(key)?.as_array()?;
        values.iter().map(|v| v.as_f64()).collect()
    }

    /// List of ids, if present and every entry is a non-negative integer
    pub fn ids(&self, key: &str) -> Option<Vec<ObjectId>> {
        let values = self.properties.get(key)?.as_array()?;
        values
            .iter()
            .map(|v| v.as_u64().and_then(|n| ObjectId::try_from(n).ok()))
            .collect()
    }
}

pub type Material = Definition<MaterialType>;
pub type Section = Definition<SectionType>;
pub type Constraint = Definition<ConstraintType>;
pub type Transformation = Definition<TransformationType>;
pub type TimeSeries = Definition<TimeSeriesType>;

/// Single-point constraint on one node.
///
/// `dofs` holds one flag per DOF (1 = restrained), `values` the prescribed
/// value for each DOF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryCondition {
    pub id: ObjectId,
    pub node: ObjectId,
    pub dofs: Vec<u8>,
    #[serde(default)]
    pub values: Vec<f64>,

    /// Constraint this record was expanded from, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<ObjectId>,
}

impl BoundaryCondition {
    pub fn new(id: ObjectId, node: ObjectId, dofs: Vec<u8>, values: Vec<f64>) -> ModelResult<Self> {
        if dofs.iter().any(|flag| *flag > 1) {
            return Err(ModelError::invalid_input(
                "dofs",
                format!("{:?}", dofs),
                "fixity flags must be 0 or 1",
            ));
        }
        Ok(BoundaryCondition {
            id,
            node,
            dofs,
            values,
            origin: None,
        })
    }

    /// Composite label `"{constraint}:{node}"` for expanded records
    pub fn composite_label(&self) -> String {
        match self.origin {
            Some(origin) => format!("{}:{}", origin, self.node),
            None => self.id.to_string(),
        }
    }

    /// True when every listed DOF is restrained
    pub fn is_fully_fixed(&self) -> bool {
        !self.dofs.is_empty() && self.dofs.iter().all(|flag| *flag == 1)
    }
}

/// Nodal or element load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Load {
    pub id: ObjectId,

    #[serde(rename = "type")]
    pub load_type: LoadType,

    /// Node id for point loads, element id for element loads
    pub target: ObjectId,

    /// 1-based DOF numbers the values apply to
    pub dofs: Vec<u8>,

    pub values: Vec<f64>,

    /// Pattern this load belongs to; exported into a default pattern when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<ObjectId>,
}

impl Load {
    pub fn new(
        id: ObjectId,
        load_type: LoadType,
        target: ObjectId,
        dofs: Vec<u8>,
        values: Vec<f64>,
    ) -> ModelResult<Self> {
        if dofs.len() != values.len() {
            return Err(ModelError::invalid_input(
                "values",
                format!("{:?}", values),
                format!("expected {} values to match dofs", dofs.len()),
            ));
        }
        if dofs.iter().any(|dof| *dof == 0) {
            return Err(ModelError::invalid_input("dofs", format!("{:?}", dofs), "DOF numbers are 1-based"));
        }
        Ok(Load {
            id,
            load_type,
            target,
            dofs,
            values,
            pattern: None,
        })
    }

    /// Assign the load to a pattern
    pub fn in_pattern(mut self, pattern: ObjectId) -> Self {
        self.pattern = Some(pattern);
        self
    }
}

/// What a recorder observes: `"all"`, a named group, or a single id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecorderTarget {
    Id(ObjectId),
    Named(String),
}

impl RecorderTarget {
    pub fn all() -> Self {
        RecorderTarget::Named("all".to_string())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, RecorderTarget::Named(name) if name.eq_ignore_ascii_case("all"))
    }
}

impl std::fmt::Display for RecorderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecorderTarget::Id(id) => write!(f, "{}", id),
            RecorderTarget::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Output request for the external solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recorder {
    pub id: ObjectId,

    #[serde(rename = "type")]
    pub recorder_type: RecorderType,

    pub target: RecorderTarget,

    #[serde(default)]
    pub dofs: Vec<u8>,

    pub file_name: String,

    #[serde(default)]
    pub time_interval: f64,

    /// Response quantity, e.g. "disp" or "force"
    #[serde(default)]
    pub response: Option<String>,
}

impl Recorder {
    pub fn new(id: ObjectId, recorder_type: RecorderType, target: RecorderTarget, file_name: impl Into<String>) -> Self {
        Recorder {
            id,
            recorder_type,
            target,
            dofs: Vec::new(),
            file_name: file_name.into(),
            time_interval: 0.0,
            response: None,
        }
    }

    pub fn with_dofs(mut self, dofs: Vec<u8>) -> Self {
        self.dofs = dofs;
        self
    }

    pub fn with_time_interval(mut self, dt: f64) -> Self {
        self.time_interval = dt;
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    /// Response to record, falling back to the type's default
    pub fn response(&self) -> &str {
        self.response
            .as_deref()
            .unwrap_or_else(|| self.recorder_type.default_response())
    }
}

/// Load pattern driven by a time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: ObjectId,

    #[serde(rename = "type")]
    pub pattern_type: PatternType,

    #[serde(default)]
    pub timeseries: Option<ObjectId>,

    #[serde(default)]
    pub properties: PropertyMap,
}

impl Pattern {
    pub fn build(
        id: ObjectId,
        pattern_type: PatternType,
        timeseries: Option<ObjectId>,
        properties: PropertyMap,
    ) -> ModelResult<Self> {
        for key in pattern_type.required_properties() {
            if !properties.contains_key(*key) {
                return Err(ModelError::missing_field(format!("{}.{}", pattern_type, key)));
            }
        }
        Ok(Pattern {
            id,
            pattern_type,
            timeseries,
            properties,
        })
    }
}
