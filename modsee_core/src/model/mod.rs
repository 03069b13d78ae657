//! # Model Records
//!
//! Plain records stored in a stage's collections, and the closed type
//! variants that replace free-form "type" strings.
//!
//! ## Structure
//!
//! ```text
//! Stage
//! ├── nodes:               ObjectId -> Node
//! ├── elements:            ObjectId -> Element        (ElementType)
//! ├── materials:           ObjectId -> Material       (MaterialType)
//! ├── sections:            ObjectId -> Section        (SectionType)
//! ├── constraints:         ObjectId -> Constraint     (ConstraintType)
//! ├── boundary_conditions: ObjectId -> BoundaryCondition
//! ├── loads:               ObjectId -> Load           (LoadType)
//! ├── recorders:           ObjectId -> Recorder       (RecorderType)
//! ├── transformations:     ObjectId -> Transformation (TransformationType)
//! ├── timeseries:          ObjectId -> TimeSeries     (TimeSeriesType)
//! └── patterns:            ObjectId -> Pattern        (PatternType)
//! ```
//!
//! Type variants serialize with their OpenSees spelling, so the JSON shape
//! stays `{"id": 1, "type": "Elastic", "properties": {"E": 2e11}}`.

use std::collections::BTreeMap;

/// Identifier of an object inside one collection of one stage.
pub type ObjectId = u32;

/// Free-form numeric/string parameters of a typed definition.
pub type PropertyMap = BTreeMap<String, serde_json::Value>;

/// Build a [`PropertyMap`] from key/value pairs.
///
/// ```rust
/// use modsee_core::model::properties;
///
/// let props = properties([("E", 2.0e11), ("nu", 0.3)]);
/// assert_eq!(props["nu"], 0.3);
/// ```
pub fn properties<K, V, I>(pairs: I) -> PropertyMap
where
    K: Into<String>,
    V: Into<serde_json::Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Common behaviour of the closed type enums.
///
/// Each variant knows its wire name and which property keys its
/// constructor requires; [`records::Definition::build`] uses this as
/// the factory check.
pub trait ModelType: Copy + std::fmt::Display + std::str::FromStr {
    /// Wire/OpenSees name of the variant
    fn as_str(&self) -> &'static str;

    /// Property keys that must be present when building a record
    fn required_properties(&self) -> &'static [&'static str];
}

/// Declare a closed type enum with its wire names and required properties.
macro_rules! model_type {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal [$($req:literal),*] ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $wire)] $variant, )+
        }

        impl $name {
            /// Every variant, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
        }

        impl $crate::model::ModelType for $name {
            fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }

            fn required_properties(&self) -> &'static [&'static str] {
                match self {
                    $($name::$variant => &[$($req),*]),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", $crate::model::ModelType::as_str(self))
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::errors::ModelError;

            /// Case-insensitive lookup by wire name
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|t| $crate::model::ModelType::as_str(t).eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| {
                        $crate::errors::ModelError::invalid_input(
                            stringify!($name),
                            wanted,
                            "unknown type name",
                        )
                    })
            }
        }
    };
}

pub mod records;
pub mod types;

pub use records::{
    BoundaryCondition, Constraint, Definition, Element, Load, Material, Node, Pattern, Recorder,
    RecorderTarget, Section, TimeSeries, Transformation,
};
pub use types::{
    ConstraintType, ElementType, LoadType, MaterialType, PatternType, RecorderType, SectionType,
    TimeSeriesType, TransformationType,
};
