//! # modsee_core - Staged Structural Model Engine
//!
//! `modsee_core` holds the data side of Modsee: a project made of numbered
//! stages, each a full snapshot of an OpenSees model (nodes, elements,
//! materials, sections, constraints, boundary conditions, loads, recorders,
//! transformations, time series and patterns). Stages can be propagated
//! forward and any stage can be promoted to stage 0, the one that is drawn
//! and exported.
//!
//! ## Design Philosophy
//!
//! - **Stage 0 always exists**: it is the view every renderer and exporter reads
//! - **Closed types**: element, material and section kinds are enums, not strings
//! - **Explicit backends**: callers pick a [`persistence::PersistenceAdapter`]
//! - **Rich Errors**: structured [`ModelError`]s, never bare strings
//!
//! ## Quick Start
//!
//! ```rust
//! use modsee_core::project::Project;
//!
//! let mut project = Project::new("Two-stage frame");
//! project.add_node(1, 0.0, 0.0, 0.0, 0).unwrap();
//! project.create_stage(1, Some("Loaded")).unwrap();
//! project.propagate_stage(0, 1, false).unwrap();
//! project.promote_stage_to_root(1).unwrap();
//!
//! let json = serde_json::to_string_pretty(&project).unwrap();
//! assert!(json.contains("\"stages\""));
//! ```
//!
//! ## Modules
//!
//! - [`project`] - Project aggregate and its `add_*` mutators
//! - [`stage`] - Stages, their types and sequence, and the stage store
//! - [`operations`] - Propagation and promotion
//! - [`model`] - Record types and closed type variants
//! - [`persistence`] - JSON, attribute-store and `.msee` backends
//! - [`export`] - Tcl and OpenSeesPy scripts, single-stage or staged
//! - [`results`] - Analysis results and where they are kept
//! - [`settings`] - Application settings with a fixed schema
//! - [`session`] - Live editing session and selection
//! - [`components`] - Component capabilities and registry
//! - [`render`] - Rendering boundary
//! - [`errors`] - Structured error types

pub mod components;
pub mod errors;
pub mod export;
pub mod model;
pub mod operations;
pub mod persistence;
pub mod project;
pub mod render;
pub mod results;
pub mod session;
pub mod settings;
pub mod stage;

// Re-export commonly used types at crate root for convenience
pub use errors::{ModelError, ModelResult};
pub use persistence::{JsonFileAdapter, PersistenceAdapter, StorageFormat};
pub use project::Project;
pub use stage::{Stage, StageId, StageStore, StageType, ROOT_STAGE};
