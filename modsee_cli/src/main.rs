//! # Modsee CLI
//!
//! Command-line front end for Modsee projects: inspect stages, propagate and
//! promote them, convert between storage backends and export OpenSees
//! scripts.
//!
//! ## Usage
//!
//! ```bash
//! modsee demo cantilever.json
//! modsee stages cantilever.json
//! modsee propagate cantilever.json 0 2 --overwrite
//! modsee promote cantilever.json 1
//! modsee export cantilever.json cantilever --format py
//! modsee convert cantilever.json cantilever.msee
//! ```
//!
//! Logging goes to stderr. `MODSEE_LOG` sets the filter (default
//! `modsee=info`) and `MODSEE_LOG_FORMAT=json` switches to JSON lines.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use modsee_core::export::{write_script, write_staged_script, ScriptFormat};
use modsee_core::model::{
    properties, ElementType, LoadType, MaterialType, Recorder, RecorderTarget, RecorderType,
    SectionType, TransformationType,
};
use modsee_core::persistence::{
    AttributeStoreAdapter, JsonFileAdapter, MseeFile, PersistenceAdapter, RecentFiles, RestoreMode,
    StorageFormat,
};
use modsee_core::render::{RenderingAdapter, SceneSummary};
use modsee_core::settings::SettingsStore;
use modsee_core::stage::Collection;
use modsee_core::{ModelError, ModelResult, Project, ROOT_STAGE};

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Modsee - staged OpenSees model files
#[derive(Parser, Debug)]
#[command(name = "modsee")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Storage backend; inferred from the file extension when omitted
    #[arg(short = 'B', long, global = true, value_enum)]
    backend: Option<Backend>,

    /// Restore .msee files leniently, skipping malformed records
    #[arg(long, global = true)]
    lenient: bool,

    /// Directory holding settings.json and the recent files list
    #[arg(long, global = true, env = "MODSEE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a three-stage cantilever example
    Demo { output: PathBuf },

    /// Summarize the visualized stage
    Info { file: PathBuf },

    /// List stages with their object counts
    Stages { file: PathBuf },

    /// Make a stage the visualized stage 0
    Promote { file: PathBuf, stage: u32 },

    /// Copy objects from one stage into another
    Propagate {
        file: PathBuf,
        from: u32,
        to: u32,

        /// Replace objects whose ids already exist in the target
        #[arg(long)]
        overwrite: bool,
    },

    /// Write stage 0 as an OpenSees script
    Export {
        file: PathBuf,
        output: PathBuf,

        #[arg(short, long, value_enum, default_value = "tcl")]
        format: ExportFormat,

        /// Analyze every stage in sequence instead of only stage 0
        #[arg(long)]
        staged: bool,
    },

    /// Re-save a project with another backend, chosen by the output extension
    Convert { input: PathBuf, output: PathBuf },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    Json,
    Store,
    Msee,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExportFormat {
    Tcl,
    Py,
}

impl From<ExportFormat> for ScriptFormat {
    fn from(format: ExportFormat) -> Self {
        match format {
            ExportFormat::Tcl => ScriptFormat::Tcl,
            ExportFormat::Py => ScriptFormat::Python,
        }
    }
}

// =============================================================================
// BACKENDS AND CONFIGURATION
// =============================================================================

struct Context {
    backend: Option<Backend>,
    restore_mode: RestoreMode,
    settings: SettingsStore,
    config_dir: Option<PathBuf>,
    json: bool,
}

impl Context {
    fn from_cli(cli: &Cli) -> ModelResult<Self> {
        let settings = match &cli.config_dir {
            Some(dir) => SettingsStore::load(&dir.join("settings.json"))?,
            None => SettingsStore::new(),
        };
        Ok(Context {
            backend: cli.backend,
            restore_mode: if cli.lenient { RestoreMode::Lenient } else { RestoreMode::Strict },
            settings,
            config_dir: cli.config_dir.clone(),
            json: cli.json,
        })
    }

    /// Adapter for `path`, honouring `--backend` unless `infer_only` is set.
    fn adapter(&self, path: &Path, infer_only: bool) -> ModelResult<Box<dyn PersistenceAdapter>> {
        let format = match self.backend.filter(|_| !infer_only) {
            Some(Backend::Json) => StorageFormat::Json,
            Some(Backend::Store) => StorageFormat::AttributeStore,
            Some(Backend::Msee) => StorageFormat::Msee,
            None => StorageFormat::from_path(path),
        };
        let adapter: Box<dyn PersistenceAdapter> = match format {
            StorageFormat::Json => Box::new(JsonFileAdapter::new(path)),
            StorageFormat::AttributeStore => Box::new(AttributeStoreAdapter::new(path)),
            StorageFormat::Msee => Box::new(
                MseeFile::new(path)
                    .with_mode(self.restore_mode)
                    .with_app_settings(self.settings.to_json()),
            ),
        };
        tracing::debug!(backend = adapter.name(), path = %path.display(), "selected backend");
        Ok(adapter)
    }

    fn open(&self, path: &Path) -> ModelResult<(Project, Box<dyn PersistenceAdapter>)> {
        let adapter = self.adapter(path, false)?;
        let project = Project::load(adapter.as_ref())?;
        self.remember(adapter.location());
        Ok((project, adapter))
    }

    /// Record a file in the recent list. Failures only warn.
    fn remember(&self, path: &Path) {
        let Some(dir) = &self.config_dir else { return };
        let limit = self
            .settings
            .get_int("recent_files_limit")
            .ok()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(10);
        let list_path = dir.join("recent_files.json");
        let result = RecentFiles::load(&list_path, limit).and_then(|mut recent| {
            recent.add(path);
            recent.save(&list_path)
        });
        if let Err(e) = result {
            tracing::warn!(error = %e, "could not update recent files");
        }
    }

    fn print<T: serde::Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> ModelResult<()> {
        if self.json {
            let json = serde_json::to_string_pretty(value)
                .map_err(|e| ModelError::serialization("stdout", e.to_string()))?;
            println!("{}", json);
        } else {
            println!("{}", text());
        }
        Ok(())
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

fn execute(cli: Cli) -> ModelResult<()> {
    let ctx = Context::from_cli(&cli)?;
    match cli.command {
        Commands::Demo { output } => {
            let project = cantilever_demo()?;
            let adapter = ctx.adapter(&output, false)?;
            let written = project.save(adapter.as_ref())?;
            ctx.remember(&written);
            println!("Wrote {} ({} stages)", written.display(), project.stages.len());
        }

        Commands::Info { file } => {
            let (project, _) = ctx.open(&file)?;
            let mut scene = SceneSummary::new();
            scene.update_model(&project);
            ctx.print(&scene, || describe(&project, &scene))?;
        }

        Commands::Stages { file } => {
            let (project, _) = ctx.open(&file)?;
            let rows: Vec<serde_json::Value> = project
                .stages
                .iter()
                .map(|stage| {
                    let counts: serde_json::Map<String, serde_json::Value> = Collection::ALL
                        .iter()
                        .map(|c| (c.key().to_string(), stage.count(*c).into()))
                        .collect();
                    serde_json::json!({
                        "id": stage.id,
                        "name": stage.name,
                        "type": stage.stage_type,
                        "parent": stage.parent_stage_id,
                        "order": stage.order,
                        "counts": counts,
                    })
                })
                .collect();
            ctx.print(&rows, || {
                project
                    .stages
                    .iter()
                    .map(|stage| {
                        let parent = stage
                            .parent_stage_id
                            .map(|p| format!("after {}", p))
                            .unwrap_or_default();
                        format!(
                            "{:>4}  {:<32} {:<12} {:<9} {:>5} nodes {:>5} elements {:>5} objects",
                            stage.id,
                            stage.name,
                            stage.stage_type,
                            parent,
                            stage.nodes.len(),
                            stage.elements.len(),
                            stage.object_count()
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
        }

        Commands::Promote { file, stage } => {
            let (mut project, adapter) = ctx.open(&file)?;
            let promoted = project.promote_stage_to_root(stage)?;
            project.save(adapter.as_ref())?;
            println!("Stage {} is now the visualized stage", promoted);
        }

        Commands::Propagate { file, from, to, overwrite } => {
            let (mut project, adapter) = ctx.open(&file)?;
            let report = project.propagate_stage(from, to, overwrite)?;
            project.save(adapter.as_ref())?;
            ctx.print(&report, || {
                format!(
                    "Stage {} -> {}: {} copied, {} skipped",
                    from,
                    to,
                    report.copied(),
                    report.skipped()
                )
            })?;
        }

        Commands::Export { file, output, format, staged } => {
            let (project, _) = ctx.open(&file)?;
            let written = if staged {
                write_staged_script(&project, &output, format.into())?
            } else {
                write_script(&project, &output, format.into())?
            };
            println!("Exported {}", written.display());
        }

        Commands::Convert { input, output } => {
            let (project, _) = ctx.open(&input)?;
            let target = ctx.adapter(&output, true)?;
            let written = project.save(target.as_ref())?;
            ctx.remember(&written);
            println!("Converted {} -> {} ({})", input.display(), written.display(), target.name());
        }
    }
    Ok(())
}

fn describe(project: &Project, scene: &SceneSummary) -> String {
    let mut lines = vec![
        format!("Project:  {} ({})", project.name, project.project_id),
        format!("Modified: {}", project.modified_at.to_rfc3339()),
        format!(
            "Model:    ndm {} ndf {}, {} stages",
            project.model_builder_params.ndm,
            project.model_builder_params.ndf,
            project.stages.len()
        ),
        format!(
            "Stage 0:  \"{}\" with {} nodes, {} elements, {} supports, {} loads",
            scene.stage_name, scene.nodes, scene.elements, scene.boundary_conditions, scene.loads
        ),
    ];
    if let Some(bounds) = scene.bounds {
        lines.push(format!("Bounds:   {:?} .. {:?}", bounds.min, bounds.max));
    }
    if !scene.undrawable_elements.is_empty() {
        lines.push(format!("Missing nodes on elements {:?}", scene.undrawable_elements));
    }
    lines.join("\n")
}

/// Stage 0 holds the bare cantilever, stage 1 adds its support and a tip
/// load, stage 2 follows it with a second equal tip load.
fn cantilever_demo() -> ModelResult<Project> {
    let mut project = Project::new("Cantilever");
    project.description = "Three-stage cantilever example".to_string();

    for (id, x) in [(1, 0.0), (2, 2.5), (3, 5.0)] {
        project.add_node(id, x, 0.0, 0.0, ROOT_STAGE)?;
    }
    project.add_material(1, MaterialType::Elastic, properties([("E", 2.0e11)]), ROOT_STAGE)?;
    project.add_section(
        1,
        SectionType::Elastic,
        properties([("E", 2.0e11), ("A", 0.01), ("Iz", 8.33e-6), ("Iy", 8.33e-6), ("J", 1.4e-5)]),
        ROOT_STAGE,
    )?;
    project.add_transformation(
        1,
        TransformationType::Linear,
        properties([("vecxz", vec![0.0, 0.0, 1.0])]),
        ROOT_STAGE,
    )?;
    project.add_element(1, ElementType::ElasticBeamColumn, vec![1, 2], Some(1), Some(1), ROOT_STAGE)?;
    project.add_element(2, ElementType::ElasticBeamColumn, vec![2, 3], Some(1), Some(1), ROOT_STAGE)?;

    project.create_stage(1, Some("Supported and loaded"))?;
    project.propagate_stage(ROOT_STAGE, 1, false)?;
    project.add_boundary_condition(1, 1, vec![1; 6], vec![0.0; 6], 1)?;
    project.add_load(1, LoadType::Point, 3, vec![2], vec![-10_000.0], 1)?;
    project.add_recorder(
        Recorder::new(1, RecorderType::Node, RecorderTarget::Id(3), "tip_disp.out").with_dofs(vec![1, 2]),
        1,
    )?;

    project.create_stage(2, Some("Doubled load"))?;
    project.propagate_stage(1, 2, false)?;
    project.add_load(2, LoadType::Point, 3, vec![2], vec![-10_000.0], 2)?;
    project.set_stage_parent(2, Some(1))?;
    let doubled = project.stage_mut(2)?;
    doubled.description = "second tip load held on top of the first".to_string();
    doubled.set_analysis_parameter("num_steps", 10);

    project.promote_stage_to_root(1)?;
    Ok(project)
}

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // MODSEE_LOG_FORMAT=json enables machine-parseable output
    let log_format = std::env::var("MODSEE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_env("MODSEE_LOG").unwrap_or_else(|_| "modsee=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = Cli::parse();
    if let Err(e) = execute(cli) {
        tracing::error!(code = e.error_code(), "{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_demo_project_stages() {
        let project = cantilever_demo().unwrap();
        assert_eq!(project.stages.stage_ids(), vec![0, 1, 2]);
        assert_eq!(project.stage(2).unwrap().loads.len(), 2);
        assert_eq!(project.stage(1).unwrap().loads.len(), 1);
        assert_eq!(project.stage(2).unwrap().parent_stage_id, Some(1));
        assert_eq!(project.root_stage().boundary_conditions.len(), 1);
    }

    #[test]
    fn test_parse_staged_export() {
        let cli = Cli::parse_from(["modsee", "export", "m.json", "out.tcl", "--staged"]);
        match cli.command {
            Commands::Export { staged, .. } => assert!(staged),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_opening_missing_store_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.redb");
        let cli = Cli::parse_from(["modsee", "info", path.to_str().unwrap()]);
        let ctx = Context::from_cli(&cli).unwrap();

        let err = ctx.open(&path).err().unwrap();
        assert_eq!(err.error_code(), "FILE_ERROR");
        assert!(!path.exists());
    }

    #[test]
    fn test_parse_propagate() {
        let cli = Cli::parse_from(["modsee", "propagate", "m.json", "0", "2", "--overwrite", "-B", "store"]);
        assert!(matches!(cli.backend, Some(Backend::Store)));
        match cli.command {
            Commands::Propagate { from, to, overwrite, .. } => {
                assert_eq!((from, to, overwrite), (0, 2, true));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
