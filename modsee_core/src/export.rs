//! # Script Export
//!
//! Writes the root stage as an OpenSees input script, either Tcl or
//! OpenSeesPy. Export only reads the model; it never fails on a dangling
//! reference. Anything it cannot translate becomes a `#` comment in the
//! script so the user can see what was left out.
//!
//! [`export_staged_script`] instead runs every stage in sequence (parents
//! before children). Each stage adds only the objects an earlier stage did
//! not create, analyzes according to its [`StageType`], then holds its
//! loads constant for the next one.
//!
//! ## Architecture
//!
//! - The model is first lowered to a list of [`Line`]s (commands, comments,
//!   pattern blocks) that know nothing about the target language
//! - [`ScriptFormat`] renders those lines as Tcl or Python
//!
//! ## Example
//!
//! ```rust
//! use modsee_core::export::{export_script, ScriptFormat};
//! use modsee_core::project::Project;
//!
//! let mut project = Project::new("Cube");
//! project.create_sample_data().unwrap();
//!
//! let tcl = export_script(&project, ScriptFormat::Tcl).unwrap();
//! assert!(tcl.contains("model basic -ndm 3 -ndf 6"));
//!
//! let py = export_script(&project, ScriptFormat::Python).unwrap();
//! assert!(py.contains("ops.node(1, 0, 0, 0)"));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::{ModelError, ModelResult};
use crate::model::{
    Element, ElementType, Load, LoadType, Material, MaterialType, ModelType, ObjectId, PatternType,
    Recorder, RecorderTarget, RecorderType, Section, SectionType, TimeSeriesType,
};
use crate::persistence::write_atomic;
use crate::project::{AnalysisSettings, AnalysisType, Project, SolverAlgorithm};
use crate::stage::{Collection, Stage, StageType, ROOT_STAGE};

/// Target language of an exported script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFormat {
    Tcl,
    Python,
}

impl ScriptFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ScriptFormat::Tcl => "tcl",
            ScriptFormat::Python => "py",
        }
    }
}

impl FromStr for ScriptFormat {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcl" => Ok(ScriptFormat::Tcl),
            "py" | "python" | "openseespy" => Ok(ScriptFormat::Python),
            other => Err(ModelError::invalid_input("format", other, "expected tcl or py")),
        }
    }
}

// ============================================================================
// Language-neutral script lines
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Int(i64),
    Num(f64),
    Str(String),
    Flag(&'static str),
    List(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq)]
struct Command {
    name: &'static str,
    args: Vec<Arg>,
}

impl Command {
    fn new(name: &'static str) -> Self {
        Command { name, args: Vec::new() }
    }

    fn int(mut self, value: impl Into<i64>) -> Self {
        self.args.push(Arg::Int(value.into()));
        self
    }

    fn ints<I: IntoIterator<Item = ObjectId>>(mut self, values: I) -> Self {
        self.args.extend(values.into_iter().map(|v| Arg::Int(v.into())));
        self
    }

    fn num(mut self, value: f64) -> Self {
        self.args.push(Arg::Num(value));
        self
    }

    fn nums<I: IntoIterator<Item = f64>>(mut self, values: I) -> Self {
        self.args.extend(values.into_iter().map(Arg::Num));
        self
    }

    fn text(mut self, value: impl Into<String>) -> Self {
        self.args.push(Arg::Str(value.into()));
        self
    }

    fn flag(mut self, flag: &'static str) -> Self {
        self.args.push(Arg::Flag(flag));
        self
    }

    fn list(mut self, values: Vec<f64>) -> Self {
        self.args.push(Arg::List(values));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Line {
    Comment(String),
    Blank,
    Command(Command),
    /// A command that owns nested commands (load patterns)
    Block(Command, Vec<Line>),
}

fn render(lines: &[Line], format: ScriptFormat, indent: usize, out: &mut String) {
    let pad = " ".repeat(indent);
    for line in lines {
        match line {
            Line::Comment(text) => {
                let _ = writeln!(out, "{}# {}", pad, text);
            }
            Line::Blank => out.push('\n'),
            Line::Command(command) => {
                let _ = writeln!(out, "{}{}", pad, render_command(command, format));
            }
            Line::Block(head, body) => match format {
                ScriptFormat::Tcl => {
                    let _ = writeln!(out, "{}{} {{", pad, render_command(head, format));
                    render(body, format, indent + 4, out);
                    let _ = writeln!(out, "{}}}", pad);
                }
                ScriptFormat::Python => {
                    let _ = writeln!(out, "{}{}", pad, render_command(head, format));
                    render(body, format, indent, out);
                }
            },
        }
    }
}

fn render_command(command: &Command, format: ScriptFormat) -> String {
    let args = command.args.iter().map(|arg| render_arg(arg, format));
    match format {
        ScriptFormat::Tcl => std::iter::once(command.name.to_string())
            .chain(args)
            .collect::<Vec<_>>()
            .join(" "),
        ScriptFormat::Python => format!("ops.{}({})", command.name, args.collect::<Vec<_>>().join(", ")),
    }
}

fn render_arg(arg: &Arg, format: ScriptFormat) -> String {
    match (arg, format) {
        (Arg::Int(v), _) => v.to_string(),
        (Arg::Num(v), _) => v.to_string(),
        (Arg::Flag(f), ScriptFormat::Tcl) => f.to_string(),
        (Arg::Flag(f), ScriptFormat::Python) => format!("'{}'", f),
        // Braces keep Tcl from substituting backslashes, `$` and `[`
        (Arg::Str(s), ScriptFormat::Tcl) if s.contains(|c: char| c.is_whitespace() || "\\$[]\";".contains(c)) => {
            format!("{{{}}}", s)
        }
        (Arg::Str(s), ScriptFormat::Tcl) => s.clone(),
        (Arg::Str(s), ScriptFormat::Python) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        (Arg::List(values), ScriptFormat::Tcl) => format!(
            "{{{}}}",
            values.iter().map(f64::to_string).collect::<Vec<_>>().join(" ")
        ),
        (Arg::List(values), ScriptFormat::Python) => format!(
            "*[{}]",
            values.iter().map(f64::to_string).collect::<Vec<_>>().join(", ")
        ),
    }
}

// ============================================================================
// Lowering stages
// ============================================================================

struct Lowering<'a> {
    stage: &'a Stage,
    ndm: usize,
    ndf: usize,
    /// Objects already created by an earlier stage of the script
    defined: BTreeMap<Collection, BTreeSet<ObjectId>>,
    lines: Vec<Line>,
}

impl<'a> Lowering<'a> {
    fn new(project: &'a Project, stage: &'a Stage) -> Self {
        let params = project.model_builder_params;
        Lowering {
            stage,
            ndm: usize::from(params.ndm).clamp(1, 3),
            ndf: usize::from(params.ndf).max(1),
            defined: BTreeMap::new(),
            lines: Vec::new(),
        }
    }

    /// Header comments, `wipe` and `model`.
    fn preamble(&mut self, project: &Project, source: &str) {
        let params = project.model_builder_params;
        self.comment(format!("{} (project {})", project.name, project.project_id));
        self.comment(format!("Generated by Modsee from {}", source));
        self.lines.push(Line::Blank);
        self.command(Command::new("wipe"));
        self.command(
            Command::new("model")
                .text(params.model_type.as_str())
                .flag("-ndm")
                .int(params.ndm)
                .flag("-ndf")
                .int(params.ndf),
        );
    }

    /// Records of `collection` that no earlier stage created.
    fn fresh<T>(&self, collection: Collection, objects: &'a BTreeMap<ObjectId, T>) -> Vec<&'a T> {
        let defined = self.defined.get(&collection);
        objects
            .iter()
            .filter(|(id, _)| !defined.is_some_and(|d| d.contains(*id)))
            .map(|(_, record)| record)
            .collect()
    }

    /// Ids a generated object must avoid.
    fn taken<T>(&self, collection: Collection, objects: &BTreeMap<ObjectId, T>) -> BTreeSet<ObjectId> {
        let mut taken: BTreeSet<ObjectId> = objects.keys().copied().collect();
        if let Some(defined) = self.defined.get(&collection) {
            taken.extend(defined);
        }
        taken
    }

    fn mark_defined(&mut self, collection: Collection, id: ObjectId) {
        self.defined.entry(collection).or_default().insert(id);
    }

    /// Everything in the current stage now exists in the domain.
    fn finish_stage(&mut self) {
        let stage = self.stage;
        for collection in Collection::ALL {
            self.defined.entry(collection).or_default().extend(stage.ids(collection));
        }
    }

    /// Lower every collection of the current stage.
    fn model(&mut self) {
        self.nodes();
        self.boundary_conditions();
        self.materials();
        self.sections();
        self.transformations();
        self.removed_elements();
        self.elements();
        self.series_and_patterns();
        self.recorders();
    }

    fn comment(&mut self, text: impl Into<String>) {
        self.lines.push(Line::Comment(text.into()));
    }

    fn command(&mut self, command: Command) {
        self.lines.push(Line::Command(command));
    }

    fn section_header(&mut self, title: &str) {
        if !self.lines.is_empty() {
            self.lines.push(Line::Blank);
        }
        self.comment(title);
    }

    /// Fixity or load vector resized to the model's DOF count.
    fn per_dof<T: Copy + Default>(&self, values: &[T]) -> Vec<T> {
        let mut out = values.to_vec();
        out.resize(self.ndf, T::default());
        out
    }

    fn nodes(&mut self) {
        let stage = self.stage;
        let nodes = self.fresh(Collection::Nodes, &stage.nodes);
        if nodes.is_empty() {
            return;
        }
        self.section_header("Nodes");
        for node in &nodes {
            let coordinates = node.coordinates[..self.ndm].to_vec();
            self.command(Command::new("node").int(node.id).nums(coordinates));
        }
        for node in nodes.iter().filter(|n| n.has_mass()) {
            let mass = node.mass[..self.ndf.min(6)].to_vec();
            self.command(Command::new("mass").int(node.id).nums(mass));
        }
    }

    fn boundary_conditions(&mut self) {
        let stage = self.stage;
        let conditions = self.fresh(Collection::BoundaryConditions, &stage.boundary_conditions);
        if conditions.is_empty() {
            return;
        }
        self.section_header("Boundary conditions");
        for bc in conditions {
            if !stage.nodes.contains_key(&bc.node) {
                self.comment(format!("fix {}: node {} is not defined", bc.composite_label(), bc.node));
                continue;
            }
            let flags = self.per_dof(&bc.dofs);
            self.command(
                Command::new("fix")
                    .int(bc.node)
                    .ints(flags.into_iter().map(ObjectId::from)),
            );
        }
    }

    fn materials(&mut self) {
        let stage = self.stage;
        let materials = self.fresh(Collection::Materials, &stage.materials);
        if materials.is_empty() {
            return;
        }
        self.section_header("Materials");
        for material in materials {
            match material_command(material) {
                Ok(command) => self.command(command),
                Err(reason) => self.comment(format!("material {} ({}): {}", material.id, material.kind, reason)),
            }
        }
    }

    fn sections(&mut self) {
        let stage = self.stage;
        let sections = self.fresh(Collection::Sections, &stage.sections);
        if sections.is_empty() {
            return;
        }
        self.section_header("Sections");
        for section in sections {
            match section_command(section, self.ndm) {
                Ok(command) => self.command(command),
                Err(reason) => self.comment(format!("section {} ({}): {}", section.id, section.kind, reason)),
            }
        }
    }

    fn transformations(&mut self) {
        let stage = self.stage;
        let transformations = self.fresh(Collection::Transformations, &stage.transformations);
        if transformations.is_empty() {
            return;
        }
        self.section_header("Geometric transformations");
        for transformation in transformations {
            let mut command = Command::new("geomTransf")
                .text(transformation.kind.as_str())
                .int(transformation.id);
            if self.ndm == 3 {
                let vecxz = transformation
                    .numbers("vecxz")
                    .filter(|v| v.len() == 3)
                    .unwrap_or_else(|| vec![0.0, 0.0, 1.0]);
                command = command.nums(vecxz);
            }
            self.command(command);
        }
    }

    /// Elements an earlier stage created that the current stage dropped.
    fn removed_elements(&mut self) {
        let stage = self.stage;
        let Some(defined) = self.defined.get_mut(&Collection::Elements) else {
            return;
        };
        let gone: Vec<ObjectId> = defined
            .iter()
            .copied()
            .filter(|id| !stage.elements.contains_key(id))
            .collect();
        for id in &gone {
            defined.remove(id);
        }
        if gone.is_empty() {
            return;
        }
        self.section_header("Removed elements");
        for id in gone {
            self.command(Command::new("remove").text("element").int(id));
        }
    }

    fn elements(&mut self) {
        let stage = self.stage;
        let elements = self.fresh(Collection::Elements, &stage.elements);
        if elements.is_empty() {
            return;
        }
        self.section_header("Elements");
        for element in elements {
            match self.element_command(element) {
                Ok(command) => self.command(command),
                Err(reason) => self.comment(format!(
                    "element {} ({}): {}",
                    element.id, element.element_type, reason
                )),
            }
        }
    }

    fn material_of(&self, element: &Element) -> Result<&'a Material, String> {
        let id = element.material.ok_or("no material assigned")?;
        self.stage
            .materials
            .get(&id)
            .ok_or_else(|| format!("material {} is not defined", id))
    }

    fn section_of(&self, element: &Element) -> Result<&'a Section, String> {
        let id = element.section.ok_or("no section assigned")?;
        self.stage
            .sections
            .get(&id)
            .ok_or_else(|| format!("section {} is not defined", id))
    }

    fn transformation_tag(&self) -> Result<ObjectId, String> {
        self.stage
            .transformations
            .keys()
            .next()
            .copied()
            .ok_or_else(|| "no geometric transformation defined".to_string())
    }

    fn element_command(&self, element: &Element) -> Result<Command, String> {
        let expected = element.element_type.node_count();
        if element.nodes.len() != expected {
            return Err(format!("has {} nodes, expected {}", element.nodes.len(), expected));
        }
        if let Some(missing) = element.nodes.iter().find(|n| !self.stage.nodes.contains_key(n)) {
            return Err(format!("node {} is not defined", missing));
        }

        let base = Command::new("element")
            .text(element.element_type.as_str())
            .int(element.id)
            .ints(element.nodes.iter().copied());

        let command = match element.element_type {
            ElementType::Truss | ElementType::CorotTruss => {
                let material = self.material_of(element)?;
                let area = element
                    .section
                    .and_then(|id| self.stage.sections.get(&id))
                    .and_then(|s| s.number("A"))
                    .or_else(|| material.number("A"))
                    .unwrap_or(1.0);
                base.num(area).int(material.id)
            }
            ElementType::ElasticBeamColumn => {
                let section = self.section_of(element)?;
                let property = |key: &str| {
                    section
                        .number(key)
                        .ok_or_else(|| format!("section {} has no {}", section.id, key))
                };
                let (area, modulus, iz) = (property("A")?, property("E")?, property("Iz")?);
                let transf = self.transformation_tag()?;
                if self.ndm == 3 {
                    let iy = section.number("Iy").unwrap_or(iz);
                    let shear = section.number("G").unwrap_or(modulus / 2.6);
                    let torsion = section.number("J").unwrap_or(iy + iz);
                    base.nums([area, modulus, shear, torsion, iy, iz]).int(transf)
                } else {
                    base.nums([area, modulus, iz]).int(transf)
                }
            }
            ElementType::DispBeamColumn | ElementType::ForceBeamColumn => {
                let section = self.section_of(element)?;
                let transf = self.transformation_tag()?;
                base.int(5).int(section.id).int(transf)
            }
            ElementType::ZeroLength | ElementType::TwoNodeLink => {
                let material = self.material_of(element)?;
                base.flag("-mat").int(material.id).flag("-dir").int(1)
            }
            ElementType::Quad | ElementType::Tri31 => {
                let material = self.material_of(element)?;
                let thickness = element
                    .section
                    .and_then(|id| self.stage.sections.get(&id))
                    .and_then(|s| s.number("h"))
                    .unwrap_or(1.0);
                base.num(thickness).text("PlaneStress").int(material.id)
            }
            ElementType::ShellMitc4 => {
                let section = self.section_of(element)?;
                base.int(section.id)
            }
            ElementType::StdBrick => {
                let material = self.material_of(element)?;
                base.int(material.id)
            }
        };
        Ok(command)
    }

    fn timeseries(&mut self, default_series: Option<ObjectId>) {
        let stage = self.stage;
        let series_list = self.fresh(Collection::Timeseries, &stage.timeseries);
        if series_list.is_empty() && default_series.is_none() {
            return;
        }
        self.section_header("Time series");
        for series in series_list {
            let base = Command::new("timeSeries").text(series.kind.as_str()).int(series.id);
            let command = match series.kind {
                TimeSeriesType::Constant | TimeSeriesType::Linear => Ok(base),
                TimeSeriesType::Path => match (series.number("dt"), series.numbers("values")) {
                    (Some(dt), Some(values)) => Ok(base.flag("-dt").num(dt).flag("-values").list(values)),
                    _ => Err("needs numeric dt and values"),
                },
                TimeSeriesType::Trig => match (
                    series.number("tStart"),
                    series.number("tEnd"),
                    series.number("period"),
                ) {
                    (Some(start), Some(end), Some(period)) => Ok(base.nums([start, end, period])),
                    _ => Err("needs numeric tStart, tEnd and period"),
                },
            };
            match command {
                Ok(command) => self.command(command),
                Err(reason) => self.comment(format!("time series {} ({}): {}", series.id, series.kind, reason)),
            }
        }
        if let Some(id) = default_series {
            self.command(Command::new("timeSeries").text("Linear").int(id));
            self.mark_defined(Collection::Timeseries, id);
        }
    }

    fn load_command(&self, load: &Load) -> Result<Command, String> {
        match load.load_type {
            LoadType::Point => {
                if !self.stage.nodes.contains_key(&load.target) {
                    return Err(format!("node {} is not defined", load.target));
                }
                let mut vector = vec![0.0; self.ndf];
                for (dof, value) in load.dofs.iter().zip(&load.values) {
                    match usize::from(*dof).checked_sub(1).and_then(|i| vector.get_mut(i)) {
                        Some(slot) => *slot = *value,
                        None => return Err(format!("dof {} exceeds ndf {}", dof, self.ndf)),
                    }
                }
                Ok(Command::new("load").int(load.target).nums(vector))
            }
            LoadType::Element => {
                if !self.stage.elements.contains_key(&load.target) {
                    return Err(format!("element {} is not defined", load.target));
                }
                Ok(Command::new("eleLoad")
                    .flag("-ele")
                    .int(load.target)
                    .flag("-type")
                    .flag("-beamUniform")
                    .nums(load.values.iter().copied()))
            }
        }
    }

    fn pattern_loads(&self, loads: &[&Load]) -> Vec<Line> {
        loads
            .iter()
            .map(|load| match self.load_command(load) {
                Ok(command) => Line::Command(command),
                Err(reason) => Line::Comment(format!("load {}: {}", load.id, reason)),
            })
            .collect()
    }

    /// Emits time series and patterns together: unassigned loads need a
    /// default pattern, which needs a default series.
    fn series_and_patterns(&mut self) {
        let stage = self.stage;
        let owned_by = |load: &Load| {
            load.pattern
                .filter(|p| stage.patterns.get(p).is_some_and(|p| p.pattern_type == PatternType::Plain))
        };
        let applied = self.defined.get(&Collection::Patterns).cloned().unwrap_or_default();
        let patterns = self.fresh(Collection::Patterns, &stage.patterns);
        let mut orphans: Vec<&Load> = Vec::new();
        let mut late: Vec<(&Load, ObjectId)> = Vec::new();
        for load in self.fresh(Collection::Loads, &stage.loads) {
            match owned_by(load) {
                None => orphans.push(load),
                Some(pattern) if applied.contains(&pattern) => late.push((load, pattern)),
                Some(_) => {}
            }
        }

        let series_for = |pattern_series: Option<ObjectId>| {
            pattern_series.filter(|id| stage.timeseries.contains_key(id))
        };
        let needs_default_series =
            !orphans.is_empty() || patterns.iter().any(|p| series_for(p.timeseries).is_none());
        let default_series = if needs_default_series {
            next_free_id(&self.taken(Collection::Timeseries, &stage.timeseries))
        } else {
            None
        };
        self.timeseries(default_series);

        if patterns.is_empty() && orphans.is_empty() && late.is_empty() {
            return;
        }
        self.section_header("Load patterns");
        for pattern in patterns {
            let Some(series) = series_for(pattern.timeseries).or(default_series) else {
                self.comment(format!("pattern {}: no time series id left for a default series", pattern.id));
                continue;
            };
            match pattern.pattern_type {
                PatternType::Plain => {
                    let owned: Vec<&Load> = self
                        .fresh(Collection::Loads, &stage.loads)
                        .into_iter()
                        .filter(|l| owned_by(*l) == Some(pattern.id))
                        .collect();
                    let head = Command::new("pattern").text("Plain").int(pattern.id).int(series);
                    let body = self.pattern_loads(&owned);
                    self.lines.push(Line::Block(head, body));
                }
                PatternType::UniformExcitation => {
                    let direction = pattern
                        .properties
                        .get("direction")
                        .and_then(|v| v.as_i64())
                        .unwrap_or(1);
                    self.command(
                        Command::new("pattern")
                            .text("UniformExcitation")
                            .int(pattern.id)
                            .int(direction)
                            .flag("-accel")
                            .int(series),
                    );
                }
            }
        }
        for (load, pattern) in late {
            self.comment(format!("load {}: pattern {} was applied by an earlier stage", load.id, pattern));
        }
        if !orphans.is_empty() {
            self.comment("Loads without a pattern");
            match (next_free_id(&self.taken(Collection::Patterns, &stage.patterns)), default_series) {
                (Some(pattern_id), Some(series)) => {
                    let head = Command::new("pattern").text("Plain").int(pattern_id).int(series);
                    let body = self.pattern_loads(&orphans);
                    self.lines.push(Line::Block(head, body));
                    self.mark_defined(Collection::Patterns, pattern_id);
                }
                _ => {
                    for load in orphans {
                        self.comment(format!("load {}: no pattern or time series id left", load.id));
                    }
                }
            }
        }
    }

    fn recorders(&mut self) {
        let stage = self.stage;
        let recorders = self.fresh(Collection::Recorders, &stage.recorders);
        if recorders.is_empty() {
            return;
        }
        self.section_header("Recorders");
        for recorder in recorders {
            match recorder_command(stage, recorder) {
                Ok(command) => self.command(command),
                Err(reason) => self.comment(format!("recorder {} ({}): {}", recorder.id, recorder.recorder_type, reason)),
            }
        }
    }

    /// Constraint handler, numberer, system, convergence test, algorithm.
    fn solver_setup(&mut self, settings: &AnalysisSettings) {
        self.command(Command::new("constraints").text("Transformation"));
        self.command(Command::new("numberer").text("RCM"));
        self.command(Command::new("system").text("BandGeneral"));
        self.command(
            Command::new("test")
                .text("NormDispIncr")
                .num(settings.tolerance)
                .int(settings.max_iterations),
        );
        let algorithm = match settings.solver {
            SolverAlgorithm::Newton => "Newton",
            SolverAlgorithm::ModifiedNewton => "ModifiedNewton",
            SolverAlgorithm::KrylovNewton => "KrylovNewton",
            SolverAlgorithm::Linear => "Linear",
        };
        self.command(Command::new("algorithm").text(algorithm));
    }

    fn analysis(&mut self, project: &Project) {
        let settings = &project.analysis_settings;
        self.section_header("Analysis");
        if settings.analysis_type == AnalysisType::Eigen {
            self.command(Command::new("eigen").int(3));
            return;
        }
        self.solver_setup(settings);
        match settings.analysis_type {
            AnalysisType::Transient => {
                self.command(Command::new("integrator").text("Newmark").num(0.5).num(0.25));
                self.command(Command::new("analysis").text("Transient"));
                self.command(Command::new("analyze").int(100).num(0.01));
            }
            _ => {
                self.command(Command::new("integrator").text("LoadControl").num(1.0));
                self.command(Command::new("analysis").text("Static"));
                self.command(Command::new("analyze").int(1));
            }
        }
    }

    /// Analysis of one step of a staged script, driven by the stage type
    /// and its `analysis_parameters`.
    fn stage_analysis(&mut self, settings: &AnalysisSettings) {
        let stage = self.stage;
        let count = |key: &str, default: i64| {
            stage
                .analysis_parameter(key)
                .filter(|n| *n >= 1.0)
                .map(|n| n.round() as i64)
                .unwrap_or(default)
        };
        self.section_header(&format!("Stage {} analysis", stage.id));
        self.command(Command::new("wipeAnalysis"));
        match stage.stage_type {
            StageType::Custom => {
                self.comment("custom stage: analysis commands are left to the user");
                return;
            }
            StageType::Eigen => {
                self.command(Command::new("eigen").int(count("num_modes", 10)));
                return;
            }
            StageType::Dynamic => {
                let steps = count("num_steps", 100);
                let dt = stage.analysis_parameter("dt").filter(|dt| *dt > 0.0).unwrap_or(0.01);
                let gamma = stage.analysis_parameter("gamma").unwrap_or(0.5);
                let beta = stage.analysis_parameter("beta").unwrap_or(0.25);
                self.solver_setup(settings);
                self.command(Command::new("integrator").text("Newmark").num(gamma).num(beta));
                self.command(Command::new("analysis").text("Transient"));
                self.command(Command::new("analyze").int(steps).num(dt));
            }
            StageType::Static | StageType::Construction | StageType::LoadPattern => {
                let steps = count("num_steps", 1);
                self.solver_setup(settings);
                self.command(Command::new("integrator").text("LoadControl").num(1.0 / steps as f64));
                self.command(Command::new("analysis").text("Static"));
                self.command(Command::new("analyze").int(steps));
            }
        }
        // Later stages start from this state with these loads held
        self.command(Command::new("loadConst").flag("-time").num(0.0));
    }
}

/// Id for a generated object: one past the largest taken id, or the
/// lowest free id once `ObjectId::MAX` is taken.
fn next_free_id(taken: &BTreeSet<ObjectId>) -> Option<ObjectId> {
    match taken.last() {
        None => Some(1),
        Some(max) => max
            .checked_add(1)
            .or_else(|| (1..=ObjectId::MAX).find(|id| !taken.contains(id))),
    }
}

fn material_command(material: &Material) -> Result<Command, &'static str> {
    let values = |keys: &[&str]| -> Result<Vec<f64>, &'static str> {
        keys.iter()
            .map(|k| material.number(k).ok_or("a required property is not numeric"))
            .collect()
    };
    let optional = |keys: &[&str]| -> Vec<f64> { keys.iter().map_while(|k| material.number(k)).collect() };

    let command = match material.kind {
        // Generic steel: bilinear when a yield stress is given, elastic otherwise
        MaterialType::Steel => match material.number("Fy") {
            Some(fy) => Command::new("uniaxialMaterial")
                .text("Steel01")
                .int(material.id)
                .num(fy)
                .nums(values(&["E"])?)
                .num(material.number("b").unwrap_or(0.0)),
            None => Command::new("uniaxialMaterial")
                .text("Elastic")
                .int(material.id)
                .nums(values(&["E"])?),
        },
        MaterialType::ElasticIsotropic => Command::new("nDMaterial")
            .text(material.kind.as_str())
            .int(material.id)
            .nums(values(material.kind.required_properties())?)
            .nums(optional(&["rho"])),
        kind => {
            let trailing: &[&str] = match kind {
                MaterialType::Steel02 => &["R0", "cR1", "cR2"],
                MaterialType::Elastic => &["eta"],
                _ => &[],
            };
            Command::new("uniaxialMaterial")
                .text(kind.as_str())
                .int(material.id)
                .nums(values(kind.required_properties())?)
                .nums(optional(trailing))
        }
    };
    Ok(command)
}

fn section_command(section: &Section, ndm: usize) -> Result<Command, String> {
    let require = |key: &str| {
        section
            .number(key)
            .ok_or_else(|| format!("property {} is not numeric", key))
    };
    match section.kind {
        SectionType::Elastic => {
            let mut command = Command::new("section")
                .text("Elastic")
                .int(section.id)
                .num(require("E")?)
                .num(require("A")?)
                .num(require("Iz")?);
            if ndm == 3 {
                let iz = require("Iz")?;
                let iy = section.number("Iy").unwrap_or(iz);
                let modulus = require("E")?;
                command = command
                    .num(iy)
                    .num(section.number("G").unwrap_or(modulus / 2.6))
                    .num(section.number("J").unwrap_or(iy + iz));
            }
            Ok(command)
        }
        SectionType::ElasticMembranePlate => Ok(Command::new("section")
            .text(section.kind.as_str())
            .int(section.id)
            .num(require("E")?)
            .num(require("nu")?)
            .num(require("h")?)
            .num(section.number("rho").unwrap_or(0.0))),
        SectionType::WideFlange
        | SectionType::Rectangular
        | SectionType::Circular
        | SectionType::Fiber => Err("shape sections need a fiber discretization, define it by hand".to_string()),
    }
}

fn recorder_command(stage: &Stage, recorder: &Recorder) -> Result<Command, String> {
    let (object_flag, all_ids): (&'static str, Vec<ObjectId>) = if recorder.recorder_type.targets_nodes() {
        ("-node", stage.nodes.keys().copied().collect())
    } else {
        ("-ele", stage.elements.keys().copied().collect())
    };
    let ids = match &recorder.target {
        RecorderTarget::Id(id) => vec![*id],
        target if target.is_all() => all_ids,
        RecorderTarget::Named(name) => return Err(format!("unknown target '{}'", name)),
    };

    let mut command = Command::new("recorder")
        .text(recorder.recorder_type.as_str())
        .flag("-file")
        .text(recorder.file_name.clone())
        .flag("-time");
    if recorder.time_interval > 0.0 {
        command = command.flag("-dT").num(recorder.time_interval);
    }

    if recorder.recorder_type == RecorderType::Drift {
        let (Some(first), Some(last)) = (ids.first(), ids.last()) else {
            return Err("needs at least two nodes".to_string());
        };
        if first == last {
            return Err("needs at least two nodes".to_string());
        }
        let dof = recorder.dofs.first().copied().unwrap_or(1);
        return Ok(command
            .flag("-iNode")
            .int(*first)
            .flag("-jNode")
            .int(*last)
            .flag("-dof")
            .int(dof)
            .flag("-perpDirn")
            .int(2));
    }

    command = command.flag(object_flag).ints(ids);
    if recorder.recorder_type.targets_nodes() && !recorder.dofs.is_empty() {
        command = command.flag("-dof").ints(recorder.dofs.iter().map(|d| ObjectId::from(*d)));
    }
    Ok(command.text(recorder.response()))
}

// ============================================================================
// Public API
// ============================================================================

/// Render the root stage of `project` as a script.
pub fn export_script(project: &Project, format: ScriptFormat) -> ModelResult<String> {
    let root = project.root_stage();
    let mut lowering = Lowering::new(project, root);
    lowering.preamble(project, &format!("\"{}\"", root.name));
    lowering.model();
    lowering.analysis(project);
    Ok(finish(&lowering.lines, format))
}

/// Render every stage of `project` as one script that analyzes them in
/// [`StageStore::stage_sequence`](crate::stage::StageStore::stage_sequence)
/// order.
///
/// The root stage is the visualized copy of another stage, so it is only
/// exported when it is the project's only stage.
pub fn export_staged_script(project: &Project, format: ScriptFormat) -> ModelResult<String> {
    let mut sequence = project.stages.stage_sequence();
    if sequence.len() > 1 {
        sequence.retain(|stage| stage.id != ROOT_STAGE);
    }
    let mut lowering = Lowering::new(project, project.root_stage());
    lowering.preamble(project, &format!("{} stages", sequence.len()));

    for stage in sequence {
        lowering.stage = stage;
        lowering.lines.push(Line::Blank);
        lowering.comment("=".repeat(60));
        lowering.comment(format!("Stage {}: {}", stage.id, stage.name));
        lowering.comment(format!("Type: {}", stage.stage_type));
        if !stage.description.is_empty() {
            lowering.comment(stage.description.clone());
        }
        lowering.comment("=".repeat(60));
        lowering.model();
        lowering.stage_analysis(&project.analysis_settings);
        lowering.finish_stage();
        tracing::debug!(stage = stage.id, stage_type = %stage.stage_type, "lowered stage");
    }
    Ok(finish(&lowering.lines, format))
}

fn finish(lines: &[Line], format: ScriptFormat) -> String {
    let mut out = String::new();
    if format == ScriptFormat::Python {
        out.push_str("import openseespy.opensees as ops\n\n");
    }
    render(lines, format, 0, &mut out);
    out
}

/// Export to a file, adding the format's extension when `path` has none.
pub fn write_script(project: &Project, path: &Path, format: ScriptFormat) -> ModelResult<PathBuf> {
    write_with(path, format, export_script(project, format)?)
}

/// [`export_staged_script`] to a file, extension handled as in [`write_script`].
pub fn write_staged_script(project: &Project, path: &Path, format: ScriptFormat) -> ModelResult<PathBuf> {
    write_with(path, format, export_staged_script(project, format)?)
}

fn write_with(path: &Path, format: ScriptFormat, script: String) -> ModelResult<PathBuf> {
    let mut path = path.to_path_buf();
    if path.extension().is_none() {
        path.set_extension(format.extension());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            ModelError::file_error("create directory", parent.display().to_string(), e.to_string())
        })?;
    }
    write_atomic(&path, script.as_bytes())?;
    tracing::info!(path = %path.display(), ?format, "exported script");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{properties, PropertyMap, TransformationType};

    fn cantilever() -> Project {
        let mut project = Project::new("Cantilever");
        project.update_model_builder_params(2, 3, crate::project::BuilderType::Basic).unwrap();
        project.add_node(1, 0.0, 0.0, 0.0, ROOT_STAGE).unwrap();
        project.add_node(2, 3.0, 0.0, 0.0, ROOT_STAGE).unwrap();
        project
            .add_boundary_condition(1, 1, vec![1, 1, 1], vec![0.0; 3], ROOT_STAGE)
            .unwrap();
        project
            .add_section(
                1,
                SectionType::Elastic,
                properties([("E", 2.0e11), ("A", 0.01), ("Iz", 1.0e-4)]),
                ROOT_STAGE,
            )
            .unwrap();
        project
            .add_transformation(1, TransformationType::Linear, PropertyMap::new(), ROOT_STAGE)
            .unwrap();
        project
            .add_element(1, ElementType::ElasticBeamColumn, vec![1, 2], None, Some(1), ROOT_STAGE)
            .unwrap();
        project
            .add_load(1, LoadType::Point, 2, vec![2], vec![-1000.0], ROOT_STAGE)
            .unwrap();
        project
    }

    #[test]
    fn test_tcl_cantilever() {
        let script = export_script(&cantilever(), ScriptFormat::Tcl).unwrap();
        assert!(script.contains("model basic -ndm 2 -ndf 3"));
        assert!(script.contains("node 2 3 0\n"));
        assert!(script.contains("fix 1 1 1 1"));
        assert!(script.contains("section Elastic 1 200000000000 0.01 0.0001"));
        assert!(script.contains("geomTransf Linear 1\n"));
        assert!(script.contains("element elasticBeamColumn 1 1 2 0.01 200000000000 0.0001 1"));
        assert!(script.contains("timeSeries Linear 1"));
        assert!(script.contains("pattern Plain 1 1 {\n    load 2 0 -1000 0\n}"));
        assert!(script.contains("analysis Static"));
    }

    #[test]
    fn test_python_cantilever() {
        let script = export_script(&cantilever(), ScriptFormat::Python).unwrap();
        assert!(script.starts_with("import openseespy.opensees as ops"));
        assert!(script.contains("ops.model('basic', '-ndm', 2, '-ndf', 3)"));
        assert!(script.contains("ops.pattern('Plain', 1, 1)\nops.load(2, 0, -1000, 0)"));
        assert!(script.contains("ops.test('NormDispIncr', 0.000001, 100)"));
    }

    #[test]
    fn test_dangling_references_become_comments() {
        let mut project = Project::new("Broken");
        project.add_node(1, 0.0, 0.0, 0.0, ROOT_STAGE).unwrap();
        project
            .add_element(7, ElementType::Truss, vec![1, 9], Some(3), None, ROOT_STAGE)
            .unwrap();
        project
            .add_load(4, LoadType::Point, 42, vec![1], vec![5.0], ROOT_STAGE)
            .unwrap();
        let script = export_script(&project, ScriptFormat::Tcl).unwrap();
        assert!(script.contains("# element 7 (truss): node 9 is not defined"));
        assert!(script.contains("# load 4: node 42 is not defined"));
        assert!(!script.contains("element truss"));
    }

    #[test]
    fn test_loads_follow_their_pattern() {
        let mut project = cantilever();
        project
            .add_timeseries(3, TimeSeriesType::Constant, PropertyMap::new(), ROOT_STAGE)
            .unwrap();
        project
            .add_pattern(5, PatternType::Plain, Some(3), PropertyMap::new(), ROOT_STAGE)
            .unwrap();
        project
            .add_load(2, LoadType::Point, 2, vec![1], vec![10.0], ROOT_STAGE)
            .unwrap();
        let loads = &mut project.stages.root_mut().loads;
        let assigned = loads[&2].clone().in_pattern(5);
        loads.insert(2, assigned);

        let script = export_script(&project, ScriptFormat::Tcl).unwrap();
        assert!(script.contains("pattern Plain 5 3 {\n    load 2 10 0 0\n}"));
        assert!(script.contains("pattern Plain 6 4 {\n    load 2 0 -1000 0\n}"));
        assert!(script.contains("timeSeries Linear 4"));
    }

    #[test]
    fn test_recorders_expand_all_targets() {
        let mut project = cantilever();
        project
            .add_recorder(
                Recorder::new(1, RecorderType::Node, RecorderTarget::all(), "disp.out").with_dofs(vec![1, 2]),
                ROOT_STAGE,
            )
            .unwrap();
        project
            .add_recorder(
                Recorder::new(2, RecorderType::Element, RecorderTarget::Id(1), "forces.out"),
                ROOT_STAGE,
            )
            .unwrap();
        let script = export_script(&project, ScriptFormat::Tcl).unwrap();
        assert!(script.contains("recorder Node -file disp.out -time -node 1 2 -dof 1 2 disp"));
        assert!(script.contains("recorder Element -file forces.out -time -ele 1 force"));
    }

    #[test]
    fn test_write_script_adds_extension() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_script(&cantilever(), &dir.path().join("out/model"), ScriptFormat::Python).unwrap();
        assert_eq!(written.extension().unwrap(), "py");
        assert!(written.exists());

        let kept = write_script(&cantilever(), &dir.path().join("model.txt"), ScriptFormat::Tcl).unwrap();
        assert_eq!(kept.extension().unwrap(), "txt");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("TCL".parse::<ScriptFormat>().unwrap(), ScriptFormat::Tcl);
        assert_eq!("python".parse::<ScriptFormat>().unwrap(), ScriptFormat::Python);
        assert!("xml".parse::<ScriptFormat>().is_err());
    }

    #[test]
    fn test_generated_ids_wrap_to_lowest_free() {
        let mut project = cantilever();
        project
            .add_timeseries(ObjectId::MAX, TimeSeriesType::Linear, PropertyMap::new(), ROOT_STAGE)
            .unwrap();
        project
            .add_pattern(ObjectId::MAX, PatternType::Plain, Some(ObjectId::MAX), PropertyMap::new(), ROOT_STAGE)
            .unwrap();

        let script = export_script(&project, ScriptFormat::Tcl).unwrap();
        assert!(script.contains("timeSeries Linear 4294967295\n"));
        assert!(script.contains("timeSeries Linear 1\n"));
        assert!(script.contains("pattern Plain 1 1 {\n    load 2 0 -1000 0\n}"));

        assert_eq!(next_free_id(&BTreeSet::new()), Some(1));
        assert_eq!(next_free_id(&BTreeSet::from([1, 2, ObjectId::MAX])), Some(3));
        assert_eq!(next_free_id(&BTreeSet::from([4, 9])), Some(10));
    }

    #[test]
    fn test_string_arguments_are_quoted() {
        let mut project = cantilever();
        project
            .add_recorder(
                Recorder::new(1, RecorderType::Element, RecorderTarget::Id(1), r"C:\tmp\new.out"),
                ROOT_STAGE,
            )
            .unwrap();
        project
            .add_recorder(
                Recorder::new(2, RecorderType::Node, RecorderTarget::Id(2), "it's.out"),
                ROOT_STAGE,
            )
            .unwrap();

        let py = export_script(&project, ScriptFormat::Python).unwrap();
        assert!(py.contains(r"ops.recorder('Element', '-file', 'C:\\tmp\\new.out', '-time'"));
        assert!(py.contains(r"'-file', 'it\'s.out'"));

        let tcl = export_script(&project, ScriptFormat::Tcl).unwrap();
        assert!(tcl.contains(r"recorder Element -file {C:\tmp\new.out} -time -ele 1 force"));
        assert!(tcl.contains("-file it's.out -time"));
    }

    /// Root holds the cantilever; 1 applies gravity, 2 adds a lateral load
    /// on top of it, 3 extracts modes.
    fn staged_cantilever() -> Project {
        let mut project = cantilever();
        project.create_stage(1, Some("Gravity")).unwrap();
        project.propagate_stage(ROOT_STAGE, 1, false).unwrap();

        project.create_stage(2, Some("Lateral")).unwrap();
        project.propagate_stage(1, 2, false).unwrap();
        project.add_load(2, LoadType::Point, 2, vec![1], vec![10.0], 2).unwrap();
        project.set_stage_parent(2, Some(1)).unwrap();
        let lateral = project.stage_mut(2).unwrap();
        lateral.description = "wind from the west".to_string();
        lateral.set_analysis_parameter("num_steps", 10);

        project.create_stage(3, Some("Modes")).unwrap();
        project.propagate_stage(2, 3, false).unwrap();
        project.set_stage_parent(3, Some(2)).unwrap();
        let modes = project.stage_mut(3).unwrap();
        modes.stage_type = StageType::Eigen;
        modes.set_analysis_parameter("num_modes", 4);
        project
    }

    #[test]
    fn test_staged_script_runs_stages_in_sequence() {
        let script = export_staged_script(&staged_cantilever(), ScriptFormat::Tcl).unwrap();

        let gravity = script.find("# Stage 1: Gravity").unwrap();
        let lateral = script.find("# Stage 2: Lateral").unwrap();
        let modes = script.find("# Stage 3: Modes").unwrap();
        assert!(gravity < lateral && lateral < modes);
        assert!(!script.contains("# Stage 0"));
        assert!(script.contains("# Type: EIGEN"));
        assert!(script.contains("# wind from the west"));

        // Objects are created once, by the first stage that has them
        assert_eq!(script.matches("node 2 3 0\n").count(), 1);
        assert_eq!(script.matches("element elasticBeamColumn 1 ").count(), 1);
        assert!(script[gravity..lateral].contains("pattern Plain 1 1 {\n    load 2 0 -1000 0\n}"));
        assert!(script[lateral..modes].contains("timeSeries Linear 2\n"));
        assert!(script[lateral..modes].contains("pattern Plain 2 2 {\n    load 2 10 0 0\n}"));
        assert!(!script[modes..].contains("pattern"));

        assert!(script[gravity..lateral].contains("integrator LoadControl 1\nanalysis Static\nanalyze 1\n"));
        assert!(script[lateral..modes].contains("integrator LoadControl 0.1\nanalysis Static\nanalyze 10\n"));
        assert!(script[modes..].contains("wipeAnalysis\neigen 4\n"));
        assert_eq!(script.matches("wipeAnalysis").count(), 3);
        assert_eq!(script.matches("loadConst -time 0").count(), 2);
    }

    #[test]
    fn test_staged_script_removes_dropped_elements() {
        let mut project = staged_cantilever();
        project.stage_mut(2).unwrap().elements.remove(&1);
        project.stage_mut(3).unwrap().elements.remove(&1);

        let script = export_staged_script(&project, ScriptFormat::Python).unwrap();
        let lateral = script.find("# Stage 2: Lateral").unwrap();
        assert!(script[lateral..].contains("ops.remove('element', 1)"));
        assert_eq!(script.matches("ops.remove(").count(), 1);
    }

    #[test]
    fn test_staged_dynamic_and_custom_stages() {
        let mut project = cantilever();
        project.create_stage(1, Some("Shaking")).unwrap();
        project.propagate_stage(ROOT_STAGE, 1, false).unwrap();
        let shaking = project.stage_mut(1).unwrap();
        shaking.stage_type = StageType::Dynamic;
        shaking.set_analysis_parameter("num_steps", 50);
        shaking.set_analysis_parameter("dt", 0.02);
        project.create_stage(2, Some("Hand tuned")).unwrap();
        project.stage_mut(2).unwrap().stage_type = StageType::Custom;
        project.stage_mut(2).unwrap().order = 1;

        let script = export_staged_script(&project, ScriptFormat::Tcl).unwrap();
        assert!(script.contains("integrator Newmark 0.5 0.25\nanalysis Transient\nanalyze 50 0.02\nloadConst -time 0\n"));
        assert!(script.contains("wipeAnalysis\n# custom stage: analysis commands are left to the user\n"));
        assert!(script.find("# Stage 1: Shaking").unwrap() < script.find("# Stage 2: Hand tuned").unwrap());
    }

    #[test]
    fn test_staged_script_of_root_only_project() {
        let project = cantilever();
        let script = export_staged_script(&project, ScriptFormat::Tcl).unwrap();
        assert!(script.contains("# Stage 0: Stage 0"));
        assert!(script.contains("# Generated by Modsee from 1 stages"));
        assert!(script.contains("pattern Plain 1 1 {\n    load 2 0 -1000 0\n}"));
        assert!(script.contains("loadConst -time 0"));

        let dir = tempfile::tempdir().unwrap();
        let written = write_staged_script(&project, &dir.path().join("staged"), ScriptFormat::Tcl).unwrap();
        assert_eq!(written.extension().unwrap(), "tcl");
        assert_eq!(fs::read_to_string(written).unwrap(), script);
    }
}
