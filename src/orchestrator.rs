//! Orchestrator (component C10, §4.10): the top-level glue function that
//! reads easyconfigs, resolves their dependency order, and either drives
//! the pipeline directly or hands the plan off to the dispatcher.
//!
//! Grounded in the teacher's `compile_ws` (`src/cargo/ops/cargo_compile.rs`):
//! read the manifest(s), resolve once, then iterate compiled units. This
//! crate's [`run`] keeps that "resolve once up front" shape — `--dep-graph`
//! emission still assembles the [`DependencyGraph`] value even though
//! rendering it to DOT is out of scope (§1 Non-goals); the orchestrator's
//! job is producing that graph, not drawing it.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::dag::DependencyGraph;
use crate::easyblock::Registry;
use crate::mns::{CategorizedHierarchicalMns, EasyBuildMns, HierarchicalMns, ModuleNamingScheme};
use crate::model::{generate_template_values, parser, tweak, Easyconfig, ModuleId, TweakSpec};
use crate::modules::ModulesTool;
use crate::pipeline::{self, PipelineInputs, PipelineState};
use crate::resolver::{self, BuildUnit};

/// One requested path argument plus whatever `--try-*` amendments apply to
/// it (§4.10 "optionally tweak per `--try-*`"). The orchestrator accepts
/// these pre-parsed; parsing `--try-amend=key=val` et al. out of argv is
/// the embedding CLI's job (§1 Non-goals).
pub struct RequestedEc {
    pub path: PathBuf,
    pub tweaks: Vec<TweakSpec>,
}

pub struct RunOptions<'a> {
    pub requested: Vec<RequestedEc>,
    pub config: &'a Config,
    pub modules_tool: &'a dyn ModulesTool,
    pub registry: &'a Registry,
    pub is_root: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExitStatus {
    Success,
    Fatal,
    RegtestPartialFailure,
}

pub struct UnitReport {
    pub module_id: ModuleId,
    pub state: PipelineState,
    pub error: Option<String>,
}

pub struct RunReport {
    pub status: RunExitStatus,
    pub units: Vec<UnitReport>,
    pub dependency_graph: Option<DependencyGraph<ModuleId>>,
}

fn resolve_mns(config: &Config) -> Box<dyn ModuleNamingScheme> {
    match config.module_naming_scheme.as_str() {
        "HierarchicalMNS" => Box::new(HierarchicalMns),
        "CategorizedHierarchicalMNS" => Box::new(CategorizedHierarchicalMns),
        _ => Box::new(EasyBuildMns),
    }
}

fn load_one(path: &Path, tweaks: &[TweakSpec]) -> Result<Easyconfig> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let raw_list = parser::parse(&text, Some(path))?;
    let raw = raw_list
        .into_iter()
        .next()
        .with_context(|| format!("{} contains no easyconfig blocks", path.display()))?;
    let mut ec = generate_template_values(&raw)?;
    for spec in tweaks {
        ec = tweak(&ec, spec.clone())?;
    }
    ec.validate().map_err(|reason| anyhow::anyhow!("{} is invalid: {reason}", path.display()))?;
    Ok(ec)
}

fn build_dependency_graph(units: &[BuildUnit]) -> DependencyGraph<ModuleId> {
    let mut graph = DependencyGraph::new();
    let present: HashSet<ModuleId> = units.iter().map(|u| u.module_id()).collect();
    for unit in units {
        let id = unit.module_id();
        graph.add_node(id.clone());
        for dep in unit.unresolved_deps() {
            if present.contains(&dep) {
                graph.add_edge(id.clone(), dep);
            }
        }
    }
    graph
}

/// Run the full top-level flow described in §4.10.
pub fn run(options: RunOptions) -> Result<RunReport> {
    if !options.is_root {
        // nothing to refuse
    } else if !options.config.allow_use_as_root {
        bail!("refusing to run as root without --allow-use-as-root-and-accept-consequences");
    }

    let mut requested_ecs = Vec::with_capacity(options.requested.len());
    for req in &options.requested {
        requested_ecs.push(load_one(&req.path, &req.tweaks)?);
    }

    let already_available: HashSet<ModuleId> = if options.config.force || options.config.rebuild {
        HashSet::new()
    } else {
        let candidates: Vec<ModuleId> = requested_ecs.iter().map(|ec| ec.module_id()).collect();
        let existence = options
            .modules_tool
            .exist(&candidates)
            .context("failed to query modules tool for already-installed modules")?;
        candidates.into_iter().zip(existence).filter_map(|(id, exists)| exists.then_some(id)).collect()
    };

    let to_build: Vec<Easyconfig> =
        requested_ecs.into_iter().filter(|ec| !already_available.contains(&ec.module_id())).collect();

    if to_build.is_empty() {
        info!("nothing to build: every requested module is already installed");
        return Ok(RunReport { status: RunExitStatus::Success, units: Vec::new(), dependency_graph: None });
    }

    let units = resolver::resolve(to_build, already_available, &options.config.robot_paths)?;

    if options.config.dep_graph.is_some() {
        let graph = build_dependency_graph(&units);
        return Ok(RunReport { status: RunExitStatus::Success, units: Vec::new(), dependency_graph: Some(graph) });
    }

    if options.config.job {
        // Dispatch is the caller's responsibility from here: it owns the
        // concrete `BatchBackend`, which this crate has no way to supply
        // generically (§4.7). The orchestrator's contribution for `--job`
        // is handing back the resolved, dependency-ordered plan.
        let graph = build_dependency_graph(&units);
        return Ok(RunReport {
            status: RunExitStatus::Success,
            units: units.iter().map(|u| UnitReport { module_id: u.module_id(), state: PipelineState::Stopped, error: None }).collect(),
            dependency_graph: Some(graph),
        });
    }

    let mns = resolve_mns(options.config);
    let mut reports = Vec::with_capacity(units.len());
    let mut any_failed = false;

    for (i, unit) in units.iter().enumerate() {
        let resolved_deps: Vec<ModuleId> = units[..i]
            .iter()
            .map(|u| u.module_id())
            .filter(|id| unit.unresolved_deps().contains(id))
            .collect();

        let outcome = pipeline::run(PipelineInputs {
            ec: &unit.ec,
            config: options.config,
            modules_tool: options.modules_tool,
            mns: mns.as_ref(),
            registry: options.registry,
            resolved_deps: &resolved_deps,
        });

        match outcome.state {
            PipelineState::Done => info!(unit = %outcome.module_id, "build succeeded"),
            PipelineState::Stopped => warn!(unit = %outcome.module_id, "build stopped early by configuration"),
            PipelineState::Failed => {
                any_failed = true;
                error!(unit = %outcome.module_id, error = outcome.error.as_deref().unwrap_or(""), "build failed");
            }
        }

        let failed_this_unit = outcome.state == PipelineState::Failed;
        reports.push(UnitReport { module_id: outcome.module_id, state: outcome.state, error: outcome.error });

        if failed_this_unit && !options.config.regtest {
            return Ok(RunReport { status: RunExitStatus::Fatal, units: reports, dependency_graph: None });
        }
    }

    let status = if any_failed && options.config.regtest {
        RunExitStatus::RegtestPartialFailure
    } else if any_failed {
        RunExitStatus::Fatal
    } else {
        RunExitStatus::Success
    };

    Ok(RunReport { status, units: reports, dependency_graph: None })
}
