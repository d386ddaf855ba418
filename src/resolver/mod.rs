//! Dependency Resolver (component C5): the fixed-point algorithm of §4.5.
//!
//! Grounded in the teacher's own resolver (`src/cargo/core/resolver/mod.rs`
//! — a fixed-point activation loop, run to completion, followed by an
//! explicit cycle check). This crate keeps that "keep resolving while
//! making progress, then fail" shape but replaces SAT-style version
//! backtracking (irrelevant here — dependencies are located by filename
//! convention, not resolved from a version range) with the robot-path
//! discovery loop below.

pub mod robot;
pub mod toolchain;

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::PathBuf;

use crate::error::EbError;
use crate::model::{generate_template_values, parser, Easyconfig, ModuleId};

/// An easyconfig queued for (or already placed in) the build order.
#[derive(Debug, Clone)]
pub struct BuildUnit {
    pub ec: Easyconfig,
}

impl BuildUnit {
    pub fn module_id(&self) -> ModuleId {
        self.ec.module_id()
    }

    /// Dependencies that must be installed (or already available) before
    /// this unit can build; external-module dependencies are excluded —
    /// they are satisfied by metadata lookup, not by the resolver.
    pub fn unresolved_deps(&self) -> Vec<ModuleId> {
        self.ec.all_dependencies().filter(|d| !d.external_module).map(|d| d.module_id()).collect()
    }
}

/// Safety bound on robot-path discovery iterations, guaranteeing
/// termination independent of the progress check (§4.5).
const MAX_ITERATIONS: usize = 100_000;

/// Run the fixed-point resolution algorithm over `requested`, using
/// `available` as the set of already-installed (or otherwise assumed
/// present) module ids, and `robot_paths` (if non-empty) to discover
/// easyconfigs for missing dependencies.
///
/// Returns the build units in dependency-first order. On failure, returns
/// [`EbError::MissingDependencies`] (no robot progress possible, some
/// dependency remains unresolved) or [`EbError::CycleDetected`] (robot
/// discovery looped without ever satisfying the remaining units).
pub fn resolve(
    requested: Vec<Easyconfig>,
    available_initial: HashSet<ModuleId>,
    robot_paths: &[PathBuf],
) -> Result<Vec<BuildUnit>, EbError> {
    let mut unprocessed: VecDeque<BuildUnit> =
        requested.into_iter().map(|ec| BuildUnit { ec }).collect();
    let mut ordered: Vec<BuildUnit> = Vec::new();
    let mut available = available_initial;

    for _ in 0..MAX_ITERATIONS {
        let progressed = drain_ready(&mut unprocessed, &mut ordered, &mut available);

        if unprocessed.is_empty() {
            return Ok(ordered);
        }

        match try_robot_progress(&mut unprocessed, &available, robot_paths)? {
            true => continue,
            false => {
                if !progressed {
                    let pending_ids: HashSet<ModuleId> = unprocessed.iter().map(BuildUnit::module_id).collect();
                    let missing: Vec<ModuleId> = unprocessed
                        .iter()
                        .flat_map(|u| u.unresolved_deps())
                        .filter(|id| !available.contains(id))
                        .collect::<HashSet<_>>()
                        .into_iter()
                        .collect();

                    // Every remaining unresolved dependency is itself one of
                    // the still-unprocessed units: nothing is genuinely
                    // absent, the units are just mutually blocking each
                    // other (§4.5's dependency-cycle case, distinct from a
                    // dependency no robot path could ever supply).
                    if !missing.is_empty() && missing.iter().all(|id| pending_ids.contains(id)) {
                        return Err(EbError::CycleDetected(unprocessed.iter().map(BuildUnit::module_id).collect()));
                    }
                    return Err(EbError::MissingDependencies(missing));
                }
            }
        }
    }

    Err(EbError::CycleDetected(unprocessed.iter().map(BuildUnit::module_id).collect()))
}

/// Repeatedly move units whose dependencies are all satisfied from
/// `unprocessed` to `ordered`, until no further unit can move. Returns
/// whether at least one unit moved.
fn drain_ready(
    unprocessed: &mut VecDeque<BuildUnit>,
    ordered: &mut Vec<BuildUnit>,
    available: &mut HashSet<ModuleId>,
) -> bool {
    let mut any = false;
    loop {
        let ready_index = unprocessed
            .iter()
            .position(|u| u.unresolved_deps().iter().all(|dep| available.contains(dep)));
        match ready_index {
            Some(idx) => {
                let unit = unprocessed.remove(idx).expect("index was just found");
                available.insert(unit.module_id());
                ordered.push(unit);
                any = true;
            }
            None => break,
        }
    }
    any
}

/// Scan `unprocessed` for a unit with an unresolved, non-pending
/// dependency that a robot path can supply; on success, parse and enqueue
/// it and return `true`. Returns `false` if no robot path can contribute.
fn try_robot_progress(
    unprocessed: &mut VecDeque<BuildUnit>,
    available: &HashSet<ModuleId>,
    robot_paths: &[PathBuf],
) -> Result<bool, EbError> {
    if robot_paths.is_empty() {
        return Ok(false);
    }

    let pending_ids: HashSet<ModuleId> = unprocessed.iter().map(BuildUnit::module_id).collect();

    for unit in unprocessed.iter() {
        for dep in unit.ec.all_dependencies() {
            if dep.external_module {
                continue;
            }
            let dep_id = dep.module_id();
            if available.contains(&dep_id) || pending_ids.contains(&dep_id) {
                continue;
            }

            if let Some(path) =
                robot::locate_easyconfig(&dep.name, &dep.full_version(), dep.toolchain.as_ref(), robot_paths)
            {
                let text = fs::read_to_string(&path).map_err(|e| EbError::IOFailed {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                let raw_blocks = parser::parse(&text, Some(&path))
                    .map_err(|e| EbError::ParseError { path: path.clone(), reason: e.to_string() })?;
                let raw = raw_blocks.into_iter().next().ok_or_else(|| EbError::ParseError {
                    path: path.clone(),
                    reason: "easyconfig file contains no blocks".to_string(),
                })?;
                let ec = generate_template_values(&raw)?;
                unprocessed.push_back(BuildUnit { ec });
                return Ok(true);
            }
        }
    }

    Ok(false)
}
