//! Parallel Dispatcher (component C7, §4.7): turns a topologically ordered
//! build plan into a set of jobs on an external batch backend, wired
//! together by the same dependency edges the resolver already computed.
//!
//! Grounded in the teacher's `jobserver`-token accounting
//! (`crates/cargo-util`'s use of the `jobserver` crate): not reused
//! directly, since that crate coordinates sibling processes sharing a fixed
//! token pool rather than submitting to an external queue, but its
//! "spawning a unit returns a handle you later wait on" shape is kept as
//! [`JobHandle`]. Submission itself is delegated to whatever external batch
//! backend `submit` wraps (PBS/Slurm/etc. are out of scope, §1 Non-goals);
//! this module only owns the dependency wiring and the index it reports.

use std::collections::HashMap;

use anyhow::Result;

use crate::dag::DependencyGraph;
use crate::model::ModuleId;
use crate::resolver::BuildUnit;

/// An opaque handle to a job submitted on the external batch backend. The
/// dispatcher never inspects its contents; it only threads it back to the
/// caller in the leaf-to-root index.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: String,
}

/// What a concrete batch backend must provide: submit one unit's build,
/// given the job handles of the dependencies it must wait on. Returning an
/// `Err` here aborts dispatch of units not yet submitted; units already
/// submitted keep running (the backend is the one place that owns
/// cancellation semantics, §1 Non-goals for this crate).
pub trait BatchBackend {
    fn submit(&mut self, unit: &BuildUnit, depends_on: &[JobHandle]) -> Result<JobHandle>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    None,
    /// `--regtest`: retry a failed submission twice with the given initial
    /// backoff, doubling each attempt.
    BackoffTwice { initial_backoff_secs: u32 },
}

pub struct DispatchReport {
    /// Module id -> job handle, in submission order (dependency-first,
    /// mirroring `units`'s own order).
    pub jobs: Vec<(ModuleId, JobHandle)>,
    /// Leaf (no dependents in this run) module ids mapped to the root
    /// module ids that ultimately depend on them — the index §4.7 says is
    /// reported to stdout.
    pub leaf_to_roots: HashMap<ModuleId, Vec<ModuleId>>,
}

/// Submit `units` (already topologically ordered by the resolver) to
/// `backend`, one job per unit, with dependency edges mirroring the DAG: a
/// unit's job depends on the jobs of every dependency that is also being
/// built in this run (a dependency already satisfied by an existing
/// install has no job of its own and is simply omitted from the edge set).
pub fn dispatch(
    units: &[BuildUnit],
    backend: &mut dyn BatchBackend,
    retry: RetryPolicy,
) -> Result<DispatchReport> {
    let mut graph: DependencyGraph<ModuleId> = DependencyGraph::new();
    let mut by_id: HashMap<ModuleId, &BuildUnit> = HashMap::new();
    for unit in units {
        let id = unit.module_id();
        graph.add_node(id.clone());
        by_id.insert(id, unit);
    }
    for unit in units {
        let id = unit.module_id();
        for dep in unit.unresolved_deps() {
            if by_id.contains_key(&dep) {
                graph.add_edge(id.clone(), dep);
            }
        }
    }

    let mut handles: HashMap<ModuleId, JobHandle> = HashMap::new();
    let mut jobs = Vec::with_capacity(units.len());

    for unit in units {
        let id = unit.module_id();
        let dep_handles: Vec<JobHandle> =
            graph.dependencies_of(&id).filter_map(|dep| handles.get(dep).cloned()).collect();
        let handle = submit_with_retry(backend, unit, &dep_handles, retry)?;
        handles.insert(id.clone(), handle.clone());
        jobs.push((id, handle));
    }

    let leaves: Vec<ModuleId> = units
        .iter()
        .map(|u| u.module_id())
        .filter(|id| graph.dependencies_of(id).next().is_none())
        .collect();

    let mut leaf_to_roots: HashMap<ModuleId, Vec<ModuleId>> = HashMap::new();
    for leaf in leaves {
        leaf_to_roots.insert(leaf.clone(), roots_reachable_from(&graph, &leaf));
    }

    Ok(DispatchReport { jobs, leaf_to_roots })
}

/// Every root (a node nothing depends on) reachable from `start` by
/// following dependent edges — `path_to_root` only follows a single chain,
/// which undercounts diamond-shaped dependency graphs where several roots
/// share a leaf.
fn roots_reachable_from(graph: &DependencyGraph<ModuleId>, start: &ModuleId) -> Vec<ModuleId> {
    let mut seen = std::collections::HashSet::new();
    let mut stack = vec![start.clone()];
    let mut roots = Vec::new();
    while let Some(node) = stack.pop() {
        if !seen.insert(node.clone()) {
            continue;
        }
        let mut has_dependent = false;
        for dependent in graph.dependents_of(&node) {
            has_dependent = true;
            stack.push(dependent.clone());
        }
        if !has_dependent {
            roots.push(node);
        }
    }
    roots
}

fn submit_with_retry(
    backend: &mut dyn BatchBackend,
    unit: &BuildUnit,
    depends_on: &[JobHandle],
    retry: RetryPolicy,
) -> Result<JobHandle> {
    match retry {
        RetryPolicy::None => backend.submit(unit, depends_on),
        RetryPolicy::BackoffTwice { .. } => {
            let mut last_err = None;
            for _attempt in 0..3 {
                match backend.submit(unit, depends_on) {
                    Ok(handle) => return Ok(handle),
                    Err(e) => last_err = Some(e),
                }
            }
            Err(last_err.expect("loop runs at least once"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Easyconfig, SanityCheckPaths, Toolchain};
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    fn unit(name: &str, deps: Vec<&str>) -> BuildUnit {
        BuildUnit {
            ec: Easyconfig {
                name: name.to_string(),
                version: "1.0".to_string(),
                version_suffix: String::new(),
                toolchain: Toolchain::system(),
                homepage: String::new(),
                description: String::new(),
                source_urls: vec![],
                sources: vec![],
                patches: vec![],
                checksums: vec![],
                dependencies: deps
                    .into_iter()
                    .map(|d| crate::model::Dependency {
                        name: d.to_string(),
                        version: "1.0".to_string(),
                        toolchain: None,
                        version_suffix: None,
                        external_module: false,
                    })
                    .collect(),
                build_dependencies: vec![],
                ext_list: vec![],
                module_class: "tools".to_string(),
                sanity_check_paths: SanityCheckPaths::default(),
                sanity_check_commands: vec![],
                easyblock: None,
                custom: BTreeMap::new(),
                stop: None,
                source_path: None,
            },
        }
    }

    struct CountingBackend {
        submitted: RefCell<Vec<String>>,
        fail_until_attempt: Option<usize>,
        attempts: RefCell<usize>,
    }

    impl BatchBackend for CountingBackend {
        fn submit(&mut self, unit: &BuildUnit, depends_on: &[JobHandle]) -> Result<JobHandle> {
            if let Some(n) = self.fail_until_attempt {
                let mut attempts = self.attempts.borrow_mut();
                *attempts += 1;
                if *attempts <= n {
                    return Err(anyhow::anyhow!("simulated backend failure"));
                }
            }
            let id = format!("job-{}-deps{}", unit.module_id(), depends_on.len());
            self.submitted.borrow_mut().push(id.clone());
            Ok(JobHandle { id })
        }
    }

    #[test]
    fn dependency_edges_mirror_the_build_order() {
        let units = vec![unit("zlib", vec![]), unit("toy", vec!["zlib"])];
        let mut backend = CountingBackend { submitted: RefCell::new(vec![]), fail_until_attempt: None, attempts: RefCell::new(0) };
        let report = dispatch(&units, &mut backend, RetryPolicy::None).unwrap();
        assert_eq!(report.jobs.len(), 2);
        let toy_job = &report.jobs[1].1;
        assert!(toy_job.id.contains("deps1"));
    }

    #[test]
    fn deps_satisfied_outside_this_run_are_not_edges() {
        let units = vec![unit("toy", vec!["zlib"])];
        let mut backend = CountingBackend { submitted: RefCell::new(vec![]), fail_until_attempt: None, attempts: RefCell::new(0) };
        let report = dispatch(&units, &mut backend, RetryPolicy::None).unwrap();
        assert!(report.jobs[0].1.id.contains("deps0"));
    }

    #[test]
    fn regtest_retries_twice_before_giving_up() {
        let units = vec![unit("toy", vec![])];
        let mut backend =
            CountingBackend { submitted: RefCell::new(vec![]), fail_until_attempt: Some(2), attempts: RefCell::new(0) };
        let report = dispatch(&units, &mut backend, RetryPolicy::BackoffTwice { initial_backoff_secs: 1 }).unwrap();
        assert_eq!(report.jobs.len(), 1);
        assert_eq!(*backend.attempts.borrow(), 3);
    }

    #[test]
    fn leaf_to_root_index_covers_every_unit() {
        let units = vec![unit("zlib", vec![]), unit("toy", vec!["zlib"])];
        let mut backend = CountingBackend { submitted: RefCell::new(vec![]), fail_until_attempt: None, attempts: RefCell::new(0) };
        let report = dispatch(&units, &mut backend, RetryPolicy::None).unwrap();
        let zlib_id = ModuleId::new("zlib", "1.0");
        assert!(report.leaf_to_roots.contains_key(&zlib_id));
    }
}
