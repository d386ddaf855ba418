//! Module Naming Scheme (component C8): pluggable mapping from an
//! easyconfig to a module identity and install subdirectory.
//!
//! `ModuleNamingScheme` is a trait object, selected at runtime via
//! `--module-naming-scheme=name`, mirroring how C3 picks a `ModulesTool`
//! impl and the teacher's `Source`/`SourceId` kind dispatch
//! (`src/cargo/core/source/source_id.rs`).

pub mod categorized;
pub mod easybuild;
pub mod hierarchical;

pub use categorized::CategorizedHierarchicalMns;
pub use easybuild::EasyBuildMns;
pub use hierarchical::HierarchicalMns;

use std::path::PathBuf;

use crate::model::Easyconfig;

/// A toolchain's capability class, used by the hierarchical schemes to
/// decide which subdir tier an easyconfig belongs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolchainClass {
    System,
    Compiler,
    Mpi,
}

pub fn classify_toolchain(ec: &Easyconfig) -> ToolchainClass {
    if ec.toolchain.is_system() {
        return ToolchainClass::System;
    }
    // A small, explicit table of known "full" (compiler+MPI) toolchain
    // names; anything else is treated as compiler-only. This mirrors the
    // original's `TC_CONSTANT_*` toolchain-component tables without
    // importing a full toolchain-capability model, which is out of scope.
    const MPI_TOOLCHAINS: &[&str] = &["foss", "fosscuda", "gompi", "gompic", "iomkl", "intel"];
    if MPI_TOOLCHAINS.contains(&ec.toolchain.name.as_str()) {
        ToolchainClass::Mpi
    } else {
        ToolchainClass::Compiler
    }
}

pub trait ModuleNamingScheme {
    fn name(&self) -> &'static str;

    /// The fully qualified module name the pipeline will register with the
    /// modules tool, e.g. `toy/0.0` or `Compiler/GCC/9.3.0/toy/0.0`.
    fn det_full_module_name(&self, ec: &Easyconfig) -> String;

    /// The subdirectory (relative to the modules tree root) this
    /// easyconfig's module file is written under.
    fn det_install_subdir(&self, ec: &Easyconfig) -> PathBuf;

    /// Extra `MODULEPATH` entries this module's own dependents would need
    /// once the module is loaded (e.g. a compiler module exposing its
    /// `Compiler/<name>/<version>` tier).
    fn det_modpath_extensions(&self, ec: &Easyconfig) -> Vec<PathBuf>;

    /// Whether `short` (e.g. `toy`) is a valid short name for the full
    /// module name `full` (e.g. `toy/0.0`) under this scheme.
    fn is_short_modname_for(&self, short: &str, full: &str) -> bool {
        full == short || full.starts_with(&format!("{short}/"))
    }
}

pub fn by_name(name: &str) -> Option<Box<dyn ModuleNamingScheme>> {
    match name {
        "EasyBuildMNS" => Some(Box::new(EasyBuildMns)),
        "HierarchicalMNS" => Some(Box::new(HierarchicalMns)),
        "CategorizedHierarchicalMNS" => Some(Box::new(CategorizedHierarchicalMns)),
        _ => None,
    }
}
