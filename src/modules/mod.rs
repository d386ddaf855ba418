//! Modules Tool Adapter (component C3): mediates all interaction with the
//! external modules backend, abstracting over the Lmod / Environment
//! Modules v4+ / legacy Tcl variants behind one trait.
//!
//! Grounded in `original_source/easybuild/tools/modules.py`'s `ModulesTool`
//! base class and its `EnvironmentModulesC`/`Lmod` subclasses. The Rust
//! port keeps that one-trait-many-backends shape, mirroring how the
//! teacher selects a concrete `Source` implementation by kind
//! (`src/cargo/core/source/source_id.rs`).

pub mod environment_modules;
pub mod lmod;
pub mod module_file;
pub mod protocol;

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::model::ModuleId;

pub use environment_modules::EnvironmentModulesTool;
pub use lmod::LmodTool;

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub purge: bool,
    pub init_env: bool,
    pub allow_reload: bool,
}

/// Per-backend `available("")`/`show(m)` cache, keyed by
/// `(MODULEPATH, arg)` as §4.3 "Caches" names explicitly. `use_path`/
/// `unuse_path` touch MODULEPATH, so both backends clear this on every
/// such call rather than track which individual path changed.
#[derive(Debug, Default)]
pub(crate) struct QueryCache {
    available: RefCell<HashMap<(String, String), Vec<ModuleId>>>,
    show: RefCell<HashMap<(String, String), String>>,
}

impl QueryCache {
    pub(crate) fn get_available(&self, modulepath: &str, prefix: &str) -> Option<Vec<ModuleId>> {
        self.available.borrow().get(&(modulepath.to_string(), prefix.to_string())).cloned()
    }

    pub(crate) fn put_available(&self, modulepath: &str, prefix: &str, modules: Vec<ModuleId>) {
        self.available.borrow_mut().insert((modulepath.to_string(), prefix.to_string()), modules);
    }

    pub(crate) fn get_show(&self, modulepath: &str, module: &str) -> Option<String> {
        self.show.borrow().get(&(modulepath.to_string(), module.to_string())).cloned()
    }

    pub(crate) fn put_show(&self, modulepath: &str, module: &str, text: String) {
        self.show.borrow_mut().insert((modulepath.to_string(), module.to_string()), text);
    }

    /// Called whenever `use_path`/`unuse_path` change MODULEPATH.
    pub(crate) fn invalidate(&self) {
        self.available.borrow_mut().clear();
        self.show.borrow_mut().clear();
    }
}

/// A single backend invocation, selected at startup (`--modules-tool=name`)
/// and fixed for the lifetime of a run.
pub trait ModulesTool {
    /// Human-readable name, used in log messages and error text.
    fn name(&self) -> &'static str;

    /// Verify the backend binary meets `Self`'s minimum required version;
    /// grounded in `ModulesTool.check_module_function`/version regexps.
    fn check_version(&self) -> Result<()>;

    fn available(&self, prefix: Option<&str>) -> Result<Vec<ModuleId>>;

    fn exist(&self, modules: &[ModuleId]) -> Result<Vec<bool>>;

    fn show(&self, module: &ModuleId) -> Result<String>;

    fn load(&self, modules: &[ModuleId], opts: &LoadOptions) -> Result<Vec<protocol::Directive>>;

    fn unload(&self, modules: &[ModuleId]) -> Result<Vec<protocol::Directive>>;

    fn purge(&self) -> Result<Vec<protocol::Directive>>;

    fn use_path(&self, path: &Path, priority: Option<i32>) -> Result<()>;

    fn unuse_path(&self, path: &Path) -> Result<()>;

    fn get_setenv_value(&self, module: &ModuleId, var: &str) -> Result<Option<String>>;

    /// Parses module files for `module use`/`prepend-path MODULEPATH`
    /// directives and returns the extra search paths each listed module
    /// would add, without actually loading anything.
    fn modpath_extensions_for(&self, modules: &[ModuleId]) -> Result<Vec<(ModuleId, Vec<PathBuf>)>>;

    /// Recursively resolves the chain of modules that must load, in order,
    /// to make `subdir` appear on `MODULEPATH`, given `deps`' own
    /// `modpath_extensions_for` output.
    fn path_to_top_of_module_tree(
        &self,
        init_paths: &[PathBuf],
        module: &ModuleId,
        subdir: &Path,
        deps: &[ModuleId],
    ) -> Result<Vec<ModuleId>> {
        module_file::path_to_top_of_module_tree(self, init_paths, module, subdir, deps)
    }
}
