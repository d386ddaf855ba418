//! The easyconfig data model: parsing, template resolution, tweaking and
//! external-module metadata (component C4, §3/§4 of the specification).

pub mod easyconfig;
pub mod external_modules;
pub mod parser;
pub mod template;
pub mod tweak;

pub use easyconfig::{
    BuildStep, Dependency, Easyconfig, ExtensionSpec, ModuleId, Patch, SanityCheckPaths, Toolchain,
};
pub use external_modules::{ExternalModuleInfo, ExternalModulesMetadata};
pub use parser::{RawEasyconfig, RawValue};
pub use template::generate_template_values;
pub use tweak::{tweak, TweakSpec};
