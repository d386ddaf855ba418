//! Typed representation of an easyconfig, after template resolution.
//!
//! The split between [`RawEasyconfig`] (the parsed-but-unresolved AST) and
//! [`Easyconfig`] (the resolved, validated record) follows DESIGN NOTES §9:
//! "Templated EC parameters" — `generate_template_values()` is the pure
//! function `Raw -> Resolved` implemented in [`crate::model::template`],
//! rather than a mutable "templating enabled" bit on a single object.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::parser::RawValue;

/// `(name, full_version)`, unique within a given module tree.
/// `full_version` already includes any version suffix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleId {
    pub name: String,
    pub full_version: String,
}

impl ModuleId {
    pub fn new(name: impl Into<String>, full_version: impl Into<String>) -> Self {
        ModuleId { name: name.into(), full_version: full_version.into() }
    }

    /// A filesystem/lockfile-safe rendering of this module id, used for the
    /// per-install lock directory name (`name`/`full_version` contain `/`
    /// characters that cannot appear in a single path component).
    pub fn sanitized(&self) -> String {
        format!("{}-{}", self.name, self.full_version).replace('/', "_")
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.full_version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Toolchain {
    pub name: String,
    pub version: String,
}

impl Toolchain {
    pub const SYSTEM_NAME: &'static str = "system";

    pub fn system() -> Self {
        Toolchain { name: Self::SYSTEM_NAME.to_string(), version: Self::SYSTEM_NAME.to_string() }
    }

    pub fn is_system(&self) -> bool {
        self.name == Self::SYSTEM_NAME && self.version == Self::SYSTEM_NAME
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub version: String,
    pub toolchain: Option<Toolchain>,
    pub version_suffix: Option<String>,
    pub external_module: bool,
}

impl Dependency {
    /// The module id this dependency resolves to under the default naming
    /// scheme; hierarchical schemes may further qualify it (see `mns`).
    pub fn full_version(&self) -> String {
        match &self.version_suffix {
            Some(suffix) => format!("{}{}", self.version, suffix),
            None => self.version.clone(),
        }
    }

    pub fn module_id(&self) -> ModuleId {
        ModuleId::new(self.name.clone(), self.full_version())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub name: String,
    pub level: Option<u32>,
    pub alt_location: Option<String>,
    pub sourcepath: Option<String>,
}

impl Patch {
    pub fn from_string(name: impl Into<String>) -> Self {
        Patch { name: name.into(), level: None, alt_location: None, sourcepath: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanityCheckPaths {
    pub files: Vec<String>,
    pub dirs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionSpec {
    pub name: String,
    pub version: String,
    pub sources: Vec<String>,
    pub patches: Vec<Patch>,
    pub checksums: Vec<String>,
    pub easyblock: Option<String>,
    pub custom: BTreeMap<String, RawValue>,
}

/// The known build steps, in pipeline order; used to validate `--stop=<step>`
/// and `--only-blocks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BuildStep {
    Fetch,
    Extract,
    Patch,
    Prepare,
    Configure,
    Build,
    Test,
    Install,
    Extensions,
    Postproc,
    Sanity,
    Module,
    Perms,
    Package,
    Cleanup,
}

impl BuildStep {
    pub const ALL: [BuildStep; 15] = [
        BuildStep::Fetch,
        BuildStep::Extract,
        BuildStep::Patch,
        BuildStep::Prepare,
        BuildStep::Configure,
        BuildStep::Build,
        BuildStep::Test,
        BuildStep::Install,
        BuildStep::Extensions,
        BuildStep::Postproc,
        BuildStep::Sanity,
        BuildStep::Module,
        BuildStep::Perms,
        BuildStep::Package,
        BuildStep::Cleanup,
    ];

    pub fn from_name(name: &str) -> Option<BuildStep> {
        Self::ALL.iter().copied().find(|s| s.name().eq_ignore_ascii_case(name))
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuildStep::Fetch => "fetch",
            BuildStep::Extract => "extract",
            BuildStep::Patch => "patch",
            BuildStep::Prepare => "prepare",
            BuildStep::Configure => "configure",
            BuildStep::Build => "build",
            BuildStep::Test => "test",
            BuildStep::Install => "install",
            BuildStep::Extensions => "extensions",
            BuildStep::Postproc => "postproc",
            BuildStep::Sanity => "sanity",
            BuildStep::Module => "module",
            BuildStep::Perms => "perms",
            BuildStep::Package => "package",
            BuildStep::Cleanup => "cleanup",
        }
    }
}

/// The resolved, validated easyconfig record (§3 Data Model). Immutable
/// after [`crate::model::template::generate_template_values`] has produced
/// it — mutating a field would require re-running validation, so this type
/// deliberately exposes no setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Easyconfig {
    pub name: String,
    pub version: String,
    pub version_suffix: String,
    pub toolchain: Toolchain,
    pub homepage: String,
    pub description: String,
    pub source_urls: Vec<String>,
    pub sources: Vec<String>,
    pub patches: Vec<Patch>,
    pub checksums: Vec<String>,
    pub dependencies: Vec<Dependency>,
    pub build_dependencies: Vec<Dependency>,
    pub ext_list: Vec<ExtensionSpec>,
    pub module_class: String,
    pub sanity_check_paths: SanityCheckPaths,
    pub sanity_check_commands: Vec<String>,
    pub easyblock: Option<String>,
    pub custom: BTreeMap<String, RawValue>,
    pub stop: Option<BuildStep>,
    /// Path of the `.eb` file this was parsed from, if any (synthesised
    /// block-derived or tweaked ECs may not have one until written out).
    pub source_path: Option<PathBuf>,
}

impl Easyconfig {
    pub fn full_version(&self) -> String {
        format!("{}{}", self.version, self.version_suffix)
    }

    pub fn module_id(&self) -> ModuleId {
        ModuleId::new(self.name.clone(), self.full_version())
    }

    /// All direct dependencies (regular + build), in EC declaration order.
    pub fn all_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter().chain(self.build_dependencies.iter())
    }

    /// Conventional basename for this EC: `name-version[-toolchain][-versionsuffix].eb`.
    pub fn conventional_filename(&self) -> String {
        let mut s = format!("{}-{}", self.name, self.version);
        if !self.toolchain.is_system() {
            s.push('-');
            s.push_str(&self.toolchain.name);
            s.push('-');
            s.push_str(&self.toolchain.version);
        }
        s.push_str(&self.version_suffix);
        s.push_str(".eb");
        s
    }

    /// Validate the invariants from §3:
    /// (a) checksum list length, (b) extension checksum sub-lists,
    /// (d) system toolchain never depends on itself.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("easyconfig is missing 'name'".to_string());
        }
        if self.version.is_empty() {
            return Err("easyconfig is missing 'version'".to_string());
        }
        if self.homepage.is_empty() {
            return Err("easyconfig is missing 'homepage'".to_string());
        }
        if self.description.is_empty() {
            return Err("easyconfig is missing 'description'".to_string());
        }

        let expected = self.sources.len() + self.patches.len();
        if !self.checksums.is_empty() && self.checksums.len() != expected {
            return Err(format!(
                "checksums has {} entries but sources+patches has {expected}",
                self.checksums.len()
            ));
        }

        for ext in &self.ext_list {
            let ext_expected = ext.sources.len() + ext.patches.len();
            if !ext.checksums.is_empty() && ext.checksums.len() != ext_expected {
                return Err(format!(
                    "extension {} checksums has {} entries but sources+patches has {ext_expected}",
                    ext.name,
                    ext.checksums.len()
                ));
            }
        }

        if self.toolchain.is_system() {
            for dep in self.all_dependencies() {
                if dep.name == self.name
                    && dep.toolchain.as_ref().map(|tc| tc.is_system()).unwrap_or(true)
                {
                    return Err("system-toolchain easyconfig cannot depend on itself".to_string());
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_ec() -> Easyconfig {
        Easyconfig {
            name: "toy".to_string(),
            version: "0.0".to_string(),
            version_suffix: String::new(),
            toolchain: Toolchain::system(),
            homepage: "https://example.org".to_string(),
            description: "a toy package".to_string(),
            source_urls: vec![],
            sources: vec!["toy-0.0.tar.gz".to_string()],
            patches: vec![],
            checksums: vec![],
            dependencies: vec![],
            build_dependencies: vec![],
            ext_list: vec![],
            module_class: "tools".to_string(),
            sanity_check_paths: SanityCheckPaths::default(),
            sanity_check_commands: vec![],
            easyblock: None,
            custom: BTreeMap::new(),
            stop: None,
            source_path: None,
        }
    }

    #[test]
    fn conventional_filename_omits_system_toolchain() {
        let ec = minimal_ec();
        assert_eq!(ec.conventional_filename(), "toy-0.0.eb");
    }

    #[test]
    fn conventional_filename_includes_toolchain() {
        let mut ec = minimal_ec();
        ec.toolchain = Toolchain { name: "GCC".to_string(), version: "4.6.3".to_string() };
        assert_eq!(ec.conventional_filename(), "toy-0.0-GCC-4.6.3.eb");
    }

    #[test]
    fn validate_rejects_mismatched_checksum_count() {
        let mut ec = minimal_ec();
        ec.checksums = vec!["a".repeat(64), "b".repeat(64)];
        assert!(ec.validate().is_err());
    }

    #[test]
    fn validate_rejects_system_self_dependency() {
        let mut ec = minimal_ec();
        ec.dependencies.push(Dependency {
            name: "toy".to_string(),
            version: "0.0".to_string(),
            toolchain: None,
            version_suffix: None,
            external_module: false,
        });
        assert!(ec.validate().is_err());
    }

    #[test]
    fn module_id_combines_version_and_suffix() {
        let mut ec = minimal_ec();
        ec.version_suffix = "-foss".to_string();
        assert_eq!(ec.module_id(), ModuleId::new("toy", "0.0-foss"));
    }
}
