//! Configuration surface (ambient component A3).
//!
//! Argv parsing is explicitly out of scope (§1 Non-goals) — this module
//! only carries the *effects* an orchestrator-facing CLI would set (§6
//! "CLI (orchestrator-facing only)"), the way `BuildConfig::new` in the
//! teacher (`src/cargo/core/compiler/build_config.rs`) separates "what a
//! build needs to know" from the clap parsing that produces it. Each field
//! below corresponds to one or more of the flags that section lists.

use std::collections::BTreeMap;
use std::env as std_env;
use std::path::PathBuf;

use crate::model::{BuildStep, Toolchain};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleSyntax {
    Tcl,
    Lua,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZipLogsFormat {
    Gzip,
    Bzip2,
}

/// Resolved engine configuration. Every field has a sensible default; a
/// caller (an argv parser, a test, an embedding application) supplies only
/// the overrides it cares about via [`ConfigOverrides`].
#[derive(Debug, Clone)]
pub struct Config {
    /// `--installpath`
    pub installpath: PathBuf,
    /// `--buildpath`
    pub buildpath: PathBuf,
    /// `--sourcepath`; searched in order for cached source files.
    pub sourcepath: Vec<PathBuf>,
    /// `--tmpdir`
    pub tmpdir: PathBuf,
    /// `--repositorypath`
    pub repositorypath: Option<PathBuf>,
    /// `--robot[=paths]` / `--robot-paths=paths`
    pub robot_paths: Vec<PathBuf>,
    /// `--modules-tool=name` (`"EnvironmentModules"` or `"Lmod"`)
    pub modules_tool: String,
    /// `--module-naming-scheme=name`
    pub module_naming_scheme: String,
    /// `--module-syntax={Tcl,Lua}`
    pub module_syntax: ModuleSyntax,
    /// `--stop=step`
    pub stop: Option<BuildStep>,
    /// `--only-blocks=b1,b2`
    pub only_blocks: Vec<String>,
    /// `--skip`
    pub skip: bool,
    /// `--skip-test-step`
    pub skip_test_step: bool,
    /// `--ignore-test-failure`
    pub ignore_test_failure: bool,
    /// `--force`
    pub force: bool,
    /// `--rebuild`
    pub rebuild: bool,
    /// `--fetch`
    pub fetch_only: bool,
    /// `--force-download`
    pub force_download: bool,
    /// `--enforce-checksums`
    pub enforce_checksums: bool,
    /// `--sanity-check-only`
    pub sanity_check_only: bool,
    /// `--skip-extensions`
    pub skip_extensions: bool,
    /// `--ignore-locks`
    pub ignore_locks: bool,
    /// `--set-default-module`
    pub set_default_module: bool,
    /// `--recursive-module-unload`
    pub recursive_module_unload: bool,
    /// `--fixed-installdir-naming-scheme` (default on) / `--disable-…`
    pub fixed_installdir_naming_scheme: bool,
    /// `--zip-logs[={gzip,bzip2}]`
    pub zip_logs: Option<ZipLogsFormat>,
    /// `--trace`
    pub trace: bool,
    /// `--parallel=n`
    pub parallel: u32,
    /// `--job`
    pub job: bool,
    /// `--cleanup-tmpdir` / `--disable-cleanup-tmpdir`
    pub cleanup_tmpdir: bool,
    /// `--cleanup-builddir` / `--disable-cleanup-builddir`
    pub cleanup_builddir: bool,
    /// `--dep-graph=file`
    pub dep_graph: Option<PathBuf>,
    /// `--allow-use-as-root-and-accept-consequences`
    pub allow_use_as_root: bool,
    /// `--map-toolchains` / `--disable-map-toolchains`
    pub map_toolchains: bool,
    /// `--try-toolchain[-{name,version}]=v`
    pub try_toolchain: Option<Toolchain>,
    /// `--try-ignore-versionsuffixes`
    pub try_ignore_versionsuffixes: bool,
    /// `--dump-env-script`
    pub dump_env_script: bool,
    /// `--regtest` (retry-twice job backoff, continue-on-failure driver mode)
    pub regtest: bool,
}

impl Default for Config {
    fn default() -> Self {
        let home = std_env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/tmp"));
        Config {
            installpath: home.join(".local/easybuild"),
            buildpath: PathBuf::from("/tmp/easybuild/build"),
            sourcepath: vec![home.join(".local/easybuild/sources")],
            tmpdir: PathBuf::from("/tmp/easybuild"),
            repositorypath: None,
            robot_paths: Vec::new(),
            modules_tool: "Lmod".to_string(),
            module_naming_scheme: "EasyBuildMNS".to_string(),
            module_syntax: ModuleSyntax::Lua,
            stop: None,
            only_blocks: Vec::new(),
            skip: false,
            skip_test_step: false,
            ignore_test_failure: false,
            force: false,
            rebuild: false,
            fetch_only: false,
            force_download: false,
            enforce_checksums: false,
            sanity_check_only: false,
            skip_extensions: false,
            ignore_locks: false,
            set_default_module: false,
            recursive_module_unload: false,
            fixed_installdir_naming_scheme: true,
            zip_logs: None,
            trace: false,
            parallel: 1,
            job: false,
            cleanup_tmpdir: true,
            cleanup_builddir: true,
            dep_graph: None,
            allow_use_as_root: false,
            map_toolchains: true,
            try_toolchain: None,
            try_ignore_versionsuffixes: false,
            dump_env_script: false,
            regtest: false,
        }
    }
}

/// A sparse set of field overrides; every field left `None`/empty falls
/// back to [`Config::default`] or an `EASYBUILD_*` environment variable.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub installpath: Option<PathBuf>,
    pub buildpath: Option<PathBuf>,
    pub sourcepath: Option<Vec<PathBuf>>,
    pub tmpdir: Option<PathBuf>,
    pub repositorypath: Option<PathBuf>,
    pub robot_paths: Option<Vec<PathBuf>>,
    pub modules_tool: Option<String>,
    pub module_naming_scheme: Option<String>,
    pub module_syntax: Option<ModuleSyntax>,
    pub stop: Option<BuildStep>,
    pub only_blocks: Option<Vec<String>>,
    pub skip: Option<bool>,
    pub skip_test_step: Option<bool>,
    pub ignore_test_failure: Option<bool>,
    pub force: Option<bool>,
    pub rebuild: Option<bool>,
    pub fetch_only: Option<bool>,
    pub force_download: Option<bool>,
    pub enforce_checksums: Option<bool>,
    pub sanity_check_only: Option<bool>,
    pub skip_extensions: Option<bool>,
    pub ignore_locks: Option<bool>,
    pub set_default_module: Option<bool>,
    pub recursive_module_unload: Option<bool>,
    pub fixed_installdir_naming_scheme: Option<bool>,
    pub zip_logs: Option<ZipLogsFormat>,
    pub trace: Option<bool>,
    pub parallel: Option<u32>,
    pub job: Option<bool>,
    pub cleanup_tmpdir: Option<bool>,
    pub cleanup_builddir: Option<bool>,
    pub dep_graph: Option<PathBuf>,
    pub allow_use_as_root: Option<bool>,
    pub map_toolchains: Option<bool>,
    pub try_toolchain: Option<Toolchain>,
    pub try_ignore_versionsuffixes: Option<bool>,
    pub dump_env_script: Option<bool>,
    pub regtest: Option<bool>,
}

/// `EASYBUILD_*` variables the process environment mirrors one-for-one onto
/// a default-config field (§6 "Environment variables honoured").
fn apply_env(base: &mut Config, vars: &BTreeMap<String, String>) {
    if let Some(v) = vars.get("EASYBUILD_INSTALLPATH") {
        base.installpath = PathBuf::from(v);
    }
    if let Some(v) = vars.get("EASYBUILD_BUILDPATH") {
        base.buildpath = PathBuf::from(v);
    }
    if let Some(v) = vars.get("EASYBUILD_SOURCEPATH") {
        base.sourcepath = std_env::split_paths(v).collect();
    }
    if let Some(v) = vars.get("EASYBUILD_TMPDIR") {
        base.tmpdir = PathBuf::from(v);
    }
    if let Some(v) = vars.get("EASYBUILD_REPOSITORYPATH") {
        base.repositorypath = Some(PathBuf::from(v));
    }
    if let Some(v) = vars.get("EASYBUILD_MODULES_TOOL") {
        base.modules_tool = v.clone();
    }
    if let Some(v) = vars.get("EASYBUILD_MODULE_NAMING_SCHEME") {
        base.module_naming_scheme = v.clone();
    }
    if let Some(v) = vars.get("EASYBUILD_PARALLEL") {
        if let Ok(n) = v.parse() {
            base.parallel = n;
        }
    }
}

impl Config {
    /// Build the effective configuration: defaults, then `EASYBUILD_*`
    /// process-environment mirrors, then `overrides` (highest precedence —
    /// an explicit CLI flag always wins over the environment).
    pub fn from_env_and_overrides(overrides: ConfigOverrides) -> Config {
        let mut config = Config::default();
        let env_vars: BTreeMap<String, String> = std_env::vars().filter(|(k, _)| k.starts_with("EASYBUILD_")).collect();
        apply_env(&mut config, &env_vars);

        macro_rules! take {
            ($field:ident) => {
                if let Some(v) = overrides.$field {
                    config.$field = v;
                }
            };
        }
        take!(installpath);
        take!(buildpath);
        take!(sourcepath);
        take!(tmpdir);
        take!(repositorypath);
        take!(robot_paths);
        take!(modules_tool);
        take!(module_naming_scheme);
        take!(module_syntax);
        take!(stop);
        take!(only_blocks);
        take!(skip);
        take!(skip_test_step);
        take!(ignore_test_failure);
        take!(force);
        take!(rebuild);
        take!(fetch_only);
        take!(force_download);
        take!(enforce_checksums);
        take!(sanity_check_only);
        take!(skip_extensions);
        take!(ignore_locks);
        take!(set_default_module);
        take!(recursive_module_unload);
        take!(fixed_installdir_naming_scheme);
        take!(zip_logs);
        take!(trace);
        take!(parallel);
        take!(job);
        take!(cleanup_tmpdir);
        take!(cleanup_builddir);
        take!(dep_graph);
        take!(allow_use_as_root);
        take!(map_toolchains);
        take!(try_toolchain);
        take!(try_ignore_versionsuffixes);
        take!(dump_env_script);
        take!(regtest);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let config = Config::default();
        assert!(!config.force);
        assert!(!config.skip_extensions);
        assert_eq!(config.parallel, 1);
        assert!(config.cleanup_builddir);
    }

    #[test]
    fn overrides_win_over_defaults() {
        let overrides = ConfigOverrides { force: Some(true), parallel: Some(8), ..Default::default() };
        let config = Config::from_env_and_overrides(overrides);
        assert!(config.force);
        assert_eq!(config.parallel, 8);
    }

    #[test]
    fn env_mirror_is_overridden_by_explicit_config() {
        let overrides =
            ConfigOverrides { modules_tool: Some("EnvironmentModules".to_string()), ..Default::default() };
        let config = Config::from_env_and_overrides(overrides);
        assert_eq!(config.modules_tool, "EnvironmentModules");
    }
}
