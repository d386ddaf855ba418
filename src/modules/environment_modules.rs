//! Environment Modules (Tcl, v4+) backend, grounded in
//! `original_source/easybuild/tools/modules.py`'s `EnvironmentModulesC`:
//! `COMMAND_SHELL = ['tclsh']`-style invocation and the `VERSION_REGEXP =
//! r'^\s*(VERSION\s*=\s*)?(?P<version>\d\S*)\s*'` version check.
//!
//! Output parsing goes through the same [`protocol`] mini-language as
//! Lmod: both backends are asked for Python-mode output so the adapter
//! never has to special-case `source`-based Tcl evaluation.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use eb_util::process::{run, run_checked, CommandSpec};
use lazy_static::lazy_static;
use regex::Regex;

use crate::model::ModuleId;
use crate::modules::{module_file, protocol, LoadOptions, ModulesTool, QueryCache};

lazy_static! {
    static ref ENV_MODULES_VERSION_RE: Regex =
        Regex::new(r"^\s*(VERSION\s*=\s*)?(?P<version>\d\S*)\s*").unwrap();
}

const MIN_VERSION: (u32, u32) = (4, 1);

pub struct EnvironmentModulesTool {
    binary: PathBuf,
    module_paths: RefCell<Vec<PathBuf>>,
    cache: QueryCache,
}

impl EnvironmentModulesTool {
    pub fn new(binary: impl Into<PathBuf>, initial_paths: Vec<PathBuf>) -> Self {
        EnvironmentModulesTool { binary: binary.into(), module_paths: RefCell::new(initial_paths), cache: QueryCache::default() }
    }

    fn modulepath(&self) -> String {
        self.module_paths
            .borrow()
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":")
    }

    fn invoke(&self, args: &[&str]) -> Result<eb_util::process::CommandResult> {
        let spec = CommandSpec::new(&self.binary)
            .args(args.iter().map(|s| s.to_string()))
            .env("MODULEPATH", self.modulepath());
        run_checked(&spec)
    }
}

impl ModulesTool for EnvironmentModulesTool {
    fn name(&self) -> &'static str {
        "EnvironmentModules"
    }

    fn check_version(&self) -> Result<()> {
        let spec = CommandSpec::new(&self.binary).arg("--version");
        let result = run(&spec)?;
        let combined = format!("{}{}", result.stdout, result.stderr);
        let caps = ENV_MODULES_VERSION_RE
            .captures(&combined)
            .ok_or_else(|| anyhow::anyhow!("could not determine modules tool version from: {combined}"))?;
        let version = &caps["version"];
        let mut parts = version.split('.');
        let major: u32 = parts.next().unwrap_or("0").parse().unwrap_or(0);
        let minor: u32 = parts.next().unwrap_or("0").parse().unwrap_or(0);
        if (major, minor) < MIN_VERSION {
            bail!(
                "Environment Modules version {version} is older than the required {}.{}",
                MIN_VERSION.0,
                MIN_VERSION.1
            );
        }
        Ok(())
    }

    fn available(&self, prefix: Option<&str>) -> Result<Vec<ModuleId>> {
        let modulepath = self.modulepath();
        let key = prefix.unwrap_or("");
        if let Some(cached) = self.cache.get_available(&modulepath, key) {
            return Ok(cached);
        }

        let mut args = vec!["avail"];
        if let Some(prefix) = prefix {
            args.push(prefix);
        }
        let result = self.invoke(&args)?;
        let entries = protocol::parse_available_entries(&result.stderr);
        let modules: Vec<ModuleId> = entries
            .into_iter()
            .filter_map(|(name, _)| name.split_once('/').map(|(n, v)| ModuleId::new(n, v)))
            .collect();
        self.cache.put_available(&modulepath, key, modules.clone());
        Ok(modules)
    }

    fn exist(&self, modules: &[ModuleId]) -> Result<Vec<bool>> {
        let available = self.available(None)?;
        let module_paths = self.module_paths.borrow();
        Ok(modules
            .iter()
            .map(|m| available.contains(m) || module_file::module_wrapper_exists(&module_paths, m))
            .collect())
    }

    fn show(&self, module: &ModuleId) -> Result<String> {
        let modulepath = self.modulepath();
        let key = module.to_string();
        if let Some(cached) = self.cache.get_show(&modulepath, &key) {
            return Ok(cached);
        }
        let result = self.invoke(&["show", &key])?;
        self.cache.put_show(&modulepath, &key, result.stderr.clone());
        Ok(result.stderr)
    }

    fn load(&self, modules: &[ModuleId], opts: &LoadOptions) -> Result<Vec<protocol::Directive>> {
        let mut args = vec!["python".to_string()];
        if opts.purge {
            args.push("purge".to_string());
        }
        args.push("load".to_string());
        args.extend(modules.iter().map(|m| m.to_string()));
        let result = self.invoke(&args.iter().map(|s| s.as_str()).collect::<Vec<_>>())?;
        Ok(protocol::parse_directives(&result.stdout))
    }

    fn unload(&self, modules: &[ModuleId]) -> Result<Vec<protocol::Directive>> {
        let mut args = vec!["python".to_string(), "unload".to_string()];
        args.extend(modules.iter().map(|m| m.to_string()));
        let result = self.invoke(&args.iter().map(|s| s.as_str()).collect::<Vec<_>>())?;
        Ok(protocol::parse_directives(&result.stdout))
    }

    fn purge(&self) -> Result<Vec<protocol::Directive>> {
        let result = self.invoke(&["python", "purge"])?;
        Ok(protocol::parse_directives(&result.stdout))
    }

    fn use_path(&self, path: &Path, priority: Option<i32>) -> Result<()> {
        let mut paths = self.module_paths.borrow_mut();
        let index = priority.unwrap_or(0).max(0) as usize;
        paths.insert(index.min(paths.len()), path.to_path_buf());
        drop(paths);
        self.cache.invalidate();
        Ok(())
    }

    fn unuse_path(&self, path: &Path) -> Result<()> {
        self.module_paths.borrow_mut().retain(|p| p != path);
        self.cache.invalidate();
        Ok(())
    }

    fn get_setenv_value(&self, module: &ModuleId, var: &str) -> Result<Option<String>> {
        let shown = self.show(module)?;
        let needle = format!("setenv\t\t{var}");
        Ok(shown
            .lines()
            .find(|l| l.trim_start().starts_with(&needle))
            .and_then(|l| l.split_whitespace().last().map(|s| s.to_string())))
    }

    fn modpath_extensions_for(&self, modules: &[ModuleId]) -> Result<Vec<(ModuleId, Vec<PathBuf>)>> {
        let mut out = Vec::new();
        for module in modules {
            let text = self.show(module)?;
            out.push((module.clone(), crate::modules::module_file::parse_modpath_extensions(&text)));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fake_binary(dir: &tempfile::TempDir, script: &str) -> PathBuf {
        let path = dir.path().join("fake-modulecmd");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh\n{script}").unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn check_version_accepts_modern_release() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_binary(&dir, "echo 'VERSION = 4.7.1'");
        let tool = EnvironmentModulesTool::new(bin, vec![]);
        assert!(tool.check_version().is_ok());
    }

    #[test]
    fn purge_parses_unset_directives() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_binary(&dir, "echo \"del os.environ['EBROOTTOY']\"");
        let tool = EnvironmentModulesTool::new(bin, vec![]);
        let directives = tool.purge().unwrap();
        assert_eq!(directives, vec![protocol::Directive::UnsetEnv { key: "EBROOTTOY".to_string() }]);
    }

    #[test]
    fn use_path_with_out_of_range_priority_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_binary(&dir, "true");
        let tool = EnvironmentModulesTool::new(bin, vec![]);
        tool.use_path(Path::new("/opt/modules/all"), Some(5)).unwrap();
        assert_eq!(tool.modulepath(), "/opt/modules/all");
    }

    #[test]
    fn available_is_cached_until_modulepath_changes() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("calls");
        let bin = fake_binary(
            &dir,
            &format!("echo -n x >> {}\nwc -c < {} 1>&2", counter.display(), counter.display()),
        );
        let tool = EnvironmentModulesTool::new(bin, vec![]);

        let first = tool.available(None).unwrap();
        let calls_after_first = std::fs::read_to_string(&counter).unwrap().len();
        let second = tool.available(None).unwrap();
        let calls_after_second = std::fs::read_to_string(&counter).unwrap().len();
        assert_eq!(first, second);
        assert_eq!(calls_after_first, calls_after_second, "second available() should be served from cache");

        tool.use_path(Path::new("/opt/modules/all"), None).unwrap();
        tool.available(None).unwrap();
        let calls_after_invalidate = std::fs::read_to_string(&counter).unwrap().len();
        assert!(calls_after_invalidate > calls_after_second, "use_path() should invalidate the cache");
    }
}
