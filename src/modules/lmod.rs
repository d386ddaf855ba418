//! Lmod backend, grounded in `original_source/easybuild/tools/modules.py`'s
//! `Lmod` subclass: native Lua modules, `--version` regex
//! `Modules based on Lua: Version (?P<version>\d\S*)`, Python-mode output
//! for load/unload/purge.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use eb_util::process::{run, run_checked, CommandSpec};
use lazy_static::lazy_static;
use regex::Regex;

use crate::model::ModuleId;
use crate::modules::{module_file, protocol, LoadOptions, ModulesTool, QueryCache};

lazy_static! {
    static ref LMOD_VERSION_RE: Regex =
        Regex::new(r"^Modules\s+based\s+on\s+Lua:\s+Version\s+(?P<version>\d\S*)\s").unwrap();
}

const MIN_LMOD_VERSION: (u32, u32) = (6, 5);

pub struct LmodTool {
    binary: PathBuf,
    module_paths: RefCell<Vec<PathBuf>>,
    cache: QueryCache,
}

impl LmodTool {
    pub fn new(binary: impl Into<PathBuf>, initial_paths: Vec<PathBuf>) -> Self {
        LmodTool { binary: binary.into(), module_paths: RefCell::new(initial_paths), cache: QueryCache::default() }
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

    fn modules_args(modules: &[ModuleId]) -> Vec<String> {
        modules.iter().map(|m| m.to_string()).collect()
    }
}

impl ModulesTool for LmodTool {
    fn name(&self) -> &'static str {
        "Lmod"
    }

    fn check_version(&self) -> Result<()> {
        let spec = CommandSpec::new(&self.binary).arg("--version");
        let result = run(&spec)?;
        let combined = format!("{}{}", result.stdout, result.stderr);
        let caps = LMOD_VERSION_RE
            .captures(&combined)
            .ok_or_else(|| anyhow::anyhow!("could not determine Lmod version from: {combined}"))?;
        let version = &caps["version"];
        let mut parts = version.split('.');
        let major: u32 = parts.next().unwrap_or("0").parse().unwrap_or(0);
        let minor: u32 = parts.next().unwrap_or("0").parse().unwrap_or(0);
        if (major, minor) < MIN_LMOD_VERSION {
            bail!("Lmod version {version} is older than the required {}.{}", MIN_LMOD_VERSION.0, MIN_LMOD_VERSION.1);
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
        args.extend(Self::modules_args(modules));
        let result = self.invoke(&args.iter().map(|s| s.as_str()).collect::<Vec<_>>())?;
        Ok(protocol::parse_directives(&result.stdout))
    }

    fn unload(&self, modules: &[ModuleId]) -> Result<Vec<protocol::Directive>> {
        let mut args = vec!["python".to_string(), "unload".to_string()];
        args.extend(Self::modules_args(modules));
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
        let needle = format!("setenv(\"{var}\",");
        Ok(shown.lines().find(|l| l.contains(&needle)).and_then(|l| {
            l.split(',').nth(1).map(|v| v.trim().trim_end_matches(')').trim_matches('"').to_string())
        }))
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

    /// Writes a fake `lmod` executable (a shell script) that echoes canned
    /// output, so the adapter's invocation/parsing pipeline can be tested
    /// without a real Lmod install.
    fn fake_binary(dir: &tempfile::TempDir, script: &str) -> PathBuf {
        let path = dir.path().join("fake-lmod");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh\n{script}").unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn load_parses_python_mode_output() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_binary(&dir, "echo \"os.environ['EBROOTTOY'] = '/opt/toy/0.0'\"");
        let tool = LmodTool::new(bin, vec![]);
        let directives = tool.load(&[ModuleId::new("toy", "0.0")], &LoadOptions::default()).unwrap();
        assert_eq!(
            directives,
            vec![protocol::Directive::SetEnv { key: "EBROOTTOY".to_string(), value: "/opt/toy/0.0".to_string() }]
        );
    }

    #[test]
    fn check_version_rejects_too_old_lmod() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_binary(&dir, "echo 'Modules based on Lua: Version 6.0.1  2018-03-14 10:47 -05:00'");
        let tool = LmodTool::new(bin, vec![]);
        assert!(tool.check_version().is_err());
    }

    #[test]
    fn use_path_and_unuse_path_track_module_path() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_binary(&dir, "true");
        let tool = LmodTool::new(bin, vec![]);
        tool.use_path(Path::new("/opt/modules/all"), None).unwrap();
        assert_eq!(tool.modulepath(), "/opt/modules/all");
        tool.unuse_path(Path::new("/opt/modules/all")).unwrap();
        assert_eq!(tool.modulepath(), "");
    }

    #[test]
    fn use_path_with_out_of_range_priority_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_binary(&dir, "true");
        let tool = LmodTool::new(bin, vec![]);
        tool.use_path(Path::new("/opt/modules/all"), Some(5)).unwrap();
        assert_eq!(tool.modulepath(), "/opt/modules/all");
    }

    #[test]
    fn show_is_cached_until_modulepath_changes() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("calls");
        let bin = fake_binary(
            &dir,
            &format!("echo -n x >> {}\nwc -c < {} 1>&2", counter.display(), counter.display()),
        );
        let tool = LmodTool::new(bin, vec![]);
        let module = ModuleId::new("toy", "0.0");

        let first = tool.show(&module).unwrap();
        let second = tool.show(&module).unwrap();
        assert_eq!(first.trim(), second.trim(), "second show() should be served from cache");

        tool.use_path(Path::new("/opt/modules/all"), None).unwrap();
        let third = tool.show(&module).unwrap();
        assert_ne!(third.trim(), second.trim(), "use_path() should invalidate the cache");
    }
}
