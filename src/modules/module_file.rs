//! Module-file text inspection: `modpath_extensions_for` and
//! `path_to_top_of_module_tree`, grounded in
//! `original_source/easybuild/tools/modules.py`'s same-named methods.
//!
//! These operate on the *text* of rendered module files rather than on a
//! live backend invocation, since both Tcl and Lua module files are just
//! text the backend would otherwise `source`/`require` — parsing them
//! directly avoids a second subprocess round trip per candidate module.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;

use crate::model::ModuleId;
use crate::modules::ModulesTool;

lazy_static! {
    static ref TCL_MODULE_USE_RE: Regex = Regex::new(r#"^\s*module\s+use\s+(?P<path>\S+)"#).unwrap();
    static ref TCL_PREPEND_PATH_RE: Regex =
        Regex::new(r#"^\s*prepend-path\s+MODULEPATH\s+(?P<path>\S+)"#).unwrap();
    static ref LUA_PREPEND_PATH_RE: Regex =
        Regex::new(r#"prepend_path\s*\(\s*"MODULEPATH"\s*,\s*(?P<path>[^)]+)\)"#).unwrap();
    static ref TCL_ENV_VAR_RE: Regex = Regex::new(r#"\$env\((?P<var>\w+)\)"#).unwrap();
    static ref LUA_GETENV_RE: Regex = Regex::new(r#"os\.getenv\(\s*"(?P<var>\w+)"\s*\)"#).unwrap();
    static ref TCL_FILE_JOIN_RE: Regex = Regex::new(r#"\[file\s+join\s+(?P<args>[^\]]+)\]"#).unwrap();
    static ref LUA_PATHJOIN_RE: Regex = Regex::new(r#"pathJoin\(\s*(?P<args>[^)]+)\)"#).unwrap();
}

/// Extract the set of paths a module file would add to `MODULEPATH` if
/// loaded, without actually invoking the modules backend.
pub fn parse_modpath_extensions(module_file_text: &str) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for line in module_file_text.lines() {
        let raw = TCL_MODULE_USE_RE
            .captures(line)
            .or_else(|| TCL_PREPEND_PATH_RE.captures(line))
            .map(|c| c["path"].to_string())
            .or_else(|| LUA_PREPEND_PATH_RE.captures(line).map(|c| c["path"].trim().to_string()));

        if let Some(raw) = raw {
            paths.push(PathBuf::from(expand_module_path_expr(&raw)));
        }
    }
    paths
}

/// Expand `$env(X)`/`os.getenv("X")` substitutions and flatten `[file join
/// a b]`/`pathJoin(a, b)` into a plain path literal.
fn expand_module_path_expr(raw: &str) -> String {
    let mut expr = raw.trim().trim_matches('"').to_string();

    if let Some(caps) = TCL_FILE_JOIN_RE.captures(&expr) {
        let args = caps["args"].to_string();
        let joined = args
            .split_whitespace()
            .map(|part| expand_module_path_expr(part))
            .collect::<Vec<_>>()
            .join("/");
        expr = joined;
    } else if let Some(caps) = LUA_PATHJOIN_RE.captures(&expr) {
        let args = caps["args"].to_string();
        let joined = args
            .split(',')
            .map(|part| expand_module_path_expr(part.trim()))
            .collect::<Vec<_>>()
            .join("/");
        expr = joined;
    }

    let expr = TCL_ENV_VAR_RE
        .replace_all(&expr, |caps: &regex::Captures| env::var(&caps["var"]).unwrap_or_default())
        .into_owned();
    LUA_GETENV_RE
        .replace_all(&expr, |caps: &regex::Captures| env::var(&caps["var"]).unwrap_or_default())
        .into_owned()
        .trim_matches('"')
        .to_string()
}

/// Scan `.modulerc`/`.modulerc.lua` under each module path for a wrapper
/// (alias) definition naming `module`, grounded in
/// `original_source/easybuild/tools/modules.py`'s `module_wrapper_exists`:
/// Tcl syntax is `module-version <wrapped> <this>`, Lua syntax is
/// `module_version("<wrapped>", "<this>")`. `exist()` must treat either as
/// proof the module is available even when it doesn't show up in `module
/// avail` output directly (§4.3).
pub fn module_wrapper_exists(module_paths: &[PathBuf], module: &ModuleId) -> bool {
    let full_name = module.to_string();
    let (mod_dir, basename) = match full_name.rsplit_once('/') {
        Some((dir, base)) => (dir, base),
        None => ("", full_name.as_str()),
    };
    let escaped = regex::escape(basename);
    let lua_re = match Regex::new(&format!(r#"^module_version\("(?P<wrapped_mod>.*)",\s*"{escaped}"\)$"#)) {
        Ok(re) => re,
        Err(_) => return false,
    };
    let tcl_re = match Regex::new(&format!(r#"^[ ]*module-version (?P<wrapped_mod>[^ ]*) {escaped}$"#)) {
        Ok(re) => re,
        Err(_) => return false,
    };

    for root in module_paths {
        let dir = if mod_dir.is_empty() { root.clone() } else { root.join(mod_dir) };
        for (filename, re) in [(".modulerc.lua", &lua_re), (".modulerc", &tcl_re)] {
            let candidate = dir.join(filename);
            if let Ok(text) = std::fs::read_to_string(&candidate) {
                if text.lines().any(|line| re.is_match(line.trim_end())) {
                    return true;
                }
            }
        }
    }
    false
}

/// Resolve the chain of modules that must be loaded, in order, to make
/// `subdir` appear on `MODULEPATH`, given the paths already visible
/// (`init_paths`) and the list of candidate dependency modules in
/// declaration order.
pub fn path_to_top_of_module_tree<T: ModulesTool + ?Sized>(
    tool: &T,
    init_paths: &[PathBuf],
    _module: &ModuleId,
    subdir: &Path,
    deps: &[ModuleId],
) -> Result<Vec<ModuleId>> {
    if init_paths.iter().any(|p| p == subdir) {
        return Ok(Vec::new());
    }

    let mut visible: Vec<PathBuf> = init_paths.to_vec();
    let mut chain = Vec::new();

    for dep in deps {
        let extensions = tool.modpath_extensions_for(std::slice::from_ref(dep))?;
        for (_, paths) in extensions {
            if paths.iter().any(|p| p == subdir) {
                chain.push(dep.clone());
                return Ok(chain);
            }
            visible.extend(paths);
        }
        chain.push(dep.clone());
        if visible.iter().any(|p| p == subdir) {
            return Ok(chain);
        }
    }

    Ok(chain)
}
