//! RPATH wrapper argv rewriting.
//!
//! Ported from EasyBuild's `rpath_args.py` helper: for every `-L<abs>` in a
//! linker invocation's argument list, inject a matching `-Wl,-rpath=<abs>`
//! (or a bare `-rpath=<abs>` when the command being wrapped is `ld` itself),
//! exactly once per distinct real path. `--enable-new-dtags` is rewritten to
//! `--disable-new-dtags` so RUNPATH doesn't silently reintroduce
//! `$LD_LIBRARY_PATH` lookup. No rpath args are injected at all when the
//! command is being invoked just to report its version, or when `-x
//! c-header`/`-x c++-header` mean no linking is actually happening.
use std::path::{Path, PathBuf};

const VERSION_CHECK_FLAGS: &[&str] = &["-v", "-V", "--version", "-dumpversion"];
const HEADER_ONLY_MODES: &[&str] = &["c-header", "c++-header"];

/// Command names that take a bare `-rpath=` rather than `-Wl,-rpath=`.
const LINKER_COMMANDS: &[&str] = &["ld", "ld.gold", "ld.bfd"];

pub struct RpathRewrite {
    pub filter: Option<regex::Regex>,
    pub include: Vec<String>,
    pub library_path: Vec<PathBuf>,
}

/// Rewrite `args` (the command name is not included) to inject rpath flags.
///
/// `cmd` is the base name of the wrapped command, used to decide between
/// the `-Wl,-rpath=` and bare `-rpath=` flag spelling. `library_path` holds
/// the paths from `$LIBRARY_PATH`, each of which also gets an rpath entry
/// unless already covered by a `-L` in `args`.
pub fn rewrite_rpath_args(cmd: &str, args: &[String], rewrite: &RpathRewrite) -> Vec<String> {
    let flag_prefix = if LINKER_COMMANDS.contains(&cmd) { "" } else { "-Wl," };

    let mut add_rpath_args = true;
    let mut cmd_args: Vec<String> = Vec::new();
    let mut cmd_args_rpath: Vec<String> = Vec::new();
    let mut rpath_lib_paths: Vec<PathBuf> = Vec::new();

    let mut idx = 0usize;
    while idx < args.len() {
        let arg = &args[idx];

        if VERSION_CHECK_FLAGS.contains(&arg.as_str()) {
            add_rpath_args = false;
            cmd_args.push(arg.clone());
        } else if arg == "-x" {
            if let Some(next) = args.get(idx + 1) {
                if HEADER_ONLY_MODES.contains(&next.as_str()) {
                    add_rpath_args = false;
                }
            }
            cmd_args.push(arg.clone());
        } else if let Some(rest) = arg.strip_prefix("-L") {
            let lib_path = if rest.is_empty() {
                idx += 1;
                args.get(idx).cloned().unwrap_or_default()
            } else {
                rest.to_string()
            };

            let path = Path::new(&lib_path);
            if !lib_path.is_empty()
                && path.is_absolute()
                && !rewrite.filter.as_ref().is_some_and(|re| re.is_match(&lib_path))
                && is_new_existing_path(path, &rpath_lib_paths)
            {
                rpath_lib_paths.push(path.to_path_buf());
                cmd_args_rpath.push(format!("{flag_prefix}-rpath={lib_path}"));
            }
            cmd_args.push(format!("-L{lib_path}"));
        } else if arg == &format!("{flag_prefix}--enable-new-dtags") {
            cmd_args.push(format!("{flag_prefix}--disable-new-dtags"));
        } else {
            cmd_args.push(arg.clone());
        }

        idx += 1;
    }

    for lib_path in &rewrite.library_path {
        let lib_path_str = lib_path.to_string_lossy().to_string();
        if lib_path.is_absolute()
            && !rewrite.filter.as_ref().is_some_and(|re| re.is_match(&lib_path_str))
            && is_new_existing_path(lib_path, &rpath_lib_paths)
        {
            rpath_lib_paths.push(lib_path.clone());
            cmd_args_rpath.push(format!("{flag_prefix}-rpath={lib_path_str}"));
        }
    }

    if add_rpath_args {
        cmd_args_rpath.insert(0, format!("{flag_prefix}--disable-new-dtags"));
        let mut included: Vec<String> = rewrite
            .include
            .iter()
            .map(|inc| format!("{flag_prefix}-rpath={inc}"))
            .collect();
        included.extend(cmd_args_rpath);
        let mut out = included;
        out.extend(cmd_args);
        out
    } else {
        cmd_args
    }
}

/// True if `new_path` exists on disk and is not the same file as any entry
/// already in `paths` (comparing by realpath, not string equality).
fn is_new_existing_path(new_path: &Path, paths: &[PathBuf]) -> bool {
    if !new_path.exists() {
        return false;
    }
    !paths.iter().any(|p| p.exists() && same_file::is_same_file(new_path, p).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rw() -> RpathRewrite {
        RpathRewrite { filter: None, include: Vec::new(), library_path: Vec::new() }
    }

    #[test]
    fn injects_rpath_once_per_distinct_path() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib");
        std::fs::create_dir(&lib).unwrap();
        let lib_str = lib.to_string_lossy().to_string();

        let args = vec![format!("-L{lib_str}"), format!("-L{lib_str}"), "-lfoo".to_string()];
        let out = rewrite_rpath_args("cc", &args, &rw());

        let rpath_flag = format!("-Wl,-rpath={lib_str}");
        assert_eq!(out.iter().filter(|a| **a == rpath_flag).count(), 1);
        assert_eq!(out.iter().filter(|a| **a == format!("-L{lib_str}")).count(), 2);
    }

    #[test]
    fn suppressed_in_version_check_mode() {
        let out = rewrite_rpath_args("cc", &["--version".to_string()], &rw());
        assert!(out.iter().all(|a| !a.contains("-rpath")));
    }

    #[test]
    fn suppressed_for_header_only_compilation() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib");
        std::fs::create_dir(&lib).unwrap();
        let lib_str = lib.to_string_lossy().to_string();
        let args = vec!["-x".to_string(), "c++-header".to_string(), format!("-L{lib_str}")];
        let out = rewrite_rpath_args("cc", &args, &rw());
        assert!(out.iter().all(|a| !a.contains("-rpath")));
    }

    #[test]
    fn ld_uses_bare_rpath_flag() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib");
        std::fs::create_dir(&lib).unwrap();
        let lib_str = lib.to_string_lossy().to_string();
        let out = rewrite_rpath_args("ld", &[format!("-L{lib_str}")], &rw());
        assert!(out.contains(&format!("-rpath={lib_str}")));
    }

    #[test]
    fn rewrites_enable_new_dtags() {
        let out = rewrite_rpath_args("cc", &["-Wl,--enable-new-dtags".to_string()], &rw());
        assert!(out.contains(&"-Wl,--disable-new-dtags".to_string()));
        assert!(!out.contains(&"-Wl,--enable-new-dtags".to_string()));
    }
}
