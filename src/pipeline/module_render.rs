//! Module file text generation for the MODULE step (§4.6).
//!
//! Kept as a pure `Easyconfig -> String` function, the same "build a text
//! artifact from a typed record" shape [`crate::env::Env::write_changes_script`]
//! already uses, rather than writing directly to disk from inside it —
//! easier to unit test, and it keeps the pipeline in charge of where the
//! result lands.

use std::path::Path;

use crate::config::ModuleSyntax;
use crate::model::{Easyconfig, ModuleId};

/// Standard search-path variables every module prepends an install-relative
/// directory onto, in the order EasyBuild lists them (§6 "MODULE").
const STANDARD_PATHS: &[(&str, &str)] = &[
    ("PATH", "bin"),
    ("LD_LIBRARY_PATH", "lib"),
    ("LIBRARY_PATH", "lib"),
    ("CPATH", "include"),
    ("MANPATH", "share/man"),
    ("PKG_CONFIG_PATH", "lib/pkgconfig"),
    ("XDG_DATA_DIRS", "share"),
    ("ACLOCAL_PATH", "share/aclocal"),
    ("CMAKE_PREFIX_PATH", "."),
];

fn env_name(ec_name: &str, prefix: &str) -> String {
    format!("{prefix}{}", ec_name.to_uppercase().replace(['-', '+', '.'], "_"))
}

/// Render the module file text for `ec`, installed at `install_dir`, with
/// `deps` loaded alongside it. `header`/`footer` are configured free text
/// appended verbatim (`modextrapaths`/`modloadmsg`-style customisation is
/// out of scope; the hook is the two string slices).
pub fn render_module(
    ec: &Easyconfig,
    install_dir: &Path,
    deps: &[ModuleId],
    syntax: ModuleSyntax,
    recursive_unload: bool,
    header: &str,
    footer: &str,
) -> String {
    match syntax {
        ModuleSyntax::Tcl => render_tcl(ec, install_dir, deps, recursive_unload, header, footer),
        ModuleSyntax::Lua => render_lua(ec, install_dir, deps, recursive_unload, header, footer),
    }
}

fn render_tcl(
    ec: &Easyconfig,
    install_dir: &Path,
    deps: &[ModuleId],
    recursive_unload: bool,
    header: &str,
    footer: &str,
) -> String {
    let root = install_dir.display();
    let ebroot = env_name(&ec.name, "EBROOT");
    let ebversion = env_name(&ec.name, "EBVERSION");
    let mut out = String::new();
    out.push_str("#%Module1.0\n");
    out.push_str(&format!("## {}\n", ec.module_id()));
    out.push_str(&format!("proc ModulesHelp {{ }} {{\n    puts stderr {{{}}}\n}}\n", ec.description));
    out.push_str(&format!("module-whatis {{{}}}\n\n", ec.description));
    if !header.is_empty() {
        out.push_str(header);
        out.push('\n');
    }
    out.push_str(&format!("set root {root}\n\n"));
    out.push_str(&format!("conflict {}\n\n", ec.name));

    if recursive_unload {
        out.push_str("if { [ is-loaded ] } {\n    module-verbosity\n}\n");
    }
    for dep in deps {
        if recursive_unload {
            out.push_str(&format!("if {{ ![is-loaded {dep}] }} {{\n    module load {dep}\n}}\n"));
        } else {
            out.push_str(&format!("module load {dep}\n"));
        }
    }
    out.push('\n');

    out.push_str(&format!("setenv {ebroot} \"$root\"\n"));
    out.push_str(&format!("setenv {ebversion} \"{}\"\n\n", ec.full_version()));

    for (var, subdir) in STANDARD_PATHS {
        out.push_str(&format!("prepend-path {var} \"$root/{subdir}\"\n"));
    }

    if !footer.is_empty() {
        out.push('\n');
        out.push_str(footer);
        out.push('\n');
    }
    out
}

fn render_lua(
    ec: &Easyconfig,
    install_dir: &Path,
    deps: &[ModuleId],
    recursive_unload: bool,
    header: &str,
    footer: &str,
) -> String {
    let root = install_dir.display();
    let ebroot = env_name(&ec.name, "EBROOT");
    let ebversion = env_name(&ec.name, "EBVERSION");
    let mut out = String::new();
    out.push_str(&format!("help([[{}]])\n", ec.description));
    out.push_str(&format!("whatis(\"{}\")\n\n", ec.description));
    if !header.is_empty() {
        out.push_str(header);
        out.push('\n');
    }
    out.push_str(&format!("local root = \"{root}\"\n\n"));
    out.push_str(&format!("conflict(\"{}\")\n\n", ec.name));

    for dep in deps {
        if recursive_unload {
            out.push_str(&format!("if not isloaded(\"{dep}\") then\n    load(\"{dep}\")\nend\n"));
        } else {
            out.push_str(&format!("load(\"{dep}\")\n"));
        }
    }
    out.push('\n');

    out.push_str(&format!("setenv(\"{ebroot}\", root)\n"));
    out.push_str(&format!("setenv(\"{ebversion}\", \"{}\")\n\n", ec.full_version()));

    for (var, subdir) in STANDARD_PATHS {
        out.push_str(&format!("prepend_path(\"{var}\", pathJoin(root, \"{subdir}\"))\n"));
    }

    if !footer.is_empty() {
        out.push('\n');
        out.push_str(footer);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SanityCheckPaths, Toolchain};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn ec() -> Easyconfig {
        Easyconfig {
            name: "toy".to_string(),
            version: "0.0".to_string(),
            version_suffix: String::new(),
            toolchain: Toolchain::system(),
            homepage: String::new(),
            description: "a toy package".to_string(),
            source_urls: vec![],
            sources: vec![],
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
    fn tcl_module_sets_ebroot_and_prepends_path() {
        let text = render_tcl(&ec(), &PathBuf::from("/opt/toy/0.0"), &[], false, "", "");
        assert!(text.contains("setenv EBROOTTOY \"$root\""));
        assert!(text.contains("prepend-path PATH \"$root/bin\""));
    }

    #[test]
    fn lua_module_guards_dependency_load_under_recursive_unload() {
        let dep = ModuleId::new("zlib", "1.2.11");
        let text = render_lua(&ec(), &PathBuf::from("/opt/toy/0.0"), &[dep], true, "", "");
        assert!(text.contains("if not isloaded(\"zlib/1.2.11\") then"));
    }

    #[test]
    fn renders_configured_header_and_footer() {
        let text = render_tcl(&ec(), &PathBuf::from("/opt/toy/0.0"), &[], false, "# header line", "# footer line");
        assert!(text.contains("# header line"));
        assert!(text.contains("# footer line"));
    }
}
