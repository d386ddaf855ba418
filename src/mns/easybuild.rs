//! The default scheme: `ec -> "<name>/<full_version>"`, grounded in §4.8.

use std::path::PathBuf;

use crate::mns::ModuleNamingScheme;
use crate::model::Easyconfig;

pub struct EasyBuildMns;

impl ModuleNamingScheme for EasyBuildMns {
    fn name(&self) -> &'static str {
        "EasyBuildMNS"
    }

    fn det_full_module_name(&self, ec: &Easyconfig) -> String {
        ec.module_id().to_string()
    }

    fn det_install_subdir(&self, ec: &Easyconfig) -> PathBuf {
        PathBuf::from(self.det_full_module_name(ec))
    }

    fn det_modpath_extensions(&self, _ec: &Easyconfig) -> Vec<PathBuf> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SanityCheckPaths, Toolchain};
    use std::collections::BTreeMap;

    fn ec() -> Easyconfig {
        Easyconfig {
            name: "toy".to_string(),
            version: "0.0".to_string(),
            version_suffix: String::new(),
            toolchain: Toolchain::system(),
            homepage: String::new(),
            description: String::new(),
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
    fn full_module_name_is_name_slash_version() {
        let mns = EasyBuildMns;
        assert_eq!(mns.det_full_module_name(&ec()), "toy/0.0");
        assert!(mns.is_short_modname_for("toy", "toy/0.0"));
        assert!(!mns.is_short_modname_for("toyz", "toy/0.0"));
    }
}
