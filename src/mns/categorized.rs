//! The hierarchical scheme with an extra module-class segment inserted
//! ahead of the toolchain tier (§4.8).

use std::path::PathBuf;

use crate::mns::hierarchical::HierarchicalMns;
use crate::mns::ModuleNamingScheme;
use crate::model::Easyconfig;

pub struct CategorizedHierarchicalMns;

impl ModuleNamingScheme for CategorizedHierarchicalMns {
    fn name(&self) -> &'static str {
        "CategorizedHierarchicalMNS"
    }

    fn det_full_module_name(&self, ec: &Easyconfig) -> String {
        ec.module_id().to_string()
    }

    fn det_install_subdir(&self, ec: &Easyconfig) -> PathBuf {
        PathBuf::from(&ec.module_class).join(HierarchicalMns.det_install_subdir(ec))
    }

    fn det_modpath_extensions(&self, ec: &Easyconfig) -> Vec<PathBuf> {
        HierarchicalMns
            .det_modpath_extensions(ec)
            .into_iter()
            .map(|p| PathBuf::from(&ec.module_class).join(p))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SanityCheckPaths, Toolchain};
    use std::collections::BTreeMap;

    #[test]
    fn inserts_module_class_ahead_of_toolchain_tier() {
        let ec = Easyconfig {
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
        };
        let mns = CategorizedHierarchicalMns;
        assert_eq!(mns.det_install_subdir(&ec), PathBuf::from("tools/Core/toy/0.0"));
    }
}
