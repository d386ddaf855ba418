//! `ec -> (subdir, short_name)` where subdir is `Core`,
//! `Compiler/<comp>/<ver>`, or `MPI/<comp>/<ver>/<mpi>/<ver>` depending on
//! the easyconfig's toolchain class (§4.8).

use std::path::PathBuf;

use crate::mns::{classify_toolchain, ModuleNamingScheme, ToolchainClass};
use crate::model::Easyconfig;

pub struct HierarchicalMns;

impl HierarchicalMns {
    fn subdir(&self, ec: &Easyconfig) -> PathBuf {
        match classify_toolchain(ec) {
            ToolchainClass::System => PathBuf::from("Core"),
            ToolchainClass::Compiler => {
                PathBuf::from(format!("Compiler/{}/{}", ec.toolchain.name, ec.toolchain.version))
            }
            ToolchainClass::Mpi => PathBuf::from(format!("MPI/{}/{}", ec.toolchain.name, ec.toolchain.version)),
        }
    }
}

impl ModuleNamingScheme for HierarchicalMns {
    fn name(&self) -> &'static str {
        "HierarchicalMNS"
    }

    fn det_full_module_name(&self, ec: &Easyconfig) -> String {
        ec.module_id().to_string()
    }

    fn det_install_subdir(&self, ec: &Easyconfig) -> PathBuf {
        self.subdir(ec).join(&ec.name).join(ec.full_version())
    }

    fn det_modpath_extensions(&self, ec: &Easyconfig) -> Vec<PathBuf> {
        match classify_toolchain(ec) {
            ToolchainClass::System => Vec::new(),
            ToolchainClass::Compiler => vec![PathBuf::from(format!("Compiler/{}/{}", ec.name, ec.full_version()))],
            ToolchainClass::Mpi => vec![PathBuf::from(format!("MPI/{}/{}/{}/{}", ec.toolchain.name, ec.toolchain.version, ec.name, ec.full_version()))],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SanityCheckPaths, Toolchain};
    use std::collections::BTreeMap;

    fn ec(toolchain: Toolchain) -> Easyconfig {
        Easyconfig {
            name: "OpenMPI".to_string(),
            version: "4.0.3".to_string(),
            version_suffix: String::new(),
            toolchain,
            homepage: String::new(),
            description: String::new(),
            source_urls: vec![],
            sources: vec![],
            patches: vec![],
            checksums: vec![],
            dependencies: vec![],
            build_dependencies: vec![],
            ext_list: vec![],
            module_class: "mpi".to_string(),
            sanity_check_paths: SanityCheckPaths::default(),
            sanity_check_commands: vec![],
            easyblock: None,
            custom: BTreeMap::new(),
            stop: None,
            source_path: None,
        }
    }

    #[test]
    fn places_system_toolchain_ec_under_core() {
        let mns = HierarchicalMns;
        assert_eq!(mns.det_install_subdir(&ec(Toolchain::system())), PathBuf::from("Core/OpenMPI/4.0.3"));
    }

    #[test]
    fn places_mpi_toolchain_ec_under_mpi_tier() {
        let mns = HierarchicalMns;
        let tc = Toolchain { name: "foss".to_string(), version: "2020a".to_string() };
        assert_eq!(
            mns.det_install_subdir(&ec(tc)),
            PathBuf::from("MPI/foss/2020a/OpenMPI/4.0.3")
        );
    }
}
