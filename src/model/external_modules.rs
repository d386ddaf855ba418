//! INI-style external-modules metadata store (§4.4 "External modules
//! metadata" / §6 `EXTERNAL_MODULE` dependency resolution).
//!
//! Section headers are module ids (`[OpenMPI/4.1.1]`); each section's
//! `name`/`version`/`prefix` keys describe what that external module
//! actually provides, so the resolver can satisfy an `EXTERNAL_MODULE`
//! dependency without building anything.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

const KNOWN_KEYS: &[&str] = &["name", "version", "prefix"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalModuleInfo {
    pub names: Vec<String>,
    pub versions: Vec<String>,
    /// Either a literal filesystem path or the name of an environment
    /// variable that holds one, per the format's "path literal or env-var
    /// name" rule; resolving that ambiguity is left to the environment
    /// manager, which is the only component that knows the current process
    /// environment.
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExternalModulesMetadata {
    modules: BTreeMap<String, ExternalModuleInfo>,
}

impl ExternalModulesMetadata {
    pub fn get(&self, module_id: &str) -> Option<&ExternalModuleInfo> {
        self.modules.get(module_id)
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Merge `other` into `self`; later entries for an already-seen module
    /// id win, matching the layered-config-file resolution order the
    /// orchestrator uses when several metadata files are configured.
    pub fn merge(&mut self, other: ExternalModulesMetadata) {
        self.modules.extend(other.modules);
    }

    pub fn load_file(path: &Path) -> Result<ExternalModulesMetadata> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read external modules metadata {}", path.display()))?;
        parse(&text).with_context(|| format!("invalid external modules metadata {}", path.display()))
    }
}

/// Parse the INI text itself; split out from [`ExternalModulesMetadata::load_file`]
/// so tests don't need a filesystem fixture.
pub fn parse(text: &str) -> Result<ExternalModulesMetadata> {
    let mut modules = BTreeMap::new();
    let mut current_id: Option<String> = None;
    let mut current = ExternalModuleInfo::default();

    let flush = |id: &Option<String>, info: ExternalModuleInfo, modules: &mut BTreeMap<String, ExternalModuleInfo>| -> Result<()> {
        if let Some(id) = id {
            validate_entry(id, &info)?;
            modules.insert(id.clone(), info);
        }
        Ok(())
    };

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.split(';').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            flush(&current_id, std::mem::take(&mut current), &mut modules)?;
            current_id = Some(line[1..line.len() - 1].trim().to_string());
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            bail!("line {}: expected 'key = value', got '{line}'", lineno + 1);
        };
        let key = key.trim();
        let value = value.trim();

        if current_id.is_none() {
            bail!("line {}: key '{key}' outside of any [module] section", lineno + 1);
        }
        if !KNOWN_KEYS.contains(&key) {
            bail!("line {}: unknown key '{key}' in external modules metadata", lineno + 1);
        }

        match key {
            "name" => current.names = split_csv(value),
            "version" => current.versions = split_csv(value),
            "prefix" => current.prefix = Some(value.to_string()),
            _ => unreachable!(),
        }
    }
    flush(&current_id, current, &mut modules)?;

    Ok(ExternalModulesMetadata { modules })
}

fn validate_entry(id: &str, info: &ExternalModuleInfo) -> Result<()> {
    if !info.versions.is_empty() && info.versions.len() != info.names.len() {
        bail!(
            "external module '{id}': version list has {} entries but name list has {}",
            info.versions.len(),
            info.names.len()
        );
    }
    Ok(())
}

fn split_csv(value: &str) -> Vec<String> {
    value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_with_comma_lists() {
        let text = "[OpenMPI/4.1.1]\nname = OpenMPI\nversion = 4.1.1\nprefix = /opt/openmpi\n";
        let meta = parse(text).unwrap();
        let entry = meta.get("OpenMPI/4.1.1").unwrap();
        assert_eq!(entry.names, vec!["OpenMPI".to_string()]);
        assert_eq!(entry.prefix.as_deref(), Some("/opt/openmpi"));
    }

    #[test]
    fn rejects_unknown_keys() {
        let text = "[Foo/1.0]\nbogus = true\n";
        assert!(parse(text).is_err());
    }

    #[test]
    fn rejects_mismatched_name_version_lengths() {
        let text = "[Foo/1.0]\nname = a, b\nversion = 1.0\n";
        assert!(parse(text).is_err());
    }

    #[test]
    fn merge_prefers_later_metadata_file() {
        let mut base = parse("[Foo/1.0]\nprefix = /first\n").unwrap();
        let overlay = parse("[Foo/1.0]\nprefix = /second\n").unwrap();
        base.merge(overlay);
        assert_eq!(base.get("Foo/1.0").unwrap().prefix.as_deref(), Some("/second"));
    }
}
