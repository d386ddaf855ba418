//! Template resolution: `Raw -> Resolved`.
//!
//! Upstream treats "templating enabled" as a mutable flag on the easyconfig
//! object itself, flipped on partway through parsing (see DESIGN NOTES §9).
//! Here it is a pure function: [`generate_template_values`] takes an
//! immutable [`RawEasyconfig`] and produces a fully-resolved [`Easyconfig`],
//! substituting every `%(key)s` placeholder exactly once against a
//! [`TemplateContext`] built from the easyconfig's own name/version/
//! toolchain/versionsuffix. There is no templating bit to forget to set.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::EbError;
use crate::model::easyconfig::{
    BuildStep, Dependency, Easyconfig, ExtensionSpec, Patch, SanityCheckPaths, Toolchain,
};
use crate::model::parser::{RawEasyconfig, RawValue};

/// The standard `%(key)s` substitutions available to every string-valued
/// easyconfig parameter, mirroring the original template constant table
/// (`name`, `version`, `namelower`, `toolchain_name`, ...).
#[derive(Debug, Clone)]
pub struct TemplateContext {
    values: BTreeMap<String, String>,
}

impl TemplateContext {
    pub fn new(name: &str, version: &str, version_suffix: &str, toolchain: &Toolchain) -> Self {
        let mut values = BTreeMap::new();
        values.insert("name".to_string(), name.to_string());
        values.insert("namelower".to_string(), name.to_lowercase());
        values.insert("nameletter".to_string(), name.chars().next().map(|c| c.to_lowercase().to_string()).unwrap_or_default());
        values.insert("version".to_string(), version.to_string());
        values.insert("versionsuffix".to_string(), version_suffix.to_string());
        values.insert("toolchain_name".to_string(), toolchain.name.clone());
        values.insert("toolchain_version".to_string(), toolchain.version.clone());

        if let Some((major, rest)) = version.split_once('.') {
            values.insert("version_major".to_string(), major.to_string());
            if let Some((minor, _)) = rest.split_once('.') {
                values.insert("version_minor".to_string(), minor.to_string());
                values.insert("version_major_minor".to_string(), format!("{major}.{minor}"));
            }
        }

        TemplateContext { values }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Substitute every `%(key)s` occurrence in `input`, collecting the
    /// names of any keys that have no binding rather than failing eagerly —
    /// callers decide whether unresolved templates are fatal.
    pub fn resolve(&self, input: &str, unresolved: &mut Vec<String>) -> String {
        let mut out = String::with_capacity(input.len());
        let bytes = input.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'%' && input[i..].starts_with("%(") {
                if let Some(close) = input[i..].find(")s") {
                    let key = &input[i + 2..i + close];
                    match self.values.get(key) {
                        Some(value) => {
                            out.push_str(value);
                            i += close + 2;
                            continue;
                        }
                        None => {
                            unresolved.push(key.to_string());
                            out.push_str(&input[i..i + close + 2]);
                            i += close + 2;
                            continue;
                        }
                    }
                }
            }
            let ch = input[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
        }
        out
    }

    fn resolve_value(&self, value: &RawValue, unresolved: &mut Vec<String>) -> RawValue {
        match value {
            RawValue::Str(s) => RawValue::Str(self.resolve(s, unresolved)),
            RawValue::List(items) => {
                RawValue::List(items.iter().map(|v| self.resolve_value(v, unresolved)).collect())
            }
            RawValue::Tuple(items) => {
                RawValue::Tuple(items.iter().map(|v| self.resolve_value(v, unresolved)).collect())
            }
            RawValue::Dict(map) => RawValue::Dict(
                map.iter().map(|(k, v)| (k.clone(), self.resolve_value(v, unresolved))).collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Constants a bare identifier in easyconfig source can resolve to
/// (`SYSTEM`, `EXTERNAL_MODULE`, `SOURCE_TAR_GZ`, ...). Only the handful
/// this crate actually interprets are listed; anything else is kept
/// verbatim as an opaque `RawValue::Constant` inside `custom`.
fn resolve_constant(name: &str) -> Option<RawValue> {
    match name {
        "SOURCE_TAR_GZ" => Some(RawValue::Str("%(name)s-%(version)s.tar.gz".to_string())),
        "SOURCE_TAR_BZ2" => Some(RawValue::Str("%(name)s-%(version)s.tar.bz2".to_string())),
        "SOURCE_TAR_XZ" => Some(RawValue::Str("%(name)s-%(version)s.tar.xz".to_string())),
        "SOURCE_ZIP" => Some(RawValue::Str("%(name)s-%(version)s.zip".to_string())),
        _ => None,
    }
}

fn str_field(raw: &RawEasyconfig, key: &str) -> String {
    raw.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_string()
}

fn str_list_field(raw: &RawEasyconfig, key: &str) -> Vec<String> {
    raw.get(key)
        .and_then(|v| v.as_list())
        .map(|items| items.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default()
}

fn parse_toolchain(raw: &RawEasyconfig) -> Toolchain {
    match raw.get("toolchain") {
        Some(RawValue::Constant(name)) if name == "SYSTEM" => Toolchain::system(),
        Some(RawValue::Dict(map)) => {
            let name = map.get("name").and_then(|v| v.as_str()).unwrap_or("system").to_string();
            let version = map.get("version").and_then(|v| v.as_str()).unwrap_or("system").to_string();
            Toolchain { name, version }
        }
        _ => Toolchain::system(),
    }
}

fn parse_dependency(value: &RawValue) -> Option<Dependency> {
    let tuple = match value {
        RawValue::Tuple(items) | RawValue::List(items) => items,
        _ => return None,
    };
    let name = tuple.first()?.as_str()?.to_string();
    let version = tuple.get(1)?.as_str()?.to_string();
    let version_suffix = tuple.get(2).and_then(|v| v.as_str()).map(|s| s.to_string());
    let toolchain = match tuple.get(3) {
        Some(RawValue::Tuple(tc)) | Some(RawValue::List(tc)) => {
            let name = tc.first().and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let version = tc.get(1).and_then(|v| v.as_str()).unwrap_or_default().to_string();
            Some(Toolchain { name, version })
        }
        Some(RawValue::Constant(c)) if c == "SYSTEM" => Some(Toolchain::system()),
        _ => None,
    };
    let external_module = matches!(tuple.get(4), Some(RawValue::Bool(true)));
    Some(Dependency { name, version, toolchain, version_suffix, external_module })
}

fn parse_patch(value: &RawValue) -> Option<Patch> {
    match value {
        RawValue::Str(s) => Some(Patch::from_string(s.clone())),
        RawValue::Dict(map) => {
            let name = map.get("name").and_then(|v| v.as_str())?.to_string();
            let level = map.get("level").and_then(|v| match v {
                RawValue::Int(n) => Some(*n as u32),
                _ => None,
            });
            let alt_location = map.get("alt_location").and_then(|v| v.as_str()).map(|s| s.to_string());
            let sourcepath = map.get("sourcepath").and_then(|v| v.as_str()).map(|s| s.to_string());
            Some(Patch { name, level, alt_location, sourcepath })
        }
        RawValue::Tuple(items) => {
            let name = items.first()?.as_str()?.to_string();
            let level = items.get(1).and_then(|v| match v {
                RawValue::Int(n) => Some(*n as u32),
                _ => None,
            });
            Some(Patch { name, level, alt_location: None, sourcepath: None })
        }
        _ => None,
    }
}

fn parse_extensions(raw_list: &[RawValue]) -> Vec<ExtensionSpec> {
    raw_list
        .iter()
        .filter_map(|v| match v {
            RawValue::Tuple(items) | RawValue::List(items) => {
                let name = items.first()?.as_str()?.to_string();
                let version = items.get(1).and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let mut sources = Vec::new();
                let mut patches = Vec::new();
                let mut checksums = Vec::new();
                let mut easyblock = None;
                let mut custom = BTreeMap::new();
                if let Some(RawValue::Dict(opts)) = items.get(2) {
                    if let Some(s) = opts.get("source_urls").and_then(|v| v.as_list()) {
                        sources.extend(s.iter().filter_map(|v| v.as_str().map(|s| s.to_string())));
                    }
                    if let Some(p) = opts.get("patches").and_then(|v| v.as_list()) {
                        patches.extend(p.iter().filter_map(parse_patch));
                    }
                    if let Some(c) = opts.get("checksums").and_then(|v| v.as_list()) {
                        checksums.extend(c.iter().filter_map(|v| v.as_str().map(|s| s.to_string())));
                    }
                    easyblock = opts.get("easyblock").and_then(|v| v.as_str()).map(|s| s.to_string());
                    for (k, v) in opts {
                        if !["source_urls", "patches", "checksums", "easyblock"].contains(&k.as_str()) {
                            custom.insert(k.clone(), v.clone());
                        }
                    }
                }
                Some(ExtensionSpec { name, version, sources, patches, checksums, easyblock, custom })
            }
            RawValue::Str(name) => Some(ExtensionSpec {
                name: name.clone(),
                version: String::new(),
                sources: vec![],
                patches: vec![],
                checksums: vec![],
                easyblock: None,
                custom: BTreeMap::new(),
            }),
            _ => None,
        })
        .collect()
}

const KNOWN_FIELDS: &[&str] = &[
    "name", "version", "versionsuffix", "toolchain", "homepage", "description", "source_urls",
    "sources", "patches", "checksums", "dependencies", "builddependencies", "exts_list",
    "moduleclass", "sanity_check_paths", "sanity_check_commands", "easyblock", "stop", "block",
];

/// Resolve `raw` into a fully-typed, template-expanded [`Easyconfig`], then
/// run [`Easyconfig::validate`]. Errors as [`EbError::TemplateUnresolved`] if
/// any `%(key)s` placeholder has no binding, or [`EbError::ValidationError`]
/// if the resolved record fails an invariant.
pub fn generate_template_values(raw: &RawEasyconfig) -> Result<Easyconfig, EbError> {
    let name = str_field(raw, "name");
    let version = str_field(raw, "version");
    let version_suffix = str_field(raw, "versionsuffix");
    let toolchain = parse_toolchain(raw);

    let ctx = TemplateContext::new(&name, &version, &version_suffix, &toolchain);
    let mut unresolved = Vec::new();

    let resolve_str = |s: &str, unresolved: &mut Vec<String>| ctx.resolve(s, unresolved);
    let resolve_list = |items: Vec<String>, unresolved: &mut Vec<String>| -> Vec<String> {
        items.into_iter().map(|s| ctx.resolve(&s, unresolved)).collect()
    };

    let source_urls = resolve_list(str_list_field(raw, "source_urls"), &mut unresolved);

    let sources = match raw.get("sources") {
        Some(v) => v
            .as_list()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        RawValue::Str(s) => Some(resolve_str(s, &mut unresolved)),
                        RawValue::Constant(c) => resolve_constant(c)
                            .and_then(|rv| rv.as_str().map(|s| resolve_str(s, &mut unresolved))),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default(),
        None => vec![resolve_str("%(name)s-%(version)s.tar.gz", &mut unresolved)],
    };

    let patches = raw
        .get("patches")
        .and_then(|v| v.as_list())
        .map(|items| {
            items
                .iter()
                .filter_map(parse_patch)
                .map(|mut p| {
                    p.name = resolve_str(&p.name, &mut unresolved);
                    p
                })
                .collect()
        })
        .unwrap_or_default();

    let checksums = resolve_list(str_list_field(raw, "checksums"), &mut unresolved);

    let dependencies = raw
        .get("dependencies")
        .and_then(|v| v.as_list())
        .map(|items| items.iter().filter_map(parse_dependency).collect())
        .unwrap_or_default();

    let build_dependencies = raw
        .get("builddependencies")
        .and_then(|v| v.as_list())
        .map(|items| items.iter().filter_map(parse_dependency).collect())
        .unwrap_or_default();

    let ext_list = raw
        .get("exts_list")
        .and_then(|v| v.as_list())
        .map(parse_extensions)
        .unwrap_or_default();

    let module_class = {
        let mc = str_field(raw, "moduleclass");
        if mc.is_empty() { "tools".to_string() } else { mc }
    };

    let sanity_check_paths = raw
        .get("sanity_check_paths")
        .and_then(|v| v.as_dict())
        .map(|d| SanityCheckPaths {
            files: d.get("files").and_then(|v| v.as_list()).map(|l| {
                l.iter().filter_map(|v| v.as_str().map(|s| resolve_str(s, &mut unresolved))).collect()
            }).unwrap_or_default(),
            dirs: d.get("dirs").and_then(|v| v.as_list()).map(|l| {
                l.iter().filter_map(|v| v.as_str().map(|s| resolve_str(s, &mut unresolved))).collect()
            }).unwrap_or_default(),
        })
        .unwrap_or_default();

    let sanity_check_commands = str_list_field(raw, "sanity_check_commands");

    let easyblock = raw.get("easyblock").and_then(|v| v.as_str()).map(|s| s.to_string());

    let stop = raw
        .get("stop")
        .and_then(|v| v.as_str())
        .and_then(BuildStep::from_name);

    let custom = raw
        .fields
        .iter()
        .filter(|(k, _)| !KNOWN_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), ctx.resolve_value(v, &mut unresolved)))
        .collect();

    if !unresolved.is_empty() {
        unresolved.sort();
        unresolved.dedup();
        return Err(EbError::TemplateUnresolved { name, vars: unresolved });
    }

    let ec = Easyconfig {
        name,
        version,
        version_suffix,
        toolchain,
        homepage: str_field(raw, "homepage"),
        description: str_field(raw, "description"),
        source_urls,
        sources,
        patches,
        checksums,
        dependencies,
        build_dependencies,
        ext_list,
        module_class,
        sanity_check_paths,
        sanity_check_commands,
        easyblock,
        custom,
        stop,
        source_path: raw.source_path.clone().map(PathBuf::from),
    };

    ec.validate().map_err(|reason| EbError::ValidationError { name: ec.name.clone(), reason })?;

    Ok(ec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parser::parse;

    #[test]
    fn resolves_name_version_templates() {
        let raw = &parse(
            "name = 'toy'\nversion = '0.0'\ntoolchain = SYSTEM\nhomepage = 'https://example.org'\ndescription = 'a toy'\nsources = ['%(name)s-%(version)s.tar.gz']\n",
            None,
        )
        .unwrap()[0];
        let ec = generate_template_values(raw).unwrap();
        assert_eq!(ec.sources, vec!["toy-0.0.tar.gz".to_string()]);
    }

    #[test]
    fn reports_unresolved_template_variables() {
        let raw = &parse(
            "name = 'toy'\nversion = '0.0'\ntoolchain = SYSTEM\nhomepage = 'https://example.org'\ndescription = 'a toy'\nsources = ['%(bogus)s.tar.gz']\n",
            None,
        )
        .unwrap()[0];
        let err = generate_template_values(raw).unwrap_err();
        assert!(matches!(err, EbError::TemplateUnresolved { .. }));
    }

    #[test]
    fn defaults_sources_to_name_version_tarball_when_absent() {
        let raw = &parse(
            "name = 'toy'\nversion = '0.0'\ntoolchain = SYSTEM\nhomepage = 'https://example.org'\ndescription = 'a toy'\n",
            None,
        )
        .unwrap()[0];
        let ec = generate_template_values(raw).unwrap();
        assert_eq!(ec.sources, vec!["toy-0.0.tar.gz".to_string()]);
    }

    #[test]
    fn parses_dependency_tuples_with_toolchain_override() {
        let raw = &parse(
            "name = 'toy'\nversion = '0.0'\ntoolchain = SYSTEM\nhomepage = 'https://example.org'\ndescription = 'a toy'\ndependencies = [('zlib', '1.2.11', '', ('GCC', '4.6.3'))]\n",
            None,
        )
        .unwrap()[0];
        let ec = generate_template_values(raw).unwrap();
        assert_eq!(ec.dependencies.len(), 1);
        assert_eq!(ec.dependencies[0].toolchain.as_ref().unwrap().name, "GCC");
    }
}
