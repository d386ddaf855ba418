//! Produce a derived easyconfig from an existing one without re-parsing —
//! the `--try-toolchain`, `--try-software-version` and robot-path "tweaked
//! copy" mechanisms all go through this one function.

use crate::error::EbError;
use crate::model::easyconfig::{Dependency, Easyconfig, Patch, Toolchain};

/// A single list-valued field's edit: replace it outright, or prepend/append
/// to the existing entries (mirrors the upstream `--try-amend` prefixes
/// `+=`/`=+` for list parameters).
#[derive(Debug, Clone)]
pub enum ListEdit<T> {
    Replace(Vec<T>),
    Prepend(Vec<T>),
    Append(Vec<T>),
}

impl<T: Clone> ListEdit<T> {
    fn apply(self, existing: Vec<T>) -> Vec<T> {
        match self {
            ListEdit::Replace(items) => items,
            ListEdit::Prepend(mut items) => {
                items.extend(existing);
                items
            }
            ListEdit::Append(mut items) => {
                let mut out = existing;
                out.append(&mut items);
                out
            }
        }
    }
}

/// The set of edits `tweak` will apply. Every field is optional; only the
/// ones present are touched, everything else passes through unchanged.
#[derive(Debug, Clone, Default)]
pub struct TweakSpec {
    pub version: Option<String>,
    pub version_suffix: Option<String>,
    pub toolchain: Option<Toolchain>,
    pub sources: Option<ListEdit<String>>,
    pub patches: Option<ListEdit<Patch>>,
    pub checksums: Option<ListEdit<String>>,
    pub dependencies: Option<ListEdit<Dependency>>,
    /// Clear `checksums` after other edits land, when the caller can't
    /// supply matching checksums for a version bump (the `--ignore-checksums`-
    /// at-tweak-time carve-out).
    pub drop_checksums: bool,
}

/// Apply `spec` to `base`, re-running [`Easyconfig::validate`] on the
/// result — a tweak that produces an inconsistent record (e.g. a mismatched
/// checksum count) is rejected rather than silently written out.
pub fn tweak(base: &Easyconfig, spec: TweakSpec) -> Result<Easyconfig, EbError> {
    let mut ec = base.clone();

    if let Some(version) = spec.version {
        ec.version = version;
    }
    if let Some(version_suffix) = spec.version_suffix {
        ec.version_suffix = version_suffix;
    }
    if let Some(toolchain) = spec.toolchain {
        ec.toolchain = toolchain;
    }
    if let Some(edit) = spec.sources {
        ec.sources = edit.apply(ec.sources);
    }
    if let Some(edit) = spec.patches {
        ec.patches = edit.apply(ec.patches);
    }
    if let Some(edit) = spec.dependencies {
        ec.dependencies = edit.apply(ec.dependencies);
    }
    if spec.drop_checksums {
        ec.checksums = Vec::new();
    } else if let Some(edit) = spec.checksums {
        ec.checksums = edit.apply(ec.checksums);
    }

    ec.source_path = None;

    ec.validate().map_err(|reason| EbError::ValidationError { name: ec.name.clone(), reason })?;
    Ok(ec)
}
