//! Subtoolchain mapping for `--try-toolchain`/`--map-toolchains`, grounded
//! in `original_source/easybuild/main.py`'s toolchain hierarchy handling.
//! Kept as a small standalone pure module next to the resolver, the way
//! the teacher keeps `PackageIdSpec` matching
//! (`src/cargo/core/package_id_spec.rs`) isolated from `core/resolver`.

use crate::model::Toolchain;

/// `compiler-only ⊂ compiler+mpi ⊂ full`: each full-featured toolchain's
/// immediate, less-capable subtoolchain. This crate keeps the table small
/// and explicit rather than deriving it from a toolchain-component model,
/// which is out of scope.
const SUBTOOLCHAIN_OF: &[(&str, &str)] = &[
    ("foss", "gompi"),
    ("gompi", "GCC"),
    ("fosscuda", "gompic"),
    ("gompic", "GCC"),
    ("intel", "iimpi"),
    ("iimpi", "iccifort"),
    ("gcccuda", "GCC"),
];

pub fn subtoolchain_of(name: &str) -> Option<&'static str> {
    SUBTOOLCHAIN_OF.iter().find(|(full, _)| *full == name).map(|(_, sub)| *sub)
}

/// Walk `requested`'s subtoolchain chain, never mapping "up", and return
/// the first toolchain found in `available` at the same version. Returns
/// `None` if no subtoolchain in the chain (or `requested` itself has none)
/// is present in `available`.
pub fn map_to_subtoolchain(requested: &Toolchain, available: &[Toolchain]) -> Option<Toolchain> {
    let mut current = subtoolchain_of(&requested.name)?;
    loop {
        if let Some(found) = available.iter().find(|tc| tc.name == current && tc.version == requested.version) {
            return Some(found.clone());
        }
        current = subtoolchain_of(current)?;
    }
}
