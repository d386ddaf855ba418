//! Miscellaneous support code used by the EasyBuild core.
//!
//! This crate mirrors the role `cargo-util` plays for Cargo: it keeps the
//! sandboxed-subprocess and filesystem plumbing separate from the
//! orchestration logic that lives in the `easybuild` crate, so that it can
//! be unit tested in isolation and reused by anything that needs to spawn a
//! build tool or poke at an archive without knowing about easyconfigs,
//! modules or the resolver.

pub mod checksum;
pub mod fs;
pub mod process;
pub mod rpath;

pub use checksum::{compute_checksum, verify_checksum, ChecksumAlgorithm};
pub use fs::{apply_patch, atomic_move, dir_size, extract_archive, ArchiveKind};
pub use process::{CommandResult, CommandSpec, QaPattern};
pub use rpath::rewrite_rpath_args;
