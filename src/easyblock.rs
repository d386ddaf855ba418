//! The `EasyBlock` extension point (§4.6, DESIGN NOTES §9 "EasyBlock class
//! hierarchy"): a name-keyed constructor registry stands in for Python's
//! dynamic-import-by-class-name lookup, the same redesign the modules-tool
//! and module-naming-scheme adapters already apply. Mirrors how the teacher
//! picks a concrete `Source` by `SourceId` kind
//! (`src/cargo/core/source/source_id.rs`) rather than subclassing.
//!
//! Hundreds of concrete easyblocks exist upstream, one per build system
//! quirk; writing them out is out of scope (§1 Non-goals). What this module
//! provides is the contract they implement, the name-encoding rule that
//! finds them, and a generic autotools-shaped fallback used when no
//! specific easyblock is registered or named.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use eb_util::process::{run_checked, CommandSpec};

use crate::env::Env;
use crate::model::Easyconfig;

/// The state every step implementation needs: the easyconfig being built,
/// the environment to run commands in, and the directories involved.
pub struct StepContext<'a> {
    pub ec: &'a Easyconfig,
    pub env: &'a mut Env,
    pub start_dir: &'a Path,
    pub install_dir: &'a Path,
    pub parallel: u32,
}

impl<'a> StepContext<'a> {
    /// Run `program` with `args` in `start_dir`, with the context's tracked
    /// environment deltas applied on top of the inherited process
    /// environment — the one place an easyblock touches a subprocess.
    pub fn run(&mut self, program: &str, args: &[String]) -> Result<()> {
        let mut spec = CommandSpec::new(program).args(args.to_vec()).cwd(self.start_dir);
        for (key, value) in self.env.as_command_deltas() {
            spec = match value {
                Some(v) => spec.env(key, v),
                None => spec.env_remove(key),
            };
        }
        run_checked(&spec)?;
        Ok(())
    }
}

/// CONFIGURE/BUILD/TEST/INSTALL, the four build steps a concrete easyblock
/// customises (§4.6). FETCH/EXTRACT/PATCH/PREPARE/SANITY/MODULE/PERMS/
/// CLEANUP are handled uniformly by the pipeline itself and are not part of
/// this trait.
pub trait EasyBlock {
    fn configure_step(&mut self, ctx: &mut StepContext) -> Result<()>;
    fn build_step(&mut self, ctx: &mut StepContext) -> Result<()>;
    fn test_step(&mut self, ctx: &mut StepContext) -> Result<()>;
    fn install_step(&mut self, ctx: &mut StepContext) -> Result<()>;
}

/// Encode `name` the way the `EB_<EncodedName>` class-name lookup does:
/// ASCII alphanumerics and `_` pass through, `-` and `+` get their own
/// spelled-out escapes (common enough in package names to read cleanly),
/// anything else falls back to its hex ordinal wrapped in underscores.
pub fn encode_name(name: &str) -> String {
    let mut out = String::new();
    for c in name.chars() {
        match c {
            '-' => out.push_str("_minus_"),
            '+' => out.push_str("_plus_"),
            c if c.is_ascii_alphanumeric() || c == '_' => out.push(c),
            c => out.push_str(&format!("_{:x}_", c as u32)),
        }
    }
    out
}

pub fn easyblock_class_name(name: &str) -> String {
    format!("EB_{}", encode_name(name))
}

type Constructor = fn() -> Box<dyn EasyBlock>;

/// Name -> constructor table. A real deployment registers one entry per
/// concrete easyblock module at startup; this crate ships empty and falls
/// through to [`GenericEasyBlock`] for everything.
#[derive(Default)]
pub struct Registry {
    constructors: HashMap<String, Constructor>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn register(&mut self, name: impl Into<String>, ctor: Constructor) {
        self.constructors.insert(name.into(), ctor);
    }

    /// Resolve the easyblock for `ec`: an explicit `easyblock = '...'` field
    /// wins, then the `EB_<EncodedName>` convention, then the generic
    /// fallback — never an error, matching upstream's refusal to fail a
    /// build merely for lacking a specialised easyblock.
    pub fn lookup(&self, ec: &Easyconfig) -> Box<dyn EasyBlock> {
        if let Some(explicit) = &ec.easyblock {
            if let Some(ctor) = self.constructors.get(explicit) {
                return ctor();
            }
        }
        let encoded = easyblock_class_name(&ec.name);
        if let Some(ctor) = self.constructors.get(&encoded) {
            return ctor();
        }
        Box::new(GenericEasyBlock)
    }
}

/// `./configure --prefix=<install> && make -j<n> && make install`, the
/// shape most autotools-based C/C++ projects follow; used whenever no more
/// specific easyblock is registered.
pub struct GenericEasyBlock;

/// Whether `dir` contains a makefile `make` would pick up on its own.
fn has_makefile(dir: &Path) -> bool {
    ["Makefile", "makefile", "GNUmakefile"].iter().any(|name| dir.join(name).exists())
}

impl EasyBlock for GenericEasyBlock {
    fn configure_step(&mut self, ctx: &mut StepContext) -> Result<()> {
        if !ctx.start_dir.join("configure").exists() {
            return Ok(());
        }
        ctx.run("./configure", &[format!("--prefix={}", ctx.install_dir.display())])
    }

    fn build_step(&mut self, ctx: &mut StepContext) -> Result<()> {
        if !has_makefile(ctx.start_dir) {
            return Ok(());
        }
        ctx.run("make", &[format!("-j{}", ctx.parallel.max(1))])
    }

    fn test_step(&mut self, _ctx: &mut StepContext) -> Result<()> {
        Ok(())
    }

    fn install_step(&mut self, ctx: &mut StepContext) -> Result<()> {
        if !has_makefile(ctx.start_dir) {
            return Ok(());
        }
        ctx.run("make", &["install".to_string()])
    }
}
