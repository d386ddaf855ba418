//! EasyBlock Pipeline (component C6): the per-Build-Unit step state machine
//! of §4.6.
//!
//! FETCH → EXTRACT → PATCH → PREPARE → CONFIGURE → BUILD → TEST → INSTALL
//!   → EXTENSIONS → POSTPROC → SANITY → MODULE → PERMS → PACKAGE → CLEANUP
//!
//! Grounded in the teacher's own compile driver
//! (`src/cargo/ops/cargo_compile.rs`), which runs a fixed sequence of
//! phases over a unit and reports failure without ever panicking the whole
//! process — the same shape this machine needs for regtest mode (§7: "in
//! regtest mode it records and continues"). Every step here returns
//! `Result`; [`run`] is the only place a failure turns into a terminal
//! state rather than propagating further.

pub mod module_render;
pub mod source;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::Config;
use crate::easyblock::{Registry, StepContext};
use crate::env::Env;
use crate::error::EbError;
use crate::lock::InstallLock;
use crate::logging::UnitLog;
use crate::mns::ModuleNamingScheme;
use crate::model::{BuildStep, Easyconfig, ModuleId, Toolchain};
use crate::modules::{protocol::Directive, LoadOptions, ModulesTool};
use eb_util::fs::{apply_patch, extract_archive};
use source::{fetch_all, fetch_extension, FilesystemSourceProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Done,
    Failed,
    Stopped,
}

pub struct PipelineOutcome {
    pub module_id: ModuleId,
    pub state: PipelineState,
    pub error: Option<String>,
    pub install_dir: PathBuf,
    pub log_path: Option<PathBuf>,
}

/// Everything a pipeline run needs, gathered by the orchestrator once per
/// unit. Borrowed rather than owned: the orchestrator keeps the resolved
/// build plan alive across every unit's run.
pub struct PipelineInputs<'a> {
    pub ec: &'a Easyconfig,
    pub config: &'a Config,
    pub modules_tool: &'a dyn ModulesTool,
    pub mns: &'a dyn ModuleNamingScheme,
    pub registry: &'a Registry,
    /// Dependency module ids in load order, as determined by the resolver;
    /// the pipeline loads these (plus the toolchain) in PREPARE.
    pub resolved_deps: &'a [ModuleId],
}

fn is_build_in_installdir(ec: &Easyconfig) -> bool {
    matches!(ec.custom.get("build_in_installdir"), Some(v) if v.as_bool() == Some(true))
}

fn module_file_extension(syntax: crate::config::ModuleSyntax) -> &'static str {
    match syntax {
        crate::config::ModuleSyntax::Lua => "lua",
        crate::config::ModuleSyntax::Tcl => "",
    }
}

/// Apply a modules-tool wire directive (§6 "Module tool wire protocol") to
/// an in-process [`Env`] — the one place this crate interprets rather than
/// just transports that mini-language.
fn apply_directive(env: &mut Env, directive: &Directive) {
    match directive {
        Directive::SetEnv { key, value } => env.setvar(key.clone(), value.clone()),
        Directive::UnsetEnv { key } => env.unsetvar(key.clone()),
        Directive::PrependPath { key, value } => {
            let existing = env.getvar(key).map(|s| s.to_string());
            let joined = match existing {
                Some(e) if !e.is_empty() => format!("{value}:{e}"),
                _ => value.clone(),
            };
            env.setvar(key.clone(), joined);
        }
        Directive::AppendPath { key, value } => {
            let existing = env.getvar(key).map(|s| s.to_string());
            let joined = match existing {
                Some(e) if !e.is_empty() => format!("{e}:{value}"),
                _ => value.clone(),
            };
            env.setvar(key.clone(), joined);
        }
    }
}

fn load_into_env(
    tool: &dyn ModulesTool,
    env: &mut Env,
    modules: &[ModuleId],
    opts: &LoadOptions,
) -> Result<(), EbError> {
    if modules.is_empty() && !opts.purge {
        return Ok(());
    }
    let directives = tool
        .load(modules, opts)
        .map_err(|e| EbError::ModuleToolError(e.to_string()))?;
    for directive in &directives {
        apply_directive(env, directive);
    }
    Ok(())
}

/// GCC-family vs Intel-family compiler/MPI variable export, keyed off the
/// toolchain name. A real toolchain-component model would derive this from
/// the toolchain's own declared compiler/MPI modules; this crate keeps a
/// small explicit table next to [`crate::resolver::toolchain`]'s own
/// subtoolchain table rather than importing one, since the full model is
/// out of scope (§1 Non-goals).
fn toolchain_vars(toolchain: &Toolchain) -> Vec<(&'static str, &'static str)> {
    if toolchain.is_system() {
        return Vec::new();
    }
    const INTEL_FAMILY: &[&str] = &["intel", "iimpi", "iccifort"];
    if INTEL_FAMILY.contains(&toolchain.name.as_str()) {
        vec![("CC", "icc"), ("CXX", "icpc"), ("F90", "ifort")]
    } else {
        vec![("CC", "gcc"), ("CXX", "g++"), ("F90", "gfortran")]
    }
}

/// Run the full pipeline for one Build Unit. Never panics or propagates a
/// `Result` out of the step machine itself — a step failure is recorded on
/// the returned [`PipelineOutcome`] and it is the orchestrator's job
/// (single-unit vs regtest mode, §4.10/§7) to decide whether that stops the
/// whole run.
pub fn run(inputs: PipelineInputs) -> PipelineOutcome {
    let ec = inputs.ec;
    let config = inputs.config;
    let module_id = ec.module_id();

    let install_subdir = inputs.mns.det_install_subdir(ec);
    let install_dir = config.installpath.join("software").join(&install_subdir);
    let build_dir = if is_build_in_installdir(ec) {
        install_dir.clone()
    } else {
        config.buildpath.join(module_id.sanitized())
    };

    let mut log = match UnitLog::create(&config.tmpdir.join("logs"), &module_id.sanitized()) {
        Ok(log) => log,
        Err(e) => {
            return PipelineOutcome {
                module_id,
                state: PipelineState::Failed,
                error: Some(format!("failed to create unit log: {e}")),
                install_dir,
                log_path: None,
            }
        }
    };
    let log_path = log.path().to_path_buf();

    let lock = if config.ignore_locks {
        None
    } else {
        match InstallLock::acquire(&config.installpath, &module_id) {
            Ok(lock) => Some(lock),
            Err(e) => {
                return PipelineOutcome {
                    module_id,
                    state: PipelineState::Failed,
                    error: Some(e.to_string()),
                    install_dir,
                    log_path: Some(log_path),
                };
            }
        }
    };

    let mut env = Env::from_process();
    let mut start_dir = build_dir.clone();
    let mut fetched: Vec<source::FetchedFile> = Vec::new();

    let plan = StepPlan::new(config);
    let mut failed: Option<String> = None;

    for &step in BuildStep::ALL.iter() {
        if !plan.includes(step) {
            continue;
        }

        log.line(&format!("==> {}", step.name()));
        if config.trace {
            info!(step = step.name(), unit = %module_id, "entering step");
        }

        let result = run_step(step, ec, config, inputs.modules_tool, inputs.mns, inputs.registry,
            inputs.resolved_deps, &mut env, &build_dir, &mut start_dir, &install_dir, &mut fetched, &mut log);

        if let Err(e) = result {
            if step == BuildStep::Test && config.ignore_test_failure {
                warn!(unit = %module_id, error = %e, "ignoring TEST step failure (--ignore-test-failure)");
                log.line(&format!("TEST step failed but ignored: {e}"));
                continue;
            }
            failed = Some(e.to_string());
            log.line(&format!("step {} failed: {e}", step.name()));
            break;
        }

        if Some(step) == config.stop {
            drop(lock);
            return PipelineOutcome {
                module_id,
                state: PipelineState::Stopped,
                error: None,
                install_dir,
                log_path: Some(log_path),
            };
        }
        if config.fetch_only && step == BuildStep::Fetch {
            drop(lock);
            return PipelineOutcome {
                module_id,
                state: PipelineState::Stopped,
                error: None,
                install_dir,
                log_path: Some(log_path),
            };
        }
    }

    drop(lock);
    drop(log);

    let state = if failed.is_some() { PipelineState::Failed } else { PipelineState::Done };
    let log_path = finalize_log(&log_path, &install_dir, ec, state, config.zip_logs);

    match failed {
        Some(reason) => {
            PipelineOutcome { module_id, state: PipelineState::Failed, error: Some(reason), install_dir, log_path }
        }
        None => PipelineOutcome { module_id, state: PipelineState::Done, error: None, install_dir, log_path },
    }
}

/// §6 "Filesystem layout": on success, copy the unit's log into
/// `<installdir>/easybuild/easybuild-<name>-<version>-*.log`; `--zip-logs`
/// additionally compresses whichever copy is now canonical. Best-effort:
/// a failure here never turns a successful build into a failed one.
fn finalize_log(
    log_path: &Path,
    install_dir: &Path,
    ec: &Easyconfig,
    state: PipelineState,
    zip_logs: Option<crate::config::ZipLogsFormat>,
) -> Option<PathBuf> {
    let mut path = log_path.to_path_buf();
    if state == PipelineState::Done {
        let dest_dir = install_dir.join("easybuild");
        if fs::create_dir_all(&dest_dir).is_ok() {
            let dest = dest_dir.join(format!("easybuild-{}-{}.log", ec.name, ec.full_version()));
            if fs::copy(log_path, &dest).is_ok() {
                path = dest;
            }
        }
    }
    if let Some(format) = zip_logs {
        if let Ok(compressed) = crate::logging::compress_log(&path, format) {
            path = compressed;
        }
    }
    Some(path)
}

/// Which steps a given run actually visits, computed once from config
/// flags: `--sanity-check-only` starts at SANITY and stops before MODULE;
/// `--skip` (this port's reading of it: the base software is assumed
/// already installed) starts at EXTENSIONS; `--skip-extensions` always
/// removes EXTENSIONS regardless of the other two.
struct StepPlan {
    first: BuildStep,
    sanity_check_only: bool,
    skip_extensions: bool,
}

impl StepPlan {
    fn new(config: &Config) -> StepPlan {
        let first = if config.sanity_check_only {
            BuildStep::Sanity
        } else if config.skip {
            BuildStep::Extensions
        } else {
            BuildStep::Fetch
        };
        StepPlan { first, sanity_check_only: config.sanity_check_only, skip_extensions: config.skip_extensions }
    }

    fn includes(&self, step: BuildStep) -> bool {
        if step < self.first {
            return false;
        }
        if step == BuildStep::Extensions && self.skip_extensions {
            return false;
        }
        if self.sanity_check_only && step > BuildStep::Sanity {
            return false;
        }
        true
    }
}

#[allow(clippy::too_many_arguments)]
fn run_step(
    step: BuildStep,
    ec: &Easyconfig,
    config: &Config,
    tool: &dyn ModulesTool,
    mns: &dyn ModuleNamingScheme,
    registry: &Registry,
    resolved_deps: &[ModuleId],
    env: &mut Env,
    build_dir: &Path,
    start_dir: &mut PathBuf,
    install_dir: &Path,
    fetched: &mut Vec<source::FetchedFile>,
    log: &mut UnitLog,
) -> Result<(), EbError> {
    match step {
        BuildStep::Fetch => {
            *fetched = step_fetch(ec, config, log)?;
            Ok(())
        }
        BuildStep::Extract => step_extract(ec, build_dir, start_dir, fetched, config, log),
        BuildStep::Patch => step_patch(ec, fetched, start_dir),
        BuildStep::Prepare => step_prepare(ec, config, tool, resolved_deps, env),
        BuildStep::Configure => {
            let mut block = registry.lookup(ec);
            let mut ctx = StepContext { ec, env, start_dir, install_dir, parallel: config.parallel };
            block.configure_step(&mut ctx).map_err(|e| EbError::CommandFailed { command: format!("configure: {e}"), exit_code: None })
        }
        BuildStep::Build => {
            let mut block = registry.lookup(ec);
            let mut ctx = StepContext { ec, env, start_dir, install_dir, parallel: config.parallel };
            block.build_step(&mut ctx).map_err(|e| EbError::CommandFailed { command: format!("build: {e}"), exit_code: None })
        }
        BuildStep::Test => {
            if config.skip_test_step {
                return Ok(());
            }
            let mut block = registry.lookup(ec);
            let mut ctx = StepContext { ec, env, start_dir, install_dir, parallel: config.parallel };
            block.test_step(&mut ctx).map_err(|e| EbError::CommandFailed { command: format!("test: {e}"), exit_code: None })
        }
        BuildStep::Install => {
            fs::create_dir_all(install_dir).map_err(|e| EbError::IOFailed { path: install_dir.to_path_buf(), reason: e.to_string() })?;
            let mut block = registry.lookup(ec);
            let mut ctx = StepContext { ec, env, start_dir, install_dir, parallel: config.parallel };
            block.install_step(&mut ctx).map_err(|e| EbError::CommandFailed { command: format!("install: {e}"), exit_code: None })
        }
        BuildStep::Extensions => step_extensions(ec, config, install_dir, log),
        BuildStep::Postproc => Ok(()),
        BuildStep::Sanity => step_sanity(ec, install_dir, env, log),
        BuildStep::Module => step_module(ec, config, mns, resolved_deps, install_dir, tool),
        BuildStep::Perms => step_perms(install_dir),
        BuildStep::Package => Ok(()),
        BuildStep::Cleanup => step_cleanup(ec, config, build_dir, install_dir),
    }
}

fn step_fetch(ec: &Easyconfig, config: &Config, log: &mut UnitLog) -> Result<Vec<source::FetchedFile>, EbError> {
    let provider = FilesystemSourceProvider { sourcepath: &config.sourcepath, force_download: config.force_download };
    let fetched = fetch_all(ec, &provider, config.enforce_checksums)?;
    for f in &fetched {
        log.line(&format!("fetched {}", f.path.display()));
    }
    Ok(fetched)
}

/// §4.6 EXTRACT: the build directory is removed before extraction unless
/// `--disable-cleanup-builddir` is combined with `build_in_installdir` (in
/// which case `build_dir == install_dir` and must survive). Archives are
/// extracted from the paths FETCH actually resolved them to (source cache
/// or a downloaded URL), not re-derived from a filename guess.
fn step_extract(
    ec: &Easyconfig,
    build_dir: &Path,
    start_dir: &mut PathBuf,
    fetched: &[source::FetchedFile],
    config: &Config,
    log: &mut UnitLog,
) -> Result<(), EbError> {
    let remove_before_extract = config.cleanup_builddir || !is_build_in_installdir(ec);
    if remove_before_extract && build_dir.exists() {
        fs::remove_dir_all(build_dir).map_err(|e| EbError::IOFailed { path: build_dir.to_path_buf(), reason: e.to_string() })?;
    }
    fs::create_dir_all(build_dir).map_err(|e| EbError::IOFailed { path: build_dir.to_path_buf(), reason: e.to_string() })?;

    let mut top_dir = None;
    for (source_name, fetched_file) in ec.sources.iter().zip(fetched.iter()) {
        let archive = &fetched_file.path;
        let dir = extract_archive(archive, build_dir).map_err(|e| EbError::IOFailed {
            path: archive.clone(),
            reason: format!("failed to extract {source_name}: {e}"),
        })?;
        if let Some(dir) = dir {
            top_dir = Some(dir);
        }
    }
    *start_dir = top_dir.unwrap_or_else(|| build_dir.to_path_buf());
    log.line(&format!("extracted into {}", start_dir.display()));
    Ok(())
}

fn step_patch(ec: &Easyconfig, fetched: &[source::FetchedFile], start_dir: &PathBuf) -> Result<(), EbError> {
    // FETCH's returned list is sources followed by patches, in declared
    // order (see `fetch_sources_and_patches`); skip past the sources to
    // line patches up with the patch files FETCH actually resolved.
    let patch_files = fetched.get(ec.sources.len()..).unwrap_or(&[]);
    for (patch, fetched_file) in ec.patches.iter().zip(patch_files.iter()) {
        let patch_path = &fetched_file.path;
        let text = fs::read_to_string(patch_path)
            .map_err(|e| EbError::PatchFailed { patch: patch.name.clone(), target: start_dir.clone(), reason: e.to_string() })?;
        let level = patch.level.unwrap_or(1) as usize;
        apply_patch(&text, start_dir, level)
            .map_err(|e| EbError::PatchFailed { patch: patch.name.clone(), target: start_dir.clone(), reason: e.to_string() })?;
    }
    Ok(())
}

fn step_prepare(
    ec: &Easyconfig,
    config: &Config,
    tool: &dyn ModulesTool,
    resolved_deps: &[ModuleId],
    env: &mut Env,
) -> Result<(), EbError> {
    env.push_context();

    let mut to_load = resolved_deps.to_vec();
    if !ec.toolchain.is_system() {
        to_load.insert(0, ModuleId::new(ec.toolchain.name.clone(), ec.toolchain.version.clone()));
    }
    load_into_env(tool, env, &to_load, &LoadOptions { purge: false, init_env: true, allow_reload: false })?;

    for (key, value) in toolchain_vars(&ec.toolchain) {
        env.setvar(key, value);
    }
    env.setvar("OMP_NUM_THREADS", config.parallel.to_string());
    env.sanitize();
    Ok(())
}

fn step_extensions(ec: &Easyconfig, config: &Config, install_dir: &Path, log: &mut UnitLog) -> Result<(), EbError> {
    let provider = FilesystemSourceProvider { sourcepath: &config.sourcepath, force_download: config.force_download };
    for ext in &ec.ext_list {
        let fetched = fetch_extension(ext, &ec.name, &ec.source_urls, &provider, config.enforce_checksums)?;
        log.line(&format!("extension {} {}: fetched {} file(s)", ext.name, ext.version, fetched.len()));
        let _ = install_dir;
    }
    Ok(())
}

fn step_sanity(ec: &Easyconfig, install_dir: &Path, env: &Env, log: &mut UnitLog) -> Result<(), EbError> {
    for file in &ec.sanity_check_paths.files {
        let path = install_dir.join(file);
        let metadata = fs::metadata(&path).map_err(|_| EbError::SanityCheckFailed {
            name: ec.name.clone(),
            reason: format!("ls -l {file}: no such file"),
        })?;
        if metadata.len() == 0 {
            return Err(EbError::SanityCheckFailed { name: ec.name.clone(), reason: format!("{file} is empty") });
        }
    }
    for dir in &ec.sanity_check_paths.dirs {
        let path = install_dir.join(dir);
        let entries = fs::read_dir(&path)
            .map_err(|_| EbError::SanityCheckFailed { name: ec.name.clone(), reason: format!("ls -l {dir}: no such directory") })?;
        if entries.count() == 0 {
            return Err(EbError::SanityCheckFailed { name: ec.name.clone(), reason: format!("{dir} is empty") });
        }
    }

    for command in &ec.sanity_check_commands {
        let mut spec = eb_util::process::CommandSpec::new("sh").arg("-c").arg(command.clone()).cwd(install_dir);
        for (key, value) in env.as_command_deltas() {
            spec = match value {
                Some(v) => spec.env(key, v),
                None => spec.env_remove(key),
            };
        }
        let result = eb_util::process::run(&spec)
            .map_err(|e| EbError::SanityCheckFailed { name: ec.name.clone(), reason: e.to_string() })?;
        if !result.success() {
            return Err(EbError::SanityCheckFailed {
                name: ec.name.clone(),
                reason: format!("sanity check command `{command}` exited non-zero"),
            });
        }
    }

    log.line("sanity check passed");
    Ok(())
}

fn step_module(
    ec: &Easyconfig,
    config: &Config,
    mns: &dyn ModuleNamingScheme,
    resolved_deps: &[ModuleId],
    install_dir: &Path,
    tool: &dyn ModulesTool,
) -> Result<(), EbError> {
    let subdir = mns.det_install_subdir(ec);
    let ext = module_file_extension(config.module_syntax);
    let module_path = config.installpath.join("modules").join("all").join(&subdir);
    // `with_extension` would mistake the trailing component of a version
    // string like "0.0" for a stem+extension pair, so the suffix is
    // appended to the path's raw text instead.
    let filename = if ext.is_empty() {
        module_path.clone()
    } else {
        let mut os = module_path.clone().into_os_string();
        os.push(".");
        os.push(ext);
        PathBuf::from(os)
    };
    let parent = filename.parent().unwrap_or(&module_path).to_path_buf();
    fs::create_dir_all(&parent).map_err(|e| EbError::IOFailed { path: parent.clone(), reason: e.to_string() })?;

    let text = module_render::render_module(
        ec,
        install_dir,
        resolved_deps,
        config.module_syntax,
        config.recursive_module_unload,
        "",
        "",
    );
    fs::write(&filename, text).map_err(|e| EbError::IOFailed { path: filename.clone(), reason: e.to_string() })?;

    if config.set_default_module {
        let default_marker = parent.join(".version");
        let version = ec.full_version();
        let _ = fs::write(default_marker, format!("#%Module1.0\nset ModulesVersion \"{version}\"\n"));
    }

    tool.use_path(&config.installpath.join("modules").join("all"), None)
        .map_err(|e| EbError::ModuleToolError(e.to_string()))?;

    Ok(())
}

fn step_perms(install_dir: &Path) -> Result<(), EbError> {
    if !install_dir.exists() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        for entry in walkdir::WalkDir::new(install_dir) {
            let entry = entry.map_err(|e| EbError::IOFailed { path: install_dir.to_path_buf(), reason: e.to_string() })?;
            let mode = if entry.file_type().is_dir() { 0o755 } else { 0o644 };
            let mut perms = fs::metadata(entry.path())
                .map_err(|e| EbError::IOFailed { path: entry.path().to_path_buf(), reason: e.to_string() })?
                .permissions();
            perms.set_mode(mode);
            let _ = fs::set_permissions(entry.path(), perms);
        }
    }
    Ok(())
}

fn step_cleanup(_ec: &Easyconfig, config: &Config, build_dir: &Path, install_dir: &Path) -> Result<(), EbError> {
    if config.cleanup_builddir && build_dir != install_dir && build_dir.exists() {
        let _ = fs::remove_dir_all(build_dir);
    }
    Ok(())
}
