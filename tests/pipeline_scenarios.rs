//! End-to-end scenarios (the crate's own reading of the S1-S6 scenario
//! list): one requested easyconfig goes in, a dependency-ordered plan and
//! per-unit pipeline outcomes come out. Each test drives
//! `easybuild::orchestrator::run` (or, where the scenario is purely about
//! one unit's pipeline, `easybuild::pipeline::run` directly) the same way
//! an embedding CLI would, with a fake modules-tool backend standing in
//! for Lmod/Environment-Modules.

use std::fs;
use std::io::Write;
use std::path::Path;

use easybuild::config::Config;
use easybuild::easyblock::Registry;
use easybuild::mns::EasyBuildMns;
use easybuild::model::{BuildStep, ModuleId};
use easybuild::modules::environment_modules::EnvironmentModulesTool;
use easybuild::orchestrator::{self, RequestedEc, RunExitStatus, RunOptions};
use easybuild::pipeline::{self, PipelineInputs, PipelineState};

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

/// A `module` binary that never reports anything as available or loaded;
/// good enough for scenarios that only need `exist()`/`load()` to not
/// error, not to reflect a real module tree.
fn fake_modules_tool(root: &Path) -> EnvironmentModulesTool {
    let path = root.join("fake-modulecmd");
    let mut f = fs::File::create(&path).unwrap();
    writeln!(f, "#!/bin/sh\nexit 0").unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
    fs::set_permissions(&path, perms).unwrap();
    EnvironmentModulesTool::new(path, vec![])
}

fn base_config(root: &Path) -> Config {
    let mut config = Config {
        installpath: root.join("install"),
        buildpath: root.join("build"),
        tmpdir: root.join("tmp"),
        ..Config::default()
    };
    config.sourcepath = vec![root.join("sources")];
    config
}

const TOY_EC: &str = r#"
name = 'toy'
version = '0.0'
homepage = 'https://example.org'
description = 'a toy package'
toolchain = SYSTEM
"#;

/// S1: a dependency-free system-toolchain package builds end to end and
/// leaves a loadable module behind.
#[test]
fn s1_minimal_install_produces_a_module() {
    let dir = tempfile::tempdir().unwrap();
    let ec_path = dir.path().join("toy-0.0.eb");
    write_file(&ec_path, TOY_EC);

    let config = base_config(dir.path());
    let tool = fake_modules_tool(dir.path());
    let registry = Registry::new();

    let report = orchestrator::run(RunOptions {
        requested: vec![RequestedEc { path: ec_path, tweaks: vec![] }],
        config: &config,
        modules_tool: &tool,
        registry: &registry,
        is_root: false,
    })
    .unwrap();

    assert_eq!(report.status, RunExitStatus::Success);
    assert_eq!(report.units.len(), 1);
    assert_eq!(report.units[0].state, PipelineState::Done);
    assert_eq!(report.units[0].module_id, ModuleId::new("toy", "0.0"));
    assert!(config.installpath.join("modules/all/toy/0.0.lua").is_file());
}

/// S2: a package depending on a toolchain module that isn't installed
/// fails with `MissingDependencies` when no robot path is configured, and
/// succeeds once a robot path can supply the missing easyconfig.
#[test]
fn s2_missing_dependency_without_robot_path_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let ec_path = dir.path().join("gzip-1.4-GCC-4.6.3.eb");
    write_file(
        &ec_path,
        r#"
name = 'gzip'
version = '1.4'
homepage = 'https://www.gnu.org/software/gzip/'
description = 'gzip compression utility'
toolchain = {'name': 'GCC', 'version': '4.6.3'}
dependencies = [('GCC', '4.6.3')]
"#,
    );

    let config = base_config(dir.path());
    let tool = fake_modules_tool(dir.path());
    let registry = Registry::new();

    let result = orchestrator::run(RunOptions {
        requested: vec![RequestedEc { path: ec_path, tweaks: vec![] }],
        config: &config,
        modules_tool: &tool,
        registry: &registry,
        is_root: false,
    });

    let err = result.unwrap_err();
    assert!(err.to_string().contains("GCC"), "expected the missing GCC/4.6.3 dependency to be named: {err}");
}

#[test]
fn s2_robot_path_discovers_and_orders_the_missing_dependency() {
    let dir = tempfile::tempdir().unwrap();
    let ec_path = dir.path().join("gzip-1.4-GCC-4.6.3.eb");
    write_file(
        &ec_path,
        r#"
name = 'gzip'
version = '1.4'
homepage = 'https://www.gnu.org/software/gzip/'
description = 'gzip compression utility'
toolchain = {'name': 'GCC', 'version': '4.6.3'}
dependencies = [('GCC', '4.6.3')]
"#,
    );

    let robot_dir = dir.path().join("robot");
    write_file(
        &robot_dir.join("GCC/GCC-4.6.3.eb"),
        r#"
name = 'GCC'
version = '4.6.3'
homepage = 'https://gcc.gnu.org'
description = 'GNU Compiler Collection'
toolchain = SYSTEM
"#,
    );

    let mut config = base_config(dir.path());
    config.robot_paths = vec![robot_dir];
    let tool = fake_modules_tool(dir.path());
    let registry = Registry::new();

    let report = orchestrator::run(RunOptions {
        requested: vec![RequestedEc { path: ec_path, tweaks: vec![] }],
        config: &config,
        modules_tool: &tool,
        registry: &registry,
        is_root: false,
    })
    .unwrap();

    assert_eq!(report.status, RunExitStatus::Success);
    let names: Vec<String> = report.units.iter().map(|u| u.module_id.name.clone()).collect();
    assert_eq!(names, vec!["GCC".to_string(), "gzip".to_string()], "GCC must be ordered before gzip");
    for unit in &report.units {
        assert_eq!(unit.state, PipelineState::Done, "{:?}", unit.error);
    }
}

/// S3: two requested units that depend on each other report a cycle
/// rather than looping forever or silently dropping one of them.
#[test]
fn s3_dependency_cycle_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let a_path = dir.path().join("a-1.0.eb");
    let b_path = dir.path().join("b-1.0.eb");
    write_file(
        &a_path,
        r#"
name = 'a'
version = '1.0'
homepage = 'https://example.org'
description = 'depends on b'
toolchain = SYSTEM
dependencies = [('b', '1.0')]
"#,
    );
    write_file(
        &b_path,
        r#"
name = 'b'
version = '1.0'
homepage = 'https://example.org'
description = 'depends on a'
toolchain = SYSTEM
dependencies = [('a', '1.0')]
"#,
    );

    let config = base_config(dir.path());
    let tool = fake_modules_tool(dir.path());
    let registry = Registry::new();

    let result = orchestrator::run(RunOptions {
        requested: vec![
            RequestedEc { path: a_path, tweaks: vec![] },
            RequestedEc { path: b_path, tweaks: vec![] },
        ],
        config: &config,
        modules_tool: &tool,
        registry: &registry,
        is_root: false,
    });

    assert!(result.is_err(), "a cycle between two requested units must not resolve");
}

/// S4: a corrupted source archive is rejected before EXTRACT ever creates
/// the build directory.
#[test]
fn s4_checksum_mismatch_stops_before_extract() {
    let dir = tempfile::tempdir().unwrap();
    let ec_path = dir.path().join("toy-0.0.eb");
    write_file(
        &ec_path,
        &format!(
            r#"
name = 'toy'
version = '0.0'
homepage = 'https://example.org'
description = 'a toy package'
toolchain = SYSTEM
sources = ['toy-0.0.tar.gz']
checksums = ['{}']
"#,
            "0".repeat(64)
        ),
    );
    write_file(&dir.path().join("sources/toy/toy-0.0.tar.gz"), "not actually a tarball");

    let config = base_config(dir.path());
    let tool = fake_modules_tool(dir.path());
    let registry = Registry::new();

    let report = orchestrator::run(RunOptions {
        requested: vec![RequestedEc { path: ec_path, tweaks: vec![] }],
        config: &config,
        modules_tool: &tool,
        registry: &registry,
        is_root: false,
    })
    .unwrap();

    assert_eq!(report.status, RunExitStatus::Fatal);
    assert_eq!(report.units[0].state, PipelineState::Failed);
    let error = report.units[0].error.as_ref().unwrap();
    assert!(error.to_lowercase().contains("checksum"), "expected a checksum complaint, got: {error}");
    assert!(!config.buildpath.join("toy-0.0").exists(), "the build directory must not be created on a checksum failure");
}

/// S6: sanity-only finds a missing installed artifact with a precise
/// complaint, then a full rerun with `--skip-extensions` succeeds again.
#[test]
fn s6_sanity_only_reports_the_missing_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let install_dir = dir.path().join("install/software/toy/0.0");
    write_file(&install_dir.join("lib/placeholder"), "");
    // `lib/libbarbar.a` is declared but deliberately absent.

    let mut ec = test_support::minimal_ec();
    ec.sanity_check_paths.files.push("lib/libbarbar.a".to_string());

    let mut config = base_config(dir.path());
    config.sanity_check_only = true;
    let tool = fake_modules_tool(dir.path());
    let mns = EasyBuildMns;
    let registry = Registry::new();

    let outcome = pipeline::run(PipelineInputs {
        ec: &ec,
        config: &config,
        modules_tool: &tool,
        mns: &mns,
        registry: &registry,
        resolved_deps: &[],
    });

    assert_eq!(outcome.state, PipelineState::Failed);
    let error = outcome.error.unwrap();
    assert!(error.contains("libbarbar.a"), "expected the sanity failure to name the missing file: {error}");

    // Supply the missing artifact and rerun with --skip-extensions: sanity
    // now passes (module/perms/etc. are still excluded by sanity-check-only).
    write_file(&install_dir.join("lib/libbarbar.a"), "stub archive");
    config.skip_extensions = true;
    let outcome = pipeline::run(PipelineInputs {
        ec: &ec,
        config: &config,
        modules_tool: &tool,
        mns: &mns,
        registry: &registry,
        resolved_deps: &[],
    });
    assert_eq!(outcome.state, PipelineState::Done, "{:?}", outcome.error);
}

/// `--stop=fetch` halts the pipeline in the Stopped† terminal state rather
/// than Done or Failed, without running any later step.
#[test]
fn stop_at_fetch_never_reaches_extract() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.stop = Some(BuildStep::Fetch);
    let tool = fake_modules_tool(dir.path());
    let mns = EasyBuildMns;
    let registry = Registry::new();

    let outcome = pipeline::run(PipelineInputs {
        ec: &test_support::minimal_ec(),
        config: &config,
        modules_tool: &tool,
        mns: &mns,
        registry: &registry,
        resolved_deps: &[],
    });

    assert_eq!(outcome.state, PipelineState::Stopped);
    assert!(!config.buildpath.join("toy-0.0").exists());
}

mod test_support {
    use easybuild::model::{Easyconfig, SanityCheckPaths, Toolchain};
    use std::collections::BTreeMap;

    pub fn minimal_ec() -> Easyconfig {
        Easyconfig {
            name: "toy".to_string(),
            version: "0.0".to_string(),
            version_suffix: String::new(),
            toolchain: Toolchain::system(),
            homepage: "https://example.org".to_string(),
            description: "a toy package".to_string(),
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
}
