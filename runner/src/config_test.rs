use crate::config::{GroupConfig, RunnerConfig, WorkloadConfig};
use std::{fs, os::unix::fs::PermissionsExt, str::FromStr};

fn parse(content: &str) -> RunnerConfig {
    RunnerConfig::from_str(content).unwrap()
}

#[test]
pub fn empty_config_uses_defaults() {
    let config = parse("{}");

    assert_eq!(
        config.group,
        GroupConfig::Local {
            world_size: 4,
            pin_threads: false
        }
    );
    assert_eq!(config.workload, None);
    assert_eq!(config.migration.max_migrations, 1);
    assert!(config.migration.plan.is_empty());
    assert!(config.migration.handoff_dir.ends_with("migrun"));
    assert_eq!(config.progress.interval, None);
}

#[test]
pub fn tagged_sections_are_parsed() {
    let config = parse(
        "
group:
  kind: mpi
workload:
  kind: all-to-all
  chunk_size: 3
chain:
  targets:
    md:
      exec: /usr/bin/env
      params: [\"-i\"]
migration:
  max_migrations: 2
  plan:
    - rank: 1
      after_iteration: 4
      host: node-b
  relaunch: [ssh, \"{host}\", mpi-migrate, \"{remaining}\"]
progress:
  interval: 5
",
    );

    assert_eq!(config.group, GroupConfig::Mpi);
    assert_eq!(
        config.workload,
        Some(WorkloadConfig::AllToAll { chunk_size: 3 })
    );
    assert_eq!(config.chain.targets["md"].params, vec!["-i".to_string()]);
    assert_eq!(config.chain.targets["md"].timeout, 3600);
    assert_eq!(config.migration.plan[0].host, "node-b");
    assert_eq!(config.migration.relaunch.as_ref().unwrap().len(), 4);
    assert_eq!(config.progress.interval, Some(5));
}

#[test]
pub fn workload_defaults_per_kind() {
    assert_eq!(
        parse("workload:\n  kind: chained\n").workload,
        Some(WorkloadConfig::chained())
    );
    assert_eq!(
        parse("workload:\n  kind: all-to-all\n").workload,
        Some(WorkloadConfig::all_to_all())
    );
}

#[test]
pub fn unknown_fields_are_rejected() {
    assert!(RunnerConfig::from_str("migrations: {}\n").is_err());
    assert!(RunnerConfig::from_str("group:\n  kind: local\n  ranks: 2\n").is_err());
    assert!(RunnerConfig::from_str("workload:\n  kind: gather\n").is_err());
}

#[test]
pub fn missing_file_is_a_read_error() {
    assert!(RunnerConfig::load(std::path::Path::new("/nonexistent/migrun.yaml")).is_err());
}

#[test]
pub fn defaults_pass_preflight() {
    let mut config = RunnerConfig::default();

    assert!(!config.preflight_checks(&WorkloadConfig::all_to_all()));
}

#[test]
pub fn empty_group_fails_preflight() {
    let mut config = parse("group:\n  kind: local\n  world_size: 0\n");

    assert!(config.preflight_checks(&WorkloadConfig::all_to_all()));
}

#[test]
pub fn zero_chunk_fails_preflight() {
    let mut config = parse("workload:\n  kind: all-to-all\n  chunk_size: 0\n");

    assert!(config.preflight_checks(&WorkloadConfig::chained()));
}

#[test]
pub fn chained_workload_needs_its_target() {
    let mut missing = RunnerConfig::default();
    let mut present = parse("chain:\n  targets:\n    main:\n      exec: \"true\"\n");

    assert!(missing.preflight_checks(&WorkloadConfig::chained()));
    assert!(!present.preflight_checks(&WorkloadConfig::chained()));
}

#[test]
pub fn chain_targets_must_be_executable() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("step.sh");
    fs::write(&script, "#!/bin/sh\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();

    let content = format!(
        "chain:\n  targets:\n    main:\n      exec: {}\n",
        script.display()
    );

    assert!(parse(&content).preflight_checks(&WorkloadConfig::chained()));

    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    assert!(!parse(&content).preflight_checks(&WorkloadConfig::chained()));
}

#[test]
pub fn missing_chain_executable_fails_preflight() {
    let mut config =
        parse("chain:\n  targets:\n    main:\n      exec: /nonexistent/lmp\n");

    assert!(config.preflight_checks(&WorkloadConfig::chained()));
}

#[test]
pub fn zero_timeout_fails_preflight() {
    let mut config =
        parse("chain:\n  targets:\n    main:\n      exec: \"true\"\n      timeout: 0\n");

    assert!(config.preflight_checks(&WorkloadConfig::chained()));
}

#[test]
pub fn plan_cannot_name_ranks_outside_the_group() {
    let mut config = parse(
        "
group:
  kind: local
  world_size: 2
migration:
  plan:
    - rank: 2
      after_iteration: 0
      host: node-b
",
    );

    assert!(config.preflight_checks(&WorkloadConfig::all_to_all()));
}

#[test]
pub fn repeated_moves_only_warn() {
    let mut config = parse(
        "
migration:
  plan:
    - rank: 0
      after_iteration: 0
      host: node-b
    - rank: 0
      after_iteration: 3
      host: node-c
",
    );

    assert!(!config.preflight_checks(&WorkloadConfig::all_to_all()));
}

#[test]
pub fn mpi_group_skips_rank_bounds() {
    let mut config = parse(
        "
group:
  kind: mpi
migration:
  plan:
    - rank: 64
      after_iteration: 0
      host: node-b
  relaunch: [mpi-migrate, \"{remaining}\"]
",
    );

    assert!(!config.preflight_checks(&WorkloadConfig::all_to_all()));
}

#[test]
pub fn mpi_plan_needs_a_relaunch() {
    let mut config = parse(
        "
group:
  kind: mpi
migration:
  plan:
    - rank: 0
      after_iteration: 0
      host: node-b
",
    );

    assert!(config.preflight_checks(&WorkloadConfig::all_to_all()));
}

#[test]
pub fn local_group_rejects_relaunch() {
    let mut config = parse(
        "
group:
  kind: local
  world_size: 2
migration:
  relaunch: [mpi-migrate, \"{remaining}\"]
",
    );

    assert!(config.preflight_checks(&WorkloadConfig::all_to_all()));
}

#[test]
pub fn empty_relaunch_fails_preflight() {
    let mut config = parse("group:\n  kind: mpi\nmigration:\n  relaunch: []\n");

    assert!(config.preflight_checks(&WorkloadConfig::all_to_all()));
}

#[test]
pub fn zero_progress_interval_is_clamped() {
    let mut config = parse("progress:\n  interval: 0\n");

    assert!(!config.preflight_checks(&WorkloadConfig::all_to_all()));
    assert_eq!(config.progress.interval, Some(1));
}
