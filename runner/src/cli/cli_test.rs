use super::{
    execute, execute_with, parse_args, run, Entry, FAILURE_EXIT_CODE, USAGE_EXIT_CODE,
};
use crate::{
    checkpoint::{store::HandoffStore, MigrationCheckpoint, ResumeHandle},
    driver::RunError,
    world::{IterationState, WorldContext},
};
use std::{fs, path::Path};

fn write_config(dir: &Path, content: &str) -> String {
    let path = dir.join("runner.yaml");
    fs::write(&path, content).unwrap();

    path.to_string_lossy().into_owned()
}

#[test]
pub fn single_positive_argument_is_accepted() {
    let cli = parse_args(Entry::AllToAll, ["mpi-migrate", "100"]).unwrap();

    assert_eq!(cli.iterations, 100);
    assert_eq!(cli.config, None);
}

#[test]
pub fn config_flag_is_optional() {
    let cli = parse_args(Entry::Chained, ["lammps-migrate", "--config", "run.yaml", "5"]).unwrap();

    assert_eq!(cli.iterations, 5);
    assert_eq!(cli.config.unwrap().to_string_lossy(), "run.yaml");
}

#[test]
pub fn wrong_argument_counts_are_rejected() {
    assert!(parse_args(Entry::AllToAll, ["mpi-migrate"]).is_err());
    assert!(parse_args(Entry::AllToAll, ["mpi-migrate", "10", "20"]).is_err());
}

#[test]
pub fn non_positive_or_garbage_counts_are_rejected() {
    for value in ["0", "-3", "ten", "1.5", ""] {
        assert!(
            parse_args(Entry::Chained, ["lammps-migrate", value]).is_err(),
            "{value:?} should be rejected"
        );
    }
}

#[test]
pub fn usage_errors_exit_with_one() {
    assert_eq!(execute(Entry::AllToAll, ["mpi-migrate"]), USAGE_EXIT_CODE);
    assert_eq!(
        execute(Entry::AllToAll, ["mpi-migrate", "1", "2"]),
        USAGE_EXIT_CODE
    );
    assert_eq!(execute(Entry::Chained, ["lammps-migrate", "0"]), USAGE_EXIT_CODE);
}

#[test]
pub fn usage_errors_never_reach_the_group() {
    for args in [
        vec!["mpi-migrate"],
        vec!["mpi-migrate", "1", "2"],
        vec!["mpi-migrate", "0"],
        vec!["mpi-migrate", "-4"],
    ] {
        let mut started = 0;

        let code = execute_with(Entry::AllToAll, args.clone(), |_, _, _| {
            started += 1;
            Ok(())
        });

        assert_eq!(code, USAGE_EXIT_CODE, "{args:?}");
        assert_eq!(started, 0, "{args:?} started a run");
    }
}

#[test]
pub fn valid_arguments_start_exactly_one_run() {
    let mut totals = Vec::new();

    let code = execute_with(Entry::Chained, ["lammps-migrate", "12"], |entry, cli, resume| {
        assert_eq!(entry, Entry::Chained);
        assert!(resume.is_none());
        totals.push(cli.iterations);
        Ok(())
    });

    assert_eq!(code, 0);
    assert_eq!(totals, vec![12]);
}

#[test]
pub fn run_errors_map_to_exit_codes() {
    assert_eq!(
        execute_with(Entry::AllToAll, ["mpi-migrate", "3"], |_, _, _| Err(
            RunError::Usage("bad".to_string())
        )),
        USAGE_EXIT_CODE
    );
    assert_eq!(
        execute_with(Entry::AllToAll, ["mpi-migrate", "3"], |_, _, _| Err(
            RunError::CollectiveMismatch {
                rank: 0,
                slot: 1,
                expected: 2,
                actual: 3
            }
        )),
        FAILURE_EXIT_CODE
    );
}

#[test]
pub fn local_world_leaves_a_resume_token_alone() {
    let dir = tempfile::tempdir().unwrap();
    let token = MigrationCheckpoint::new("run-cli", ResumeHandle::AllToAll { chunk_size: 2 })
        .evaluate(
            &IterationState::resumed(10, 4),
            &WorldContext {
                rank: 0,
                world_size: 4,
                host: "node-a".to_string(),
            },
        )
        .relocated();
    let path = HandoffStore::new(dir.path()).put(&token).unwrap();
    let cli = parse_args(Entry::AllToAll, ["mpi-migrate", "4"]).unwrap();

    assert!(matches!(
        run(Entry::AllToAll, &cli, Some(&path)),
        Err(RunError::Usage(_))
    ));
    assert_eq!(HandoffStore::take(&path).unwrap(), token);
}

#[test]
pub fn default_all_to_all_run_succeeds() {
    assert_eq!(execute(Entry::AllToAll, ["mpi-migrate", "25"]), 0);
}

#[test]
pub fn single_iteration_run_succeeds() {
    assert_eq!(execute(Entry::AllToAll, ["mpi-migrate", "1"]), 0);
}

#[test]
pub fn chained_run_with_migrations_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        &format!(
            "
group:
  kind: local
  world_size: 2
workload:
  kind: chained
  target: step
chain:
  targets:
    step:
      exec: \"true\"
      timeout: 30
migration:
  handoff_dir: {}
  plan:
    - rank: 0
      after_iteration: 1
      host: node-b
    - rank: 1
      after_iteration: 0
      host: node-c
",
            dir.path().join("handoff").display()
        ),
    );

    assert_eq!(
        execute(Entry::Chained, ["lammps-migrate", "4", "--config", &config]),
        0
    );
}

#[test]
pub fn failing_chained_step_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        "
group:
  kind: local
  world_size: 3
chain:
  targets:
    main:
      exec: \"false\"
",
    );

    assert_eq!(
        execute(Entry::Chained, ["lammps-migrate", "3", "--config", &config]),
        FAILURE_EXIT_CODE
    );
}

#[test]
pub fn chained_entry_needs_a_target() {
    // default workload targets `main`, which is not registered
    assert_eq!(execute(Entry::Chained, ["lammps-migrate", "3"]), FAILURE_EXIT_CODE);
}

#[test]
pub fn missing_config_file_fails() {
    assert_eq!(
        execute(
            Entry::AllToAll,
            ["mpi-migrate", "3", "--config", "/nonexistent/migrun.yaml"]
        ),
        FAILURE_EXIT_CODE
    );
}

#[cfg(not(feature = "mpi"))]
#[test]
pub fn mpi_group_needs_the_feature() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "group:\n  kind: mpi\n");

    assert_eq!(
        execute(Entry::AllToAll, ["mpi-migrate", "3", "--config", &config]),
        FAILURE_EXIT_CODE
    );
}
