#[cfg(test)]
mod cli_test;

use crate::{
    checkpoint::{store::RESUME_TOKEN_ENV, ResumeHandle},
    config::{ConfigErrors, GroupConfig, RunnerConfig, WorkloadConfig},
    driver::RunError,
    launch::LocalLauncher,
    workload::Workloads,
};
use clap::{error::ErrorKind, CommandFactory, FromArgMatches, Parser};
use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

pub const USAGE_EXIT_CODE: u8 = 1;
pub const FAILURE_EXIT_CODE: u8 = 1;

/// Run an iterative benchmark whose ranks may migrate between iterations
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(author, version, about)]
pub struct Cli {
    /// Total number of iterations
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub iterations: u64,

    /// YAML file with group, workload, chain and migration settings
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

/// The two entry points, they only differ in naming and their default workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    AllToAll,
    Chained,
}

impl Entry {
    pub fn binary(&self) -> &'static str {
        match self {
            Self::AllToAll => "mpi-migrate",
            Self::Chained => "lammps-migrate",
        }
    }

    fn value_name(&self) -> &'static str {
        match self {
            Self::AllToAll => "NUM_LOOPS",
            Self::Chained => "CHECK_PERIOD",
        }
    }

    pub fn default_workload(&self) -> WorkloadConfig {
        match self {
            Self::AllToAll => WorkloadConfig::all_to_all(),
            Self::Chained => WorkloadConfig::chained(),
        }
    }

    fn announce(&self, total: usize) -> String {
        match self {
            Self::AllToAll => format!("Starting MPI migration with {total} loops!"),
            Self::Chained => format!("Running {total} chained simulations"),
        }
    }

    fn finished(&self) -> &'static str {
        match self {
            Self::AllToAll => "MPI migration benchmark finished successfully",
            Self::Chained => "MPI chained simulation benchmark finished successfully",
        }
    }
}

/// Parse the command line of `entry`, every problem is a usage error
pub fn parse_args<I, T>(entry: Entry, args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = Cli::command()
        .name(entry.binary())
        .mut_arg("iterations", |arg| arg.value_name(entry.value_name()))
        .try_get_matches_from(args)?;

    Cli::from_arg_matches(&matches)
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // a second initialization only happens in tests
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}

/// Run an entry point with the given arguments and return the exit code
pub fn execute<I, T>(entry: Entry, args: I) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    execute_with(entry, args, run)
}

// arguments are fully validated before `runner` joins or creates a group
fn execute_with<I, T, R>(entry: Entry, args: I, runner: R) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    R: FnOnce(Entry, &Cli, Option<&Path>) -> Result<(), RunError>,
{
    let cli = match parse_args(entry, args) {
        Ok(cli) => cli,
        Err(error) => {
            return match error.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    let _ = error.print();
                    0
                }
                _ => {
                    // no group was joined yet
                    let _ = error.print();
                    USAGE_EXIT_CODE
                }
            };
        }
    };

    let resume_path = env::var_os(RESUME_TOKEN_ENV).map(PathBuf::from);

    match runner(entry, &cli, resume_path.as_deref()) {
        Ok(()) => 0,
        Err(RunError::Usage(message)) => {
            error!("{message}");
            USAGE_EXIT_CODE
        }
        Err(error) => {
            error!(error = ?error, "{} failed: {error}", entry.binary());
            FAILURE_EXIT_CODE
        }
    }
}

fn load_config(entry: Entry, path: Option<&Path>) -> Result<RunnerConfig, RunError> {
    let mut config = match path {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::default(),
    };

    if config.preflight_checks(&entry.default_workload()) {
        return Err(ConfigErrors::Preflight.into());
    }

    Ok(config)
}

/// Run a full logical run (or the rest of one) for `entry`
pub fn run(entry: Entry, cli: &Cli, resume_path: Option<&Path>) -> Result<(), RunError> {
    let total = usize::try_from(cli.iterations)
        .map_err(|_| RunError::Usage(format!("{} iterations is too many", cli.iterations)))?;
    let config = load_config(entry, cli.config.as_deref())?;
    let workload = config.workload_or(entry.default_workload());
    let handle = ResumeHandle::from(&workload);

    let factory = |handle: &ResumeHandle| {
        Workloads::load(&WorkloadConfig::from(handle), &config.chain)
    };

    match config.group {
        GroupConfig::Local {
            world_size,
            pin_threads,
        } => {
            // the token stays where it is for a correctly configured relaunch
            if let Some(path) = resume_path {
                return Err(RunError::Usage(format!(
                    "{RESUME_TOKEN_ENV}={} needs an mpi group, a local world resumes in-process",
                    path.display()
                )));
            }

            info!("{}", entry.announce(total));

            let reports = LocalLauncher::new(world_size, &config)
                .pin_threads(pin_threads)
                .launch(total, handle, factory)?;

            for report in reports.iter() {
                info!(
                    rank = report.rank,
                    host = %report.host,
                    executed = report.executed,
                    migrations = report.migrations,
                    "Rank finished in {} ms",
                    report.elapsed.as_millis()
                );
            }

            info!("{}", entry.finished());

            Ok(())
        }
        GroupConfig::Mpi => run_mpi(entry, &config, total, handle, resume_path, factory),
    }
}

#[cfg(feature = "mpi")]
fn run_mpi<F>(
    entry: Entry,
    config: &RunnerConfig,
    total: usize,
    handle: ResumeHandle,
    resume: Option<&Path>,
    factory: F,
) -> Result<(), RunError>
where
    F: Fn(&ResumeHandle) -> Workloads,
{
    use crate::launch::mpi::{run_rank, MpiExit};

    if resume.is_none() {
        info!("{}", entry.announce(total));
    }

    match run_rank(config, total, handle, resume, factory)? {
        MpiExit::Completed(report) => {
            info!(
                rank = report.rank,
                executed = report.executed,
                "Rank finished in {} ms",
                report.elapsed.as_millis()
            );

            if report.rank == 0 {
                info!("{}", entry.finished());
            }
        }
        MpiExit::Migrated { host } => {
            info!("Rank continues on {host}, leaving this process");
        }
    }

    Ok(())
}

#[cfg(not(feature = "mpi"))]
fn run_mpi<F>(
    entry: Entry,
    _config: &RunnerConfig,
    _total: usize,
    _handle: ResumeHandle,
    _resume: Option<&Path>,
    _factory: F,
) -> Result<(), RunError>
where
    F: Fn(&ResumeHandle) -> Workloads,
{
    warn!("{} was built without the `mpi` feature", entry.binary());

    Err(RunError::Initialization(
        crate::collective::CollectiveError::Initialization(
            "group kind `mpi` needs a build with the `mpi` feature".to_string(),
        ),
    ))
}
