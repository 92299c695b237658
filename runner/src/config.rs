use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap, fs, fs::File, io::Error, os::unix::fs::MetadataExt, path::Path,
    path::PathBuf, str::FromStr,
};
use thiserror::Error;
use tracing::{debug, error, warn};

// check if a file is executable
pub fn check_executable(path: &PathBuf) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound)
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: Error,
    },
    #[error("Config is not valid YAML for this runner")]
    Parse(#[from] serde_yaml::Error),
    #[error("Config failed the preflight checks")]
    Preflight,
    #[error("File not found")]
    FileNotFound,
    #[error("Metadata not found")]
    MetadataNotFound(#[from] Error),
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    // how ranks find each other
    #[serde(default)]
    pub group: GroupConfig,
    // per iteration work, each binary brings its own default
    #[serde(default)]
    pub workload: Option<WorkloadConfig>,
    // targets for chained calls
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum GroupConfig {
    /// every rank is a thread of this process
    Local {
        #[serde(default = "default_world_size")]
        world_size: usize,
        #[serde(default)]
        pin_threads: bool,
    },
    /// one process per rank, started by mpirun
    Mpi,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self::Local {
            world_size: default_world_size(),
            pin_threads: false,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum WorkloadConfig {
    AllToAll {
        #[serde(default = "default_chunk_size")]
        chunk_size: usize,
    },
    Chained {
        #[serde(default = "default_chain_target")]
        target: String,
    },
}

impl WorkloadConfig {
    pub fn all_to_all() -> Self {
        Self::AllToAll {
            chunk_size: default_chunk_size(),
        }
    }

    pub fn chained() -> Self {
        Self::Chained {
            target: default_chain_target(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    #[serde(default)]
    pub targets: BTreeMap<String, ChainTarget>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ChainTarget {
    pub exec: PathBuf,
    #[serde(default)]
    pub params: Vec<String>,
    // seconds
    #[serde(default = "default_chain_timeout")]
    pub timeout: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct MigrationConfig {
    // where checkpoint tokens are handed to the resumed rank
    #[serde(default = "default_handoff_dir")]
    pub handoff_dir: PathBuf,
    #[serde(default = "default_max_migrations")]
    pub max_migrations: u32,
    // pre-loaded scheduling decisions
    #[serde(default)]
    pub plan: Vec<PlannedMove>,
    // command used to recreate a migrated rank, supports {host}, {remaining} and {token}
    #[serde(default)]
    pub relaunch: Option<Vec<String>>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            handoff_dir: default_handoff_dir(),
            max_migrations: default_max_migrations(),
            plan: Vec::new(),
            relaunch: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PlannedMove {
    pub rank: usize,
    pub after_iteration: usize,
    pub host: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct ProgressConfig {
    // report every n iterations, defaults to a tenth of the run
    #[serde(default)]
    pub interval: Option<usize>,
}

impl RunnerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let content = fs::read_to_string(path).map_err(|source| ConfigErrors::Read {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = ?path, "Loaded runner config");

        Self::from_str(&content)
    }

    /// workload from the config, or the one the binary was built for
    pub fn workload_or(&self, default: WorkloadConfig) -> WorkloadConfig {
        self.workload.clone().unwrap_or(default)
    }

    /// Check the config for problems, returns true if any was found
    ///
    /// Every problem is logged instead of stopping at the first one.
    pub fn preflight_checks(&mut self, default_workload: &WorkloadConfig) -> bool {
        let mut contains_error = false;
        let workload = self.workload_or(default_workload.clone());

        let world_size = match self.group {
            GroupConfig::Local { world_size, .. } => {
                if world_size == 0 {
                    error!("group.world_size cannot be 0, a group needs at least one rank");
                    contains_error = true;
                }

                Some(world_size)
            }
            // only known once mpirun started the ranks
            GroupConfig::Mpi => None,
        };

        match workload {
            WorkloadConfig::AllToAll { chunk_size } => {
                if chunk_size == 0 {
                    error!("workload.chunk_size cannot be 0");
                    contains_error = true;
                }
            }
            WorkloadConfig::Chained { ref target } => {
                if !self.chain.targets.contains_key(target) {
                    error!("workload.target '{target}' is not defined in chain.targets");
                    contains_error = true;
                }
            }
        }

        for (name, target) in self.chain.targets.iter() {
            if target.timeout == 0 {
                error!("chain.targets.{name}.timeout cannot be 0");
                contains_error = true;
            }

            // bare names are resolved through PATH when spawned
            if target.exec.components().count() == 1 && !target.exec.is_file() {
                debug!("chain.targets.{name}.exec will be looked up in PATH");
                continue;
            }

            match check_executable(&target.exec) {
                Ok(true) => {}
                Ok(false) => {
                    error!(
                        "chain.targets.{name}.exec ({}) is not executable",
                        target.exec.to_string_lossy()
                    );
                    contains_error = true;
                }
                Err(e) => {
                    error!(
                        "Failed to find chain.targets.{name}.exec at {}: {e}",
                        target.exec.to_string_lossy()
                    );
                    contains_error = true;
                }
            }
        }

        if let Some(world_size) = world_size {
            for planned in self.migration.plan.iter() {
                if planned.rank >= world_size {
                    error!(
                        "migration.plan references rank {} but the group only has {world_size} ranks",
                        planned.rank
                    );
                    contains_error = true;
                }
            }
        }

        let duplicated = self
            .migration
            .plan
            .iter()
            .map(|planned| planned.rank)
            .duplicates()
            .collect_vec();
        if !duplicated.is_empty() && self.migration.max_migrations <= 1 {
            warn!(
                "migration.plan moves ranks {duplicated:?} more than once, only the first move per rank will happen"
            );
        }

        if self.migration.max_migrations == 0 && !self.migration.plan.is_empty() {
            warn!("migration.max_migrations is 0, the migration plan will never be applied");
        }

        if let Some(relaunch) = &self.migration.relaunch {
            if relaunch.is_empty() {
                error!("migration.relaunch must contain at least the program to start");
                contains_error = true;
            }
        }

        match (&self.group, &self.migration.relaunch) {
            // the local launcher recreates migrated ranks itself
            (GroupConfig::Local { .. }, Some(_)) => {
                error!("migration.relaunch cannot be used with a local group");
                contains_error = true;
            }
            // nobody would restart a rank that left the world
            (GroupConfig::Mpi, None) if !self.migration.plan.is_empty() => {
                error!("migration.plan on an mpi group needs migration.relaunch");
                contains_error = true;
            }
            _ => {}
        }

        if self.progress.interval == Some(0) {
            warn!("progress.interval cannot be 0, reporting every iteration instead");
            self.progress.interval = Some(1);
        }

        contains_error
    }
}

impl FromStr for RunnerConfig {
    type Err = ConfigErrors;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        Ok(serde_yaml::from_str(content)?)
    }
}

fn default_world_size() -> usize {
    4
}

fn default_chunk_size() -> usize {
    2
}

fn default_chain_target() -> String {
    "main".to_string()
}

fn default_chain_timeout() -> u64 {
    3600
}

fn default_max_migrations() -> u32 {
    1
}

fn default_handoff_dir() -> PathBuf {
    std::env::var("TMPDIR")
        .map(PathBuf::from)
        .unwrap_or(PathBuf::from("/tmp"))
        .join("migrun")
}
