use super::CheckpointToken;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("Failed to access hand-off file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Checkpoint token could not be (de)serialized")]
    Format(#[from] serde_yaml::Error),
    #[error(
        "Token in {path:?} carries {found} remaining iterations, the relaunch asked for {expected}"
    )]
    RemainingMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
}

/// environment variable pointing a relaunched rank at its checkpoint token
pub const RESUME_TOKEN_ENV: &str = "MIGRUN_RESUME_TOKEN";

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> HandoffError + '_ {
    move |source| HandoffError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Directory where migrating ranks leave their checkpoint token for the resumed instance
#[derive(Debug, Clone)]
pub struct HandoffStore {
    dir: PathBuf,
}

impl HandoffStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, run_id: &str, rank: usize) -> PathBuf {
        self.dir.join(format!("{run_id}-rank{rank}.yaml"))
    }

    /// Write the token so that readers either see all of it or nothing
    pub fn put(&self, token: &CheckpointToken) -> Result<PathBuf, HandoffError> {
        fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;

        let path = self.path_for(&token.run_id, token.origin.rank);
        let mut staging = path.clone();
        staging.set_extension("yaml.partial");

        let content = serde_yaml::to_string(token)?;
        fs::write(&staging, content).map_err(io_error(&staging))?;

        // rename(2) is atomic on the same file system
        if let Err(source) = fs::rename(&staging, &path) {
            error!(error = ?source, path = ?path, "Failed to publish checkpoint token");

            return Err(HandoffError::Io { path, source });
        }

        debug!(path = ?path, remaining = token.remaining, "Published checkpoint token");

        Ok(path)
    }

    /// Read a published token and remove it, a token is consumed exactly once
    pub fn take(path: &Path) -> Result<CheckpointToken, HandoffError> {
        let token = Self::read(path)?;
        Self::consume(path, &token)?;

        Ok(token)
    }

    /// `take`, but also check the token against the iteration count the rank was relaunched with
    ///
    /// A rejected token stays in place for a corrected relaunch.
    pub fn take_expecting(path: &Path, remaining: usize) -> Result<CheckpointToken, HandoffError> {
        let token = Self::read_expecting(path, remaining)?;
        Self::consume(path, &token)?;

        Ok(token)
    }

    /// read and check a token without consuming it
    pub fn read_expecting(path: &Path, remaining: usize) -> Result<CheckpointToken, HandoffError> {
        let token = Self::read(path)?;

        if token.remaining != remaining {
            return Err(HandoffError::RemainingMismatch {
                path: path.to_path_buf(),
                expected: remaining,
                found: token.remaining,
            });
        }

        Ok(token)
    }

    fn read(path: &Path) -> Result<CheckpointToken, HandoffError> {
        let content = fs::read_to_string(path).map_err(io_error(path))?;

        Ok(serde_yaml::from_str::<CheckpointToken>(&content)?)
    }

    /// remove a token once the resumed instance accepted it
    pub fn consume(path: &Path, token: &CheckpointToken) -> Result<(), HandoffError> {
        fs::remove_file(path).map_err(io_error(path))?;
        debug!(path = ?path, remaining = token.remaining, "Consumed checkpoint token");

        Ok(())
    }
}
