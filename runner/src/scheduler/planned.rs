use super::{MigrationError, MigrationOutcome, MigrationScheduler};
use crate::{
    checkpoint::{
        store::{HandoffStore, RESUME_TOKEN_ENV},
        CheckpointToken,
    },
    config::{MigrationConfig, PlannedMove},
};
use std::{
    path::Path,
    process::{Child, Command, Stdio},
    thread,
};
use tracing::{debug, info, warn};

/// Scheduler driven by pre-loaded decisions: move `rank` to `host` once iteration
/// `after_iteration` finished everywhere
#[derive(Debug, Clone)]
pub struct PlannedScheduler {
    plan: Vec<PlannedMove>,
    max_migrations: u32,
    store: HandoffStore,
    relaunch: Option<Vec<String>>,
}

impl PlannedScheduler {
    pub fn load(config: &MigrationConfig) -> Self {
        Self {
            plan: config.plan.clone(),
            max_migrations: config.max_migrations,
            store: HandoffStore::new(&config.handoff_dir),
            relaunch: config.relaunch.clone(),
        }
    }

    pub fn store(&self) -> &HandoffStore {
        &self.store
    }

    fn planned_move(&self, token: &CheckpointToken) -> Option<&PlannedMove> {
        // index of the iteration that just finished
        let finished = token.next_index().checked_sub(1)?;

        self.plan.iter().find(|planned| {
            planned.rank == token.origin.rank && planned.after_iteration == finished
        })
    }

    fn relaunch(
        &self,
        host: &str,
        token: &CheckpointToken,
        token_path: &Path,
    ) -> Result<(), MigrationError> {
        let template = match &self.relaunch {
            Some(template) => template,
            None => {
                debug!(host, "No relaunch command configured, the rank is restarted externally");

                return Ok(());
            }
        };

        let token_display = token_path.to_string_lossy();
        let command = template
            .iter()
            .map(|part| {
                part.replace("{host}", host)
                    .replace("{remaining}", &token.remaining.to_string())
                    .replace("{token}", &token_display)
            })
            .collect::<Vec<_>>();

        let (program, args) = match command.split_first() {
            Some(split) => split,
            None => return Ok(()),
        };

        match Command::new(program)
            .args(args)
            .env(RESUME_TOKEN_ENV, token_path)
            .stdin(Stdio::null())
            .spawn()
        {
            Ok(child) => {
                info!(host, pid = child.id(), "Relaunched rank {}", token.origin.rank);
                reap(child, host.to_string());

                Ok(())
            }
            Err(source) => Err(MigrationError::Relaunch {
                host: host.to_string(),
                command,
                source,
            }),
        }
    }
}

// waits for the relaunch and logs how it ended
fn reap(mut child: Child, host: String) {
    let pid = child.id();
    let spawned = thread::Builder::new()
        .name(format!("relaunch-{pid}"))
        .spawn(move || match child.wait() {
            Ok(status) if status.success() => debug!(pid, host = %host, "Relaunch exited"),
            Ok(status) => warn!(pid, host = %host, status = ?status, "Relaunch failed"),
            Err(error) => warn!(pid, host = %host, error = ?error, "Failed to wait for relaunch"),
        });

    if let Err(error) = spawned {
        warn!(pid, error = ?error, "Failed to watch relaunch, its exit status is lost");
    }
}

impl MigrationScheduler for PlannedScheduler {
    fn maybe_migrate(
        &mut self,
        token: &CheckpointToken,
    ) -> Result<MigrationOutcome, MigrationError> {
        if token.remaining == 0 {
            return Ok(MigrationOutcome::Stay);
        }

        let host = match self.planned_move(token) {
            Some(planned) => planned.host.clone(),
            None => return Ok(MigrationOutcome::Stay),
        };

        if token.generation >= self.max_migrations {
            warn!(
                rank = token.origin.rank,
                generation = token.generation,
                "Ignoring migration to {host}, the run already migrated {} time(s)",
                token.generation
            );

            return Ok(MigrationOutcome::Stay);
        }

        let relocated = token.relocated();
        let token_path = self.store.put(&relocated)?;

        info!(
            rank = token.origin.rank,
            from = %token.origin.host,
            to = %host,
            remaining = token.remaining,
            "Migrating rank"
        );

        self.relaunch(&host, &relocated, &token_path)?;

        Ok(MigrationOutcome::Migrated {
            host,
            token: relocated,
            token_path,
        })
    }
}
