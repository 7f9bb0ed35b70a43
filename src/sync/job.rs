use super::entity::{SyncAction, SyncEntity};
use super::output::SyncEvent;
use super::planner::SyncPlanner;
use super::progress::SyncProgress;
use crate::classify::ClassifiedUnit;
use crate::error::{Result, SyncError};
use crate::filter::IgnoreRules;
use crate::module::ModuleRegistry;
use crate::repository::{RepositoryClient, VfsBackend};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Building,
    Executing,
    Finished,
    Cancelled,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Building => "building",
            JobState::Executing => "executing",
            JobState::Finished => "finished",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Text log handed back to the caller, one line per processed entity
#[derive(Debug, Clone, Default)]
pub struct SyncLog {
    lines: Vec<String>,
    has_errors: bool,
}

impl SyncLog {
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn push_error(&mut self, line: impl Into<String>) {
        self.has_errors = true;
        self.lines.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// At least one `ERROR:` line was logged
    pub fn has_errors(&self) -> bool {
        self.has_errors
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl fmt::Display for SyncLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobStats {
    pub pushed: usize,
    pub pulled: usize,
    pub deleted: usize,
    pub failed: usize,
    pub exported: usize,
    pub bytes_transferred: u64,
}

/// An entity that was applied successfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed {
    pub vfs_path: String,
    pub real_path: PathBuf,
    pub action: SyncAction,
    pub is_folder: bool,
}

/// One sync run: Building, then Executing, then a terminal state
#[derive(Debug)]
pub struct SyncJob {
    entities: Vec<SyncEntity>,
    state: JobState,
    log: SyncLog,
    stats: JobStats,
    completed: Vec<Completed>,
    dry_run: bool,
    events: bool,
    error: Option<SyncError>,
}

impl SyncJob {
    pub fn new(entities: Vec<SyncEntity>) -> Self {
        Self {
            entities,
            state: JobState::Building,
            log: SyncLog::default(),
            stats: JobStats::default(),
            completed: Vec::new(),
            dry_run: false,
            events: false,
            error: None,
        }
    }

    /// Build entities for `units`; units that cannot be resolved are logged as errors.
    ///
    /// A job-fatal error while building leaves the job `Failed`, with the
    /// lines logged so far and the error available from `take_error`.
    pub async fn build<B: VfsBackend>(
        units: &[ClassifiedUnit],
        registry: &ModuleRegistry,
        ignore: &IgnoreRules,
        client: &mut RepositoryClient<B>,
    ) -> Self {
        let plan = SyncPlanner::new(registry, ignore).plan(units, client).await;
        let mut job = Self::new(plan.entities);
        for failure in plan.failures {
            job.stats.failed += 1;
            job.log.push_error(format!(
                "ERROR: {}: {}",
                failure.vfs_path,
                single_line(&failure.error)
            ));
        }
        if let Some(e) = plan.aborted {
            tracing::error!("Building the sync job failed: {}", e);
            job.log.push_error(format!("ERROR: {}", single_line(&e)));
            job.state = JobState::Failed;
            job.error = Some(e);
        }
        job
    }

    /// The job-fatal error that failed the build, if any
    pub fn take_error(&mut self) -> Option<SyncError> {
        self.error.take()
    }

    /// Log what would happen without touching either side
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Emit NDJSON events while executing
    pub fn with_events(mut self, events: bool) -> Self {
        self.events = events;
        self
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn log(&self) -> &SyncLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut SyncLog {
        &mut self.log
    }

    pub fn stats(&self) -> JobStats {
        self.stats
    }

    pub fn stats_mut(&mut self) -> &mut JobStats {
        &mut self.stats
    }

    pub fn completed(&self) -> &[Completed] {
        &self.completed
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Entities in execution order: pre-order, skipping folders already on both sides
    pub fn queue(&self) -> Vec<&SyncEntity> {
        execution_order(&self.entities)
    }

    /// Apply every entity in order.
    ///
    /// Cancellation is checked before each entity. Entity-level failures are
    /// logged and the job moves on; a job-fatal error stops it and is
    /// returned, with the log kept up to that point.
    pub async fn execute<B: VfsBackend>(
        &mut self,
        client: &mut RepositoryClient<B>,
        progress: &SyncProgress,
    ) -> Result<()> {
        if self.state != JobState::Building {
            tracing::warn!("Sync job already {}, not executing again", self.state);
            return Ok(());
        }
        self.state = JobState::Executing;

        let entities = std::mem::take(&mut self.entities);
        let queue = execution_order(&entities);

        let total = queue.len();
        progress.start(total);
        if self.events {
            SyncEvent::Start {
                total_entities: total,
                dry_run: self.dry_run,
            }
            .emit();
        }
        tracing::info!("Executing {} entities", total);

        let mut fatal = None;
        for entity in queue {
            if progress.is_cancelled() {
                tracing::info!("Sync cancelled after {} of {} entities", progress.processed(), total);
                self.state = JobState::Cancelled;
                if self.events {
                    SyncEvent::Cancelled {
                        processed: progress.processed(),
                        total,
                    }
                    .emit();
                }
                break;
            }

            progress.set_message(format!("{} {}", entity.action.label(), entity.vfs_path));

            if self.dry_run {
                self.log.push(format!("[dry-run] {}", entity.log_line()));
                progress.advance();
                continue;
            }

            match apply(entity, client).await {
                Ok(bytes) => self.record(entity, bytes),
                Err(e) if e.is_not_found() && entity.action == SyncAction::Pull => {
                    tracing::debug!("{} vanished from the VFS", entity.vfs_path);
                    self.log
                        .push(format!("PULL: {} not found in VFS, nothing to pull", entity.vfs_path));
                }
                Err(e) => {
                    tracing::error!("{} {} failed: {}", entity.action.label(), entity.vfs_path, e);
                    self.stats.failed += 1;
                    self.log.push_error(format!(
                        "ERROR: {}: {} failed: {}",
                        entity.action.label(),
                        entity.vfs_path,
                        single_line(&e)
                    ));
                    if self.events {
                        SyncEvent::Error {
                            path: entity.vfs_path.clone(),
                            error: e.to_string(),
                        }
                        .emit();
                    }
                    if e.is_job_fatal() {
                        fatal = Some(e);
                        break;
                    }
                }
            }
            progress.advance();
        }

        self.entities = entities;
        match fatal {
            Some(e) => {
                self.state = JobState::Failed;
                progress.finish("Sync failed");
                Err(e)
            }
            None => {
                if self.state == JobState::Executing {
                    self.state = JobState::Finished;
                    progress.finish("Sync complete");
                } else {
                    progress.finish("Sync cancelled");
                }
                Ok(())
            }
        }
    }

    fn record(&mut self, entity: &SyncEntity, bytes: u64) {
        self.log.push(entity.log_line());
        self.stats.bytes_transferred += bytes;
        match entity.action {
            SyncAction::Push => self.stats.pushed += 1,
            SyncAction::Pull => self.stats.pulled += 1,
            SyncAction::DeleteRemote | SyncAction::DeleteLocal => self.stats.deleted += 1,
        }

        if self.events {
            let path = entity.vfs_path.clone();
            let event = match entity.action {
                SyncAction::Push => SyncEvent::Push {
                    path,
                    replaced: entity.replace_existing,
                    bytes_transferred: bytes,
                },
                SyncAction::Pull => SyncEvent::Pull {
                    path,
                    replaced: entity.replace_existing,
                    bytes_transferred: bytes,
                },
                SyncAction::DeleteRemote => SyncEvent::Delete { path, local: false },
                SyncAction::DeleteLocal => SyncEvent::Delete { path, local: true },
            };
            event.emit();
        }

        self.completed.push(Completed {
            vfs_path: entity.vfs_path.clone(),
            real_path: entity.real_path.clone(),
            action: entity.action,
            is_folder: entity.is_folder(),
        });
    }
}

fn execution_order(entities: &[SyncEntity]) -> Vec<&SyncEntity> {
    let mut flat = Vec::new();
    for entity in entities {
        entity.flatten(&mut flat);
    }
    flat.retain(|entity| entity.needs_operation());
    flat
}

/// Apply one entity, returning the number of content bytes moved
async fn apply<B: VfsBackend>(entity: &SyncEntity, client: &mut RepositoryClient<B>) -> Result<u64> {
    match entity.action {
        SyncAction::Push => {
            let remote = client.push(entity).await?;
            Ok(remote.size.unwrap_or(0))
        }
        SyncAction::Pull => {
            client.pull(entity).await?;
            Ok(entity.remote.as_ref().and_then(|r| r.size).unwrap_or(0))
        }
        SyncAction::DeleteRemote => {
            client.delete(&entity.vfs_path).await?;
            Ok(0)
        }
        SyncAction::DeleteLocal => {
            delete_local(&entity.real_path).await?;
            Ok(0)
        }
    }
}

async fn delete_local(path: &Path) -> Result<()> {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) if metadata.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SyncError::local_io(path, e)),
    }
}

fn single_line(error: &SyncError) -> String {
    error.to_string().replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleId, SyncMode};
    use crate::repository::memory::MemoryBackend;
    use crate::sync::entity::EntityKind;
    use std::fs;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn entity(vfs: &str, real: PathBuf, action: SyncAction) -> SyncEntity {
        SyncEntity {
            vfs_path: vfs.to_string(),
            real_path: real,
            module: ModuleId::new("demo"),
            remote: None,
            sync_mode: SyncMode::Sync,
            action,
            replace_existing: false,
            kind: EntityKind::File {
                last_modified: SystemTime::now(),
            },
        }
    }

    async fn connected(backend: MemoryBackend) -> RepositoryClient<MemoryBackend> {
        let mut client = RepositoryClient::new(backend);
        client.connect().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("a.txt");
        fs::write(&local, "a").unwrap();

        let backend = MemoryBackend::new();
        let mut client = connected(backend.clone()).await;
        let mut job = SyncJob::new(vec![entity("/a.txt", local, SyncAction::Push)]).dry_run(true);

        job.execute(&mut client, &SyncProgress::new()).await.unwrap();
        assert_eq!(job.log().lines(), ["[dry-run] PUSH: /a.txt pushed to VFS"]);
        assert_eq!(job.state(), JobState::Finished);
        assert!(job.completed().is_empty());
        assert!(backend.journal().is_empty());
    }

    #[tokio::test]
    async fn test_delete_local_file() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("gone.txt");
        fs::write(&local, "x").unwrap();

        let mut client = connected(MemoryBackend::new()).await;
        let mut job = SyncJob::new(vec![entity("/gone.txt", local.clone(), SyncAction::DeleteLocal)]);

        job.execute(&mut client, &SyncProgress::new()).await.unwrap();
        assert!(!local.exists());
        assert_eq!(job.log().lines(), ["DELETE: /gone.txt deleted locally"]);
        assert_eq!(job.stats().deleted, 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let temp = TempDir::new().unwrap();
        let mut client = connected(MemoryBackend::new()).await;
        let mut job = SyncJob::new(vec![entity(
            "/a.txt",
            temp.path().join("a.txt"),
            SyncAction::Push,
        )]);

        let progress = SyncProgress::new();
        progress.cancel();
        job.execute(&mut client, &progress).await.unwrap();
        assert_eq!(job.state(), JobState::Cancelled);
        assert!(job.log().is_empty());
    }

    #[tokio::test]
    async fn test_missing_local_file_is_entity_error() {
        let temp = TempDir::new().unwrap();
        let present = temp.path().join("b.txt");
        fs::write(&present, "b").unwrap();

        let backend = MemoryBackend::new();
        let mut client = connected(backend.clone()).await;
        let mut job = SyncJob::new(vec![
            entity("/a.txt", temp.path().join("a.txt"), SyncAction::Push),
            entity("/b.txt", present, SyncAction::Push),
        ]);

        job.execute(&mut client, &SyncProgress::new()).await.unwrap();
        assert!(job.log().has_errors());
        assert!(job.log().lines()[0].starts_with("ERROR: PUSH: /a.txt failed:"));
        assert_eq!(job.log().lines()[1], "PUSH: /b.txt pushed to VFS");
        assert_eq!(backend.content("/b.txt"), Some(b"b".to_vec()));
    }

    #[tokio::test]
    async fn test_connection_failure_aborts() {
        let temp = TempDir::new().unwrap();
        for name in ["a.txt", "b.txt"] {
            fs::write(temp.path().join(name), name).unwrap();
        }

        let backend = MemoryBackend::new();
        let mut client = connected(backend.clone()).await;
        backend.set_offline(true);

        let mut job = SyncJob::new(vec![
            entity("/a.txt", temp.path().join("a.txt"), SyncAction::Push),
            entity("/b.txt", temp.path().join("b.txt"), SyncAction::Push),
        ]);
        let err = job
            .execute(&mut client, &SyncProgress::new())
            .await
            .unwrap_err();

        assert!(err.is_job_fatal());
        assert!(err.to_string().contains("Is the server running?"));
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.log().len(), 1);
        assert!(job.log().has_errors());
    }

    #[tokio::test]
    async fn test_execute_runs_once() {
        let mut client = connected(MemoryBackend::new()).await;
        let mut job = SyncJob::new(Vec::new());
        job.execute(&mut client, &SyncProgress::new()).await.unwrap();
        assert_eq!(job.state(), JobState::Finished);
        job.execute(&mut client, &SyncProgress::new()).await.unwrap();
        assert_eq!(job.state(), JobState::Finished);
    }
}
