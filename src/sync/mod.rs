pub mod entity;
pub mod export;
pub mod job;
pub mod output;
pub mod planner;
pub mod progress;

pub use entity::{EntityKind, SyncAction, SyncEntity};
pub use job::{JobState, JobStats, SyncJob, SyncLog};
pub use progress::SyncProgress;

use crate::classify::{Classification, PathClassifier};
use crate::error::{Result, SyncError};
use crate::filter::IgnoreRules;
use crate::module::ModuleRegistry;
use crate::repository::{RepositoryClient, VfsBackend};
use export::ExportPhase;
use output::SyncEvent;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
    /// Emit NDJSON events on stdout
    pub json: bool,
    /// Target of export points; exports are skipped when unset
    pub webapp_root: Option<PathBuf>,
}

/// Outcome of one sync run
#[derive(Debug)]
pub struct SyncReport {
    pub classification: Classification,
    pub state: JobState,
    pub log: SyncLog,
    pub stats: JobStats,
    /// Job-level failure that aborted execution
    pub error: Option<SyncError>,
    pub duration: Duration,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.state == JobState::Finished && !self.log.has_errors()
    }
}

/// Connects classification, planning, execution and export for one
/// registry and repository. Runs take `&mut self`, so at most one job is
/// active per engine.
pub struct SyncEngine<B: VfsBackend> {
    registry: Arc<ModuleRegistry>,
    ignore: Arc<IgnoreRules>,
    client: RepositoryClient<B>,
    options: SyncOptions,
}

impl<B: VfsBackend> SyncEngine<B> {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        ignore: Arc<IgnoreRules>,
        client: RepositoryClient<B>,
        options: SyncOptions,
    ) -> Self {
        Self {
            registry,
            ignore,
            client,
            options,
        }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn client(&self) -> &RepositoryClient<B> {
        &self.client
    }

    pub fn classify<P: AsRef<Path>>(&self, paths: &[P]) -> Classification {
        PathClassifier::new(&self.registry, &self.ignore).classify(paths)
    }

    /// Classify `paths` and reconcile the result with the repository.
    ///
    /// Only a failed connection attempt is returned as an error; failures
    /// during the job end up in the report next to the log.
    pub async fn sync<P: AsRef<Path>>(
        &mut self,
        paths: &[P],
        progress: &SyncProgress,
    ) -> Result<SyncReport> {
        let start = Instant::now();
        let classification = self.classify(paths);
        for notice in classification.warnings() {
            tracing::warn!("{}", notice);
        }

        if !self.client.is_connected() {
            self.client.connect().await?;
        }
        self.client.clear_cache();

        let job = SyncJob::build(
            &classification.units,
            &self.registry,
            &self.ignore,
            &mut self.client,
        )
        .await;
        let mut job = job.dry_run(self.options.dry_run).with_events(self.options.json);
        if job.state() == JobState::Failed {
            return Ok(SyncReport {
                classification,
                state: JobState::Failed,
                log: job.log().clone(),
                stats: job.stats(),
                error: job.take_error(),
                duration: start.elapsed(),
            });
        }

        let error = job.execute(&mut self.client, progress).await.err();

        if job.state() == JobState::Finished && !job.is_dry_run() {
            if let Some(webapp_root) = &self.options.webapp_root {
                ExportPhase::new(&self.registry, webapp_root)
                    .with_events(self.options.json)
                    .run(&mut job)
                    .await;
            }
        }

        let duration = start.elapsed();
        let stats = job.stats();
        if self.options.json {
            SyncEvent::Summary {
                pushed: stats.pushed,
                pulled: stats.pulled,
                deleted: stats.deleted,
                exported: stats.exported,
                errors: stats.failed,
                bytes_transferred: stats.bytes_transferred,
                duration_secs: duration.as_secs_f64(),
            }
            .emit();
        }

        tracing::info!(
            "Sync {}: {} pushed, {} pulled, {} deleted, {} failed",
            job.state(),
            stats.pushed,
            stats.pulled,
            stats.deleted,
            stats.failed
        );

        Ok(SyncReport {
            classification,
            state: job.state(),
            log: job.log().clone(),
            stats,
            error,
            duration,
        })
    }
}
