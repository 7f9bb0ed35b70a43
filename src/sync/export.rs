//! Export points: mirror synced VFS resources into the webapp tree.

use super::entity::SyncAction;
use super::job::{Completed, SyncJob};
use super::output::SyncEvent;
use crate::error::SyncError;
use crate::module::ModuleRegistry;
use std::path::{Path, PathBuf};

pub struct ExportPhase<'a> {
    registry: &'a ModuleRegistry,
    webapp_root: PathBuf,
    events: bool,
}

impl<'a> ExportPhase<'a> {
    pub fn new(registry: &'a ModuleRegistry, webapp_root: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            webapp_root: webapp_root.into(),
            events: false,
        }
    }

    pub fn with_events(mut self, events: bool) -> Self {
        self.events = events;
        self
    }

    /// Export every completed entity covered by an export point.
    ///
    /// Pushed and pulled files are copied, deleted resources are removed.
    /// Failures are logged against the job and do not stop the phase.
    pub async fn run(&self, job: &mut SyncJob) {
        let completed = job.completed().to_vec();
        for entity in &completed {
            let Some(point) = self.registry.export_point_for_resource(&entity.vfs_path) else {
                continue;
            };
            let Some(target) = point.target_for(&self.webapp_root, &entity.vfs_path) else {
                continue;
            };

            let removed = entity.action.is_delete();
            if entity.is_folder && !removed {
                continue;
            }

            match export(entity, &target).await {
                Ok(()) => {
                    let verb = if removed { "removed from" } else { "exported to" };
                    job.log_mut().push(format!(
                        "EXPORT: {} {} {}",
                        entity.vfs_path,
                        verb,
                        target.display()
                    ));
                    job.stats_mut().exported += 1;
                    if self.events {
                        SyncEvent::Export {
                            path: entity.vfs_path.clone(),
                            target,
                            removed,
                        }
                        .emit();
                    }
                }
                Err(e) => {
                    tracing::error!("Exporting {} failed: {}", entity.vfs_path, e);
                    job.stats_mut().failed += 1;
                    job.log_mut().push_error(format!(
                        "ERROR: EXPORT: {} failed: {}",
                        entity.vfs_path,
                        e.to_string().replace('\n', " ")
                    ));
                }
            }
        }
    }
}

async fn export(entity: &Completed, target: &Path) -> Result<(), SyncError> {
    match entity.action {
        SyncAction::Push | SyncAction::Pull => {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SyncError::local_io(parent, e))?;
            }
            tokio::fs::copy(&entity.real_path, target)
                .await
                .map_err(|e| SyncError::local_io(&entity.real_path, e))?;
            Ok(())
        }
        SyncAction::DeleteRemote | SyncAction::DeleteLocal => {
            let result = if entity.is_folder {
                tokio::fs::remove_dir_all(target).await
            } else {
                tokio::fs::remove_file(target).await
            };
            match result {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    Err(SyncError::local_io(target, e))
                }
                _ => Ok(()),
            }
        }
    }
}
