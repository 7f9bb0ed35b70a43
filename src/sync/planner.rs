use super::entity::{EntityKind, SyncAction, SyncEntity};
use crate::classify::ClassifiedUnit;
use crate::error::{Result, SyncError};
use crate::filter::IgnoreRules;
use crate::module::{Module, ModuleRegistry, SyncMode};
use crate::path::{normalize_vfs, vfs_child, vfs_name};
use crate::repository::{to_millis, RemoteObject, RepositoryClient, VfsBackend};
use ignore::WalkBuilder;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A unit or child that could not be resolved while planning
#[derive(Debug)]
pub struct PlanFailure {
    pub vfs_path: String,
    pub error: SyncError,
}

#[derive(Debug, Default)]
pub struct SyncPlan {
    /// Top-level entities in classification order
    pub entities: Vec<SyncEntity>,
    pub failures: Vec<PlanFailure>,
    /// Job-fatal error that stopped planning early
    pub aborted: Option<SyncError>,
}

impl SyncPlan {
    pub fn entity_count(&self) -> usize {
        self.entities.iter().map(SyncEntity::count).sum()
    }
}

#[derive(Debug, Clone, Copy)]
struct LocalState {
    is_dir: bool,
    modified: SystemTime,
}

/// Choose what to do with an entity from its module policy and the
/// modification times of both sides (`None` = side does not exist).
///
/// Times compare at millisecond precision; a SYNC tie pushes.
pub fn decide_action(
    mode: SyncMode,
    local: Option<SystemTime>,
    remote: Option<SystemTime>,
) -> Option<SyncAction> {
    match (local, remote) {
        (None, None) => None,
        (Some(local), Some(remote)) => Some(match mode {
            SyncMode::Push => SyncAction::Push,
            SyncMode::Pull => SyncAction::Pull,
            SyncMode::Sync => {
                if to_millis(remote) > to_millis(local) {
                    SyncAction::Pull
                } else {
                    SyncAction::Push
                }
            }
        }),
        (Some(_), None) => Some(match mode {
            SyncMode::Pull => SyncAction::DeleteLocal,
            SyncMode::Push | SyncMode::Sync => SyncAction::Push,
        }),
        (None, Some(_)) => Some(match mode {
            SyncMode::Push => SyncAction::DeleteRemote,
            SyncMode::Pull | SyncMode::Sync => SyncAction::Pull,
        }),
    }
}

/// Builds sync entities from classified units by resolving each against
/// the local filesystem and the repository.
pub struct SyncPlanner<'a> {
    registry: &'a ModuleRegistry,
    ignore: &'a IgnoreRules,
}

impl<'a> SyncPlanner<'a> {
    pub fn new(registry: &'a ModuleRegistry, ignore: &'a IgnoreRules) -> Self {
        Self { registry, ignore }
    }

    /// Build one entity tree per unit.
    ///
    /// Errors are recorded as a failure of the affected unit and planning
    /// continues. A job-fatal error stops planning and is kept in
    /// `aborted`, together with everything planned before it.
    pub async fn plan<B: VfsBackend>(
        &self,
        units: &[ClassifiedUnit],
        client: &mut RepositoryClient<B>,
    ) -> SyncPlan {
        let mut plan = SyncPlan::default();

        for unit in units {
            let Some(module) = self.registry.get(&unit.module_id()) else {
                tracing::warn!("Module {} is no longer registered, skipping", unit.module_id());
                continue;
            };
            let vfs_path = normalize_vfs(unit.vfs_path());
            let real_path = unit.local_path(module);

            let remote = match client.get_object(&vfs_path).await {
                Ok(remote) => remote,
                Err(e) if e.is_job_fatal() => {
                    plan.aborted = Some(e);
                    break;
                }
                Err(error) => {
                    plan.failures.push(PlanFailure { vfs_path, error });
                    continue;
                }
            };

            let built = self
                .build(module, vfs_path.clone(), real_path, remote, client, &mut plan.failures)
                .await;
            match built {
                Ok(Some(entity)) => plan.entities.push(entity),
                Ok(None) => tracing::debug!("{} exists on neither side, nothing to sync", vfs_path),
                Err(e) if e.is_job_fatal() => {
                    plan.aborted = Some(e);
                    break;
                }
                Err(error) => plan.failures.push(PlanFailure { vfs_path, error }),
            }
        }

        tracing::info!(
            "Planned {} entities ({} failure(s))",
            plan.entity_count(),
            plan.failures.len()
        );
        plan
    }

    fn build<'b, B: VfsBackend + 'b>(
        &'b self,
        module: &'b Module,
        vfs_path: String,
        real_path: PathBuf,
        remote: Option<RemoteObject>,
        client: &'b mut RepositoryClient<B>,
        failures: &'b mut Vec<PlanFailure>,
    ) -> BoxFuture<'b, Result<Option<SyncEntity>>> {
        Box::pin(async move {
            let local = local_state(&real_path).await?;
            let remote_time = remote.as_ref().map(|r| r.last_modified);
            let Some(mut action) =
                decide_action(module.sync_mode, local.map(|l| l.modified), remote_time)
            else {
                return Ok(None);
            };

            let is_folder = local
                .map(|l| l.is_dir)
                .or_else(|| remote.as_ref().map(RemoteObject::is_folder))
                .unwrap_or(false);
            let replace_existing = local.is_some() && remote.is_some();

            // Folder timestamps change with their content and say nothing about direction
            if is_folder && replace_existing {
                action = match module.sync_mode {
                    SyncMode::Pull => SyncAction::Pull,
                    SyncMode::Push | SyncMode::Sync => SyncAction::Push,
                };
            }

            let kind = if is_folder {
                let mut children = Vec::new();

                // Deleted folders go as a whole
                if !action.is_delete() {
                    let mut names: BTreeMap<String, Option<RemoteObject>> = BTreeMap::new();
                    if local.is_some_and(|l| l.is_dir) {
                        for name in list_local(&real_path)? {
                            names.insert(name, None);
                        }
                    }
                    if let Some(folder) = remote.as_ref().filter(|r| r.is_folder()) {
                        for child in client.children(folder).await? {
                            names.insert(vfs_name(&child.path).to_string(), Some(child));
                        }
                    }

                    for (name, child_remote) in names {
                        let child_real = real_path.join(&name);
                        if self.ignore.is_ignored(&child_real) {
                            tracing::debug!("Ignoring {}", child_real.display());
                            continue;
                        }
                        let child_vfs = vfs_child(&vfs_path, &name);
                        let built = self
                            .build(
                                module,
                                child_vfs.clone(),
                                child_real,
                                child_remote,
                                &mut *client,
                                &mut *failures,
                            )
                            .await;
                        match built {
                            Ok(Some(child)) => children.push(child),
                            Ok(None) => {}
                            Err(e) if e.is_job_fatal() => return Err(e),
                            Err(error) => failures.push(PlanFailure {
                                vfs_path: child_vfs,
                                error,
                            }),
                        }
                    }
                }
                EntityKind::Folder { children }
            } else {
                EntityKind::File {
                    last_modified: local
                        .map(|l| l.modified)
                        .or(remote_time)
                        .unwrap_or(UNIX_EPOCH),
                }
            };

            Ok(Some(SyncEntity {
                replace_existing,
                vfs_path,
                real_path,
                module: module.id.clone(),
                remote,
                sync_mode: module.sync_mode,
                action,
                kind,
            }))
        })
    }
}

async fn local_state(path: &Path) -> Result<Option<LocalState>> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(Some(LocalState {
            is_dir: metadata.is_dir(),
            modified: metadata
                .modified()
                .map_err(|e| SyncError::local_io(path, e))?,
        })),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SyncError::local_io(path, e)),
    }
}

/// Names of the direct children of a local folder, sorted
fn list_local(dir: &Path) -> Result<Vec<String>> {
    let walker = WalkBuilder::new(dir)
        .max_depth(Some(1))
        .standard_filters(false)
        .build();

    let mut names = Vec::new();
    for result in walker {
        let entry = result.map_err(|e| {
            SyncError::local_io(dir, std::io::Error::other(e.to_string()))
        })?;
        if entry.depth() == 0 {
            continue;
        }
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}
