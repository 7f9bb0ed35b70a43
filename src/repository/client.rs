use super::{mime_type_for, RemoteObject, VfsBackend};
use crate::error::{Result, SyncError};
use crate::path::{is_under, normalize_vfs, vfs_name, vfs_parent};
use crate::sync::entity::{EntityKind, SyncEntity};
use filetime::FileTime;
use std::collections::HashMap;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Stateful session with one repository endpoint.
///
/// Not safe for concurrent use by several jobs; the running job owns it.
pub struct RepositoryClient<B: VfsBackend> {
    backend: B,
    connected: bool,
    cache: HashMap<String, RemoteObject>,
}

impl<B: VfsBackend> RepositoryClient<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            connected: false,
            cache: HashMap::new(),
        }
    }

    /// Open the session; on failure the client stays disconnected
    pub async fn connect(&mut self) -> Result<()> {
        match self.backend.connect().await {
            Ok(()) => {
                tracing::debug!("Connected to repository");
                self.connected = true;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Connecting to the repository failed: {}", e);
                self.connected = false;
                Err(e)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Discard cached objects so later reads reflect the remote state
    pub fn clear_cache(&mut self) {
        tracing::trace!("Clearing object cache ({} entries)", self.cache.len());
        self.cache.clear();
    }

    pub async fn exists(&mut self, path: &str) -> Result<bool> {
        if !self.connected {
            tracing::warn!("Not connected, cannot check existence of {}", path);
            return Ok(false);
        }
        Ok(self.get_object(path).await?.is_some())
    }

    /// Object at `path`, `None` when it does not exist.
    ///
    /// Permission problems surface as `PermissionDenied`, not as `None`.
    pub async fn get_object(&mut self, path: &str) -> Result<Option<RemoteObject>> {
        if !self.connected {
            tracing::warn!("Not connected, cannot look up {}", path);
            return Ok(None);
        }
        let path = normalize_vfs(path);
        if let Some(object) = self.cache.get(&path) {
            return Ok(Some(object.clone()));
        }
        let result = self.backend.object_by_path(&path).await;
        let found = self.track(result)?;
        if let Some(object) = &found {
            self.cache.insert(path, object.clone());
        }
        Ok(found)
    }

    pub async fn children(&mut self, folder: &RemoteObject) -> Result<Vec<RemoteObject>> {
        if !self.connected {
            tracing::warn!("Not connected, cannot list {}", folder.path);
            return Ok(Vec::new());
        }
        let result = self.backend.children(folder).await;
        let children = self.track(result)?;
        for child in &children {
            self.cache.insert(child.path.clone(), child.clone());
        }
        Ok(children)
    }

    /// Folder at `path`, creating every missing ancestor first.
    ///
    /// Idempotent: existing folders are returned unchanged.
    pub async fn get_or_create_folder(&mut self, path: &str) -> Result<RemoteObject> {
        self.require_connection(path)?;
        let path = normalize_vfs(path);

        // Walk up to the nearest existing ancestor
        let mut missing = Vec::new();
        let mut current = path.clone();
        let mut existing = loop {
            if let Some(object) = self.get_object(&current).await? {
                break object;
            }
            missing.push(current.clone());
            current = vfs_parent(&current).ok_or_else(|| SyncError::NotFound {
                path: "/".to_string(),
            })?;
        };

        if !existing.is_folder() {
            return Err(SyncError::NameConflict {
                path: existing.path,
            });
        }

        for folder_path in missing.into_iter().rev() {
            tracing::debug!("Creating folder {}", folder_path);
            let result = self
                .backend
                .create_folder(&existing, vfs_name(&folder_path))
                .await;
            existing = self.track(result)?;
            self.cache.insert(folder_path, existing.clone());
        }

        Ok(existing)
    }

    /// Write a local entity to the VFS.
    ///
    /// The local modification time is then set to the server-reported one.
    pub async fn push(&mut self, entity: &SyncEntity) -> Result<RemoteObject> {
        self.require_connection(&entity.vfs_path)?;

        if let EntityKind::Folder { .. } = entity.kind {
            return self.get_or_create_folder(&entity.vfs_path).await;
        }

        let content = tokio::fs::read(&entity.real_path)
            .await
            .map_err(|e| SyncError::local_io(&entity.real_path, e))?;
        let name = vfs_name(&entity.vfs_path);
        let mime_type = mime_type_for(name);

        let result = match (&entity.remote, entity.replace_existing) {
            (Some(remote), true) => {
                if remote.is_folder() {
                    return Err(SyncError::NameConflict {
                        path: entity.vfs_path.clone(),
                    });
                }
                tracing::debug!("Replacing content of {}", entity.vfs_path);
                self.backend.set_content(remote, content, &mime_type).await
            }
            _ => {
                let parent_path = vfs_parent(&entity.vfs_path).unwrap_or_else(|| "/".to_string());
                let parent = self.get_or_create_folder(&parent_path).await?;
                tracing::debug!("Creating document {}", entity.vfs_path);
                self.backend
                    .create_document(&parent, name, content, &mime_type)
                    .await
            }
        };
        let updated = self.track(result)?;
        self.cache.insert(updated.path.clone(), updated.clone());

        set_local_mtime(&entity.real_path, &updated)?;
        Ok(updated)
    }

    /// Write a remote entity to its local path.
    ///
    /// A partially written file is removed when the local write fails.
    pub async fn pull(&mut self, entity: &SyncEntity) -> Result<()> {
        self.require_connection(&entity.vfs_path)?;

        let remote = match &entity.remote {
            Some(remote) => remote.clone(),
            None => self
                .get_object(&entity.vfs_path)
                .await?
                .ok_or_else(|| SyncError::NotFound {
                    path: entity.vfs_path.clone(),
                })?,
        };

        if remote.is_folder() {
            tokio::fs::create_dir_all(&entity.real_path)
                .await
                .map_err(|e| SyncError::local_io(&entity.real_path, e))?;
            return Ok(());
        }

        let result = self.backend.read_content(&remote).await;
        let content = self.track(result)?;

        if let Some(parent) = entity.real_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::local_io(parent, e))?;
        }

        if let Err(e) = write_file(&entity.real_path, &content).await {
            tracing::warn!(
                "Writing {} failed, removing partial file",
                entity.real_path.display()
            );
            let _ = tokio::fs::remove_file(&entity.real_path).await;
            return Err(SyncError::local_io(&entity.real_path, e));
        }

        set_local_mtime(&entity.real_path, &remote)
    }

    /// Delete a folder tree or a single document; a missing resource is not an error
    pub async fn delete(&mut self, path: &str) -> Result<()> {
        if !self.connected {
            tracing::warn!("Not connected, cannot delete {}", path);
            return Ok(());
        }
        let Some(object) = self.get_object(path).await? else {
            tracing::debug!("{} does not exist, nothing to delete", path);
            return Ok(());
        };

        let result = if object.is_folder() {
            self.backend.delete_tree(&object).await
        } else {
            self.backend.delete_object(&object).await
        };
        match self.track(result) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!("{} vanished before deletion", path);
            }
            Err(e) => return Err(e),
        }

        let removed = object.path;
        self.cache.retain(|cached, _| !is_under(&removed, cached));
        Ok(())
    }

    fn require_connection(&self, path: &str) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            tracing::warn!("Not connected, skipping {}", path);
            Err(SyncError::NotConnected)
        }
    }

    /// Mark the session lost when the backend reports a connection failure
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(SyncError::ConnectionFailure { .. }) = &result {
            self.connected = false;
        }
        result
    }
}

async fn write_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(content).await?;
    #[cfg(test)]
    if tests::FAIL_AFTER_CREATE.with(|fail| fail.get()) {
        return Err(std::io::Error::other("write interrupted"));
    }
    file.flush().await?;
    Ok(())
}

fn set_local_mtime(path: &Path, remote: &RemoteObject) -> Result<()> {
    filetime::set_file_mtime(path, FileTime::from_system_time(remote.last_modified))
        .map_err(|e| SyncError::local_io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleId, SyncMode};
    use crate::repository::memory::{MemoryBackend, Operation};
    use crate::sync::entity::SyncAction;
    use std::cell::Cell;
    use std::fs;
    use std::time::SystemTime;
    use tempfile::TempDir;

    thread_local! {
        // Makes `write_file` fail once the target file exists
        pub(super) static FAIL_AFTER_CREATE: Cell<bool> = const { Cell::new(false) };
    }

    async fn connected(backend: MemoryBackend) -> RepositoryClient<MemoryBackend> {
        let mut client = RepositoryClient::new(backend);
        client.connect().await.unwrap();
        client
    }

    fn file_entity(vfs: &str, real: &Path, remote: Option<RemoteObject>, action: SyncAction) -> SyncEntity {
        SyncEntity {
            vfs_path: vfs.to_string(),
            real_path: real.to_path_buf(),
            module: ModuleId::new("demo"),
            replace_existing: remote.is_some(),
            remote,
            sync_mode: SyncMode::Sync,
            action,
            kind: EntityKind::File {
                last_modified: SystemTime::now(),
            },
        }
    }

    #[tokio::test]
    async fn test_get_or_create_folder_creates_ancestors_in_order() {
        let backend = MemoryBackend::new();
        let mut client = connected(backend.clone()).await;

        let folder = client.get_or_create_folder("/a/b/c").await.unwrap();
        assert_eq!(folder.path, "/a/b/c");
        assert_eq!(
            backend.journal(),
            vec![
                Operation::CreateFolder("/a".into()),
                Operation::CreateFolder("/a/b".into()),
                Operation::CreateFolder("/a/b/c".into()),
            ]
        );

        client.clear_cache();
        client.get_or_create_folder("/a/b/c").await.unwrap();
        assert_eq!(backend.journal().len(), 3);
    }

    #[tokio::test]
    async fn test_disconnected_client_is_a_no_op() {
        let backend = MemoryBackend::new();
        backend.set_offline(true);
        let mut client = RepositoryClient::new(backend.clone());

        assert!(client.connect().await.is_err());
        assert!(!client.is_connected());
        assert!(!client.exists("/").await.unwrap());
        assert!(client.get_object("/").await.unwrap().is_none());
        assert!(client.delete("/a").await.is_ok());
        assert!(matches!(
            client.get_or_create_folder("/a").await,
            Err(SyncError::NotConnected)
        ));
        assert!(backend.journal().is_empty());
    }

    #[tokio::test]
    async fn test_permission_denied_is_distinct_from_not_found() {
        let backend = MemoryBackend::new();
        backend.add_document("/secret/a.txt", b"x");
        backend.deny("/secret");
        let mut client = connected(backend).await;

        assert!(client.get_object("/missing").await.unwrap().is_none());
        assert!(matches!(
            client.get_object("/secret/a.txt").await,
            Err(SyncError::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_push_new_file_sets_server_mtime() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("a.txt");
        fs::write(&local, "hello").unwrap();

        let backend = MemoryBackend::new();
        let mut client = connected(backend.clone()).await;
        let entity = file_entity("/x/a.txt", &local, None, SyncAction::Push);

        let remote = client.push(&entity).await.unwrap();
        assert_eq!(backend.content("/x/a.txt"), Some(b"hello".to_vec()));

        let mtime = fs::metadata(&local).unwrap().modified().unwrap();
        assert_eq!(mtime, remote.last_modified);
    }

    #[tokio::test]
    async fn test_push_replace_of_vanished_object_is_not_found() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("a.txt");
        fs::write(&local, "new").unwrap();

        let backend = MemoryBackend::new();
        backend.add_document("/a.txt", b"old");
        let mut client = connected(backend.clone()).await;
        let remote = client.get_object("/a.txt").await.unwrap();

        backend.remove("/a.txt");
        let entity = file_entity("/a.txt", &local, remote, SyncAction::Push);
        let err = client.push(&entity).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_pull_into_directory_is_local_io_error() {
        let temp = TempDir::new().unwrap();
        // A directory in the way makes the file create fail
        let local = temp.path().join("blocked");
        fs::create_dir_all(local.join("inner")).unwrap();

        let backend = MemoryBackend::new();
        backend.add_document("/blocked", b"data");
        let mut client = connected(backend).await;
        let remote = client.get_object("/blocked").await.unwrap();
        let entity = file_entity("/blocked", &local, remote, SyncAction::Pull);

        let err = client.pull(&entity).await.unwrap_err();
        assert!(matches!(err, SyncError::LocalIo { .. }));
        assert!(local.join("inner").is_dir());
    }

    #[tokio::test]
    async fn test_pull_removes_partial_file_on_failure() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("partial.txt");

        let backend = MemoryBackend::new();
        backend.add_document("/partial.txt", b"data");
        let mut client = connected(backend).await;
        let remote = client.get_object("/partial.txt").await.unwrap();
        let entity = file_entity("/partial.txt", &local, remote, SyncAction::Pull);

        FAIL_AFTER_CREATE.with(|fail| fail.set(true));
        let result = client.pull(&entity).await;
        FAIL_AFTER_CREATE.with(|fail| fail.set(false));

        assert!(matches!(result, Err(SyncError::LocalIo { .. })));
        assert!(!local.exists());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok_and_tree_is_removed() {
        let backend = MemoryBackend::new();
        backend.add_document("/f/a.txt", b"a");
        backend.add_document("/f/g/b.txt", b"b");
        let mut client = connected(backend.clone()).await;

        client.delete("/nothing").await.unwrap();
        client.delete("/f").await.unwrap();
        assert!(!client.exists("/f/g/b.txt").await.unwrap());
        assert!(backend.content("/f/a.txt").is_none());
    }

    #[tokio::test]
    async fn test_connection_loss_disconnects_client() {
        let backend = MemoryBackend::new();
        let mut client = connected(backend.clone()).await;

        backend.set_offline(true);
        let err = client.get_object("/a").await.unwrap_err();
        assert!(err.is_job_fatal());
        assert!(!client.is_connected());
    }
}
