use super::{from_millis, to_millis, ObjectKind, RemoteObject, VfsBackend};
use crate::error::{Result, SyncError};
use crate::path::{is_under, normalize_vfs, vfs_child, vfs_parent};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

/// Mutating operation recorded by the in-memory repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateFolder(String),
    CreateDocument(String),
    SetContent(String),
    Delete(String),
}

#[derive(Debug, Clone)]
struct Node {
    id: String,
    kind: ObjectKind,
    content: Vec<u8>,
    modified: i64,
}

#[derive(Debug)]
struct State {
    nodes: BTreeMap<String, Node>,
    next_id: u64,
    clock: i64,
    journal: Vec<Operation>,
    denied: HashSet<String>,
    unreachable: HashSet<String>,
    offline: bool,
}

impl State {
    /// Server clock: wall time in milliseconds, strictly increasing
    fn tick(&mut self) -> i64 {
        let now = to_millis(SystemTime::now());
        self.clock = now.max(self.clock + 1);
        self.clock
    }

    fn new_id(&mut self) -> String {
        self.next_id += 1;
        format!("mem-{}", self.next_id)
    }

    fn check(&self, path: &str) -> Result<()> {
        if self.offline {
            return Err(SyncError::ConnectionFailure {
                message: "repository is offline".to_string(),
            });
        }
        if self.unreachable.iter().any(|prefix| is_under(prefix, path)) {
            return Err(SyncError::ConnectionFailure {
                message: format!("connection reset while accessing {}", path),
            });
        }
        if self.denied.iter().any(|denied| is_under(denied, path)) {
            return Err(SyncError::PermissionDenied {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    fn object(&self, path: &str, node: &Node) -> RemoteObject {
        RemoteObject {
            id: node.id.clone(),
            path: path.to_string(),
            kind: node.kind,
            last_modified: from_millis(node.modified),
            size: match node.kind {
                ObjectKind::Document => Some(node.content.len() as u64),
                ObjectKind::Folder => None,
            },
        }
    }

    /// Node for a handle, verifying the identity still matches
    fn resolve(&self, object: &RemoteObject) -> Result<&Node> {
        match self.nodes.get(&object.path) {
            Some(node) if node.id == object.id => Ok(node),
            _ => Err(SyncError::NotFound {
                path: object.path.clone(),
            }),
        }
    }

    fn insert(&mut self, parent: &RemoteObject, name: &str, kind: ObjectKind, content: Vec<u8>) -> Result<RemoteObject> {
        let path = vfs_child(&parent.path, name);
        self.check(&path)?;
        let parent_node = self.resolve(parent)?;
        if parent_node.kind != ObjectKind::Folder {
            return Err(SyncError::Protocol(format!("{} is not a folder", parent.path)));
        }
        if self.nodes.contains_key(&path) {
            return Err(SyncError::NameConflict { path });
        }

        let node = Node {
            id: self.new_id(),
            kind,
            content,
            modified: self.tick(),
        };
        let object = self.object(&path, &node);
        self.nodes.insert(path.clone(), node);
        self.journal.push(match kind {
            ObjectKind::Folder => Operation::CreateFolder(path),
            ObjectKind::Document => Operation::CreateDocument(path),
        });
        Ok(object)
    }
}

/// In-memory VFS.
///
/// Clones share the same repository, so a test can keep a handle for
/// inspection and fault injection while the client owns another.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let mut state = State {
            nodes: BTreeMap::new(),
            next_id: 0,
            clock: 0,
            journal: Vec::new(),
            denied: HashSet::new(),
            unreachable: HashSet::new(),
            offline: false,
        };
        let root = Node {
            id: "mem-root".to_string(),
            kind: ObjectKind::Folder,
            content: Vec::new(),
            modified: state.tick(),
        };
        state.nodes.insert("/".to_string(), root);
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the repository from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed a document, creating missing folders; not journaled
    pub fn add_document(&self, path: &str, content: &[u8]) {
        let path = normalize_vfs(path);
        let mut state = self.lock();
        let mut ancestors = Vec::new();
        let mut current = vfs_parent(&path);
        while let Some(folder) = current {
            if state.nodes.contains_key(&folder) {
                break;
            }
            current = vfs_parent(&folder);
            ancestors.push(folder);
        }
        for folder in ancestors.into_iter().rev() {
            let node = Node {
                id: state.new_id(),
                kind: ObjectKind::Folder,
                content: Vec::new(),
                modified: state.tick(),
            };
            state.nodes.insert(folder, node);
        }
        let node = Node {
            id: state.new_id(),
            kind: ObjectKind::Document,
            content: content.to_vec(),
            modified: state.tick(),
        };
        state.nodes.insert(path, node);
    }

    /// Remove a resource behind the client's back (simulates a concurrent deletion)
    pub fn remove(&self, path: &str) {
        let path = normalize_vfs(path);
        self.lock().nodes.retain(|p, _| !is_under(&path, p));
    }

    /// Override the server timestamp of a resource
    pub fn set_modified(&self, path: &str, modified: SystemTime) {
        if let Some(node) = self.lock().nodes.get_mut(&normalize_vfs(path)) {
            node.modified = to_millis(modified);
        }
    }

    pub fn modified(&self, path: &str) -> Option<SystemTime> {
        self.lock()
            .nodes
            .get(&normalize_vfs(path))
            .map(|node| from_millis(node.modified))
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .nodes
            .get(&normalize_vfs(path))
            .filter(|node| node.kind == ObjectKind::Document)
            .map(|node| node.content.clone())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().nodes.contains_key(&normalize_vfs(path))
    }

    /// Every access at or below `path` fails with `PermissionDenied`
    pub fn deny(&self, path: &str) {
        self.lock().denied.insert(normalize_vfs(path));
    }

    /// Every access at or below `path` fails with `ConnectionFailure`
    pub fn drop_connection_at(&self, path: &str) {
        self.lock().unreachable.insert(normalize_vfs(path));
    }

    /// Every call fails with `ConnectionFailure` while offline
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn journal(&self) -> Vec<Operation> {
        self.lock().journal.clone()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VfsBackend for MemoryBackend {
    async fn connect(&mut self) -> Result<()> {
        self.lock().check("/")
    }

    async fn object_by_path(&self, path: &str) -> Result<Option<RemoteObject>> {
        let path = normalize_vfs(path);
        let state = self.lock();
        state.check(&path)?;
        Ok(state.nodes.get(&path).map(|node| state.object(&path, node)))
    }

    async fn children(&self, folder: &RemoteObject) -> Result<Vec<RemoteObject>> {
        let state = self.lock();
        state.check(&folder.path)?;
        state.resolve(folder)?;
        Ok(state
            .nodes
            .iter()
            .filter(|(path, _)| {
                path.as_str() != "/" && vfs_parent(path).as_deref() == Some(folder.path.as_str())
            })
            .filter(|(path, _)| state.check(path).is_ok())
            .map(|(path, node)| state.object(path, node))
            .collect())
    }

    async fn create_folder(&self, parent: &RemoteObject, name: &str) -> Result<RemoteObject> {
        self.lock()
            .insert(parent, name, ObjectKind::Folder, Vec::new())
    }

    async fn create_document(
        &self,
        parent: &RemoteObject,
        name: &str,
        content: Vec<u8>,
        _mime_type: &str,
    ) -> Result<RemoteObject> {
        self.lock()
            .insert(parent, name, ObjectKind::Document, content)
    }

    async fn set_content(
        &self,
        object: &RemoteObject,
        content: Vec<u8>,
        _mime_type: &str,
    ) -> Result<RemoteObject> {
        let mut state = self.lock();
        state.check(&object.path)?;
        if state.resolve(object)?.kind != ObjectKind::Document {
            return Err(SyncError::Protocol(format!(
                "{} has no content stream",
                object.path
            )));
        }
        let modified = state.tick();
        let node = state
            .nodes
            .get_mut(&object.path)
            .ok_or_else(|| SyncError::NotFound {
                path: object.path.clone(),
            })?;
        node.content = content;
        node.modified = modified;
        let node = node.clone();
        state.journal.push(Operation::SetContent(object.path.clone()));
        Ok(state.object(&object.path, &node))
    }

    async fn read_content(&self, object: &RemoteObject) -> Result<Vec<u8>> {
        let state = self.lock();
        state.check(&object.path)?;
        Ok(state.resolve(object)?.content.clone())
    }

    async fn delete_tree(&self, folder: &RemoteObject) -> Result<()> {
        let mut state = self.lock();
        state.check(&folder.path)?;
        state.resolve(folder)?;
        if folder.path == "/" {
            return Err(SyncError::Protocol("cannot delete the root folder".to_string()));
        }
        let root = folder.path.clone();
        state.nodes.retain(|path, _| !is_under(&root, path));
        state.journal.push(Operation::Delete(root));
        Ok(())
    }

    async fn delete_object(&self, object: &RemoteObject) -> Result<()> {
        let mut state = self.lock();
        state.check(&object.path)?;
        state.resolve(object)?;
        let has_children = state
            .nodes
            .keys()
            .any(|path| vfs_parent(path).as_deref() == Some(object.path.as_str()));
        if has_children {
            return Err(SyncError::Protocol(format!(
                "folder {} is not empty",
                object.path
            )));
        }
        state.nodes.remove(&object.path);
        state.journal.push(Operation::Delete(object.path.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::vfs_name;

    #[tokio::test]
    async fn test_seeded_documents_and_children() {
        let backend = MemoryBackend::new();
        backend.add_document("/f/b.txt", b"b");
        backend.add_document("/f/a.txt", b"a");
        backend.add_document("/f/sub/c.txt", b"c");

        let folder = backend.object_by_path("/f").await.unwrap().unwrap();
        assert!(folder.is_folder());

        let names: Vec<_> = backend
            .children(&folder)
            .await
            .unwrap()
            .into_iter()
            .map(|c| vfs_name(&c.path).to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
        assert!(backend.journal().is_empty());
    }

    #[tokio::test]
    async fn test_create_document_name_conflict() {
        let backend = MemoryBackend::new();
        backend.add_document("/a.txt", b"a");
        let root = backend.object_by_path("/").await.unwrap().unwrap();

        let err = backend
            .create_document(&root, "a.txt", b"b".to_vec(), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NameConflict { .. }));
    }

    #[tokio::test]
    async fn test_timestamps_strictly_increase() {
        let backend = MemoryBackend::new();
        let root = backend.object_by_path("/").await.unwrap().unwrap();
        let a = backend.create_folder(&root, "a").await.unwrap();
        let b = backend.create_folder(&root, "b").await.unwrap();
        assert!(b.last_modified > a.last_modified);
    }

    #[tokio::test]
    async fn test_stale_handle_is_not_found() {
        let backend = MemoryBackend::new();
        backend.add_document("/a.txt", b"a");
        let handle = backend.object_by_path("/a.txt").await.unwrap().unwrap();
        backend.remove("/a.txt");
        backend.add_document("/a.txt", b"recreated");

        let err = backend.read_content(&handle).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
