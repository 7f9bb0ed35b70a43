pub mod client;
pub mod cmis;
pub mod memory;

pub use client::RepositoryClient;
pub use cmis::CmisBackend;
pub use memory::MemoryBackend;

use crate::error::Result;
use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Folder,
    Document,
}

/// Handle to an object in the remote VFS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Repository-assigned identity
    pub id: String,
    /// Normalized VFS path
    pub path: String,
    pub kind: ObjectKind,
    /// Server-reported last modification time (millisecond precision)
    pub last_modified: SystemTime,
    pub size: Option<u64>,
}

impl RemoteObject {
    pub fn is_folder(&self) -> bool {
        self.kind == ObjectKind::Folder
    }
}

/// Protocol operations against a remote VFS.
///
/// Every path is a normalized VFS path. Implementations map their native
/// failures onto `NotFound`, `PermissionDenied`, `NameConflict` and
/// `ConnectionFailure`.
#[async_trait]
pub trait VfsBackend: Send + Sync {
    /// Open a session with the repository
    async fn connect(&mut self) -> Result<()>;

    /// Look up an object by path; `Ok(None)` when it does not exist
    async fn object_by_path(&self, path: &str) -> Result<Option<RemoteObject>>;

    /// Direct children of a folder, sorted by name
    async fn children(&self, folder: &RemoteObject) -> Result<Vec<RemoteObject>>;

    /// Create a folder named `name` inside `parent`
    async fn create_folder(&self, parent: &RemoteObject, name: &str) -> Result<RemoteObject>;

    /// Create a document named `name` inside `parent`
    async fn create_document(
        &self,
        parent: &RemoteObject,
        name: &str,
        content: Vec<u8>,
        mime_type: &str,
    ) -> Result<RemoteObject>;

    /// Overwrite the content stream of an existing document
    async fn set_content(
        &self,
        object: &RemoteObject,
        content: Vec<u8>,
        mime_type: &str,
    ) -> Result<RemoteObject>;

    async fn read_content(&self, object: &RemoteObject) -> Result<Vec<u8>>;

    /// Delete a folder with everything below it, including unfiled children
    async fn delete_tree(&self, folder: &RemoteObject) -> Result<()>;

    async fn delete_object(&self, object: &RemoteObject) -> Result<()>;
}

/// Truncate to the millisecond precision the repository reports
pub fn to_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

pub fn from_millis(millis: i64) -> SystemTime {
    if millis >= 0 {
        UNIX_EPOCH + Duration::from_millis(millis as u64)
    } else {
        UNIX_EPOCH - Duration::from_millis(millis.unsigned_abs())
    }
}

/// Best-effort MIME type from a file name
pub fn mime_type_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}
