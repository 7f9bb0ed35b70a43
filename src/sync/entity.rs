use crate::module::{ModuleId, SyncMode};
use crate::repository::RemoteObject;
use std::path::PathBuf;
use std::time::SystemTime;

/// What the job will do with one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Push,
    Pull,
    /// Remote-only resource under PUSH policy
    DeleteRemote,
    /// Local-only file under PULL policy
    DeleteLocal,
}

impl SyncAction {
    pub fn label(&self) -> &'static str {
        match self {
            SyncAction::Push => "PUSH",
            SyncAction::Pull => "PULL",
            SyncAction::DeleteRemote | SyncAction::DeleteLocal => "DELETE",
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, SyncAction::DeleteRemote | SyncAction::DeleteLocal)
    }
}

#[derive(Debug, Clone)]
pub enum EntityKind {
    File {
        /// Local modification time, or the remote one when the file only exists remotely
        last_modified: SystemTime,
    },
    Folder {
        children: Vec<SyncEntity>,
    },
}

/// One file or folder to reconcile, built fresh for every job
#[derive(Debug, Clone)]
pub struct SyncEntity {
    pub vfs_path: String,
    pub real_path: PathBuf,
    pub module: ModuleId,
    /// Remote handle, absent when the resource does not exist remotely yet
    pub remote: Option<RemoteObject>,
    /// Effective policy of the owning module
    pub sync_mode: SyncMode,
    pub action: SyncAction,
    /// A resource already exists at the target and must be overwritten
    pub replace_existing: bool,
    pub kind: EntityKind,
}

impl SyncEntity {
    pub fn is_folder(&self) -> bool {
        matches!(self.kind, EntityKind::Folder { .. })
    }

    pub fn children(&self) -> &[SyncEntity] {
        match &self.kind {
            EntityKind::Folder { children } => children,
            EntityKind::File { .. } => &[],
        }
    }

    /// Folders present on both sides need no operation of their own
    pub fn needs_operation(&self) -> bool {
        !(self.is_folder() && self.replace_existing)
    }

    /// Number of entities in this subtree, including itself
    pub fn count(&self) -> usize {
        1 + self.children().iter().map(SyncEntity::count).sum::<usize>()
    }

    /// Pre-order traversal: every folder precedes its children
    pub fn flatten<'a>(&'a self, out: &mut Vec<&'a SyncEntity>) {
        out.push(self);
        for child in self.children() {
            child.flatten(out);
        }
    }

    /// Log line for a successfully processed entity
    pub fn log_line(&self) -> String {
        let outcome = match self.action {
            SyncAction::Push => "pushed to VFS",
            SyncAction::Pull => "pulled from VFS",
            SyncAction::DeleteRemote => "deleted from VFS",
            SyncAction::DeleteLocal => "deleted locally",
        };
        let replacing = if self.replace_existing && !self.action.is_delete() {
            " replacing an existing entity"
        } else {
            ""
        };
        format!("{}: {} {}{}", self.action.label(), self.vfs_path, outcome, replacing)
    }
}
