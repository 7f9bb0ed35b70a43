//! Module-aware synchronization between a local project tree and the VFS
//! of a remote content repository.
//!
//! Selected local paths are classified into units via [`module::ModuleRegistry`],
//! expanded into sync entities and reconciled through a
//! [`repository::RepositoryClient`].

pub mod classify;
pub mod config;
pub mod error;
pub mod filter;
pub mod module;
pub mod path;
pub mod publish;
pub mod repository;
pub mod sync;

pub use classify::{Classification, ClassifiedUnit, Notice, PathClassifier};
pub use config::Config;
pub use error::{Result, SyncError};
pub use filter::IgnoreRules;
pub use module::{Module, ModuleId, ModuleRegistry, SyncMode};
pub use publish::PublishList;
pub use repository::{CmisBackend, MemoryBackend, RemoteObject, RepositoryClient, VfsBackend};
pub use sync::{SyncEngine, SyncOptions, SyncProgress, SyncReport};
