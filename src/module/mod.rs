pub mod registry;

pub use registry::ModuleRegistry;

use crate::config::{Config, ModuleConfig};
use crate::path::normalize_vfs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Per-module reconciliation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Local state wins; remote-only resources are deleted from the VFS
    Push,
    /// Remote state wins; local-only files are deleted
    Pull,
    /// Newer side wins by timestamp
    #[default]
    Sync,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Push => write!(f, "PUSH"),
            SyncMode::Pull => write!(f, "PULL"),
            SyncMode::Sync => write!(f, "SYNC"),
        }
    }
}

/// Opaque module identity, stable across configuration refreshes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mapping from a VFS folder to a real-filesystem target used at export time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPoint {
    /// VFS source, normalized with a trailing slash
    pub vfs_source: String,
    /// Target relative to the webapp root
    pub target: PathBuf,
}

impl ExportPoint {
    pub fn new(vfs_source: &str, target: impl Into<PathBuf>) -> Self {
        let normalized = normalize_vfs(vfs_source);
        let vfs_source = if normalized == "/" {
            normalized
        } else {
            format!("{}/", normalized)
        };
        Self {
            vfs_source,
            target: target.into(),
        }
    }

    pub fn covers(&self, vfs_path: &str) -> bool {
        vfs_path.starts_with(&self.vfs_source)
    }

    /// Target location of `vfs_path` below `webapp_root`, if covered
    pub fn target_for(&self, webapp_root: &Path, vfs_path: &str) -> Option<PathBuf> {
        let remainder = vfs_path.strip_prefix(&self.vfs_source)?;
        let base = webapp_root.join(&self.target);
        Some(
            remainder
                .split('/')
                .filter(|s| !s.is_empty())
                .fold(base, |acc, segment| acc.join(segment)),
        )
    }
}

/// A configured module and its derived local paths.
///
/// Immutable between registry refreshes.
#[derive(Debug, Clone)]
pub struct Module {
    pub id: ModuleId,
    pub name: String,
    /// Local content root (absolute)
    pub content_root: PathBuf,
    /// Content root joined with the configured VFS prefix
    pub local_vfs_root: PathBuf,
    pub export_site_root: String,
    /// VFS paths owned by the module, as declared
    pub resources: Vec<String>,
    pub export_points: Vec<ExportPoint>,
    pub sync_mode: SyncMode,
    pub version: Option<String>,
}

impl Module {
    /// Build a module from its configuration, applying project defaults
    pub fn from_config(module: &ModuleConfig, config: &Config) -> Self {
        let content_root = config.resolve(&module.root);
        let vfs_prefix = module
            .local_vfs_root
            .as_deref()
            .unwrap_or(&config.project.local_vfs_root);
        let local_vfs_root = vfs_prefix
            .split(['/', '\\'])
            .filter(|s| !s.is_empty())
            .fold(content_root.clone(), |acc, segment| acc.join(segment));

        Self {
            id: ModuleId::new(module.name.clone()),
            name: module.name.clone(),
            content_root,
            local_vfs_root,
            export_site_root: module.export_site_root.clone(),
            resources: module.resource_paths(),
            export_points: module
                .export_points
                .iter()
                .map(|ep| ExportPoint::new(&ep.source, &ep.target))
                .collect(),
            sync_mode: module.sync_mode.unwrap_or(config.project.sync_mode),
            version: module.version.clone(),
        }
    }

    /// Absolute local location of a declared resource
    pub fn resource_local_path(&self, resource: &str) -> PathBuf {
        crate::path::vfs_to_local(&self.local_vfs_root, resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::parse(
            r#"
[connection]
url = "http://x"
username = "u"

[project]
root = "/proj"
local_vfs_root = "src/main/vfs"
sync_mode = "sync"

[[modules]]
name = "demo"
root = "demo"
local_vfs_root = "vfs"
sync_mode = "push"
version = "2.0"

[[modules.export_points]]
source = "/system/modules/demo/lib"
target = "WEB-INF/lib"

[[modules]]
name = "plain"
root = "plain"
"#,
            "/",
        )
        .unwrap()
    }

    #[test]
    fn test_module_from_config_with_overrides() {
        let config = config();
        let module = Module::from_config(&config.modules[0], &config);

        assert_eq!(module.content_root, PathBuf::from("/proj/demo"));
        assert_eq!(module.local_vfs_root, PathBuf::from("/proj/demo/vfs"));
        assert_eq!(module.sync_mode, SyncMode::Push);
        assert_eq!(module.version.as_deref(), Some("2.0"));
        assert_eq!(module.resources, vec!["/system/modules/demo/".to_string()]);
        assert_eq!(module.export_points[0].vfs_source, "/system/modules/demo/lib/");
    }

    #[test]
    fn test_module_from_config_with_project_defaults() {
        let config = config();
        let module = Module::from_config(&config.modules[1], &config);

        assert_eq!(module.local_vfs_root, PathBuf::from("/proj/plain/src/main/vfs"));
        assert_eq!(module.sync_mode, SyncMode::Sync);
        assert!(module.version.is_none());
    }

    #[test]
    fn test_export_point_target() {
        let ep = ExportPoint::new("/system/modules/demo/lib/", "WEB-INF/lib");
        assert!(ep.covers("/system/modules/demo/lib/a.jar"));
        assert!(!ep.covers("/system/modules/demo/library/a.jar"));
        assert_eq!(
            ep.target_for(Path::new("/webapp"), "/system/modules/demo/lib/x/a.jar"),
            Some(PathBuf::from("/webapp/WEB-INF/lib/x/a.jar"))
        );
        assert_eq!(ep.target_for(Path::new("/webapp"), "/other/a.jar"), None);
    }

    #[test]
    fn test_sync_mode_display() {
        assert_eq!(SyncMode::Push.to_string(), "PUSH");
        assert_eq!(SyncMode::default(), SyncMode::Sync);
    }
}
