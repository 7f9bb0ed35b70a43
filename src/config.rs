use crate::filter::IgnoreRules;
use crate::module::SyncMode;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "cmsync.toml";
const DEFAULT_LOCAL_VFS_ROOT: &str = "src/main/vfs";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const PASSWORD_ENV: &str = "CMSYNC_PASSWORD";

/// Project configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
    /// Directory of the file this config was read from
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub url: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    pub root: Option<PathBuf>,
    #[serde(default = "default_local_vfs_root")]
    pub local_vfs_root: String,
    #[serde(default)]
    pub sync_mode: SyncMode,
    pub webapp_root: Option<PathBuf>,
    #[serde(default)]
    pub ignored_paths: Vec<String>,
    #[serde(default)]
    pub ignored_files: Vec<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: None,
            local_vfs_root: default_local_vfs_root(),
            sync_mode: SyncMode::default(),
            webapp_root: None,
            ignored_paths: Vec::new(),
            ignored_files: Vec::new(),
        }
    }
}

/// Per-module configuration; `None` fields fall back to the project defaults
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleConfig {
    pub name: String,
    pub root: PathBuf,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub local_vfs_root: Option<String>,
    pub sync_mode: Option<SyncMode>,
    pub version: Option<String>,
    #[serde(default = "default_site_root")]
    pub export_site_root: String,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub export_points: Vec<ExportPointConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportPointConfig {
    pub source: String,
    pub target: String,
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_local_vfs_root() -> String {
    DEFAULT_LOCAL_VFS_ROOT.to_string()
}

fn default_site_root() -> String {
    "/".to_string()
}

impl Config {
    /// Locate and load the configuration.
    ///
    /// Lookup order: explicit path, `./cmsync.toml`, user config directory.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::discover()?,
        };
        Self::from_file(&path)
    }

    fn discover() -> Result<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Ok(local);
        }
        let user = Self::config_path()?;
        if user.exists() {
            return Ok(user);
        }
        anyhow::bail!(
            "No configuration found. Create {} or {}",
            CONFIG_FILE_NAME,
            user.display()
        )
    }

    /// Path of the per-user configuration file
    pub fn config_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("Cannot determine config directory")?;
        Ok(dir.join("cmsync").join("config.toml"))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let base_dir = if base_dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            base_dir
        };
        // Selected paths are compared against module roots, so anchor them absolutely
        let base_dir = std::fs::canonicalize(&base_dir).unwrap_or(base_dir);
        Self::parse(&content, base_dir)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.base_dir = base_dir.into();

        for module in &config.modules {
            if module.name.trim().is_empty() {
                anyhow::bail!("Module entry with empty name");
            }
        }

        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            config.connection.password = Some(password);
        }

        Ok(config)
    }

    /// Absolute project root; relative module paths resolve against it
    pub fn project_root(&self) -> PathBuf {
        match &self.project.root {
            Some(root) if root.is_absolute() => root.clone(),
            Some(root) => self.base_dir.join(root),
            None => self.base_dir.clone(),
        }
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root().join(path)
        }
    }

    pub fn webapp_root(&self) -> Option<PathBuf> {
        self.project.webapp_root.as_deref().map(|p| self.resolve(p))
    }

    pub fn ignore_rules(&self) -> Result<IgnoreRules> {
        IgnoreRules::from_patterns(&self.project.ignored_paths, &self.project.ignored_files)
    }
}

impl ModuleConfig {
    /// Declared resources, defaulting to the conventional module folder
    pub fn resource_paths(&self) -> Vec<String> {
        if self.resources.is_empty() {
            vec![format!("/system/modules/{}/", self.name)]
        } else {
            self.resources.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[connection]
url = "http://localhost:8080/opencms/cmisbrowser"
username = "Admin"
password = "admin"

[project]
local_vfs_root = "vfs"
sync_mode = "push"
ignored_paths = [".git"]
ignored_files = ["*.iml"]

[[modules]]
name = "com.example.demo"
root = "demo"

[[modules]]
name = "com.example.other"
root = "/abs/other"
enabled = false
sync_mode = "pull"
local_vfs_root = "content"
version = "1.2.0"
resources = ["/system/modules/com.example.other/", "/sites/default/other/"]

[[modules.export_points]]
source = "/system/modules/com.example.other/lib/"
target = "WEB-INF/lib/"
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE, "/proj").unwrap();

        assert_eq!(config.connection.username, "Admin");
        assert_eq!(config.connection.timeout_secs, 30);
        assert_eq!(config.project.sync_mode, SyncMode::Push);
        assert_eq!(config.modules.len(), 2);

        let demo = &config.modules[0];
        assert!(demo.enabled);
        assert!(demo.sync_mode.is_none());
        assert_eq!(demo.export_site_root, "/");
        assert_eq!(
            demo.resource_paths(),
            vec!["/system/modules/com.example.demo/".to_string()]
        );

        let other = &config.modules[1];
        assert!(!other.enabled);
        assert_eq!(other.sync_mode, Some(SyncMode::Pull));
        assert_eq!(other.version.as_deref(), Some("1.2.0"));
        assert_eq!(other.export_points.len(), 1);
    }

    #[test]
    fn test_project_defaults() {
        let config = Config::parse(
            "[connection]\nurl = \"http://x\"\nusername = \"u\"\n",
            "/proj",
        )
        .unwrap();

        assert_eq!(config.project.local_vfs_root, "src/main/vfs");
        assert_eq!(config.project.sync_mode, SyncMode::Sync);
        assert_eq!(config.project_root(), PathBuf::from("/proj"));
        assert!(config.modules.is_empty());
    }

    #[test]
    fn test_resolve_relative_paths() {
        let config = Config::parse(SAMPLE, "/proj").unwrap();
        assert_eq!(config.resolve(Path::new("demo")), PathBuf::from("/proj/demo"));
        assert_eq!(
            config.resolve(Path::new("/abs/other")),
            PathBuf::from("/abs/other")
        );
    }

    #[test]
    fn test_invalid_sync_mode_rejected() {
        let result = Config::parse(
            "[connection]\nurl = \"http://x\"\nusername = \"u\"\n[project]\nsync_mode = \"both\"\n",
            "/proj",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file_uses_file_directory() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("cmsync.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.project_root(), temp.path().canonicalize().unwrap());
        assert_eq!(config.ignore_rules().unwrap().rule_count(), 2);
    }
}
