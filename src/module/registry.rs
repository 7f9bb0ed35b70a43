use super::{ExportPoint, Module, ModuleId};
use crate::config::{Config, ModuleConfig};
use crate::filter::IgnoreRules;
use crate::path::{is_under, to_slash};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

/// Registry of configured modules.
///
/// Owned by the composing application. The export-point list is derived
/// lazily and discarded on every register/unregister.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: HashMap<ModuleId, Module>,
    /// Registration order, used for export point precedence
    order: Vec<ModuleId>,
    export_points: OnceLock<Vec<ExportPoint>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from every module entry in the configuration
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        for module in &config.modules {
            registry.register_module(ModuleId::new(module.name.clone()), module, config);
        }
        registry
    }

    /// Insert or refresh a module; disabled modules are removed instead
    pub fn register_module(&mut self, id: ModuleId, module: &ModuleConfig, config: &Config) {
        if !module.enabled {
            tracing::debug!("Module {} is disabled, unregistering", id);
            self.unregister_module(&id);
            return;
        }

        let mut built = Module::from_config(module, config);
        built.id = id.clone();
        self.insert(built);
    }

    /// Insert an already-built module under its own id
    pub fn insert(&mut self, module: Module) {
        let id = module.id.clone();
        if !self.modules.contains_key(&id) {
            self.order.push(id.clone());
        }
        tracing::debug!(
            "Registered module {} (vfs root {})",
            id,
            module.local_vfs_root.display()
        );
        self.modules.insert(id, module);
        self.export_points = OnceLock::new();
    }

    pub fn unregister_module(&mut self, id: &ModuleId) -> Option<Module> {
        let removed = self.modules.remove(id);
        if removed.is_some() {
            self.order.retain(|existing| existing != id);
            self.export_points = OnceLock::new();
        }
        removed
    }

    pub fn get(&self, id: &ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    /// All registered modules, in registration order
    pub fn all_modules(&self) -> Vec<&Module> {
        self.order
            .iter()
            .filter_map(|id| self.modules.get(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Module owning an absolute local path.
    ///
    /// Uses the content-root mapping: when module roots are nested, the
    /// deepest root containing the path wins.
    pub fn module_for_path(&self, path: &Path) -> Option<&Module> {
        self.modules
            .values()
            .filter(|module| path.starts_with(&module.content_root))
            .max_by_key(|module| module.content_root.components().count())
    }

    /// True iff `path` is a directory equal to the module's content root
    pub fn is_path_module_root(&self, module: &Module, path: &Path) -> bool {
        path.is_dir() && path == module.content_root
    }

    /// True iff `path` is a declared resource root or lies inside one
    pub fn is_path_module_resource(&self, module: &Module, path: &Path) -> bool {
        let vfs_root = to_slash(&module.local_vfs_root);
        let vfs_root = vfs_root.trim_end_matches('/');
        let path = to_slash(path);

        module.resources.iter().any(|resource| {
            let prefix = format!("{}/{}", vfs_root, resource.trim_start_matches('/'));
            is_under(&prefix, &path)
        })
    }

    /// True iff `path` is under the module's local VFS root and not ignored
    pub fn is_path_in_vfs_root(&self, module: &Module, path: &Path, ignore: &IgnoreRules) -> bool {
        path.starts_with(&module.local_vfs_root) && !ignore.is_ignored(path)
    }

    /// All export points across modules, in registration order
    pub fn export_points(&self) -> &[ExportPoint] {
        self.export_points.get_or_init(|| {
            self.all_modules()
                .into_iter()
                .flat_map(|module| module.export_points.iter().cloned())
                .collect()
        })
    }

    /// First export point whose VFS source is a prefix of `vfs_path`
    pub fn export_point_for_resource(&self, vfs_path: &str) -> Option<&ExportPoint> {
        self.export_points().iter().find(|ep| ep.covers(vfs_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::SyncMode;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn module(name: &str, root: &Path, resources: &[&str]) -> Module {
        Module {
            id: ModuleId::new(name),
            name: name.to_string(),
            content_root: root.to_path_buf(),
            local_vfs_root: root.join("vfs"),
            export_site_root: "/".to_string(),
            resources: resources.iter().map(|r| r.to_string()).collect(),
            export_points: Vec::new(),
            sync_mode: SyncMode::Sync,
            version: None,
        }
    }

    #[test]
    fn test_register_and_unregister() {
        let config = Config::parse(
            r#"
[connection]
url = "http://x"
username = "u"

[[modules]]
name = "a"
root = "/proj/a"

[[modules]]
name = "b"
root = "/proj/b"
enabled = false
"#,
            "/proj",
        )
        .unwrap();

        let mut registry = ModuleRegistry::from_config(&config);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&ModuleId::new("a")).is_some());
        assert!(registry.get(&ModuleId::new("b")).is_none());

        assert!(registry.unregister_module(&ModuleId::new("a")).is_some());
        assert!(registry.is_empty());
        assert!(registry.unregister_module(&ModuleId::new("a")).is_none());
    }

    #[test]
    fn test_disabling_removes_registered_module() {
        let config = Config::parse(
            "[connection]\nurl = \"http://x\"\nusername = \"u\"\n[[modules]]\nname = \"a\"\nroot = \"/proj/a\"\n",
            "/proj",
        )
        .unwrap();
        let mut registry = ModuleRegistry::from_config(&config);
        assert_eq!(registry.len(), 1);

        let mut disabled = config.modules[0].clone();
        disabled.enabled = false;
        registry.register_module(ModuleId::new("a"), &disabled, &config);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_module_for_path_prefers_nested_root() {
        let mut registry = ModuleRegistry::new();
        registry.insert(module("outer", Path::new("/proj"), &["/system/modules/outer/"]));
        registry.insert(module("inner", Path::new("/proj/inner"), &["/system/modules/inner/"]));

        let found = registry
            .module_for_path(Path::new("/proj/inner/vfs/system/x.txt"))
            .unwrap();
        assert_eq!(found.name, "inner");

        let found = registry.module_for_path(Path::new("/proj/other/x.txt")).unwrap();
        assert_eq!(found.name, "outer");

        // Sibling sharing a string prefix is not inside /proj/inner
        let found = registry.module_for_path(Path::new("/proj/innerx/y")).unwrap();
        assert_eq!(found.name, "outer");

        assert!(registry.module_for_path(Path::new("/elsewhere")).is_none());
    }

    #[test]
    fn test_is_path_module_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("demo");
        fs::create_dir_all(root.join("vfs")).unwrap();
        let module = module("demo", &root, &["/system/"]);
        let registry = ModuleRegistry::new();

        assert!(registry.is_path_module_root(&module, &root));
        assert!(!registry.is_path_module_root(&module, &root.join("vfs")));
        assert!(!registry.is_path_module_root(&module, &temp.path().join("missing")));
    }

    #[test]
    fn test_is_path_module_resource_boundaries() {
        let registry = ModuleRegistry::new();
        let module = module("demo", Path::new("/proj/demo"), &["/system/modules/demo/", "/abc"]);

        assert!(registry.is_path_module_resource(&module, Path::new("/proj/demo/vfs/system/modules/demo")));
        assert!(registry.is_path_module_resource(
            &module,
            Path::new("/proj/demo/vfs/system/modules/demo/foo.txt")
        ));
        assert!(registry.is_path_module_resource(&module, Path::new("/proj/demo/vfs/abc")));
        assert!(registry.is_path_module_resource(&module, Path::new("/proj/demo/vfs/abc/d")));
        assert!(!registry.is_path_module_resource(&module, Path::new("/proj/demo/vfs/abcdef")));
        assert!(!registry.is_path_module_resource(&module, Path::new("/proj/demo/vfs/system/modules")));
        assert!(!registry.is_path_module_resource(&module, Path::new("/proj/demo/vfs/system/modules/demo2")));
    }

    #[test]
    fn test_is_path_in_vfs_root() {
        let registry = ModuleRegistry::new();
        let module = module("demo", Path::new("/proj/demo"), &["/system/"]);
        let ignore = IgnoreRules::from_patterns(Vec::<String>::new(), ["*.bak"]).unwrap();

        assert!(registry.is_path_in_vfs_root(&module, Path::new("/proj/demo/vfs/system"), &ignore));
        assert!(!registry.is_path_in_vfs_root(&module, Path::new("/proj/demo/vfs/system/a.bak"), &ignore));
        assert!(!registry.is_path_in_vfs_root(&module, Path::new("/proj/demo/src"), &ignore));
    }

    #[test]
    fn test_export_points_recomputed_after_registration() {
        let mut registry = ModuleRegistry::new();
        let mut first = module("first", Path::new("/proj/first"), &["/system/"]);
        first.export_points = vec![ExportPoint::new("/system/modules/", "WEB-INF/first")];
        registry.insert(first);

        assert_eq!(registry.export_points().len(), 1);

        let mut second = module("second", Path::new("/proj/second"), &["/system/"]);
        second.export_points = vec![ExportPoint::new("/system/modules/second/lib/", "WEB-INF/lib")];
        registry.insert(second);

        assert_eq!(registry.export_points().len(), 2);
        // First registered wins even though the second is more specific
        let ep = registry
            .export_point_for_resource("/system/modules/second/lib/a.jar")
            .unwrap();
        assert_eq!(ep.target, PathBuf::from("WEB-INF/first"));

        registry.unregister_module(&ModuleId::new("first"));
        let ep = registry
            .export_point_for_resource("/system/modules/second/lib/a.jar")
            .unwrap();
        assert_eq!(ep.target, PathBuf::from("WEB-INF/lib"));
        assert!(registry.export_point_for_resource("/shared/a.jar").is_none());
    }
}
