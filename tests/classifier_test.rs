use cmsync::{ClassifiedUnit, Config, IgnoreRules, Module, ModuleId, ModuleRegistry, Notice, PathClassifier, PublishList, SyncMode};
use proptest::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const CONFIG: &str = r#"
[connection]
url = "http://localhost:8080/cmis"
username = "admin"

[project]
local_vfs_root = "vfs"
ignored_files = ["*.tmp"]

[[modules]]
name = "demo"
root = "demo"
"#;

struct Fixture {
    _temp: TempDir,
    root: PathBuf,
    registry: ModuleRegistry,
    ignore: IgnoreRules,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("demo/vfs/system/modules/demo/lib")).unwrap();
        fs::write(root.join("demo/vfs/system/modules/demo/foo.txt"), "foo").unwrap();
        fs::write(root.join("demo/vfs/system/modules/demo/scratch.tmp"), "x").unwrap();
        fs::create_dir_all(root.join("demo/docs")).unwrap();

        let config = Config::parse(CONFIG, &root).unwrap();
        let registry = ModuleRegistry::from_config(&config);
        let ignore = config.ignore_rules().unwrap();
        Self {
            _temp: temp,
            root,
            registry,
            ignore,
        }
    }

    fn classify(&self, paths: &[PathBuf]) -> cmsync::Classification {
        PathClassifier::new(&self.registry, &self.ignore).classify(paths)
    }
}

#[test]
fn test_module_root_expands_to_declared_resource() {
    let fx = Fixture::new();
    let result = fx.classify(&[fx.root.join("demo")]);

    assert_eq!(
        result.units,
        vec![ClassifiedUnit::ResourcePath {
            module: "demo".to_string(),
            vfs_path: "/system/modules/demo/".to_string(),
        }]
    );
    assert!(result.notices.is_empty());
}

#[test]
fn test_file_inside_resource_is_resource_unit() {
    let fx = Fixture::new();
    let file = fx.root.join("demo/vfs/system/modules/demo/foo.txt");
    let result = fx.classify(&[file.clone()]);

    assert_eq!(
        result.units,
        vec![ClassifiedUnit::Resource {
            module: "demo".to_string(),
            real_path: file,
            vfs_path: "/system/modules/demo/foo.txt".to_string(),
        }]
    );
}

#[test]
fn test_root_and_own_file_classify_like_root_alone() {
    let fx = Fixture::new();
    let root = fx.root.join("demo");
    let file = fx.root.join("demo/vfs/system/modules/demo/foo.txt");

    let alone = fx.classify(&[root.clone()]);
    let both = fx.classify(&[root.clone(), file.clone()]);
    let reversed = fx.classify(&[file, root]);

    assert_eq!(both.units, alone.units);
    assert_eq!(reversed.units, alone.units);
    assert_eq!(PublishList::from(&both), PublishList::from(&alone));
}

#[test]
fn test_ancestor_directory_selects_resources_below() {
    let fx = Fixture::new();
    let result = fx.classify(&[fx.root.join("demo/vfs/system")]);

    assert_eq!(result.vfs_paths(), vec!["/system/modules/demo/"]);
}

#[test]
fn test_notices_for_unclassified_paths() {
    let fx = Fixture::new();
    let outside = fx.root.join("elsewhere.txt");
    let ignored = fx.root.join("demo/vfs/system/modules/demo/scratch.tmp");
    let docs = fx.root.join("demo/docs");

    let result = fx.classify(&[outside.clone(), ignored.clone(), docs.clone()]);

    assert!(result.is_empty());
    assert_eq!(
        result.notices,
        vec![
            Notice::NotInModule(outside),
            Notice::Ignored(ignored),
            Notice::OutOfScope(docs.clone()),
        ]
    );
    assert_eq!(result.warnings().collect::<Vec<_>>(), vec![&Notice::OutOfScope(docs)]);
}

#[test]
fn test_disabled_module_is_not_registered() {
    let temp = TempDir::new().unwrap();
    let config = Config::parse(
        &format!("{}enabled = false\n", CONFIG),
        temp.path(),
    )
    .unwrap();
    let registry = ModuleRegistry::from_config(&config);
    assert!(registry.is_empty());
}

fn module_with_resource(resource: &str) -> Module {
    Module {
        id: ModuleId::new("m"),
        name: "m".to_string(),
        content_root: PathBuf::from("/proj/m"),
        local_vfs_root: PathBuf::from("/proj/m/vfs"),
        export_site_root: "/".to_string(),
        resources: vec![resource.to_string()],
        export_points: Vec::new(),
        sync_mode: SyncMode::Sync,
        version: None,
    }
}

proptest! {
    #[test]
    fn prop_resource_boundary(
        name in "[a-z]{1,8}",
        suffix in "[a-z0-9]{1,4}",
        child in "[a-z]{1,8}",
        trailing in any::<bool>(),
    ) {
        let resource = if trailing { format!("/system/{}/", name) } else { format!("/system/{}", name) };
        let module = module_with_resource(&resource);
        let registry = ModuleRegistry::new();
        let base = Path::new("/proj/m/vfs/system");

        prop_assert!(registry.is_path_module_resource(&module, &base.join(&name)));
        prop_assert!(registry.is_path_module_resource(&module, &base.join(&name).join(&child)));
        let sibling = format!("{}{}", name, suffix);
        prop_assert!(!registry.is_path_module_resource(&module, &base.join(sibling)));
        prop_assert!(!registry.is_path_module_resource(&module, base));
    }
}
