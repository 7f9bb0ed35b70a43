//! Classification of user-selected local paths into sync-relevant units.
//!
//! A selection may overlap (a module root together with one of its own
//! files); the classifier keeps only the broadest unit so nothing is
//! processed twice. Output order follows selection order, then expansion
//! order.

use crate::filter::IgnoreRules;
use crate::module::{Module, ModuleId, ModuleRegistry};
use crate::path::{is_under, local_to_vfs, normalize_vfs};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// One unit of work produced by the classifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifiedUnit {
    /// Backed by a concrete local file or folder
    Resource {
        module: String,
        real_path: PathBuf,
        vfs_path: String,
    },
    /// Identified only by a declared VFS resource path
    ResourcePath { module: String, vfs_path: String },
}

impl ClassifiedUnit {
    pub fn module_id(&self) -> ModuleId {
        match self {
            ClassifiedUnit::Resource { module, .. } | ClassifiedUnit::ResourcePath { module, .. } => {
                ModuleId::new(module.clone())
            }
        }
    }

    pub fn vfs_path(&self) -> &str {
        match self {
            ClassifiedUnit::Resource { vfs_path, .. }
            | ClassifiedUnit::ResourcePath { vfs_path, .. } => vfs_path,
        }
    }

    /// Local file or folder this unit stands for
    pub fn local_path(&self, module: &Module) -> PathBuf {
        match self {
            ClassifiedUnit::Resource { real_path, .. } => real_path.clone(),
            ClassifiedUnit::ResourcePath { vfs_path, .. } => module.resource_local_path(vfs_path),
        }
    }
}

/// Informational or warning outcome for a selected path that produced no unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum Notice {
    /// Path is not inside any configured module
    NotInModule(PathBuf),
    /// Path matched an ignore rule
    Ignored(PathBuf),
    /// Path is inside a module but matches no resource
    OutOfScope(PathBuf),
}

impl Notice {
    pub fn is_warning(&self) -> bool {
        matches!(self, Notice::OutOfScope(_))
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::NotInModule(path) => {
                write!(f, "{} is not in a configured module", path.display())
            }
            Notice::Ignored(path) => write!(f, "{} is ignored", path.display()),
            Notice::OutOfScope(path) => write!(f, "{} is not a module path", path.display()),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Classification {
    pub units: Vec<ClassifiedUnit>,
    pub notices: Vec<Notice>,
}

impl Classification {
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn vfs_paths(&self) -> Vec<&str> {
        self.units.iter().map(ClassifiedUnit::vfs_path).collect()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter().filter(|n| n.is_warning())
    }
}

pub struct PathClassifier<'a> {
    registry: &'a ModuleRegistry,
    ignore: &'a IgnoreRules,
}

impl<'a> PathClassifier<'a> {
    pub fn new(registry: &'a ModuleRegistry, ignore: &'a IgnoreRules) -> Self {
        Self { registry, ignore }
    }

    pub fn classify<P: AsRef<Path>>(&self, paths: &[P]) -> Classification {
        let mut run = Run::default();
        for path in paths {
            self.classify_path(path.as_ref(), &mut run);
        }
        tracing::debug!(
            "Classified {} path(s) into {} unit(s)",
            paths.len(),
            run.units.len()
        );
        run.finish()
    }

    fn classify_path(&self, path: &Path, run: &mut Run) {
        if run.is_handled(path) {
            tracing::debug!("Already handled: {}", path.display());
            return;
        }

        let Some(module) = self.registry.module_for_path(path) else {
            tracing::info!("{} is not in a configured module, skipping", path.display());
            run.handled.insert(path.to_path_buf());
            run.notices.push(Notice::NotInModule(path.to_path_buf()));
            return;
        };

        if self.ignore.is_ignored(path) {
            tracing::info!("{} is ignored, skipping", path.display());
            run.handled.insert(path.to_path_buf());
            run.notices.push(Notice::Ignored(path.to_path_buf()));
            return;
        }

        if self.registry.is_path_module_root(module, path) {
            run.handled.insert(path.to_path_buf());
            self.handle_module_root(module, run);
        } else if self.registry.is_path_module_resource(module, path) {
            self.handle_module_resource(module, path, run);
        } else if let Some(resources) = self.resources_below(module, path) {
            for resource in resources {
                add_resource_path(module, resource, run);
            }
        } else {
            tracing::warn!("{} is not a module path, skipping", path.display());
            run.handled.insert(path.to_path_buf());
            run.notices.push(Notice::OutOfScope(path.to_path_buf()));
        }
    }

    /// Expand a module root into every declared resource path of the module
    fn handle_module_root(&self, module: &Module, run: &mut Run) {
        tracing::debug!("Expanding module root of {}", module.name);
        for resource in &module.resources {
            add_resource_path(module, resource, run);
        }
    }

    fn handle_module_resource(&self, module: &Module, path: &Path, run: &mut Run) {
        let vfs_path = local_to_vfs(&module.local_vfs_root, path).unwrap_or_else(|| "/".to_string());
        run.add(
            ClassifiedUnit::Resource {
                module: module.id.to_string(),
                real_path: path.to_path_buf(),
                vfs_path,
            },
            path.to_path_buf(),
        );
    }

    /// Declared resources below a directory inside the module's VFS root.
    ///
    /// `None` when `path` is not such a directory or covers no resource.
    fn resources_below<'m>(&self, module: &'m Module, path: &Path) -> Option<Vec<&'m str>> {
        if !path.is_dir() || !self.registry.is_path_in_vfs_root(module, path, self.ignore) {
            return None;
        }
        let dir_vfs = local_to_vfs(&module.local_vfs_root, path)?;
        let matches: Vec<&str> = module
            .resources
            .iter()
            .filter(|resource| is_under(&dir_vfs, &normalize_vfs(resource)))
            .map(String::as_str)
            .collect();
        if matches.is_empty() {
            None
        } else {
            Some(matches)
        }
    }
}

fn add_resource_path(module: &Module, resource: &str, run: &mut Run) {
    let local = module.resource_local_path(resource);
    if run.is_handled(&local) {
        tracing::debug!("Resource {} already covered", resource);
        return;
    }
    run.add(
        ClassifiedUnit::ResourcePath {
            module: module.id.to_string(),
            vfs_path: resource.to_string(),
        },
        local,
    );
}

/// Per-run bookkeeping; discarded after `classify` returns
#[derive(Default)]
struct Run {
    handled: HashSet<PathBuf>,
    /// Units with the local path each one covers
    units: Vec<(ClassifiedUnit, PathBuf)>,
    notices: Vec<Notice>,
}

impl Run {
    fn is_handled(&self, path: &Path) -> bool {
        self.handled.contains(path) || self.units.iter().any(|(_, covered)| path.starts_with(covered))
    }

    /// Record a unit, dropping narrower units it now covers
    fn add(&mut self, unit: ClassifiedUnit, covered: PathBuf) {
        self.units.retain(|(existing, existing_path)| {
            let narrower = existing_path.starts_with(&covered);
            if narrower {
                tracing::debug!("{} superseded by {}", existing.vfs_path(), unit.vfs_path());
            }
            !narrower
        });
        self.handled.insert(covered.clone());
        self.units.push((unit, covered));
    }

    fn finish(self) -> Classification {
        Classification {
            units: self.units.into_iter().map(|(unit, _)| unit).collect(),
            notices: self.notices,
        }
    }
}
