//! Process-wide registries shared by every bundle.
//!
//! The file and package tables are explicit state objects passed by
//! reference into projects, bundles and the resolver, so tests can build
//! isolated instances. Mutation is idempotent; the tables only grow.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::Result;
use crate::file::{File, FileId, FileTable, PackageId};
use crate::package::{Package, PackageTable};

/// Shared registries: interned files, interned packages.
#[derive(Default)]
pub struct Bundler {
    pub(crate) files: RwLock<FileTable>,
    pub(crate) packages: RwLock<PackageTable>,
}

impl Bundler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern the package at `root`, deduplicated by path and by
    /// `name@version`.
    pub fn package(&self, root: PathBuf, parent: Option<PackageId>) -> Result<PackageId> {
        self.packages.write().add(root, parent)
    }

    /// Register a file under its owning package. Re-adding a deleted path
    /// revives the original record.
    pub fn add_file(&self, path: PathBuf, package: PackageId) -> FileId {
        self.files.write().add(path, package)
    }

    pub fn get_file(&self, path: &Path) -> Option<FileId> {
        self.files.read().get(path)
    }

    /// Borrow a file record inside the closure.
    pub fn with_file<R>(&self, id: FileId, f: impl FnOnce(&File) -> R) -> R {
        f(self.files.read().file(id))
    }

    /// Borrow a package record inside the closure.
    pub fn with_package<R>(&self, id: PackageId, f: impl FnOnce(&Package) -> R) -> R {
        f(self.packages.read().package(id))
    }

    pub fn file_path(&self, id: FileId) -> PathBuf {
        self.with_file(id, |f| f.path.clone())
    }

    /// A file changed on disk: drop its cached import positions so the next
    /// load reparses. Returns the id when the path is tracked.
    pub fn reload_file(&self, path: &Path) -> Option<FileId> {
        self.files.write().invalidate(path)
    }

    /// A file disappeared: untrack it, keeping its interned identity.
    pub fn delete_file(&self, path: &Path) -> Option<FileId> {
        self.files.write().untrack(path)
    }

    /// Nearest-ancestor-first dependency lookup: every ancestry level that
    /// declares `name`, paired with its would-be install root. The resolver
    /// tries them in order, skipping levels whose directory has no manifest.
    pub fn dependency_candidates(&self, from: PackageId, name: &str) -> Vec<(PackageId, PathBuf)> {
        let packages = self.packages.read();
        packages
            .ancestry(from)
            .filter(|&id| packages.package(id).has_dependency(name))
            .map(|id| {
                let root = packages.package(id).root.join("node_modules").join(name);
                (id, root)
            })
            .collect()
    }
}
