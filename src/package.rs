//! Package manifests and the process-wide package table.
//!
//! A package is a directory with a `package.json`. Packages are created
//! lazily when first referenced, cached by root path, and deduplicated by
//! `name@version` so identical installed copies collapse into one record.
//! Packages are never evicted in-process.

use std::fs;
use std::path::{Path, PathBuf};

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;

use crate::error::{BundleError, Result};
use crate::file::PackageId;

/// The subset of `package.json` the bundler consumes.
#[derive(Debug, Default, Deserialize)]
pub struct PackageMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub main: Option<String>,
    #[serde(default)]
    pub dependencies: FxHashMap<String, String>,
}

#[derive(Debug)]
pub struct Package {
    pub root: PathBuf,
    pub meta: PackageMeta,
    /// Enclosing package, for nested dependency resolution.
    pub parent: Option<PackageId>,
    /// File types seen while crawling this package.
    pub file_types: FxHashSet<String>,
    /// Crawl ledger keyed by (directory, filter) fingerprint. A repeated
    /// crawl with the same fingerprint is a no-op.
    pub crawled: FxHashSet<String>,
}

impl Package {
    /// `name@version`, the dedup key.
    pub fn version_key(&self) -> String {
        format!("{}@{}", self.meta.name, self.meta.version)
    }

    pub fn has_dependency(&self, name: &str) -> bool {
        self.meta.dependencies.contains_key(name)
    }
}

/// Read and parse `<root>/package.json`.
fn read_meta(root: &Path) -> Result<PackageMeta> {
    let meta_path = root.join("package.json");
    let raw = fs::read_to_string(&meta_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BundleError::PackageMetadataMissing(root.to_path_buf())
        } else {
            BundleError::io(&meta_path, e)
        }
    })?;
    serde_json::from_str(&raw).map_err(|source| BundleError::PackageMetadataInvalid {
        path: meta_path,
        source,
    })
}

/// Process-wide table of interned packages.
#[derive(Debug, Default)]
pub struct PackageTable {
    by_root: FxHashMap<PathBuf, PackageId>,
    by_version: FxHashMap<String, PackageId>,
    packages: Vec<Package>,
}

impl PackageTable {
    /// Intern the package at `root`, reading its manifest on first use.
    ///
    /// An already-interned `name@version` wins over a fresh record so two
    /// identical installed copies share one id.
    pub fn add(&mut self, root: PathBuf, parent: Option<PackageId>) -> Result<PackageId> {
        if let Some(&id) = self.by_root.get(&root) {
            return Ok(id);
        }
        let meta = read_meta(&root)?;
        let pkg = Package {
            root: root.clone(),
            meta,
            parent,
            file_types: FxHashSet::default(),
            crawled: FxHashSet::default(),
        };

        let key = pkg.version_key();
        if let Some(&id) = self.by_version.get(&key) {
            self.by_root.insert(root, id);
            return Ok(id);
        }

        let id = PackageId(self.packages.len() as u32);
        self.packages.push(pkg);
        self.by_root.insert(root, id);
        self.by_version.insert(key, id);
        Ok(id)
    }

    pub fn get(&self, root: &Path) -> Option<PackageId> {
        self.by_root.get(root).copied()
    }

    pub fn package(&self, id: PackageId) -> &Package {
        &self.packages[id.0 as usize]
    }

    pub fn package_mut(&mut self, id: PackageId) -> &mut Package {
        &mut self.packages[id.0 as usize]
    }

    /// Walk the parent chain starting at `id` (inclusive).
    pub fn ancestry(&self, id: PackageId) -> impl Iterator<Item = PackageId> + '_ {
        let mut cursor = Some(id);
        std::iter::from_fn(move || {
            let id = cursor?;
            cursor = self.packages[id.0 as usize].parent;
            Some(id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, name: &str, version: &str, deps: &[(&str, &str)]) {
        let deps: FxHashMap<_, _> = deps.iter().copied().collect();
        let manifest = serde_json::json!({
            "name": name,
            "version": version,
            "dependencies": deps,
        });
        fs::write(dir.join("package.json"), manifest.to_string()).unwrap();
    }

    #[test]
    fn test_missing_manifest() {
        let tmp = TempDir::new().unwrap();
        let mut table = PackageTable::default();
        let err = table.add(tmp.path().to_path_buf(), None).unwrap_err();
        assert!(err.is_package_not_found());
    }

    #[test]
    fn test_dedup_by_version() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        write_manifest(&a, "left-pad", "1.0.0", &[]);
        write_manifest(&b, "left-pad", "1.0.0", &[]);

        let mut table = PackageTable::default();
        let id_a = table.add(a, None).unwrap();
        let id_b = table.add(b, None).unwrap();
        assert_eq!(id_a, id_b);
    }

    #[test]
    fn test_ancestry_chain() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("app");
        let dep = root.join("node_modules/x");
        fs::create_dir_all(&dep).unwrap();
        write_manifest(&root, "app", "0.1.0", &[("x", "^1.0.0")]);
        write_manifest(&dep, "x", "1.2.3", &[]);

        let mut table = PackageTable::default();
        let root_id = table.add(root, None).unwrap();
        let dep_id = table.add(dep, Some(root_id)).unwrap();

        let chain: Vec<_> = table.ancestry(dep_id).collect();
        assert_eq!(chain, vec![dep_id, root_id]);
        assert!(table.package(root_id).has_dependency("x"));
    }
}
