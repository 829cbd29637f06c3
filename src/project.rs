//! A project: one root package and the bundles built from it.
//!
//! The project owns the bundle cache (one bundle per entry, platform and
//! dev flavor) and fans filesystem events out to every bundle. It does not
//! build anything itself; builds happen inside `Bundle::read`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::bundle::Bundle;
use crate::bundler::Bundler;
use crate::crawl::{CrawlFilter, crawl_package};
use crate::error::{BundleError, Result};
use crate::file::{PackageId, Platform, file_type_of};
use crate::parse::ParserRegistry;
use crate::plugin::PluginRegistry;
use crate::resolve::{package_file, resolve_main};

pub struct Project {
    bundler: Arc<Bundler>,
    plugins: Arc<PluginRegistry>,
    parsers: Arc<ParserRegistry>,
    root: PathBuf,
    package: PackageId,
    filter: CrawlFilter,
    bundles: RwLock<FxHashMap<String, Arc<Bundle>>>,
}

impl Project {
    /// Open the package at `root`. Fails when the directory has no valid
    /// manifest.
    pub fn new(
        bundler: Arc<Bundler>,
        plugins: Arc<PluginRegistry>,
        parsers: Arc<ParserRegistry>,
        root: PathBuf,
        filter: CrawlFilter,
    ) -> Result<Self> {
        let package = bundler.package(root.clone(), None)?;
        Ok(Self {
            bundler,
            plugins,
            parsers,
            root,
            package,
            filter,
            bundles: RwLock::new(FxHashMap::default()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bundler(&self) -> &Arc<Bundler> {
        &self.bundler
    }

    /// Register the project's files. Idempotent.
    pub fn crawl(&self) -> Result<()> {
        crawl_package(&self.bundler, self.package, &self.filter)
    }

    /// Bundle for an entry path relative to the root, or the package main
    /// when `None`. Bundles are cached per (entry, platform, dev).
    pub fn bundle(&self, entry: Option<&str>, platform: Platform, dev: bool) -> Result<Arc<Bundle>> {
        self.crawl()?;
        let file = match entry {
            Some(rel) => package_file(
                &self.bundler,
                self.package,
                &self.root.join(rel),
                platform,
                None,
            ),
            None => resolve_main(&self.bundler, self.package, platform),
        }
        .ok_or_else(|| BundleError::NoEntryModule {
            platform: platform.to_string(),
        })?;

        let key = format!("{}|{platform}|{dev}", entry.unwrap_or(""));
        if let Some(bundle) = self.bundles.read().get(&key) {
            return Ok(bundle.clone());
        }
        let bundle = Arc::new(Bundle::new(
            self.bundler.clone(),
            self.plugins.clone(),
            self.parsers.clone(),
            file,
            platform,
            dev,
            self.filter.clone(),
        ));
        Ok(self.bundles.write().entry(key).or_insert(bundle).clone())
    }

    pub fn bundles(&self) -> Vec<Arc<Bundle>> {
        self.bundles.read().values().cloned().collect()
    }

    /// A file changed (or appeared) on disk. Returns true when any bundle
    /// was dirtied.
    pub fn reload_file(&self, path: &Path) -> bool {
        let file = match self.bundler.reload_file(path) {
            Some(id) => id,
            None => {
                // A new file: register it when the filter accepts it, then
                // dirty every bundle so missing imports get retried.
                let Ok(rel) = path.strip_prefix(&self.root) else {
                    return false;
                };
                let file_type = file_type_of(path);
                if !self.filter.accepts(&file_type, &rel.to_string_lossy()) {
                    return false;
                }
                let id = self.bundler.add_file(path.to_path_buf(), self.package);
                self.bundler
                    .packages
                    .write()
                    .package_mut(self.package)
                    .file_types
                    .insert(file_type);
                for bundle in self.bundles() {
                    bundle.invalidate();
                }
                id
            }
        };
        let mut hit = false;
        for bundle in self.bundles() {
            hit |= bundle.reload_module(file);
        }
        hit
    }

    /// A file disappeared from disk. Returns true when any bundle was
    /// dirtied.
    pub fn delete_file(&self, path: &Path) -> bool {
        let Some(file) = self.bundler.delete_file(path) else {
            return false;
        };
        let mut hit = false;
        for bundle in self.bundles() {
            hit |= bundle.delete_module(file);
        }
        hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::glob_regex;
    use std::fs;
    use tempfile::TempDir;

    fn project(tmp: &TempDir) -> Project {
        fs::write(
            tmp.path().join("package.json"),
            r#"{"name":"app","version":"1.0.0","main":"index.js"}"#,
        )
        .unwrap();
        fs::write(tmp.path().join("index.js"), "module.exports = 1;\n").unwrap();
        Project::new(
            Arc::new(Bundler::new()),
            Arc::new(PluginRegistry::with_builtins()),
            Arc::new(ParserRegistry::with_builtins()),
            tmp.path().to_path_buf(),
            CrawlFilter::new(vec![".js".into()], glob_regex(&[])),
        )
        .unwrap()
    }

    #[test]
    fn test_bundle_cached_per_flavor() {
        let tmp = TempDir::new().unwrap();
        let project = project(&tmp);

        let a = project.bundle(None, Platform::Web, true).unwrap();
        let b = project.bundle(None, Platform::Web, true).unwrap();
        let c = project.bundle(None, Platform::Web, false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(project.bundles().len(), 2);
    }

    #[test]
    fn test_missing_entry_is_error() {
        let tmp = TempDir::new().unwrap();
        let project = project(&tmp);
        let err = project.bundle(Some("nope.js"), Platform::Web, true);
        assert!(matches!(err, Err(BundleError::NoEntryModule { .. })));
    }

    #[test]
    fn test_new_file_registered_on_reload() {
        let tmp = TempDir::new().unwrap();
        let project = project(&tmp);
        project.crawl().unwrap();

        let path = tmp.path().join("late.js");
        fs::write(&path, "module.exports = 2;\n").unwrap();
        assert!(project.bundler().get_file(&path).is_none());

        // No bundle tracks it yet, but it must be registered.
        project.reload_file(&path);
        assert!(project.bundler().get_file(&path).is_some());

        // Files outside the filter stay unregistered.
        let other = tmp.path().join("notes.md");
        fs::write(&other, "hi").unwrap();
        assert!(!project.reload_file(&other));
        assert!(project.bundler().get_file(&other).is_none());
    }
}
