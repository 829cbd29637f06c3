//! Import resolution.
//!
//! Turns one textual ref plus its source file into a concrete file id, or
//! nothing when the ref cannot be resolved (recorded as missing by the
//! caller, never an error). Relative refs stay inside the owning package;
//! bare refs walk the package ancestry nearest-ancestor-first and lazily
//! crawl the located dependency package.
//!
//! Tie-break for qualified variants: exact platform match > unqualified
//! file > unresolved.

use std::path::{Component, Path, PathBuf};

use crate::bundler::Bundler;
use crate::crawl::{CrawlFilter, crawl_package};
use crate::error::{BundleError, Result};
use crate::file::{FileId, PackageId, Platform, file_type_of};

/// Resolve `ref_` as seen from `src`.
pub fn resolve_import(
    bundler: &Bundler,
    ref_: &str,
    src: FileId,
    platform: Platform,
    filter: &CrawlFilter,
) -> Result<Option<FileId>> {
    let (src_path, src_pkg, src_type) =
        bundler.with_file(src, |f| (f.path.clone(), f.package, f.file_type.clone()));

    if ref_.starts_with('.') {
        let dir = src_path.parent().unwrap_or(Path::new("/"));
        let target = normalize(&dir.join(ref_));
        let root = bundler.with_package(src_pkg, |p| p.root.clone());
        if !target.starts_with(&root) {
            // Escaping the owning package leaves the ref unresolved.
            return Ok(None);
        }
        return Ok(package_file(
            bundler,
            src_pkg,
            &target,
            platform,
            Some(&src_type),
        ));
    }

    if Path::new(ref_).is_absolute() {
        return Err(BundleError::unsupported_import(src_path, ref_));
    }

    let (name, subpath) = match ref_.split_once('/') {
        Some((name, rest)) => (name, Some(rest)),
        None => (ref_, None),
    };

    let Some(dep) = find_dependency(bundler, src_pkg, name)? else {
        return Ok(None);
    };

    // Crawl on demand; repeated crawls are no-ops.
    crawl_package(bundler, dep, filter)?;

    let resolved = match subpath {
        Some(rest) => {
            let root = bundler.with_package(dep, |p| p.root.clone());
            package_file(bundler, dep, &root.join(rest), platform, Some(&src_type))
        }
        None => resolve_main(bundler, dep, platform),
    };
    Ok(resolved)
}

/// Locate a dependency package by name, walking the ancestry chain.
///
/// A declared dependency whose directory has no manifest is treated as not
/// found and the search continues up the chain; any other error propagates.
fn find_dependency(bundler: &Bundler, from: PackageId, name: &str) -> Result<Option<PackageId>> {
    for (owner, root) in bundler.dependency_candidates(from, name) {
        match bundler.package(root, Some(owner)) {
            Ok(dep) => return Ok(Some(dep)),
            Err(e) if e.is_package_not_found() => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

/// Resolve the package entry point (`main` from the manifest, `index` by
/// default).
pub fn resolve_main(bundler: &Bundler, pkg: PackageId, platform: Platform) -> Option<FileId> {
    let (root, main) = bundler.with_package(pkg, |p| {
        let main = p.meta.main.clone().unwrap_or_else(|| "index".to_string());
        (p.root.clone(), main)
    });
    package_file(bundler, pkg, &root.join(main), platform, None)
}

/// Look up a file within a package, preferring platform-qualified variants.
///
/// Extensionless paths try `<path><type>` then `<path>/index<type>` for the
/// preferred type first, then every file type known to the package.
pub fn package_file(
    bundler: &Bundler,
    pkg: PackageId,
    path: &Path,
    platform: Platform,
    preferred_type: Option<&str>,
) -> Option<FileId> {
    let file_type = file_type_of(path);
    if !file_type.is_empty() {
        let known = bundler.with_package(pkg, |p| p.file_types.contains(&file_type));
        if !known {
            return None;
        }
        return lookup_variant(bundler, path, &file_type, platform);
    }

    let mut types: Vec<String> = Vec::new();
    if let Some(ty) = preferred_type {
        types.push(ty.to_string());
    }
    bundler.with_package(pkg, |p| {
        let mut known: Vec<_> = p.file_types.iter().cloned().collect();
        known.sort();
        for ty in known {
            if !types.contains(&ty) {
                types.push(ty);
            }
        }
    });

    for ty in &types {
        let with_type = append_type(path, ty);
        if let Some(id) = lookup_variant(bundler, &with_type, ty, platform) {
            return Some(id);
        }
        let index = path.join(format!("index{ty}"));
        if let Some(id) = lookup_variant(bundler, &index, ty, platform) {
            return Some(id);
        }
    }
    None
}

/// Exact platform match beats the unqualified file.
fn lookup_variant(
    bundler: &Bundler,
    path: &Path,
    file_type: &str,
    platform: Platform,
) -> Option<FileId> {
    let qualified = qualify(path, file_type, platform);
    bundler
        .get_file(&qualified)
        .or_else(|| bundler.get_file(path))
}

/// `/a/foo.js` + ios -> `/a/foo.ios.js`
fn qualify(path: &Path, file_type: &str, platform: Platform) -> PathBuf {
    let s = path.to_string_lossy();
    let stem = &s[..s.len() - file_type.len()];
    PathBuf::from(format!("{stem}.{platform}{file_type}"))
}

fn append_type(path: &Path, file_type: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(file_type);
    PathBuf::from(s)
}

/// Lexical normalization: resolves `.` and `..` without touching the
/// filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            c => out.push(c),
        }
    }
    out
}
