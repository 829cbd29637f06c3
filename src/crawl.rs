//! On-demand package crawling.
//!
//! Crawling registers every matching file under a package root into the
//! shared file table. A crawl is idempotent per (directory, filter) pair:
//! repeated calls with the same filter are no-ops, so the resolver can crawl
//! lazily from multiple bundles without duplicate entries.

use std::path::Path;

use regex::Regex;
use walkdir::WalkDir;

use crate::bundler::Bundler;
use crate::error::Result;
use crate::file::PackageId;

/// Which files a crawl registers.
#[derive(Debug, Clone)]
pub struct CrawlFilter {
    /// File types with the leading dot, e.g. `.js`. Sorted at construction
    /// so the fingerprint is stable.
    pub file_types: Vec<String>,
    pub exclude: Option<Regex>,
}

impl CrawlFilter {
    pub fn new(mut file_types: Vec<String>, exclude: Option<Regex>) -> Self {
        file_types.sort();
        Self {
            file_types,
            exclude,
        }
    }

    /// Stable identity of this filter for the crawl ledger.
    fn fingerprint(&self) -> String {
        format!(
            "{}|{}",
            self.file_types.join(","),
            self.exclude.as_ref().map_or("", |re| re.as_str())
        )
    }

    /// True when a file of this type at this package-relative path belongs
    /// in the bundle universe.
    pub fn accepts(&self, file_type: &str, rel_path: &str) -> bool {
        if file_type.is_empty() || !self.file_types.iter().any(|t| t == file_type) {
            return false;
        }
        self.exclude.as_ref().is_none_or(|re| !re.is_match(rel_path))
    }
}

/// Compile glob patterns into one exclusion regex.
///
/// Supports `*` (within a path segment), `**` (across segments) and `?`.
pub fn glob_regex(patterns: &[String]) -> Option<Regex> {
    if patterns.is_empty() {
        return None;
    }
    let mut sorted: Vec<&String> = patterns.iter().collect();
    sorted.sort();

    let alternatives: Vec<String> = sorted.iter().map(|p| glob_to_regex(p)).collect();
    let source = format!("(?:^|/)(?:{})$", alternatives.join("|"));
    Some(Regex::new(&source).expect("invalid exclude pattern"))
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out
}

/// Crawl a package directory, registering matching files.
///
/// Skips `node_modules` (dependencies are crawled when resolved into) and
/// dotfile directories.
pub fn crawl_package(bundler: &Bundler, package: PackageId, filter: &CrawlFilter) -> Result<()> {
    let root = {
        let mut packages = bundler.packages.write();
        let pkg = packages.package_mut(package);
        let key = format!("{}|{}", pkg.root.display(), filter.fingerprint());
        if !pkg.crawled.insert(key) {
            return Ok(());
        }
        pkg.root.clone()
    };

    // The root itself is exempt from the directory skips; a package may
    // legitimately live in a dot-named directory.
    let walker = WalkDir::new(&root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e.path(), e.file_type().is_dir()));

    for entry in walker.filter_map(std::result::Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let file_type = crate::file::file_type_of(path);
        let rel = path.strip_prefix(&root).unwrap_or(path);
        let rel = rel.to_string_lossy();
        if !filter.accepts(&file_type, &rel) {
            continue;
        }

        bundler.add_file(path.to_path_buf(), package);
        bundler
            .packages
            .write()
            .package_mut(package)
            .file_types
            .insert(file_type);
    }

    Ok(())
}

fn is_skipped_dir(path: &Path, is_dir: bool) -> bool {
    if !is_dir {
        return false;
    }
    match path.file_name().and_then(|n| n.to_str()) {
        Some("node_modules") => true,
        Some(name) => name.starts_with('.'),
        None => false,
    }
}
