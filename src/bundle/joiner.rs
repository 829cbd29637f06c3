//! Payload assembly.
//!
//! The joiner renders the runtime prelude (globals, the `__d`/`require`
//! registry shim, polyfills), wraps each module body under its identifier,
//! rewrites import refs to identifiers, and emits the bootstrap call into
//! the entry module.
//!
//! Identifiers are either small integers (terse mode) or readable
//! `name@version/relative/path` strings (debug mode), chosen once per
//! bundle. When two installed versions of one package name coexist, debug
//! identifiers carry the version; when only one version remains they are
//! renamed back and every affected module plus its parents is re-marked
//! changed so refs get rewritten on the next build.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::bundler::Bundler;
use crate::error::{BundleError, Result};
use crate::file::PackageId;
use crate::parse::ParsedImport;

use super::graph::{ModuleGraph, ModuleId};

/// The module registry shim compiled into every payload. `require` of an
/// unknown identifier throws a descriptive error, so a bundle with missing
/// imports fails loudly when executed instead of silently dropping code.
const REQUIRE_SHIM: &str = r#"  var __modules = {};
  var __cache = {};
  function __d(id, factory) {
    __modules[id] = factory;
  }
  function require(id) {
    if (__cache[id]) return __cache[id].exports;
    var factory = __modules[id];
    if (!factory) {
      throw new Error("Cannot resolve module '" + id + "'");
    }
    var module = __cache[id] = {exports: {}};
    factory(module, module.exports);
    return module.exports;
  }
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentMode {
    /// Monotonically increasing integers.
    Terse,
    /// `name@version/relative/path` strings for debugging.
    Debug,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ident {
    Num(u32),
    Name(String),
}

impl Ident {
    /// Render as a JavaScript expression.
    pub fn render(&self) -> String {
        match self {
            Self::Num(n) => n.to_string(),
            Self::Name(name) => {
                serde_json::to_string(name).unwrap_or_else(|_| format!("\"{name}\""))
            }
        }
    }

    /// Render as the bare ref-replacement text (no quotes; the quotes of
    /// the original ref are reused).
    pub fn as_ref_text(&self) -> String {
        match self {
            Self::Num(n) => n.to_string(),
            Self::Name(name) => name.clone(),
        }
    }
}

/// Identifier table for one bundle. Persists across patches so unchanged
/// modules keep their identifiers.
#[derive(Debug)]
pub struct Idents {
    mode: IdentMode,
    next: u32,
    by_module: FxHashMap<ModuleId, Ident>,
    /// Relative path of each module inside its package, cached for renames.
    rel_of: FxHashMap<ModuleId, String>,
    package_ids: FxHashMap<PackageId, String>,
    versions_of: FxHashMap<String, FxHashSet<PackageId>>,
    modules_of: FxHashMap<PackageId, FxHashSet<ModuleId>>,
}

impl Idents {
    pub fn new(mode: IdentMode) -> Self {
        Self {
            mode,
            next: 0,
            by_module: FxHashMap::default(),
            rel_of: FxHashMap::default(),
            package_ids: FxHashMap::default(),
            versions_of: FxHashMap::default(),
            modules_of: FxHashMap::default(),
        }
    }

    pub fn get(&self, id: ModuleId) -> Option<&Ident> {
        self.by_module.get(&id)
    }

    pub fn clear(&mut self) {
        self.next = 0;
        self.by_module.clear();
        self.rel_of.clear();
        self.package_ids.clear();
        self.versions_of.clear();
        self.modules_of.clear();
    }

    /// Assign an identifier to a module.
    ///
    /// In debug mode, introducing a second version of an already-present
    /// package name renames the first package's modules to versioned
    /// identifiers. Returns every module whose identifier changed as a side
    /// effect (the caller re-marks them and their parents changed).
    pub fn assign(
        &mut self,
        bundler: &Bundler,
        graph: &ModuleGraph,
        id: ModuleId,
    ) -> Vec<ModuleId> {
        if self.by_module.contains_key(&id) {
            return Vec::new();
        }
        if self.mode == IdentMode::Terse {
            self.by_module.insert(id, Ident::Num(self.next));
            self.next += 1;
            return Vec::new();
        }

        let file = graph.module(id).file;
        let (pkg, rel) = bundler.with_file(file, |f| {
            let pkg = f.package;
            (pkg, f.path.clone())
        });
        let (root, name, version) = bundler.with_package(pkg, |p| {
            (
                p.root.clone(),
                p.meta.name.clone(),
                p.meta.version.clone(),
            )
        });
        let rel = rel
            .strip_prefix(&root)
            .unwrap_or(&rel)
            .to_string_lossy()
            .replace('\\', "/");

        let mut renamed = Vec::new();
        let pkg_id = match self.package_ids.get(&pkg) {
            Some(existing) => existing.clone(),
            None => {
                let present: Vec<PackageId> = self
                    .versions_of
                    .get(&name)
                    .map(|v| v.iter().copied().collect())
                    .unwrap_or_default();
                let pkg_id = if present.is_empty() {
                    name.clone()
                } else {
                    // A second version appeared: force every present version
                    // onto versioned identifiers.
                    for other in present {
                        let versioned = bundler
                            .with_package(other, |p| format!("{}@{}", p.meta.name, p.meta.version));
                        renamed.extend(self.rename_package(other, versioned));
                    }
                    format!("{name}@{version}")
                };
                self.versions_of.entry(name.clone()).or_default().insert(pkg);
                self.package_ids.insert(pkg, pkg_id.clone());
                pkg_id
            }
        };

        self.rel_of.insert(id, rel.clone());
        self.by_module
            .insert(id, Ident::Name(module_ident(&pkg_id, &rel)));
        self.modules_of.entry(pkg).or_default().insert(id);
        renamed
    }

    /// Forget a deleted module's identifier.
    ///
    /// In debug mode, dropping the last module of a package whose name then
    /// has exactly one remaining version renames that survivor back to the
    /// unversioned form. Returns the renamed modules.
    pub fn remove(&mut self, bundler: &Bundler, graph: &ModuleGraph, id: ModuleId) -> Vec<ModuleId> {
        if self.by_module.remove(&id).is_none() {
            return Vec::new();
        }
        self.rel_of.remove(&id);
        if self.mode == IdentMode::Terse {
            return Vec::new();
        }

        let file = graph.module(id).file;
        let pkg = bundler.with_file(file, |f| f.package);
        let Some(mods) = self.modules_of.get_mut(&pkg) else {
            return Vec::new();
        };
        mods.remove(&id);
        if !mods.is_empty() {
            return Vec::new();
        }

        // Package left the bundle.
        self.modules_of.remove(&pkg);
        self.package_ids.remove(&pkg);
        let name = bundler.with_package(pkg, |p| p.meta.name.clone());
        let Some(versions) = self.versions_of.get_mut(&name) else {
            return Vec::new();
        };
        versions.remove(&pkg);
        if versions.len() == 1 {
            if let Some(&survivor) = versions.iter().next() {
                return self.rename_package(survivor, name);
            }
        }
        Vec::new()
    }

    fn rename_package(&mut self, pkg: PackageId, next_id: String) -> Vec<ModuleId> {
        match self.package_ids.get(&pkg) {
            Some(prev) if *prev == next_id => return Vec::new(),
            Some(_) | None => {}
        }
        self.package_ids.insert(pkg, next_id.clone());

        let mut renamed = Vec::new();
        if let Some(mods) = self.modules_of.get(&pkg) {
            for &mid in mods {
                if let Some(rel) = self.rel_of.get(&mid) {
                    self.by_module
                        .insert(mid, Ident::Name(module_ident(&next_id, rel)));
                    renamed.push(mid);
                }
            }
        }
        renamed
    }
}

/// `pkg/lib/util.js`; `index.js` collapses onto the package identifier.
fn module_ident(pkg_id: &str, rel: &str) -> String {
    if rel == "index.js" || rel == "index" {
        return pkg_id.to_string();
    }
    if let Some(dir) = rel.strip_suffix("/index.js") {
        return format!("{pkg_id}/{dir}");
    }
    format!("{pkg_id}/{rel}")
}

// =============================================================================
// Rendering
// =============================================================================

/// Render the runtime prelude: IIFE opener, `__DEV__`, globals, the require
/// shim and any polyfills.
pub fn render_prelude(
    dev: bool,
    globals: &BTreeMap<String, serde_json::Value>,
    polyfills: &[PathBuf],
) -> Result<String> {
    let mut out = String::from("(function() {\n");
    out.push_str(&format!("  var __DEV__ = {dev};\n"));
    for (key, value) in globals {
        out.push_str(&format!("  var {key} = {value};\n"));
    }
    out.push_str(REQUIRE_SHIM);
    for path in polyfills {
        let code =
            std::fs::read_to_string(path).map_err(|e| BundleError::io(path.clone(), e))?;
        out.push_str(&indent_lines(&code, 1));
        out.push('\n');
    }
    Ok(out)
}

/// The closing bootstrap: invoke the entry module and close the IIFE.
pub fn render_bootstrap(entry: &Ident) -> String {
    format!("\n  require({});\n}})()", entry.render())
}

/// Wrap a module body under its identifier for the `__d` registry.
pub fn wrap_module(body: &str, ident: &Ident) -> String {
    format!(
        "\n  __d({}, function(module, exports) {{\n{}\n  }})\n",
        ident.render(),
        indent_lines(body, 2),
    )
}

/// Replace import refs with module identifiers, splicing by parsed
/// position in ascending order. Refs without a resolved identifier (missing
/// imports) are left untouched so the shim can fail loudly at runtime.
pub fn rewrite_imports(
    body: &str,
    imports: &[ParsedImport],
    ident_of: impl Fn(&str) -> Option<String>,
) -> String {
    let mut out = String::with_capacity(body.len());
    let mut input_pos = 0;
    for imp in imports {
        let Some(ident) = ident_of(&imp.source) else {
            continue;
        };
        if ident == imp.source {
            continue;
        }
        out.push_str(&body[input_pos..imp.index]);
        out.push_str(&ident);
        input_pos = imp.index + imp.source.len();
    }
    out.push_str(&body[input_pos..]);
    out
}

/// Insert indentation before each line, trimming leading/trailing breaks.
fn indent_lines(code: &str, depth: usize) -> String {
    let indent = "  ".repeat(depth);
    let trimmed = code.trim_matches('\n');
    trimmed
        .lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{indent}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_render() {
        assert_eq!(Ident::Num(7).render(), "7");
        assert_eq!(Ident::Name("app/src/a.js".into()).render(), "\"app/src/a.js\"");
    }

    #[test]
    fn test_module_ident_index_collapse() {
        assert_eq!(module_ident("app", "index.js"), "app");
        assert_eq!(module_ident("app", "lib/index.js"), "app/lib");
        assert_eq!(module_ident("app", "lib/util.js"), "app/lib/util.js");
    }

    #[test]
    fn test_wrap_module_shape() {
        let wrapped = wrap_module("module.exports = 1", &Ident::Num(0));
        assert!(wrapped.starts_with("\n  __d(0, function(module, exports) {\n"));
        assert!(wrapped.contains("    module.exports = 1"));
        assert!(wrapped.ends_with("\n  })\n"));
    }

    #[test]
    fn test_rewrite_imports_in_order() {
        let body = "var a = require('./a');\nvar b = require('./b');\n";
        let imports = vec![
            ParsedImport {
                source: "./a".into(),
                line: 0,
                index: body.find("./a").unwrap(),
            },
            ParsedImport {
                source: "./b".into(),
                line: 1,
                index: body.find("./b").unwrap(),
            },
        ];
        let out = rewrite_imports(body, &imports, |r| match r {
            "./a" => Some("0".to_string()),
            "./b" => Some("1".to_string()),
            _ => None,
        });
        assert_eq!(out, "var a = require('0');\nvar b = require('1');\n");
    }

    #[test]
    fn test_rewrite_leaves_missing_refs() {
        let body = "require('ghost')";
        let imports = vec![ParsedImport {
            source: "ghost".into(),
            line: 0,
            index: 9,
        }];
        let out = rewrite_imports(body, &imports, |_| None);
        assert_eq!(out, body);
    }

    #[test]
    fn test_prelude_contains_shim_and_globals() {
        let mut globals = BTreeMap::new();
        globals.insert("VERSION".to_string(), serde_json::json!("1.2.3"));
        let prelude = render_prelude(true, &globals, &[]).unwrap();
        assert!(prelude.starts_with("(function() {\n  var __DEV__ = true;\n"));
        assert!(prelude.contains("var VERSION = \"1.2.3\";"));
        assert!(prelude.contains("function require(id)"));
        assert!(prelude.contains("Cannot resolve module"));
    }

    #[test]
    fn test_bootstrap() {
        assert_eq!(
            render_bootstrap(&Ident::Name("app".into())),
            "\n  require(\"app\");\n})()"
        );
    }
}
