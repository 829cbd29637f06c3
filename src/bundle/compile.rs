//! From-scratch bundle compilation.
//!
//! Walks the import graph breadth-first from the entry module. Each module
//! is loaded at most once per build: modules are tagged with the build tag
//! *before* they are enqueued, so a dependency shared by many parents still
//! loads a single time. After the walk the payload is emitted in discovery
//! order: prelude, wrapped module bodies, bootstrap.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;

use rustc_hash::FxHashMap;

use crate::bundler::Bundler;
use crate::crawl::CrawlFilter;
use crate::error::{BundleError, Result};
use crate::file::Platform;
use crate::parse::ParserRegistry;
use crate::plugin::PluginRegistry;
use crate::resolve::resolve_import;

use super::StopToken;
use super::graph::{ModuleGraph, ModuleId, ModuleStatus};
use super::joiner::{self, Idents};

/// Everything a build needs besides the graph itself.
pub(crate) struct BuildCx<'a> {
    pub bundler: &'a Bundler,
    pub plugins: &'a PluginRegistry,
    pub parsers: &'a ParserRegistry,
    pub filter: &'a CrawlFilter,
    pub platform: Platform,
    pub dev: bool,
    /// Tag of the running build.
    pub tag: u64,
}

/// Unresolved refs per module.
pub(crate) type MissingMap = FxHashMap<ModuleId, BTreeSet<String>>;

/// Side effects of loading one module.
#[derive(Default)]
pub(crate) struct LoadOutcome {
    /// Every dependency touched while resolving, existing ones included.
    pub deps: Vec<ModuleId>,
    /// Dependencies created (or revived) by this load.
    pub added: Vec<ModuleId>,
    /// Former dependencies left parentless after a reparse dropped their
    /// ref. The caller decides whether they cascade.
    pub orphaned: Vec<ModuleId>,
    /// Refs that failed to resolve.
    pub missing: BTreeSet<String>,
}

/// Load one module: read, transform, parse, resolve, link.
///
/// Refs present in the previous parse but gone from this one are unlinked.
/// Unresolved refs land in `missing`, not in an error; the module's status
/// becomes `Missing` so later builds retry it.
pub(crate) async fn load_module(
    graph: &mut ModuleGraph,
    cx: &BuildCx<'_>,
    mid: ModuleId,
) -> Result<LoadOutcome> {
    let file = graph.module(mid).file;
    let (path, file_type) = cx
        .bundler
        .with_file(file, |f| (f.path.clone(), f.file_type.clone()));

    let mut body = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| BundleError::io(path.clone(), e))?;
    let kind = cx.plugins.apply(&path, file_type, &mut body, cx.dev)?;
    let imports = cx.parsers.parse(&kind, &body).unwrap_or_default();

    let mut out = LoadOutcome::default();

    // Unlink refs gone since the previous parse.
    let stale: Vec<(String, ModuleId)> = graph
        .module(mid)
        .imports
        .iter()
        .filter(|(ref_, _)| !imports.iter().any(|imp| &imp.source == *ref_))
        .map(|(ref_, &dep)| (ref_.clone(), dep))
        .collect();
    for (ref_, dep) in stale {
        if graph.unlink(mid, &ref_, dep) {
            out.orphaned.push(dep);
        }
    }

    for imp in &imports {
        if let Some(&dep) = graph.module(mid).imports.get(&imp.source) {
            out.deps.push(dep);
            continue;
        }
        match resolve_import(cx.bundler, &imp.source, file, cx.platform, cx.filter)? {
            Some(target) => {
                let dep = match graph.get(target) {
                    Some(dep) => dep,
                    None => {
                        let dep_kind = cx.bundler.with_file(target, |f| f.file_type.clone());
                        match graph.add(target, dep_kind) {
                            Ok(dep) => {
                                out.added.push(dep);
                                dep
                            }
                            Err(dep) => dep,
                        }
                    }
                };
                graph.link(mid, &imp.source, dep);
                out.deps.push(dep);
            }
            None => {
                out.missing.insert(imp.source.clone());
            }
        }
    }

    // Cache parse positions on the file record for the emit pass.
    cx.bundler.files.write().file_mut(file).imports = Some(imports);

    let module = graph.module_mut(mid);
    module.kind = kind;
    module.body = Some(body);
    module.status = if out.missing.is_empty() {
        ModuleStatus::Ok
    } else {
        ModuleStatus::Missing
    };
    Ok(out)
}

pub(crate) struct BuildOutput {
    pub payload: String,
    pub missing: MissingMap,
    /// Byte length of the prelude, i.e. the start offset of the first
    /// module.
    pub prelude_len: usize,
    /// True when the build was cancelled; the graph was reset and the
    /// payload is empty.
    pub stopped: bool,
}

/// Compile the whole bundle from its entry module.
pub(crate) async fn compile_bundle(
    graph: &mut ModuleGraph,
    idents: &mut Idents,
    cx: &BuildCx<'_>,
    globals: &BTreeMap<String, serde_json::Value>,
    polyfills: &[PathBuf],
    stop: &StopToken,
) -> Result<BuildOutput> {
    let entry = graph.entry.ok_or_else(|| BundleError::NoEntryModule {
        platform: cx.platform.to_string(),
    })?;

    graph.order.clear();
    idents.clear();
    let mut missing = MissingMap::default();
    let mut queue = VecDeque::new();
    graph.module_mut(entry).build_tag = cx.tag;
    graph.order.push(entry);
    queue.push_back(entry);

    while let Some(mid) = queue.pop_front() {
        if stop.is_stopped() {
            graph.reset();
            return Ok(BuildOutput {
                payload: String::new(),
                missing: MissingMap::default(),
                prelude_len: 0,
                stopped: true,
            });
        }
        let out = load_module(graph, cx, mid).await?;
        if !out.missing.is_empty() {
            missing.insert(mid, out.missing);
        }
        for dep in out.deps {
            let module = graph.module_mut(dep);
            if module.build_tag != cx.tag {
                module.build_tag = cx.tag;
                graph.order.push(dep);
                queue.push_back(dep);
            }
        }
    }

    // Identifier pass first: bodies reference modules discovered later.
    let order = graph.order.clone();
    for &mid in &order {
        idents.assign(cx.bundler, graph, mid);
    }

    let mut payload = joiner::render_prelude(cx.dev, globals, polyfills)?;
    let prelude_len = payload.len();
    for &mid in &order {
        let Some(body) = graph.module_mut(mid).body.take() else {
            continue;
        };
        let wrapped = emit_module(graph, idents, cx.bundler, mid, &body);
        let module = graph.module_mut(mid);
        module.start = payload.len();
        module.len = wrapped.len();
        payload.push_str(&wrapped);
    }
    let Some(entry_ident) = idents.get(entry) else {
        return Err(BundleError::NoEntryModule {
            platform: cx.platform.to_string(),
        });
    };
    payload.push_str(&joiner::render_bootstrap(entry_ident));

    Ok(BuildOutput {
        payload,
        missing,
        prelude_len,
        stopped: false,
    })
}

/// Rewrite a loaded body's import refs to identifiers and wrap it.
pub(crate) fn emit_module(
    graph: &ModuleGraph,
    idents: &Idents,
    bundler: &Bundler,
    mid: ModuleId,
    body: &str,
) -> String {
    let module = graph.module(mid);
    let parsed = bundler.with_file(module.file, |f| f.imports.clone().unwrap_or_default());
    let rewritten = joiner::rewrite_imports(body, &parsed, |ref_| {
        module
            .imports
            .get(ref_)
            .and_then(|&dep| idents.get(dep))
            .map(|ident| ident.as_ref_text())
    });
    match idents.get(mid) {
        Some(ident) => joiner::wrap_module(&rewritten, ident),
        None => String::new(),
    }
}
