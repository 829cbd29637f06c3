//! One bundle: an entry module, its import graph and the emitted payload.
//!
//! `read` is the single build entry point. The first call compiles from
//! scratch; later calls patch the previous payload in place. A bundle runs
//! at most one build at a time: the whole build state sits behind an async
//! mutex, so a second concurrent `read` simply waits and then returns the
//! freshly cached payload.
//!
//! File events (`reload_module`, `delete_module`) are synchronous and
//! cheap: they queue the file id and mark the bundle dirty; the queues are
//! applied to the graph at the start of the next `read`.

mod compile;
mod graph;
mod joiner;
mod patch;

pub use graph::{ModuleId, ModuleStatus};
pub use joiner::IdentMode;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;

use crate::bundler::Bundler;
use crate::crawl::CrawlFilter;
use crate::error::{BundleError, Result};
use crate::file::{FileId, Platform};
use crate::log;
use crate::parse::ParserRegistry;
use crate::plugin::PluginRegistry;

use compile::{BuildCx, MissingMap, compile_bundle};
use graph::ModuleGraph;
use joiner::Idents;
use patch::patch_bundle;

/// Cooperative cancellation flag shared between a build and its caller.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Per-read build options.
#[derive(Debug, Clone, Default)]
pub struct ReadConfig {
    /// Extra globals compiled into the prelude, rendered as JSON.
    pub globals: BTreeMap<String, serde_json::Value>,
    /// Scripts inlined into the prelude after the module registry shim.
    pub polyfills: Vec<PathBuf>,
    pub stop: StopToken,
}

/// Unresolved refs grouped by the importing file.
pub type MissingReport = Vec<(PathBuf, Vec<String>)>;

type MissingHook = Box<dyn Fn(&MissingReport) + Send + Sync>;

#[derive(Default)]
struct Pending {
    reload: Vec<FileId>,
    delete: Vec<FileId>,
}

struct BundleState {
    graph: ModuleGraph,
    idents: Idents,
    compiled: bool,
    changed: FxHashSet<ModuleId>,
    deleted: FxHashSet<ModuleId>,
    missing: MissingMap,
    payload: Option<String>,
    prelude_len: usize,
}

pub struct Bundle {
    bundler: Arc<Bundler>,
    plugins: Arc<PluginRegistry>,
    parsers: Arc<ParserRegistry>,
    platform: Platform,
    dev: bool,
    entry: FileId,
    filter: CrawlFilter,
    cache_path: PathBuf,
    /// Monotonic build tag; also fences stale cache writes.
    tag: AtomicU64,
    dirty: AtomicBool,
    /// Files with a live module, mirrored after each build so event
    /// dispatch can answer without taking the build lock.
    tracked: RwLock<FxHashSet<FileId>>,
    pending: Mutex<Pending>,
    hooks: Mutex<Vec<MissingHook>>,
    state: tokio::sync::Mutex<BundleState>,
}

impl Bundle {
    pub fn new(
        bundler: Arc<Bundler>,
        plugins: Arc<PluginRegistry>,
        parsers: Arc<ParserRegistry>,
        entry: FileId,
        platform: Platform,
        dev: bool,
        filter: CrawlFilter,
    ) -> Self {
        let entry_path = bundler.file_path(entry);
        let cache_path = cache_path_for(&entry_path, platform, dev);

        let mut graph = ModuleGraph::new();
        let kind = bundler.with_file(entry, |f| f.file_type.clone());
        if let Ok(id) = graph.add(entry, kind) {
            graph.entry = Some(id);
        }
        let mut tracked = FxHashSet::default();
        tracked.insert(entry);

        let idents = Idents::new(if dev { IdentMode::Debug } else { IdentMode::Terse });
        Self {
            bundler,
            plugins,
            parsers,
            platform,
            dev,
            entry,
            filter,
            cache_path,
            tag: AtomicU64::new(0),
            dirty: AtomicBool::new(true),
            tracked: RwLock::new(tracked),
            pending: Mutex::new(Pending::default()),
            hooks: Mutex::new(Vec::new()),
            state: tokio::sync::Mutex::new(BundleState {
                graph,
                idents,
                compiled: false,
                changed: FxHashSet::default(),
                deleted: FxHashSet::default(),
                missing: MissingMap::default(),
                payload: None,
                prelude_len: 0,
            }),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn dev(&self) -> bool {
        self.dev
    }

    pub fn entry_file(&self) -> FileId {
        self.entry
    }

    /// Where the payload is persisted after each successful build.
    pub fn cache_path(&self) -> &std::path::Path {
        &self.cache_path
    }

    /// Build if needed and return the payload.
    pub async fn read(&self, cfg: &ReadConfig) -> Result<String> {
        let mut state = self.state.lock().await;
        self.apply_pending(&mut state);

        if !self.dirty.load(Ordering::SeqCst)
            && let Some(payload) = &state.payload
        {
            return Ok(payload.clone());
        }

        let tag = self.tag.fetch_add(1, Ordering::SeqCst) + 1;
        self.dirty.store(false, Ordering::SeqCst);
        let cx = BuildCx {
            bundler: &self.bundler,
            plugins: &self.plugins,
            parsers: &self.parsers,
            filter: &self.filter,
            platform: self.platform,
            dev: self.dev,
            tag,
        };

        let state = &mut *state;
        let patching = state.compiled;
        let out = if patching {
            let prev = state.payload.take().unwrap_or_default();
            let patched = patch_bundle(
                &mut state.graph,
                &mut state.idents,
                &cx,
                &prev,
                state.prelude_len,
                &mut state.changed,
                &mut state.deleted,
                &mut state.missing,
                &cfg.stop,
            )
            .await;
            match patched {
                Ok(out) => out,
                Err(e) => {
                    // A failed patch leaves offsets half-updated and the
                    // previous payload consumed; the next read must compile
                    // from scratch rather than splice against it.
                    self.reset_state(state);
                    self.dirty.store(true, Ordering::SeqCst);
                    return Err(e);
                }
            }
        } else {
            compile_bundle(
                &mut state.graph,
                &mut state.idents,
                &cx,
                &cfg.globals,
                &cfg.polyfills,
                &cfg.stop,
            )
            .await?
        };

        if out.stopped {
            self.reset_state(state);
            self.dirty.store(true, Ordering::SeqCst);
            cfg.stop.reset();
            log!("bundle"; "build cancelled for {}", self.entry_name());
            return Ok(String::new());
        }

        state.compiled = true;
        state.missing = out.missing;
        state.prelude_len = out.prelude_len;
        state.payload = Some(out.payload);

        {
            let mut tracked = self.tracked.write();
            tracked.clear();
            for mid in state.graph.live_ids() {
                tracked.insert(state.graph.module(mid).file);
            }
        }

        log!(
            "bundle";
            "{} {} modules for {} ({})",
            if patching { "patched" } else { "compiled" },
            state.graph.live_count(),
            self.entry_name(),
            self.platform,
        );
        self.report_missing(state);
        self.write_cache(state, tag);
        Ok(state.payload.clone().unwrap_or_default())
    }

    /// Add a module for a file ahead of the next build. Fails when a live
    /// module for the file already exists.
    pub async fn add_module(&self, file: FileId) -> Result<ModuleId> {
        let mut state = self.state.lock().await;
        let kind = self.bundler.with_file(file, |f| f.file_type.clone());
        match state.graph.add(file, kind) {
            Ok(id) => {
                state.changed.insert(id);
                self.tracked.write().insert(file);
                self.dirty.store(true, Ordering::SeqCst);
                Ok(id)
            }
            Err(_) => Err(BundleError::ModuleExists(self.bundler.file_path(file))),
        }
    }

    /// True when the file currently backs a live module of this bundle.
    pub fn has_module(&self, file: FileId) -> bool {
        self.tracked.read().contains(&file)
    }

    /// Module id backing `file`, for callers that require membership.
    pub async fn module_id(&self, file: FileId) -> Result<ModuleId> {
        let state = self.state.lock().await;
        state
            .graph
            .get(file)
            .ok_or_else(|| BundleError::ModuleNotFound(self.bundler.file_path(file)))
    }

    /// Queue a reload for a changed file. Returns false when the file is
    /// not part of this bundle.
    pub fn reload_module(&self, file: FileId) -> bool {
        if !self.has_module(file) {
            return false;
        }
        self.pending.lock().reload.push(file);
        self.dirty.store(true, Ordering::SeqCst);
        true
    }

    /// Queue a deletion for a removed file. Returns false when the file is
    /// not part of this bundle.
    pub fn delete_module(&self, file: FileId) -> bool {
        if !self.has_module(file) {
            return false;
        }
        self.pending.lock().delete.push(file);
        self.dirty.store(true, Ordering::SeqCst);
        true
    }

    /// Force the next read to run a build even without queued events, e.g.
    /// when a new file may satisfy previously missing imports.
    pub fn invalidate(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Register a hook fired after every build that leaves refs unresolved.
    pub fn on_missing(&self, hook: impl Fn(&MissingReport) + Send + Sync + 'static) {
        self.hooks.lock().push(Box::new(hook));
    }

    /// Unresolved refs left by the last build.
    pub async fn missing_imports(&self) -> MissingReport {
        let state = self.state.lock().await;
        Self::build_report(&self.bundler, &state)
    }

    /// Live module count, for diagnostics.
    pub async fn module_count(&self) -> usize {
        self.state.lock().await.graph.live_count()
    }

    fn entry_name(&self) -> String {
        self.bundler.with_file(self.entry, |f| {
            f.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| f.path.display().to_string())
        })
    }

    /// Apply queued file events to the graph. Only meaningful between
    /// builds of a compiled bundle; before the first compile every module
    /// is loaded fresh anyway.
    fn apply_pending(&self, state: &mut BundleState) {
        let pending = std::mem::take(&mut *self.pending.lock());
        if !state.compiled {
            return;
        }
        for file in pending.delete {
            let Some(mid) = state.graph.get(file) else {
                continue;
            };
            if state.graph.entry == Some(mid) {
                // The entry itself vanished; only a from-scratch attempt
                // can report that sensibly.
                self.reset_state(state);
                return;
            }
            // Consumers keep a dangling ref; reload them so the miss is
            // reported as data.
            let parents: Vec<ModuleId> = state.graph.module(mid).parents.iter().copied().collect();
            state.changed.extend(parents);
            for removed in state.graph.delete_cascade(mid) {
                state.changed.remove(&removed);
                state.deleted.insert(removed);
            }
        }
        for file in pending.reload {
            if let Some(mid) = state.graph.get(file)
                && state.graph.reload(file)
            {
                state.changed.insert(mid);
            }
        }
    }

    fn reset_state(&self, state: &mut BundleState) {
        state.graph.reset();
        let kind = self.bundler.with_file(self.entry, |f| f.file_type.clone());
        if let Ok(id) = state.graph.add(self.entry, kind) {
            state.graph.entry = Some(id);
        }
        state.idents.clear();
        state.compiled = false;
        state.changed.clear();
        state.deleted.clear();
        state.missing.clear();
        state.payload = None;
        state.prelude_len = 0;
    }

    fn build_report(bundler: &Bundler, state: &BundleState) -> MissingReport {
        let mut report: MissingReport = state
            .missing
            .iter()
            .map(|(&mid, refs)| {
                let path = bundler.file_path(state.graph.module(mid).file);
                (path, refs.iter().cloned().collect())
            })
            .collect();
        report.sort();
        report
    }

    fn report_missing(&self, state: &BundleState) {
        if state.missing.is_empty() {
            return;
        }
        let report = Self::build_report(&self.bundler, state);
        for (path, refs) in &report {
            log!("missing"; "{}: {}", path.display(), refs.join(", "));
        }
        for hook in self.hooks.lock().iter() {
            hook(&report);
        }
    }

    /// Best-effort payload persistence; a build that was superseded while
    /// writing skips the write.
    fn write_cache(&self, state: &BundleState, tag: u64) {
        if self.tag.load(Ordering::SeqCst) != tag {
            return;
        }
        let Some(payload) = &state.payload else {
            return;
        };
        if let Some(dir) = self.cache_path.parent()
            && std::fs::create_dir_all(dir).is_err()
        {
            return;
        }
        if let Err(e) = std::fs::write(&self.cache_path, payload) {
            log!("warn"; "failed to write bundle cache {}: {e}", self.cache_path.display());
        }
    }
}

/// Stable cache file name derived from the entry path and build flavor.
fn cache_path_for(entry: &std::path::Path, platform: Platform, dev: bool) -> PathBuf {
    let key = format!("{}|{platform}|{dev}", entry.display());
    let digest = hex::encode(blake3::hash(key.as_bytes()).as_bytes());
    let suffix = if dev { ".dev" } else { "" };
    std::env::temp_dir()
        .join("bindle")
        .join(format!("{}{suffix}.js", &digest[..12]))
}
