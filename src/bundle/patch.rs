//! In-place payload patching.
//!
//! A patch drains the bundle's changed and deleted sets, reloading dirty
//! modules and cascading deletions, then rewrites the previous payload by
//! splicing: untouched module spans are copied verbatim, reloaded modules
//! are re-emitted at their old position, deleted spans are dropped and
//! brand-new modules are appended before the bootstrap. Offsets of every
//! surviving module are updated as the new payload is written, so the
//! position table stays exact without re-emitting unchanged bodies.
//!
//! Loading a changed module can dirty further modules (new imports pull in
//! new packages, identifier renames touch parents), so the drain runs in
//! passes until both sets are empty, with a cap against oscillation.

use rustc_hash::FxHashSet;
use std::collections::VecDeque;

use crate::error::{BundleError, Result};
use crate::log;

use super::StopToken;
use super::compile::{BuildCx, BuildOutput, MissingMap, emit_module, load_module};
use super::graph::{ModuleGraph, ModuleId, ModuleStatus, NOT_EMITTED};
use super::joiner::{self, Idents};

const MAX_PASSES: usize = 64;

/// Patch the previous payload with the queued changes.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn patch_bundle(
    graph: &mut ModuleGraph,
    idents: &mut Idents,
    cx: &BuildCx<'_>,
    prev_payload: &str,
    prelude_len: usize,
    changed: &mut FxHashSet<ModuleId>,
    deleted: &mut FxHashSet<ModuleId>,
    missing: &mut MissingMap,
    stop: &StopToken,
) -> Result<BuildOutput> {
    let entry = graph.entry.ok_or(BundleError::PatchBeforeCompile)?;

    // Modules with unresolved refs retry every build; a file that appeared
    // since may satisfy them now.
    for (&mid, _) in missing.iter() {
        if graph.module(mid).is_live() {
            changed.insert(mid);
        }
    }

    let mut added: Vec<ModuleId> = Vec::new();
    let mut processed_deleted: FxHashSet<ModuleId> = FxHashSet::default();
    let mut passes = 0;

    loop {
        if stop.is_stopped() {
            return stopped(graph, changed, deleted, missing);
        }

        // Drop identifiers of newly deleted modules first; a rename-back of
        // a surviving package version dirties its modules and their parents.
        let pending: Vec<ModuleId> = deleted
            .iter()
            .copied()
            .filter(|mid| !processed_deleted.contains(mid))
            .collect();
        for mid in pending {
            processed_deleted.insert(mid);
            changed.remove(&mid);
            for renamed in idents.remove(cx.bundler, graph, mid) {
                mark_renamed(graph, renamed, changed);
            }
        }

        if changed.is_empty() {
            break;
        }
        passes += 1;
        if passes > MAX_PASSES {
            log!("warn"; "patch did not settle after {MAX_PASSES} passes");
            break;
        }

        let batch: Vec<ModuleId> = changed.drain().collect();
        for mid in batch {
            if stop.is_stopped() {
                return stopped(graph, changed, deleted, missing);
            }
            if !graph.module(mid).is_live() {
                continue;
            }
            graph.module_mut(mid).build_tag = cx.tag;
            let out = load_module(graph, cx, mid).await?;
            record_missing(missing, mid, out.missing);
            for orphan in out.orphaned {
                cascade(graph, orphan, deleted);
            }

            // New dependencies load transitively, in discovery order.
            let mut queue: VecDeque<ModuleId> = out.added.into_iter().collect();
            while let Some(new_mid) = queue.pop_front() {
                // A module revived during this patch is a replacement in
                // place, not a delete plus insert.
                deleted.remove(&new_mid);
                processed_deleted.remove(&new_mid);
                graph.module_mut(new_mid).build_tag = cx.tag;

                let sub = load_module(graph, cx, new_mid).await?;
                record_missing(missing, new_mid, sub.missing);
                for orphan in sub.orphaned {
                    cascade(graph, orphan, deleted);
                }
                queue.extend(sub.added);
                added.push(new_mid);
                for renamed in idents.assign(cx.bundler, graph, new_mid) {
                    mark_renamed(graph, renamed, changed);
                }
            }
        }
    }

    // Geometry of the previous payload, before any offset moves.
    let mut old_spans: Vec<(ModuleId, usize, usize)> = graph
        .all_ids()
        .filter_map(|mid| {
            let m = graph.module(mid);
            m.was_emitted().then_some((mid, m.start, m.len))
        })
        .collect();
    old_spans.sort_by_key(|&(_, start, _)| start);

    let mut payload = String::with_capacity(prev_payload.len());
    let mut pos = 0;
    let mut order = Vec::with_capacity(old_spans.len());

    for (mid, start, len) in old_spans {
        payload.push_str(&prev_payload[pos..start]);
        pos = start + len;

        if !graph.module(mid).is_live() {
            // Spliced out; the prior position is gone for good, a later
            // revival appends instead.
            let module = graph.module_mut(mid);
            module.start = NOT_EMITTED;
            module.len = 0;
            continue;
        }
        order.push(mid);
        match graph.module_mut(mid).body.take() {
            Some(body) => {
                let wrapped = emit_module(graph, idents, cx.bundler, mid, &body);
                let module = graph.module_mut(mid);
                module.start = payload.len();
                module.len = wrapped.len();
                payload.push_str(&wrapped);
            }
            None => {
                let module = graph.module_mut(mid);
                module.start = payload.len();
                payload.push_str(&prev_payload[start..start + len]);
            }
        }
    }

    // Appends: modules that never made it into a payload yet.
    let mut seen = FxHashSet::default();
    for mid in added {
        let m = graph.module(mid);
        if !seen.insert(mid) || !m.is_live() || m.was_emitted() {
            continue;
        }
        let Some(body) = graph.module_mut(mid).body.take() else {
            continue;
        };
        let wrapped = emit_module(graph, idents, cx.bundler, mid, &body);
        let module = graph.module_mut(mid);
        module.start = payload.len();
        module.len = wrapped.len();
        payload.push_str(&wrapped);
        order.push(mid);
    }

    // The bootstrap is recomputed rather than copied: the entry identifier
    // can change under a version rename.
    let Some(entry_ident) = idents.get(entry) else {
        return Err(BundleError::PatchBeforeCompile);
    };
    payload.push_str(&joiner::render_bootstrap(entry_ident));

    missing.retain(|&mid, _| graph.module(mid).is_live());
    for &mid in &order {
        graph.module_mut(mid).status = if missing.contains_key(&mid) {
            ModuleStatus::Missing
        } else {
            ModuleStatus::Ok
        };
    }
    graph.order = order;
    deleted.clear();

    Ok(BuildOutput {
        payload,
        missing: missing.clone(),
        prelude_len,
        stopped: false,
    })
}

fn stopped(
    graph: &mut ModuleGraph,
    changed: &mut FxHashSet<ModuleId>,
    deleted: &mut FxHashSet<ModuleId>,
    missing: &mut MissingMap,
) -> Result<BuildOutput> {
    graph.reset();
    changed.clear();
    deleted.clear();
    missing.clear();
    Ok(BuildOutput {
        payload: String::new(),
        missing: MissingMap::default(),
        prelude_len: 0,
        stopped: true,
    })
}

fn record_missing(missing: &mut MissingMap, mid: ModuleId, refs: std::collections::BTreeSet<String>) {
    if refs.is_empty() {
        missing.remove(&mid);
    } else {
        missing.insert(mid, refs);
    }
}

fn cascade(graph: &mut ModuleGraph, orphan: ModuleId, deleted: &mut FxHashSet<ModuleId>) {
    if !graph.module(orphan).is_live() || graph.entry == Some(orphan) {
        return;
    }
    for removed in graph.delete_cascade(orphan) {
        deleted.insert(removed);
    }
}

/// An identifier rename dirties the module and every consumer whose body
/// references the old identifier.
fn mark_renamed(graph: &mut ModuleGraph, mid: ModuleId, changed: &mut FxHashSet<ModuleId>) {
    if !graph.module(mid).is_live() {
        return;
    }
    graph.module_mut(mid).status = ModuleStatus::Changed;
    changed.insert(mid);
    let parents: Vec<ModuleId> = graph.module(mid).parents.iter().copied().collect();
    for parent in parents {
        if graph.module(parent).is_live() {
            graph.module_mut(parent).status = ModuleStatus::Changed;
            changed.insert(parent);
        }
    }
}
