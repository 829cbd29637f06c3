//! The mutable module graph of one bundle.
//!
//! Modules live in an arena indexed by stable integer ids; parent/child
//! edges are stored as id sets so cyclic import graphs need no shared
//! ownership. Deleted modules keep their arena slot (and prior payload
//! position) so a file re-imported later revives the same module.
//!
//! Invariant kept by every edge operation: `B ∈ A.imports.values()` iff
//! `A ∈ B.parents`.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::file::FileId;

/// Stable handle into a bundle's module arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub u32);

/// Sentinel start offset for modules not yet present in any payload.
pub const NOT_EMITTED: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    /// Newly added, not yet loaded.
    Created,
    /// Loaded, resolved, present in the last emitted payload.
    Ok,
    /// Dirtied by a reload event or an upstream rename.
    Changed,
    /// At least one import ref failed to resolve.
    Missing,
    /// Removed from the bundle; revived if re-imported.
    Deleted,
}

#[derive(Debug)]
pub struct Module {
    pub file: FileId,
    /// Current type; plugins may rewrite it (`.json` -> `.js`).
    pub kind: String,
    /// Resolved refs. Keys mirror the parsed import refs of the file.
    pub imports: FxHashMap<String, ModuleId>,
    /// Consumers of this module.
    pub parents: FxHashSet<ModuleId>,
    /// In-memory body, present only while loaded or waiting to be emitted.
    pub body: Option<String>,
    /// Byte offset of the wrapped body within the emitted payload.
    pub start: usize,
    /// Byte length of the wrapped body in the emitted payload.
    pub len: usize,
    pub status: ModuleStatus,
    /// Tag of the build that last enqueued this module.
    pub build_tag: u64,
}

impl Module {
    fn new(file: FileId, kind: String) -> Self {
        Self {
            file,
            kind,
            imports: FxHashMap::default(),
            parents: FxHashSet::default(),
            body: None,
            start: NOT_EMITTED,
            len: 0,
            status: ModuleStatus::Created,
            build_tag: 0,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status != ModuleStatus::Deleted
    }

    /// True when the module was part of the previous payload.
    pub fn was_emitted(&self) -> bool {
        self.start != NOT_EMITTED
    }
}

#[derive(Debug, Default)]
pub struct ModuleGraph {
    modules: Vec<Module>,
    by_file: FxHashMap<FileId, ModuleId>,
    /// Discovery order; also the payload position table.
    pub order: Vec<ModuleId>,
    pub entry: Option<ModuleId>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0 as usize]
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.0 as usize]
    }

    /// Live module for the file, if any.
    pub fn get(&self, file: FileId) -> Option<ModuleId> {
        self.by_file
            .get(&file)
            .copied()
            .filter(|&id| self.module(id).is_live())
    }

    pub fn has(&self, file: FileId) -> bool {
        self.get(file).is_some()
    }

    pub fn live_count(&self) -> usize {
        self.modules.iter().filter(|m| m.is_live()).count()
    }

    /// Every arena slot, deleted modules included.
    pub fn all_ids(&self) -> impl Iterator<Item = ModuleId> + '_ {
        (0..self.modules.len()).map(|i| ModuleId(i as u32))
    }

    pub fn live_ids(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.modules
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_live())
            .map(|(i, _)| ModuleId(i as u32))
    }

    /// Add a module for `file`, reviving a deleted one in place.
    ///
    /// `Err` carries the existing live module id: adding twice is a caller
    /// bug surfaced as `ModuleExists` at the bundle layer.
    pub fn add(&mut self, file: FileId, kind: String) -> Result<ModuleId, ModuleId> {
        if let Some(&id) = self.by_file.get(&file) {
            let module = &mut self.modules[id.0 as usize];
            if module.is_live() {
                return Err(id);
            }
            // Revival: keep the prior payload position so a module deleted
            // and re-imported in the same patch is spliced, not re-deleted.
            module.kind = kind;
            module.imports.clear();
            module.parents.clear();
            module.body = None;
            module.status = ModuleStatus::Created;
            module.build_tag = 0;
            return Ok(id);
        }
        let id = ModuleId(self.modules.len() as u32);
        self.modules.push(Module::new(file, kind));
        self.by_file.insert(file, id);
        Ok(id)
    }

    /// Mark a module dirty after a reload event. Returns false when the
    /// file has no live module here.
    pub fn reload(&mut self, file: FileId) -> bool {
        match self.get(file) {
            Some(id) => {
                let module = self.module_mut(id);
                module.status = ModuleStatus::Changed;
                module.body = None;
                true
            }
            None => false,
        }
    }

    /// Link `parent -> dep` under `ref_`, keeping both edge sets in sync.
    pub fn link(&mut self, parent: ModuleId, ref_: &str, dep: ModuleId) {
        self.module_mut(parent).imports.insert(ref_.to_string(), dep);
        self.module_mut(dep).parents.insert(parent);
    }

    /// Remove the `parent -> dep` edge for one ref. The parent stays in
    /// `dep.parents` while another of its refs still resolves to `dep`
    /// (`./a` and `./a.js` map to the same module). Returns true when the
    /// dependency was left parentless (candidate for cascade deletion).
    pub fn unlink(&mut self, parent: ModuleId, ref_: &str, dep: ModuleId) -> bool {
        self.module_mut(parent).imports.remove(ref_);
        if self.module(parent).imports.values().any(|&d| d == dep) {
            return false;
        }
        let dep_mod = self.module_mut(dep);
        dep_mod.parents.remove(&parent);
        dep_mod.parents.is_empty()
    }

    /// Delete a module and cascade into dependencies it stranded.
    ///
    /// After the module is detached from its consumers, everything
    /// downstream of it that the entry can no longer reach goes too, so a
    /// cycle whose members only anchor each other does not survive its
    /// last outside parent. The entry module is never deleted by cascade.
    ///
    /// Returns every module deleted, the requested one included.
    pub fn delete_cascade(&mut self, id: ModuleId) -> Vec<ModuleId> {
        if !self.modules[id.0 as usize].is_live() {
            return Vec::new();
        }

        // Unlink consumers: drop every ref of each parent that resolved to
        // this module.
        let parents: Vec<ModuleId> = std::mem::take(&mut self.modules[id.0 as usize].parents)
            .into_iter()
            .collect();
        for parent in parents {
            self.modules[parent.0 as usize]
                .imports
                .retain(|_, dep| *dep != id);
        }

        // Candidate region: the module plus its transitive dependencies.
        let mut region = FxHashSet::default();
        let mut stack = vec![id];
        while let Some(mid) = stack.pop() {
            if !region.insert(mid) {
                continue;
            }
            for &dep in self.modules[mid.0 as usize].imports.values() {
                if self.modules[dep.0 as usize].is_live() && self.entry != Some(dep) {
                    stack.push(dep);
                }
            }
        }

        let reachable = self.reachable_from_entry();
        let mut removed = Vec::new();
        for &mid in &region {
            if reachable.contains(&mid) {
                continue;
            }
            let parents: Vec<ModuleId> =
                std::mem::take(&mut self.modules[mid.0 as usize].parents)
                    .into_iter()
                    .collect();
            for parent in parents {
                self.modules[parent.0 as usize]
                    .imports
                    .retain(|_, dep| *dep != mid);
            }
            let deps: Vec<ModuleId> = std::mem::take(&mut self.modules[mid.0 as usize].imports)
                .into_values()
                .collect();
            for dep in deps {
                self.modules[dep.0 as usize].parents.remove(&mid);
            }
            let module = &mut self.modules[mid.0 as usize];
            module.status = ModuleStatus::Deleted;
            module.body = None;
            removed.push(mid);
        }
        removed
    }

    /// Live modules transitively imported by the entry, entry included.
    fn reachable_from_entry(&self) -> FxHashSet<ModuleId> {
        let mut reachable = FxHashSet::default();
        let Some(entry) = self.entry else {
            return reachable;
        };
        if !self.modules[entry.0 as usize].is_live() {
            return reachable;
        }
        let mut stack = vec![entry];
        while let Some(mid) = stack.pop() {
            if !reachable.insert(mid) {
                continue;
            }
            for &dep in self.modules[mid.0 as usize].imports.values() {
                if self.modules[dep.0 as usize].is_live() {
                    stack.push(dep);
                }
            }
        }
        reachable
    }

    /// Drop all modules; the next build starts clean.
    pub fn reset(&mut self) {
        self.modules.clear();
        self.by_file.clear();
        self.order.clear();
        self.entry = None;
    }

    /// Verify the parents/imports symmetry invariant over live modules.
    pub fn check_symmetry(&self) -> bool {
        for (i, module) in self.modules.iter().enumerate() {
            if !module.is_live() {
                continue;
            }
            let id = ModuleId(i as u32);
            for &dep in module.imports.values() {
                if !self.module(dep).parents.contains(&id) {
                    return false;
                }
            }
            for &parent in &module.parents {
                if !self.module(parent).imports.values().any(|&d| d == id) {
                    return false;
                }
            }
        }
        true
    }
}
