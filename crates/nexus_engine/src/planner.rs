//! Chunk planning.
//!
//! Every entry gets a chunk holding the modules only it reaches. Modules
//! reached from several entries are grouped by the set of entries that reach
//! them and, when splitting is on, moved into shared chunks.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::{OptimizationOptions, SharedChunkPolicy};
use crate::graph::{ModuleGraph, ModuleId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkKind {
    Entry,
    Shared,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// Entry name, or `shared-<hash>`.
    pub name: String,
    pub kind: ChunkKind,
    /// Module required by the bootstrap call of an entry chunk.
    pub entry: Option<ModuleId>,
    /// Dependencies before dependents.
    pub modules: Vec<ModuleId>,
    /// Chunks that must load before this one, in load order.
    pub depends_on: Vec<String>,
    /// Entries that load this chunk.
    pub requested_by: Vec<String>,
}

struct SharedGroup {
    entries: BTreeSet<String>,
    modules: Vec<ModuleId>,
    size: usize,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ChunkPlanner;

impl ChunkPlanner {
    pub fn plan(graph: &ModuleGraph, optimization: &OptimizationOptions) -> Vec<Chunk> {
        let root = &graph.context().config.root;

        let orders: BTreeMap<&String, Vec<ModuleId>> = graph
            .entry_modules()
            .iter()
            .map(|(name, id)| (name, graph.linearize(id)))
            .collect();

        // First appearance across entries in name order.
        let mut rank: HashMap<ModuleId, usize> = HashMap::new();
        let mut owners: BTreeMap<ModuleId, BTreeSet<String>> = BTreeMap::new();
        for (name, order) in &orders {
            for id in order {
                let next = rank.len();
                rank.entry(id.clone()).or_insert(next);
                owners.entry(id.clone()).or_default().insert((*name).clone());
            }
        }

        let mut groups = Vec::new();
        if optimization.split_chunks {
            let split = &optimization.split;
            let threshold = split.min_entries.max(2);

            let mut by_entries: BTreeMap<BTreeSet<String>, Vec<ModuleId>> = BTreeMap::new();
            for (id, entries) in &owners {
                if entries.len() >= threshold {
                    by_entries.entry(entries.clone()).or_default().push(id.clone());
                }
            }

            groups = match split.policy {
                SharedChunkPolicy::PerEntrySet => by_entries
                    .into_iter()
                    .map(|(entries, modules)| SharedGroup {
                        entries,
                        modules,
                        size: 0,
                    })
                    .collect(),
                SharedChunkPolicy::MergeSupersets => merge_supersets(by_entries),
            };

            for group in &mut groups {
                group.size = group
                    .modules
                    .iter()
                    .filter_map(|id| graph.module(id))
                    .map(|m| m.code.len())
                    .sum();
            }
            groups.retain(|g| g.size >= split.min_size);
            if let Some(max) = split.max_shared_chunks {
                groups.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.entries.cmp(&b.entries)));
                groups.truncate(max);
            }
        }

        let mut shared_chunks = Vec::with_capacity(groups.len());
        let mut shared_of: HashMap<ModuleId, String> = HashMap::new();
        for mut group in groups {
            group.modules.sort_by_key(|id| rank.get(id).copied().unwrap_or(usize::MAX));
            let identities: Vec<String> = group.modules.iter().map(|id| id.relative_to(root)).collect();
            let name = format!("shared-{}", nexus_chunker::generate_chunk_id(&identities));
            for id in &group.modules {
                shared_of.insert(id.clone(), name.clone());
            }
            shared_chunks.push(Chunk {
                name,
                kind: ChunkKind::Shared,
                entry: None,
                modules: group.modules,
                depends_on: Vec::new(),
                requested_by: group.entries.into_iter().collect(),
            });
        }
        shared_chunks.sort_by(|a, b| a.name.cmp(&b.name));

        let mut chunks = Vec::with_capacity(orders.len() + shared_chunks.len());
        for (name, order) in &orders {
            let mut depends_on: Vec<(usize, String)> = Vec::new();
            let mut modules = Vec::new();
            for id in order {
                match shared_of.get(id) {
                    Some(shared) => {
                        let position = rank.get(id).copied().unwrap_or(usize::MAX);
                        match depends_on.iter_mut().find(|(_, n)| n == shared) {
                            Some(existing) => existing.0 = existing.0.min(position),
                            None => depends_on.push((position, shared.clone())),
                        }
                    }
                    None => modules.push(id.clone()),
                }
            }
            depends_on.sort();

            chunks.push(Chunk {
                name: (*name).clone(),
                kind: ChunkKind::Entry,
                entry: graph.entry_module(name).cloned(),
                modules,
                depends_on: depends_on.into_iter().map(|(_, n)| n).collect(),
                requested_by: vec![(*name).clone()],
            });
        }
        chunks.extend(shared_chunks);
        chunks
    }
}

/// Largest entry sets first; each later group joins the smallest existing
/// group whose entry set strictly contains its own.
fn merge_supersets(by_entries: BTreeMap<BTreeSet<String>, Vec<ModuleId>>) -> Vec<SharedGroup> {
    let mut pending: Vec<(BTreeSet<String>, Vec<ModuleId>)> = by_entries.into_iter().collect();
    pending.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

    let mut merged: Vec<SharedGroup> = Vec::new();
    for (entries, modules) in pending {
        let target = merged
            .iter_mut()
            .filter(|g| g.entries.len() > entries.len() && g.entries.is_superset(&entries))
            .min_by(|a, b| a.entries.len().cmp(&b.entries.len()).then_with(|| a.entries.cmp(&b.entries)));
        match target {
            Some(group) => group.modules.extend(modules),
            None => merged.push(SharedGroup {
                entries,
                modules,
                size: 0,
            }),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_merge_into_smallest_superset() {
        let mut by_entries = BTreeMap::new();
        by_entries.insert(set(&["a", "b", "c"]), vec![ModuleId::new("/abc.js")]);
        by_entries.insert(set(&["a", "b"]), vec![ModuleId::new("/ab.js")]);
        by_entries.insert(set(&["x", "y"]), vec![ModuleId::new("/xy.js")]);

        let groups = merge_supersets(by_entries);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].entries, set(&["a", "b", "c"]));
        assert_eq!(
            groups[0].modules,
            vec![ModuleId::new("/abc.js"), ModuleId::new("/ab.js")]
        );
        assert_eq!(groups[1].entries, set(&["x", "y"]));
    }
}
