//! The module graph and its build passes.
//!
//! A pass is driven by a single coordinator that owns the identity map.
//! Loading a module (read, hash, transform, resolve) runs as a job on the
//! blocking pool; the coordinator records the result, enqueues newly
//! discovered modules and keeps at most `parallelism` jobs in flight.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};

use crate::context::BuildContext;
use crate::error::{BuildError, CycleLimitError, ModuleError, TransformError};
use crate::pipeline::{EmittedAsset, ModuleBindings};
use crate::resolver::ResolveCache;

/// Identity of a module: resolved path plus optional query.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId {
    path: PathBuf,
    query: Option<String>,
}

impl ModuleId {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            query: None,
        }
    }

    pub fn with_query(path: impl Into<PathBuf>, query: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Some(query.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Path followed by `?query`, as seen by loader matchers.
    pub fn resource(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path.display(), query),
            None => self.path.display().to_string(),
        }
    }

    /// `/`-separated path relative to `root` with a leading `/`, plus the
    /// query. Paths outside `root` are kept whole.
    pub fn relative_to(&self, root: &Path) -> String {
        let path = match self.path.strip_prefix(root) {
            Ok(relative) => {
                let parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                format!("/{}", parts.join("/"))
            }
            Err(_) => self.path.display().to_string().replace('\\', "/"),
        };
        match &self.query {
            Some(query) => format!("{path}?{query}"),
            None => path,
        }
    }

    /// Directory relative specifiers are resolved from.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource())
    }
}

/// A resolved edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub specifier: String,
    pub target: ModuleId,
}

#[derive(Clone, Debug)]
pub struct Module {
    pub id: ModuleId,
    /// Content hash of the raw bytes.
    pub hash: String,
    pub code: String,
    pub map: Option<String>,
    /// Specifiers as written, in discovery order.
    pub specifiers: Vec<String>,
    /// Resolved edges, in specifier order.
    pub dependencies: Vec<Dependency>,
    pub applied_rules: Vec<String>,
    pub assets: Vec<EmittedAsset>,
    /// Set for ES modules only.
    pub bindings: Option<ModuleBindings>,
    /// Paths tested and found missing while resolving this module's
    /// specifiers.
    pub probes: Vec<PathBuf>,
    /// Bumped on every re-transform.
    pub version: u64,
}

/// What a [`ModuleGraph::rebuild`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub retransformed: Vec<ModuleId>,
    pub relinked: Vec<ModuleId>,
    pub added: Vec<ModuleId>,
    pub removed: Vec<ModuleId>,
}

impl RebuildReport {
    pub fn is_empty(&self) -> bool {
        self.retransformed.is_empty()
            && self.relinked.is_empty()
            && self.added.is_empty()
            && self.removed.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleSnapshot {
    pub hash: String,
    pub code: String,
    pub dependencies: Vec<Dependency>,
    pub applied_rules: Vec<String>,
}

/// Comparable graph state. Version counters are left out so an incremental
/// graph and a fresh one compare equal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphSnapshot {
    pub entries: BTreeMap<String, ModuleId>,
    pub modules: BTreeMap<ModuleId, ModuleSnapshot>,
}

#[derive(Clone)]
enum Task {
    Load(Option<Arc<Module>>),
    Relink(Arc<Module>),
}

#[derive(Clone)]
struct Job {
    id: ModuleId,
    depth: usize,
    task: Task,
}

struct Loaded {
    module: Option<Module>,
    errors: Vec<ModuleError>,
    retransformed: bool,
}

#[derive(Default)]
struct Pass {
    queue: VecDeque<Job>,
    scheduled: HashSet<ModuleId>,
    discovered_by: HashMap<ModuleId, ModuleId>,
    errors: Vec<ModuleError>,
    report: RebuildReport,
}

impl Pass {
    fn schedule(&mut self, job: Job) {
        if self.scheduled.insert(job.id.clone()) {
            self.queue.push_back(job);
        }
    }

    /// Shallowest queued job, unless it is deeper than `limit`.
    fn next_job(&mut self, limit: Option<usize>) -> Option<Job> {
        let (index, depth) = self
            .queue
            .iter()
            .enumerate()
            .map(|(index, job)| (index, job.depth))
            .min_by_key(|&(index, depth)| (depth, index))?;
        if limit.is_some_and(|limit| depth > limit) {
            return None;
        }
        self.queue.remove(index)
    }
}

pub struct ModuleGraph {
    ctx: Arc<BuildContext>,
    entries: BTreeMap<String, String>,
    entry_modules: BTreeMap<String, ModuleId>,
    modules: BTreeMap<ModuleId, Arc<Module>>,
    dependents: BTreeMap<ModuleId, BTreeSet<ModuleId>>,
    stale: BTreeSet<ModuleId>,
    /// Modules whose code changed since the last [`ModuleGraph::take_changed`].
    changed: BTreeSet<ModuleId>,
}

impl ModuleGraph {
    pub fn new(ctx: Arc<BuildContext>) -> Self {
        let entries = ctx.config.entries.clone();
        Self {
            ctx,
            entries,
            entry_modules: BTreeMap::new(),
            modules: BTreeMap::new(),
            dependents: BTreeMap::new(),
            stale: BTreeSet::new(),
            changed: BTreeSet::new(),
        }
    }

    pub fn context(&self) -> &Arc<BuildContext> {
        &self.ctx
    }

    pub fn add_entry(&mut self, name: impl Into<String>, specifier: impl Into<String>) {
        self.entries.insert(name.into(), specifier.into());
    }

    /// Full traversal from every entry. Previous state is discarded.
    pub async fn build(&mut self) -> Result<(), BuildError> {
        self.modules.clear();
        self.dependents.clear();
        self.stale.clear();
        self.entry_modules.clear();
        self.changed.clear();

        let mut pass = Pass::default();
        self.resolve_entries(&mut pass);
        self.run(&mut pass).await;
        self.prune(&mut pass);
        self.check_exports(&mut pass);

        tracing::debug!("Graph built: {} modules", self.modules.len());
        finish(pass.errors)
    }

    /// Mark modules affected by `paths` as stale. Returns how many were marked.
    pub fn invalidate(&mut self, paths: &[PathBuf]) -> usize {
        let changed: HashSet<&Path> = paths.iter().map(PathBuf::as_path).collect();
        let mut marked = 0;
        for (id, module) in &self.modules {
            let hit = changed.contains(id.path())
                || module.probes.iter().any(|p| changed.contains(p.as_path()));
            if hit && self.stale.insert(id.clone()) {
                marked += 1;
            }
        }
        marked
    }

    /// Bring stale modules up to date.
    pub async fn rebuild(&mut self) -> Result<RebuildReport, BuildError> {
        let depths = self.depths();
        let mut pass = Pass::default();
        self.resolve_entries(&mut pass);

        let stale = std::mem::take(&mut self.stale);
        let mut removed = Vec::new();
        for id in stale {
            let Some(module) = self.modules.get(&id).cloned() else {
                continue;
            };
            let depth = depths.get(&id).copied().unwrap_or(0);
            if self.ctx.store.is_file(id.path()) {
                pass.schedule(Job {
                    id,
                    depth,
                    task: Task::Load(Some(module)),
                });
            } else {
                tracing::debug!("Module removed: {}", id);
                self.remove_module(&id);
                removed.push(id);
            }
        }

        for id in &removed {
            for dependent in self.dependents(id) {
                if let Some(module) = self.modules.get(&dependent).cloned() {
                    let depth = depths.get(&dependent).copied().unwrap_or(0);
                    pass.schedule(Job {
                        id: dependent,
                        depth,
                        task: Task::Relink(module),
                    });
                }
            }
        }
        pass.report.removed = removed;

        self.run(&mut pass).await;
        self.prune(&mut pass);
        self.check_exports(&mut pass);

        let Pass {
            errors, mut report, ..
        } = pass;
        report.retransformed.sort();
        report.relinked.sort();
        report.added.sort();
        report.removed.sort();
        report.removed.dedup();
        finish(errors).map(|()| report)
    }

    fn resolve_entries(&mut self, pass: &mut Pass) {
        let root = self.ctx.config.root.clone();
        for (name, specifier) in &self.entries {
            match self.ctx.resolver.resolve(specifier, &root) {
                Ok(resolution) => {
                    let id = resolution.id;
                    self.entry_modules.insert(name.clone(), id.clone());
                    if !self.modules.contains_key(&id) {
                        pass.schedule(Job {
                            id,
                            depth: 0,
                            task: Task::Load(None),
                        });
                    }
                }
                Err(e) => {
                    self.entry_modules.remove(name);
                    pass.errors.push(e.into());
                }
            }
        }
    }

    async fn run(&mut self, pass: &mut Pass) {
        let parallelism = self.ctx.config.parallelism.max(1);
        let resolutions = Arc::new(ResolveCache::default());
        let mut running: JoinSet<(Job, Result<Loaded, JoinError>)> = JoinSet::new();
        // Depth -> jobs in flight. A layer starts only once every shallower
        // job has finished, so discovery depth is the shortest distance.
        let mut in_flight: BTreeMap<usize, usize> = BTreeMap::new();

        loop {
            while running.len() < parallelism {
                let layer = if running.is_empty() {
                    None
                } else {
                    in_flight.keys().next().copied()
                };
                let Some(job) = pass.next_job(layer) else {
                    break;
                };
                *in_flight.entry(job.depth).or_default() += 1;
                let ctx = self.ctx.clone();
                let resolutions = resolutions.clone();
                running.spawn(async move {
                    let worker_job = job.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        run_job(&ctx, &resolutions, &worker_job)
                    })
                    .await;
                    (job, result)
                });
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            if let Ok((job, _)) = &joined {
                if let Some(count) = in_flight.get_mut(&job.depth) {
                    *count -= 1;
                    if *count == 0 {
                        in_flight.remove(&job.depth);
                    }
                }
            }
            match joined {
                Ok((job, Ok(loaded))) => self.record(pass, job, loaded),
                Ok((job, Err(e))) => {
                    pass.errors.push(
                        TransformError {
                            module: job.id.clone(),
                            rule: "<panic>".to_string(),
                            cause: anyhow::anyhow!("worker failed: {e}"),
                        }
                        .into(),
                    );
                    self.mark_failed(pass, &job.id);
                }
                Err(e) => tracing::error!("Build task failed: {}", e),
            }
        }
    }

    fn record(&mut self, pass: &mut Pass, job: Job, loaded: Loaded) {
        let Loaded {
            module,
            errors,
            retransformed,
        } = loaded;
        let failed = !errors.is_empty();
        pass.errors.extend(errors);

        let Some(module) = module else {
            self.mark_failed(pass, &job.id);
            return;
        };

        let previous = match &job.task {
            Task::Load(previous) => previous.clone(),
            Task::Relink(previous) => Some(previous.clone()),
        };
        let edges_changed = previous
            .as_ref()
            .is_some_and(|p| p.dependencies != module.dependencies);

        match (&job.task, &previous) {
            (Task::Relink(_), _) => pass.report.relinked.push(job.id.clone()),
            (Task::Load(_), None) => pass.report.added.push(job.id.clone()),
            (Task::Load(_), Some(_)) if retransformed => pass.report.retransformed.push(job.id.clone()),
            _ => {}
        }

        let targets: Vec<ModuleId> = module.dependencies.iter().map(|d| d.target.clone()).collect();
        self.insert_module(module);
        if failed {
            self.stale.insert(job.id.clone());
        }

        for target in targets {
            if self.modules.contains_key(&target) || pass.scheduled.contains(&target) {
                continue;
            }
            let depth = job.depth + 1;
            if let Some(limit) = self.ctx.config.max_depth {
                if depth > limit {
                    pass.errors.push(
                        CycleLimitError {
                            module: target,
                            depth,
                            limit,
                        }
                        .into(),
                    );
                    self.stale.insert(job.id.clone());
                    continue;
                }
            }
            pass.discovered_by.insert(target.clone(), job.id.clone());
            pass.schedule(Job {
                id: target,
                depth,
                task: Task::Load(None),
            });
        }

        if edges_changed {
            for dependent in self.dependents(&job.id) {
                if let Some(module) = self.modules.get(&dependent).cloned() {
                    pass.schedule(Job {
                        id: dependent,
                        depth: job.depth.saturating_sub(1),
                        task: Task::Relink(module),
                    });
                }
            }
        }
    }

    /// Keep whatever is needed to retry `id` on the next rebuild.
    fn mark_failed(&mut self, pass: &Pass, id: &ModuleId) {
        if self.modules.contains_key(id) {
            self.stale.insert(id.clone());
        }
        if let Some(importer) = pass.discovered_by.get(id) {
            self.stale.insert(importer.clone());
        }
    }

    fn insert_module(&mut self, module: Module) {
        let id = module.id.clone();
        if let Some(old) = self.modules.get(&id) {
            for dep in &old.dependencies {
                if let Some(set) = self.dependents.get_mut(&dep.target) {
                    set.remove(&id);
                }
            }
        }
        for dep in &module.dependencies {
            self.dependents
                .entry(dep.target.clone())
                .or_default()
                .insert(id.clone());
        }
        let code_changed = self
            .modules
            .get(&id)
            .map_or(true, |old| old.code != module.code);
        if code_changed {
            self.changed.insert(id.clone());
        }
        self.modules.insert(id, Arc::new(module));
    }

    fn remove_module(&mut self, id: &ModuleId) {
        if let Some(old) = self.modules.remove(id) {
            for dep in &old.dependencies {
                if let Some(set) = self.dependents.get_mut(&dep.target) {
                    set.remove(id);
                }
            }
        }
        self.stale.remove(id);
        self.changed.remove(id);
    }

    /// Drop modules no entry reaches any more.
    fn prune(&mut self, pass: &mut Pass) {
        let mut reachable = BTreeSet::new();
        for id in self.entry_modules.values() {
            reachable.extend(self.reachable_from(id));
        }
        let unreachable: Vec<ModuleId> = self
            .modules
            .keys()
            .filter(|id| !reachable.contains(*id))
            .cloned()
            .collect();
        for id in unreachable {
            tracing::debug!("Pruning unreachable module {}", id);
            self.remove_module(&id);
            pass.report.removed.push(id);
        }
        let modules = &self.modules;
        self.dependents.retain(|id, set| {
            set.retain(|d| modules.contains_key(d));
            modules.contains_key(id) && !set.is_empty()
        });
    }

    /// Report imports of names the target ES module does not export. Runs
    /// over the whole graph, so a fix on either side clears the error.
    fn check_exports(&self, pass: &mut Pass) {
        if !self.ctx.config.strict_export_presence {
            return;
        }
        for module in self.modules.values() {
            let Some(bindings) = &module.bindings else {
                continue;
            };
            for (specifier, names) in &bindings.imports {
                let Some(dep) = module.dependencies.iter().find(|d| &d.specifier == specifier) else {
                    continue;
                };
                let Some(exported) = self.modules.get(&dep.target).and_then(|t| t.bindings.as_ref()) else {
                    continue;
                };
                let missing: Vec<&str> = names
                    .iter()
                    .filter(|name| !exported.exports(name))
                    .map(String::as_str)
                    .collect();
                if missing.is_empty() {
                    continue;
                }
                pass.errors.push(
                    TransformError {
                        module: module.id.clone(),
                        rule: "<exports>".to_string(),
                        cause: anyhow::anyhow!(
                            "'{}' not exported by {} (imported as '{}')",
                            missing.join("', '"),
                            dep.target,
                            specifier
                        ),
                    }
                    .into(),
                );
            }
        }
    }

    /// Shortest discovery depth of every module.
    fn depths(&self) -> HashMap<ModuleId, usize> {
        let mut depths = HashMap::new();
        let mut queue: VecDeque<(ModuleId, usize)> =
            self.entry_modules.values().map(|id| (id.clone(), 0)).collect();
        while let Some((id, depth)) = queue.pop_front() {
            if depths.contains_key(&id) {
                continue;
            }
            depths.insert(id.clone(), depth);
            if let Some(module) = self.modules.get(&id) {
                for dep in &module.dependencies {
                    queue.push_back((dep.target.clone(), depth + 1));
                }
            }
        }
        depths
    }

    pub fn module(&self, id: &ModuleId) -> Option<&Module> {
        self.modules.get(id).map(|m| m.as_ref())
    }

    /// Modules ordered by id.
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values().map(|m| m.as_ref())
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.modules.contains_key(id)
    }

    /// Distinct targets of `id`'s edges, in specifier order.
    pub fn dependencies(&self, id: &ModuleId) -> Vec<ModuleId> {
        let mut out: Vec<ModuleId> = Vec::new();
        if let Some(module) = self.modules.get(id) {
            for dep in &module.dependencies {
                if !out.contains(&dep.target) {
                    out.push(dep.target.clone());
                }
            }
        }
        out
    }

    /// Modules with an edge to `id`, ordered by id.
    pub fn dependents(&self, id: &ModuleId) -> Vec<ModuleId> {
        self.dependents
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn in_degree(&self, id: &ModuleId) -> usize {
        self.dependents.get(id).map_or(0, BTreeSet::len)
    }

    /// Entry name -> specifier.
    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    /// Entry name -> resolved module.
    pub fn entry_modules(&self) -> &BTreeMap<String, ModuleId> {
        &self.entry_modules
    }

    pub fn entry_module(&self, name: &str) -> Option<&ModuleId> {
        self.entry_modules.get(name)
    }

    pub fn is_stale(&self, id: &ModuleId) -> bool {
        self.stale.contains(id)
    }

    pub fn stale(&self) -> impl Iterator<Item = &ModuleId> {
        self.stale.iter()
    }

    /// `id` and everything it transitively depends on.
    pub fn reachable_from(&self, id: &ModuleId) -> BTreeSet<ModuleId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if !self.modules.contains_key(&current) || !seen.insert(current.clone()) {
                continue;
            }
            stack.extend(self.dependencies(&current));
        }
        seen
    }

    /// Post-order from `id`: dependencies before their dependents. Back edges
    /// of cycles are skipped.
    pub fn linearize(&self, id: &ModuleId) -> Vec<ModuleId> {
        let mut order = Vec::new();
        if !self.modules.contains_key(id) {
            return order;
        }
        let mut visited = HashSet::new();
        visited.insert(id.clone());
        let mut stack: Vec<(ModuleId, Vec<ModuleId>, usize)> =
            vec![(id.clone(), self.dependencies(id), 0)];

        while let Some((_, children, next)) = stack.last_mut() {
            if let Some(child) = children.get(*next).cloned() {
                *next += 1;
                if self.modules.contains_key(&child) && visited.insert(child.clone()) {
                    let grandchildren = self.dependencies(&child);
                    stack.push((child, grandchildren, 0));
                }
            } else if let Some((done, _, _)) = stack.pop() {
                order.push(done);
            }
        }
        order
    }

    /// Names of the entries whose subgraph contains `id`.
    pub fn find_affected_roots(&self, id: &ModuleId) -> Vec<String> {
        self.entry_modules
            .iter()
            .filter(|(_, entry)| self.reachable_from(entry).contains(id))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Ids whose code changed since the last call, still present in the graph.
    pub fn take_changed(&mut self) -> Vec<ModuleId> {
        let changed = std::mem::take(&mut self.changed);
        changed
            .into_iter()
            .filter(|id| self.modules.contains_key(id))
            .collect()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            entries: self.entry_modules.clone(),
            modules: self
                .modules
                .iter()
                .map(|(id, m)| {
                    (
                        id.clone(),
                        ModuleSnapshot {
                            hash: m.hash.clone(),
                            code: m.code.clone(),
                            dependencies: m.dependencies.clone(),
                            applied_rules: m.applied_rules.clone(),
                        },
                    )
                })
                .collect(),
        }
    }
}

fn finish(mut errors: Vec<ModuleError>) -> Result<(), BuildError> {
    if errors.is_empty() {
        return Ok(());
    }
    errors.sort_by_cached_key(|e| e.to_string());
    Err(BuildError::new(errors))
}

fn run_job(ctx: &BuildContext, resolutions: &ResolveCache, job: &Job) -> Loaded {
    match &job.task {
        Task::Load(previous) => load(ctx, resolutions, &job.id, previous.as_deref()),
        Task::Relink(module) => {
            let (dependencies, probes, errors) = link(ctx, resolutions, &job.id, &module.specifiers);
            Loaded {
                module: Some(Module {
                    dependencies,
                    probes,
                    ..module.as_ref().clone()
                }),
                errors,
                retransformed: false,
            }
        }
    }
}

fn load(ctx: &BuildContext, resolutions: &ResolveCache, id: &ModuleId, previous: Option<&Module>) -> Loaded {
    let raw = match ctx.store.read(id.path()) {
        Ok(raw) => raw,
        Err(e) => {
            return Loaded {
                module: None,
                errors: vec![TransformError {
                    module: id.clone(),
                    rule: "<read>".to_string(),
                    cause: anyhow::Error::new(e).context(format!("reading {}", id.path().display())),
                }
                .into()],
                retransformed: false,
            }
        }
    };
    let hash = nexus_chunker::content_hash(&raw);

    let (mut module, retransformed) = match previous {
        Some(previous) if previous.hash == hash => (previous.clone(), false),
        _ => {
            let transformed = match ctx.pipeline.transform(id, &raw, &hash) {
                Ok(transformed) => transformed,
                Err(e) => {
                    return Loaded {
                        module: None,
                        errors: vec![e.into()],
                        retransformed: false,
                    }
                }
            };
            tracing::debug!(
                "Transformed {} with [{}]{}",
                id,
                transformed.applied.join(", "),
                if transformed.cached { " (cached)" } else { "" }
            );
            let output = transformed.output;
            let module = Module {
                id: id.clone(),
                hash,
                code: output.code,
                map: output.map,
                specifiers: output.dependencies,
                dependencies: Vec::new(),
                applied_rules: transformed.applied,
                assets: output.assets,
                bindings: output.bindings,
                probes: Vec::new(),
                version: previous.map_or(1, |p| p.version + 1),
            };
            (module, true)
        }
    };

    let (dependencies, probes, errors) = link(ctx, resolutions, id, &module.specifiers);
    module.dependencies = dependencies;
    module.probes = probes;
    Loaded {
        module: Some(module),
        errors,
        retransformed,
    }
}

fn link(
    ctx: &BuildContext,
    resolutions: &ResolveCache,
    id: &ModuleId,
    specifiers: &[String],
) -> (Vec<Dependency>, Vec<PathBuf>, Vec<ModuleError>) {
    let mut dependencies = Vec::with_capacity(specifiers.len());
    let mut probes = Vec::new();
    let mut errors = Vec::new();

    for specifier in specifiers {
        match resolutions.resolve(&ctx.resolver, specifier, id.dir()) {
            Ok(resolution) => {
                probes.extend(resolution.probes);
                dependencies.push(Dependency {
                    specifier: specifier.clone(),
                    target: resolution.id,
                });
            }
            Err(e) => {
                // A file created at any of these paths may fix the import.
                probes.extend(e.searched.iter().cloned());
                errors.push(e.into());
            }
        }
    }

    probes.sort();
    probes.dedup();
    (dependencies, probes, errors)
}
