use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::config::BuildConfig;
use crate::context::BuildContext;
use crate::emitter::{BuildResult, Emitter, HotUpdate};
use crate::error::BuildError;
use crate::graph::{ModuleGraph, RebuildReport};
use crate::planner::{Chunk, ChunkPlanner};
use crate::store::FileStore;

/// One configuration, one graph.
pub struct BuildSession {
    graph: ModuleGraph,
    emitter: Emitter,
}

impl BuildSession {
    pub fn new(config: BuildConfig, store: Arc<dyn FileStore>) -> Self {
        let ctx = Arc::new(BuildContext::new(config, store));
        let emitter = Emitter::new(ctx.config.clone());
        Self {
            graph: ModuleGraph::new(ctx),
            emitter,
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.graph.context().config
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut ModuleGraph {
        &mut self.graph
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    /// Full build: traverse from the entries, plan and emit.
    pub async fn build(&mut self) -> Result<BuildResult, BuildError> {
        let started = Instant::now();
        tracing::info!("Starting {} build of {}", self.config().mode, self.config().root.display());

        self.graph.build().await?;
        // Everything is new after a full build; nothing to hot-update.
        self.graph.take_changed();
        let result = self.emit()?;

        tracing::info!(
            "Build finished in {:?}: {} modules, {} files",
            started.elapsed(),
            self.graph.len(),
            result.artifacts.len()
        );
        Ok(result)
    }

    /// Invalidate `changed` and bring the graph up to date.
    pub async fn rebuild(&mut self, changed: &[PathBuf]) -> Result<RebuildReport, BuildError> {
        let started = Instant::now();
        let marked = self.graph.invalidate(changed);
        let report = self.graph.rebuild().await?;
        tracing::info!(
            "Rebuilt in {:?}: {} stale, {} re-transformed, {} re-linked, {} added, {} removed",
            started.elapsed(),
            marked,
            report.retransformed.len(),
            report.relinked.len(),
            report.added.len(),
            report.removed.len()
        );
        Ok(report)
    }

    pub fn chunks(&self) -> Vec<Chunk> {
        ChunkPlanner::plan(&self.graph, &self.config().optimization)
    }

    pub fn emit(&self) -> Result<BuildResult, BuildError> {
        let chunks = self.chunks();
        Ok(self.emitter.emit(&self.graph, &chunks)?)
    }

    /// Hot updates for every module whose code changed since the last call.
    pub fn take_hot_updates(&mut self) -> Vec<HotUpdate> {
        let changed = self.graph.take_changed();
        self.emitter.render_hot_updates(&self.graph, &changed)
    }

    /// Rebuild, emit and collect hot updates in one step.
    pub async fn update(&mut self, changed: &[PathBuf]) -> Result<(BuildResult, Vec<HotUpdate>), BuildError> {
        self.rebuild(changed).await?;
        let result = self.emit()?;
        Ok((result, self.take_hot_updates()))
    }
}
