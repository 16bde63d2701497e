use std::sync::Arc;

use crate::config::BuildConfig;
use crate::pipeline::TransformPipeline;
use crate::resolver::FileResolver;
use crate::store::FileStore;

/// Everything a worker needs to load a module. Shared read-only between
/// the coordinator and its jobs.
pub struct BuildContext {
    pub config: Arc<BuildConfig>,
    pub store: Arc<dyn FileStore>,
    pub resolver: FileResolver,
    pub pipeline: TransformPipeline,
}

impl BuildContext {
    pub fn new(config: BuildConfig, store: Arc<dyn FileStore>) -> Self {
        let resolver = FileResolver::new(store.clone(), config.resolve.clone());
        let pipeline = TransformPipeline::new(&config);
        Self {
            config: Arc::new(config),
            store,
            resolver,
            pipeline,
        }
    }
}
