//! Nexus build engine.
//!
//! Turns entry files plus resolution and loader rules into content-addressed
//! chunks, and keeps them current as files change:
//!
//! ```text
//! entries -> FileResolver -> TransformPipeline -> ModuleGraph
//!         -> ChunkPlanner -> Emitter -> BuildResult
//! ```
//!
//! [`BuildSession`] owns one graph for one [`BuildConfig`];
//! [`WatchScheduler`] drives a session from file-change events.

pub mod config;
pub mod context;
pub mod emitter;
pub mod error;
pub mod graph;
pub mod loaders;
pub mod pipeline;
pub mod planner;
pub mod resolver;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod store;

pub use config::{
    BuildConfig, HtmlOptions, LoaderRule, Matcher, Mode, OptimizationOptions, OutputOptions,
    ResolveOptions, SharedChunkPolicy, SplitChunksOptions,
};
pub use emitter::{Artifact, ArtifactKind, BuildResult, Emitter, HotUpdate, Manifest};
pub use error::{BuildError, CycleLimitError, EmitError, ModuleError, ResolutionError, TransformError};
pub use graph::{Dependency, GraphSnapshot, Module, ModuleGraph, ModuleId, RebuildReport};
pub use pipeline::{
    EmittedAsset, ModuleBindings, Transform, TransformInput, TransformOutput, TransformPipeline,
};
pub use planner::{Chunk, ChunkKind, ChunkPlanner};
pub use resolver::{FileResolver, Resolution};
pub use scheduler::{
    BuildReporter, BuildTrigger, HotUpdateTransport, NoopTransport, SchedulerHandle,
    SchedulerState, TracingReporter, WatchScheduler,
};
pub use session::BuildSession;
pub use store::{EntryKind, FileStore, MemoryFileStore, OsFileStore, WatchGuard};
