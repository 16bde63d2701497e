use nexus_engine::{
    BuildConfig, BuildSession, Chunk, ChunkKind, MemoryFileStore, ModuleId, SharedChunkPolicy,
};
use std::sync::Arc;

// Pages a and b import `common` and `ab`; page c imports only `common`.
fn pages() -> Arc<MemoryFileStore> {
    Arc::new(MemoryFileStore::with_files([
        (
            "/app/src/a.js",
            "import common from './common';\nimport ab from './ab';\nconsole.log('a', common, ab);\n",
        ),
        (
            "/app/src/b.js",
            "import common from './common';\nimport ab from './ab';\nconsole.log('b', common, ab);\n",
        ),
        ("/app/src/c.js", "import common from './common';\nconsole.log('c', common);\n"),
        ("/app/src/common.js", "export default 'shared by every page';\n"),
        ("/app/src/ab.js", "export default 'ab';\n"),
    ]))
}

fn config(base: BuildConfig) -> BuildConfig {
    base.entry("a", "./src/a.js")
        .entry("b", "./src/b.js")
        .entry("c", "./src/c.js")
}

fn id(name: &str) -> ModuleId {
    ModuleId::new(format!("/app/src/{name}"))
}

async fn plan(config: BuildConfig) -> Vec<Chunk> {
    let mut session = BuildSession::new(config, pages());
    session.build().await.unwrap();
    session.chunks()
}

fn chunk<'a>(chunks: &'a [Chunk], name: &str) -> &'a Chunk {
    chunks
        .iter()
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("no chunk named {name}"))
}

fn shared(chunks: &[Chunk]) -> Vec<&Chunk> {
    chunks.iter().filter(|c| c.kind == ChunkKind::Shared).collect()
}

#[tokio::test]
async fn test_shared_chunk_per_entry_set() {
    let chunks = plan(config(BuildConfig::development("/app"))).await;
    let shared = shared(&chunks);
    assert_eq!(shared.len(), 2);

    let common = shared.iter().find(|c| c.modules == vec![id("common.js")]).unwrap();
    assert_eq!(common.requested_by, vec!["a", "b", "c"]);
    assert!(common.name.starts_with("shared-"));
    let ab = shared.iter().find(|c| c.modules == vec![id("ab.js")]).unwrap();
    assert_eq!(ab.requested_by, vec!["a", "b"]);

    let a = chunk(&chunks, "a");
    assert_eq!(a.kind, ChunkKind::Entry);
    assert_eq!(a.entry, Some(id("a.js")));
    assert_eq!(a.modules, vec![id("a.js")]);
    assert_eq!(a.depends_on, vec![common.name.clone(), ab.name.clone()]);
    assert_eq!(chunk(&chunks, "c").depends_on, vec![common.name.clone()]);

    // Entry chunks first, in name order.
    let names: Vec<&str> = chunks.iter().take(3).map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_merge_supersets() {
    let mut base = BuildConfig::development("/app");
    base.optimization.split.policy = SharedChunkPolicy::MergeSupersets;
    let chunks = plan(config(base)).await;

    let shared = shared(&chunks);
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].modules, vec![id("common.js"), id("ab.js")]);
    assert_eq!(shared[0].requested_by, vec!["a", "b", "c"]);
    for name in ["a", "b", "c"] {
        assert_eq!(chunk(&chunks, name).depends_on, vec![shared[0].name.clone()]);
    }
}

#[tokio::test]
async fn test_split_disabled_duplicates_modules() {
    let mut base = BuildConfig::development("/app");
    base.optimization.split_chunks = false;
    let chunks = plan(config(base)).await;

    assert_eq!(chunks.len(), 3);
    assert_eq!(chunk(&chunks, "a").modules, vec![id("common.js"), id("ab.js"), id("a.js")]);
    assert_eq!(chunk(&chunks, "c").modules, vec![id("common.js"), id("c.js")]);
    assert!(chunks.iter().all(|c| c.depends_on.is_empty()));
}

#[tokio::test]
async fn test_min_entries_and_min_size() {
    let mut base = BuildConfig::development("/app");
    base.optimization.split.min_entries = 3;
    let chunks = plan(config(base)).await;
    let shared_chunks = shared(&chunks);
    assert_eq!(shared_chunks.len(), 1);
    assert_eq!(shared_chunks[0].modules, vec![id("common.js")]);
    assert!(chunk(&chunks, "a").modules.contains(&id("ab.js")));

    let mut base = BuildConfig::development("/app");
    base.optimization.split.min_size = 1_000_000;
    let chunks = plan(config(base)).await;
    assert!(shared(&chunks).is_empty());
    assert!(chunk(&chunks, "b").modules.contains(&id("common.js")));
}

#[tokio::test]
async fn test_max_shared_chunks_keeps_largest() {
    let mut base = BuildConfig::development("/app");
    base.optimization.split.max_shared_chunks = Some(1);
    let chunks = plan(config(base)).await;

    let shared = shared(&chunks);
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].modules, vec![id("common.js")]);
    assert_eq!(chunk(&chunks, "a").modules, vec![id("ab.js"), id("a.js")]);
}

#[tokio::test]
async fn test_disjoint_entries_share_nothing() {
    let store = Arc::new(MemoryFileStore::with_files([
        ("/app/src/one.js", "export default 1;\n"),
        ("/app/src/two.js", "export default 2;\n"),
    ]));
    let config = BuildConfig::production("/app")
        .entry("one", "./src/one.js")
        .entry("two", "./src/two.js");
    let mut session = BuildSession::new(config, store);
    session.build().await.unwrap();

    let chunks = session.chunks();
    assert_eq!(chunks.len(), 2);
    assert!(shared(&chunks).is_empty());
}

#[tokio::test]
async fn test_output_is_independent_of_parallelism() {
    let build = |jobs: usize| async move {
        let mut session = BuildSession::new(config(BuildConfig::production("/app")).parallelism(jobs), pages());
        let result = session.build().await.unwrap();
        (session.chunks(), result)
    };

    let (serial_chunks, serial) = build(1).await;
    let (parallel_chunks, parallel) = build(8).await;
    assert_eq!(serial_chunks, parallel_chunks);
    assert_eq!(serial, parallel);
}

#[tokio::test]
async fn test_manifest_lists_shared_chunks_first() {
    let mut session = BuildSession::new(config(BuildConfig::development("/app")), pages());
    let result = session.build().await.unwrap();

    let files = &result.manifest.entries["a"];
    assert_eq!(files.len(), 3);
    assert!(files[0].starts_with("shared-"));
    assert!(files[1].starts_with("shared-"));
    assert_eq!(files[2], "a.js");
    for file in files {
        assert!(result.artifact(file).is_some(), "{file} was not emitted");
    }
}
