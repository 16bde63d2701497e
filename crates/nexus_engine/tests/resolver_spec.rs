use nexus_engine::{FileResolver, MemoryFileStore, ModuleId, OsFileStore, ResolveOptions};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn memory_resolver(files: &[&str], options: ResolveOptions) -> FileResolver {
    let store = MemoryFileStore::with_files(files.iter().map(|path| (*path, "")));
    FileResolver::new(Arc::new(store), options)
}

fn resolve(resolver: &FileResolver, specifier: &str, from: &str) -> PathBuf {
    resolver
        .resolve(specifier, Path::new(from))
        .unwrap_or_else(|e| panic!("{e}: searched {:?}", e.searched))
        .id
        .path()
        .to_path_buf()
}

#[test]
fn test_resolve_relative_extension() {
    let root = tempfile::tempdir().unwrap();
    let src = root.path().join("src");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("main.ts"), "import './utils'").unwrap();
    fs::write(src.join("utils.ts"), "export const x = 1;").unwrap();

    let resolver = FileResolver::new(Arc::new(OsFileStore), ResolveOptions::default());
    let result = resolver.resolve("./utils", &src).unwrap();
    assert_eq!(result.id, ModuleId::new(src.join("utils.ts")));
}

#[test]
fn test_resolve_node_modules() {
    let root = tempfile::tempdir().unwrap();
    let pkg_dir = root.path().join("node_modules").join("react");
    fs::create_dir_all(&pkg_dir).unwrap();
    fs::write(pkg_dir.join("package.json"), r#"{"main": "index.js"}"#).unwrap();
    fs::write(pkg_dir.join("index.js"), "module.exports = {}").unwrap();

    let src = root.path().join("src");
    fs::create_dir_all(&src).unwrap();

    let resolver = FileResolver::new(Arc::new(OsFileStore), ResolveOptions::default());
    let result = resolver.resolve("react", &src).unwrap();
    assert_eq!(result.id.path(), pkg_dir.join("index.js"));
}

#[test]
fn test_resolve_index_expansion() {
    let root = tempfile::tempdir().unwrap();
    let comp = root.path().join("src").join("components");
    fs::create_dir_all(&comp).unwrap();
    fs::write(comp.join("index.tsx"), "").unwrap();

    let resolver = FileResolver::new(Arc::new(OsFileStore), ResolveOptions::default());
    let result = resolver.resolve("./components", &root.path().join("src")).unwrap();
    assert_eq!(result.id.path(), comp.join("index.tsx"));
}

#[test]
fn test_extension_order() {
    let resolver = memory_resolver(
        &["/app/src/theme.css", "/app/src/theme.ts", "/app/src/theme.js"],
        ResolveOptions::default(),
    );
    assert_eq!(resolve(&resolver, "./theme", "/app/src"), PathBuf::from("/app/src/theme.js"));
    // Verbatim wins over appended extensions.
    assert_eq!(
        resolve(&resolver, "./theme.css", "/app/src"),
        PathBuf::from("/app/src/theme.css")
    );
}

#[test]
fn test_alias_longest_prefix_wins() {
    let mut options = ResolveOptions::default();
    options.alias.insert("@".into(), "/app/src".into());
    options.alias.insert("@/ui".into(), "/app/design-system".into());
    let resolver = memory_resolver(
        &["/app/src/ui/button.js", "/app/design-system/button.js", "/app/src/util.js"],
        options,
    );

    assert_eq!(
        resolve(&resolver, "@/ui/button", "/app/src/pages"),
        PathBuf::from("/app/design-system/button.js")
    );
    assert_eq!(resolve(&resolver, "@/util", "/app/src/pages"), PathBuf::from("/app/src/util.js"));
    // Prefix must end at a path separator.
    assert!(resolver.resolve("@util", Path::new("/app/src")).is_err());
}

#[test]
fn test_package_main_fields() {
    let store = MemoryFileStore::with_files([
        (
            "/app/node_modules/lib/package.json",
            r#"{"main": "dist/lib.cjs.js", "module": "dist/lib.esm.js", "browser": {"fs": false}}"#,
        ),
        ("/app/node_modules/lib/dist/lib.cjs.js", ""),
        ("/app/node_modules/lib/dist/lib.esm.js", ""),
        ("/app/node_modules/plain/index.js", ""),
    ]);
    let resolver = FileResolver::new(Arc::new(store), ResolveOptions::default());

    // `browser` is a map here, so `module` is the first usable field.
    assert_eq!(
        resolve(&resolver, "lib", "/app/src/deep/dir"),
        PathBuf::from("/app/node_modules/lib/dist/lib.esm.js")
    );
    assert_eq!(
        resolve(&resolver, "plain", "/app/src"),
        PathBuf::from("/app/node_modules/plain/index.js")
    );
    assert_eq!(
        resolve(&resolver, "lib/dist/lib.cjs", "/app/src"),
        PathBuf::from("/app/node_modules/lib/dist/lib.cjs.js")
    );
}

#[test]
fn test_query_is_kept() {
    let resolver = memory_resolver(&["/app/src/app.css"], ResolveOptions::default());
    let resolution = resolver.resolve("./app.css?inline", Path::new("/app/src")).unwrap();
    assert_eq!(resolution.id, ModuleId::with_query("/app/src/app.css", "inline"));
}

#[test]
fn test_failure_lists_searched_paths() {
    let resolver = memory_resolver(&["/app/src/index.js"], ResolveOptions::default());
    let err = resolver.resolve("./missing", Path::new("/app/src")).unwrap_err();

    assert_eq!(err.specifier, "./missing");
    assert_eq!(err.from, PathBuf::from("/app/src"));
    assert_eq!(err.searched[0], PathBuf::from("/app/src/missing"));
    assert!(err.searched.contains(&PathBuf::from("/app/src/missing.js")));
    assert!(err.searched.contains(&PathBuf::from("/app/src/missing.css")));
    assert!(err.to_string().contains("cannot resolve './missing'"));
}

#[test]
fn test_probes_record_missed_candidates() {
    let resolver = memory_resolver(&["/app/src/theme.css"], ResolveOptions::default());
    let resolution = resolver.resolve("./theme", Path::new("/app/src")).unwrap();
    assert_eq!(resolution.id.path(), Path::new("/app/src/theme.css"));
    assert!(resolution.probes.contains(&PathBuf::from("/app/src/theme.js")));
    assert!(!resolution.probes.contains(&PathBuf::from("/app/src/theme.css")));
}

#[test]
fn test_rejects_nul_and_normalizes() {
    let resolver = memory_resolver(&["/app/lib/a.js"], ResolveOptions::default());
    assert!(resolver.resolve("./a\0.js", Path::new("/app/lib")).is_err());
    assert!(resolver.resolve("", Path::new("/app/lib")).is_err());
    assert_eq!(
        resolve(&resolver, "../lib/./a", "/app/src/nested/.."),
        PathBuf::from("/app/lib/a.js")
    );
}
