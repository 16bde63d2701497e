//! Rule-matched transform chains.
//!
//! The pipeline picks the loader rules that apply to a module, runs their
//! transforms in configured order and merges the dependency specifiers each
//! one reports. Results are cached by content hash and rule fingerprint, in
//! memory and optionally on disk.

use nexus_cache::PersistentCache;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::{BuildConfig, LoaderRule, Mode};
use crate::error::TransformError;
use crate::graph::ModuleId;

/// What a transform sees.
pub struct TransformInput<'a> {
    pub module: &'a ModuleId,
    /// Original bytes of the module.
    pub raw: &'a [u8],
    /// Output of the previous transform, or the raw source as text.
    pub code: &'a str,
    pub options: &'a serde_json::Value,
    pub mode: Mode,
    pub public_path: &'a str,
}

/// A file produced by a transform next to the module's code.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmittedAsset {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOutput {
    pub code: String,
    pub map: Option<String>,
    /// Specifiers discovered while transforming, in discovery order.
    pub dependencies: Vec<String>,
    pub assets: Vec<EmittedAsset>,
    /// Import and export names of an ES module.
    pub bindings: Option<ModuleBindings>,
}

/// Names an ES module takes from its dependencies and offers to importers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleBindings {
    /// Specifier -> names imported from it, `default` included.
    pub imports: Vec<(String, Vec<String>)>,
    pub exports: Vec<String>,
    /// `export * from` makes the export list unknowable until runtime.
    pub open_exports: bool,
}

impl ModuleBindings {
    pub fn exports(&self, name: &str) -> bool {
        self.open_exports || self.exports.iter().any(|e| e == name)
    }
}

impl TransformOutput {
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// A loader. Runs synchronously on a worker thread.
pub trait Transform: Send + Sync {
    fn transform(&self, input: &TransformInput<'_>) -> anyhow::Result<TransformOutput>;
}

impl<F> Transform for F
where
    F: Fn(&TransformInput<'_>) -> anyhow::Result<TransformOutput> + Send + Sync,
{
    fn transform(&self, input: &TransformInput<'_>) -> anyhow::Result<TransformOutput> {
        self(input)
    }
}

/// Result of running the chain for one module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transformed {
    pub output: TransformOutput,
    /// Names of the rules that ran, in order.
    pub applied: Vec<String>,
    pub cached: bool,
}

pub struct TransformPipeline {
    rules: Vec<LoaderRule>,
    fingerprints: Vec<String>,
    no_parse: Vec<Regex>,
    mode: Mode,
    public_path: String,
    /// Latest result per resource, with the key it was produced under.
    memory: Mutex<HashMap<String, (String, TransformOutput)>>,
    persistent: Option<PersistentCache>,
}

impl TransformPipeline {
    pub fn new(config: &BuildConfig) -> Self {
        let rules = config.effective_rules();
        let fingerprints = rules
            .iter()
            .map(|rule| PersistentCache::key_for(&[&rule.name, &rule.options.to_string()]))
            .collect();

        let persistent = config.cache_dir.as_ref().and_then(|dir| {
            match PersistentCache::open(dir) {
                Ok(cache) => Some(cache),
                Err(e) => {
                    tracing::warn!("Transform cache disabled: {:#}", e);
                    None
                }
            }
        });

        Self {
            rules,
            fingerprints,
            no_parse: config.no_parse.clone(),
            mode: config.mode,
            public_path: config.output.public_path.clone(),
            memory: Mutex::new(HashMap::new()),
            persistent,
        }
    }

    pub fn rules(&self) -> &[LoaderRule] {
        &self.rules
    }

    /// Number of resources with a result held in memory.
    pub fn cached_resources(&self) -> usize {
        self.memory.lock().len()
    }

    /// Indices of the rules that apply to `module`, in configured order.
    fn matching(&self, resource: &str) -> Vec<usize> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.applies_to(resource))
            .map(|(index, _)| index)
            .collect()
    }

    pub fn matching_rules(&self, module: &ModuleId) -> Vec<&str> {
        self.matching(&module.resource())
            .into_iter()
            .map(|index| self.rules[index].name.as_str())
            .collect()
    }

    /// Run every matching transform over `raw`. `content_hash` is the digest
    /// of `raw` and keys the cache.
    pub fn transform(
        &self,
        module: &ModuleId,
        raw: &[u8],
        content_hash: &str,
    ) -> Result<Transformed, TransformError> {
        let resource = module.resource();
        let matched = self.matching(&resource);
        if matched.is_empty() {
            return Err(TransformError {
                module: module.clone(),
                rule: "<none>".to_string(),
                cause: anyhow::anyhow!("no loader rule matches {resource}"),
            });
        }
        let applied: Vec<String> = matched.iter().map(|&i| self.rules[i].name.clone()).collect();

        let mut key_parts = vec![resource.as_str(), content_hash, self.mode.as_str()];
        key_parts.extend(matched.iter().map(|&i| self.fingerprints[i].as_str()));
        let key = PersistentCache::key_for(&key_parts);

        if let Some(output) = self.lookup(&resource, &key) {
            tracing::debug!("transform cache hit for {}", resource);
            return Ok(Transformed {
                output,
                applied,
                cached: true,
            });
        }

        let mut output = TransformOutput::code(String::from_utf8_lossy(raw).into_owned());
        for &index in &matched {
            let rule = &self.rules[index];
            let input = TransformInput {
                module,
                raw,
                code: &output.code,
                options: &rule.options,
                mode: self.mode,
                public_path: &self.public_path,
            };
            let step = rule.transform.transform(&input).map_err(|cause| TransformError {
                module: module.clone(),
                rule: rule.name.clone(),
                cause,
            })?;

            output.code = step.code;
            if step.map.is_some() {
                output.map = step.map;
            }
            for dep in step.dependencies {
                if !output.dependencies.contains(&dep) {
                    output.dependencies.push(dep);
                }
            }
            output.assets.extend(step.assets);
            if step.bindings.is_some() {
                output.bindings = step.bindings;
            }
        }

        if self.no_parse.iter().any(|re| re.is_match(&resource)) {
            output.dependencies.clear();
        }

        self.store(resource, key, &output);
        Ok(Transformed {
            output,
            applied,
            cached: false,
        })
    }

    fn lookup(&self, resource: &str, key: &str) -> Option<TransformOutput> {
        if let Some((cached_key, hit)) = self.memory.lock().get(resource) {
            if cached_key == key {
                return Some(hit.clone());
            }
        }
        let cache = self.persistent.as_ref()?;
        let bytes = match cache.get(key) {
            Ok(bytes) => bytes?,
            Err(e) => {
                tracing::warn!("Transform cache read failed: {:#}", e);
                return None;
            }
        };
        let output: TransformOutput = serde_json::from_slice(&bytes).ok()?;
        self.memory
            .lock()
            .insert(resource.to_string(), (key.to_string(), output.clone()));
        Some(output)
    }

    fn store(&self, resource: String, key: String, output: &TransformOutput) {
        if let Some(cache) = &self.persistent {
            match serde_json::to_vec(output) {
                Ok(bytes) => {
                    if let Err(e) = cache.put(&key, &bytes) {
                        tracing::warn!("Transform cache write failed: {:#}", e);
                    }
                }
                Err(e) => tracing::warn!("Transform result not cacheable: {}", e),
            }
        }
        self.memory.lock().insert(resource, (key, output.clone()));
    }
}

impl Drop for TransformPipeline {
    fn drop(&mut self) {
        if let Some(cache) = &self.persistent {
            if let Err(e) = cache.flush() {
                tracing::warn!("Transform cache flush failed: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Matcher;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn append(suffix: &'static str) -> impl Transform {
        move |input: &TransformInput<'_>| -> anyhow::Result<TransformOutput> {
            Ok(TransformOutput::code(format!("{}{}", input.code, suffix))
                .with_dependencies(vec![format!("./{}", suffix.trim())]))
        }
    }

    fn config_with(rules: Vec<LoaderRule>) -> BuildConfig {
        BuildConfig::development("/app").rules(rules)
    }

    #[test]
    fn test_rules_run_in_order_and_merge_dependencies() {
        let pipeline = TransformPipeline::new(&config_with(vec![
            LoaderRule::new("first", Matcher::suffix([".txt"]), append(" a")),
            LoaderRule::new("skipped", Matcher::suffix([".css"]), append(" x")),
            LoaderRule::new("second", Matcher::suffix([".txt"]), append(" b")),
            LoaderRule::new("again", Matcher::suffix([".txt"]), append(" a")),
        ]));

        let id = ModuleId::new("/app/notes.txt");
        let result = pipeline.transform(&id, b"start", "h1").unwrap();
        assert_eq!(result.output.code, "start a b a");
        assert_eq!(result.applied, vec!["first", "second", "again"]);
        assert_eq!(result.output.dependencies, vec!["./a", "./b"]);
        assert!(!result.cached);
    }

    #[test]
    fn test_unmatched_module_is_an_error() {
        let pipeline = TransformPipeline::new(&config_with(vec![]));
        let err = pipeline
            .transform(&ModuleId::new("/app/data.bin"), b"", "h")
            .unwrap_err();
        assert_eq!(err.rule, "<none>");
    }

    #[test]
    fn test_failure_names_the_rule() {
        let failing = |_: &TransformInput<'_>| -> anyhow::Result<TransformOutput> {
            anyhow::bail!("unexpected token")
        };
        let pipeline = TransformPipeline::new(&config_with(vec![
            LoaderRule::new("ok", Matcher::suffix([".js"]), append(" a")),
            LoaderRule::new("broken", Matcher::suffix([".js"]), failing),
        ]));
        let err = pipeline
            .transform(&ModuleId::new("/app/a.js"), b"x", "h")
            .unwrap_err();
        assert_eq!(err.rule, "broken");
        assert!(err.to_string().contains("unexpected token"));
    }

    #[test]
    fn test_cache_is_keyed_by_content_hash() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let counting = move |input: &TransformInput<'_>| -> anyhow::Result<TransformOutput> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(TransformOutput::code(input.code))
        };
        let pipeline = TransformPipeline::new(&config_with(vec![LoaderRule::new(
            "count",
            Matcher::suffix([".js"]),
            counting,
        )]));

        let id = ModuleId::new("/app/a.js");
        assert!(!pipeline.transform(&id, b"1", "hash-1").unwrap().cached);
        assert!(pipeline.transform(&id, b"1", "hash-1").unwrap().cached);
        assert!(!pipeline.transform(&id, b"2", "hash-2").unwrap().cached);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_memory_cache_keeps_latest_result_per_resource() {
        let pipeline = TransformPipeline::new(&config_with(vec![LoaderRule::new(
            "a",
            Matcher::suffix([".js"]),
            append(" a"),
        )]));

        let id = ModuleId::new("/app/a.js");
        for version in 0..20 {
            let raw = format!("v{version}");
            pipeline.transform(&id, raw.as_bytes(), &format!("hash-{version}")).unwrap();
        }
        assert_eq!(pipeline.cached_resources(), 1);
        assert!(pipeline.transform(&id, b"v19", "hash-19").unwrap().cached);
        assert!(!pipeline.transform(&id, b"v0", "hash-0").unwrap().cached);

        pipeline.transform(&ModuleId::new("/app/b.js"), b"b", "hash-b").unwrap();
        assert_eq!(pipeline.cached_resources(), 2);
    }

    #[test]
    fn test_no_parse_drops_dependencies() {
        let config = config_with(vec![LoaderRule::new(
            "deps",
            Matcher::suffix([".js"]),
            append(" lib"),
        )])
        .no_parse(Regex::new("vendor").unwrap());
        let pipeline = TransformPipeline::new(&config);

        let vendored = pipeline
            .transform(&ModuleId::new("/app/vendor/big.js"), b"x", "h")
            .unwrap();
        assert!(vendored.output.dependencies.is_empty());
        assert_eq!(vendored.output.code, "x lib");

        let own = pipeline
            .transform(&ModuleId::new("/app/src/a.js"), b"x", "h")
            .unwrap();
        assert_eq!(own.output.dependencies, vec!["./lib"]);
    }

    #[test]
    fn test_persistent_cache_is_shared_across_pipelines() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let make = |calls: Arc<AtomicUsize>| {
            let counter = calls;
            let rule = LoaderRule::new(
                "count",
                Matcher::suffix([".js"]),
                move |input: &TransformInput<'_>| -> anyhow::Result<TransformOutput> {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(TransformOutput::code(input.code))
                },
            );
            config_with(vec![rule]).cache_dir(dir.path().join("cache"))
        };

        let id = ModuleId::new("/app/a.js");
        {
            let pipeline = TransformPipeline::new(&make(calls.clone()));
            pipeline.transform(&id, b"1", "hash-1").unwrap();
        }
        let pipeline = TransformPipeline::new(&make(calls.clone()));
        assert!(pipeline.transform(&id, b"1", "hash-1").unwrap().cached);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
