//! Resolved build configuration.
//!
//! A [`BuildConfig`] is produced by whatever loads the user's configuration
//! and is read-only once a session starts. Mode-dependent defaults mirror the
//! usual development/production split: stable names and readable module ids
//! while developing, content-hashed names and compact ids for release.

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::loaders::{
    mime_for_path, AssetLoader, CssLoader, DefineLoader, EcmaScriptLoader, JsonLoader,
};
use crate::pipeline::Transform;

/// Extensions handled by the ECMAScript loader.
pub const SCRIPT_EXTENSIONS: &[&str] = &[".js", ".mjs", ".cjs", ".jsx", ".ts", ".mts", ".tsx"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl Mode {
    pub fn is_development(self) -> bool {
        self == Mode::Development
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How specifiers are turned into paths.
#[derive(Clone, Debug)]
pub struct ResolveOptions {
    /// Tried in order after the verbatim path.
    pub extensions: Vec<String>,
    /// Specifier prefix -> replacement. Longest matching prefix wins.
    pub alias: BTreeMap<String, String>,
    /// Directories searched for bare specifiers, walking up from the importer.
    pub modules: Vec<String>,
    /// `package.json` fields consulted when entering a package directory.
    pub main_fields: Vec<String>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            extensions: [".js", ".mjs", ".jsx", ".ts", ".tsx", ".json", ".css"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            alias: BTreeMap::new(),
            modules: vec!["node_modules".to_string()],
            main_fields: vec!["browser".into(), "module".into(), "main".into()],
        }
    }
}

/// Decides whether a loader rule applies to a module.
///
/// Matchers see the resolved path followed by the query, if any
/// (`/src/logo.svg?inline`).
#[derive(Clone)]
pub enum Matcher {
    /// Path (without query) ends with one of the suffixes.
    Suffix(Vec<String>),
    /// Regex over path and query.
    Regex(Regex),
    /// MIME-like test on the extension, `image/*` or `application/json`.
    Mime(String),
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
    /// Any of the inner matchers.
    Any(Vec<Matcher>),
}

impl Matcher {
    pub fn suffix<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Matcher::Suffix(suffixes.into_iter().map(Into::into).collect())
    }

    pub fn mime(pattern: impl Into<String>) -> Self {
        Matcher::Mime(pattern.into())
    }

    pub fn predicate(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Matcher::Predicate(Arc::new(f))
    }

    pub fn matches(&self, resource: &str) -> bool {
        let path = resource.split('?').next().unwrap_or(resource);
        match self {
            Matcher::Suffix(suffixes) => suffixes.iter().any(|s| path.ends_with(s.as_str())),
            Matcher::Regex(re) => re.is_match(resource),
            Matcher::Mime(pattern) => {
                let mime = mime_for_path(Path::new(path));
                match pattern.strip_suffix("/*") {
                    Some(top) => mime.split('/').next() == Some(top),
                    None => mime == pattern,
                }
            }
            Matcher::Predicate(f) => f(resource),
            Matcher::Any(inner) => inner.iter().any(|m| m.matches(resource)),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Suffix(s) => f.debug_tuple("Suffix").field(s).finish(),
            Matcher::Regex(re) => f.debug_tuple("Regex").field(&re.as_str()).finish(),
            Matcher::Mime(m) => f.debug_tuple("Mime").field(m).finish(),
            Matcher::Predicate(_) => f.write_str("Predicate(..)"),
            Matcher::Any(inner) => f.debug_tuple("Any").field(inner).finish(),
        }
    }
}

/// One `{matcher, transform}` pair of the loader chain.
#[derive(Clone)]
pub struct LoaderRule {
    pub name: String,
    pub matcher: Matcher,
    pub exclude: Option<Regex>,
    pub transform: Arc<dyn Transform>,
    pub options: serde_json::Value,
}

impl LoaderRule {
    pub fn new(name: impl Into<String>, matcher: Matcher, transform: impl Transform + 'static) -> Self {
        Self {
            name: name.into(),
            matcher,
            exclude: None,
            transform: Arc::new(transform),
            options: serde_json::Value::Null,
        }
    }

    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }

    pub fn exclude(mut self, pattern: Regex) -> Self {
        self.exclude = Some(pattern);
        self
    }

    pub fn applies_to(&self, resource: &str) -> bool {
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(resource) {
                return false;
            }
        }
        self.matcher.matches(resource)
    }
}

impl fmt::Debug for LoaderRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderRule")
            .field("name", &self.name)
            .field("matcher", &self.matcher)
            .field("exclude", &self.exclude.as_ref().map(Regex::as_str))
            .field("options", &self.options)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SharedChunkPolicy {
    /// One shared chunk per distinct set of requesting entries.
    PerEntrySet,
    /// Fold groups into the smallest group whose entry set contains theirs.
    /// Fewer chunks, coarser cache granularity.
    MergeSupersets,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitChunksOptions {
    pub policy: SharedChunkPolicy,
    /// A module must be reachable from at least this many entries to be shared.
    pub min_entries: usize,
    /// Groups whose transformed code is smaller than this stay duplicated.
    pub min_size: usize,
    /// Upper bound on shared chunks; the largest groups are kept.
    pub max_shared_chunks: Option<usize>,
}

impl SplitChunksOptions {
    pub fn for_mode(mode: Mode) -> Self {
        Self {
            policy: match mode {
                Mode::Development => SharedChunkPolicy::PerEntrySet,
                Mode::Production => SharedChunkPolicy::MergeSupersets,
            },
            min_entries: 2,
            min_size: 0,
            max_shared_chunks: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptimizationOptions {
    pub split_chunks: bool,
    pub split: SplitChunksOptions,
    /// Use root-relative paths as runtime module ids instead of short hashes.
    pub named_modules: bool,
}

impl OptimizationOptions {
    pub fn for_mode(mode: Mode) -> Self {
        Self {
            split_chunks: true,
            split: SplitChunksOptions::for_mode(mode),
            named_modules: mode.is_development(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HtmlOptions {
    pub filename: String,
    /// Document the script tags are injected into, before `</body>`.
    pub template: Option<String>,
}

impl Default for HtmlOptions {
    fn default() -> Self {
        Self {
            filename: "index.html".to_string(),
            template: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputOptions {
    /// Template for entry chunks.
    pub filename: String,
    /// Template for shared chunks.
    pub chunk_filename: String,
    /// Prefix of every URL the runtime or HTML refers to.
    pub public_path: String,
    pub source_maps: bool,
    pub html: Option<HtmlOptions>,
}

impl OutputOptions {
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Development => Self {
                filename: "[name].js".to_string(),
                chunk_filename: "[name].js".to_string(),
                public_path: "/".to_string(),
                source_maps: false,
                html: None,
            },
            Mode::Production => Self {
                filename: "[name].[contenthash:8].js".to_string(),
                chunk_filename: "[name].[contenthash:8].js".to_string(),
                public_path: "/".to_string(),
                source_maps: true,
                html: None,
            },
        }
    }
}

/// Immutable input of a build session.
#[derive(Clone, Debug)]
pub struct BuildConfig {
    pub root: PathBuf,
    pub mode: Mode,
    /// Entry name -> specifier, resolved relative to `root`.
    pub entries: BTreeMap<String, String>,
    pub resolve: ResolveOptions,
    pub rules: Vec<LoaderRule>,
    /// Modules matching these keep their code but are not scanned for imports.
    pub no_parse: Vec<Regex>,
    /// Identifier -> JSON literal substituted in scripts.
    pub define: BTreeMap<String, serde_json::Value>,
    pub optimization: OptimizationOptions,
    pub output: OutputOptions,
    /// Maximum concurrent transform jobs.
    pub parallelism: usize,
    /// Optional depth guard on discovery.
    pub max_depth: Option<usize>,
    /// Fail the pass when an ES module imports a name its target does not
    /// export.
    pub strict_export_presence: bool,
    /// Directory of the persistent transform cache.
    pub cache_dir: Option<PathBuf>,
}

impl BuildConfig {
    pub fn new(root: impl Into<PathBuf>, mode: Mode) -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            root: root.into(),
            mode,
            entries: BTreeMap::new(),
            resolve: ResolveOptions::default(),
            rules: Self::default_rules(),
            no_parse: Vec::new(),
            define: BTreeMap::new(),
            optimization: OptimizationOptions::for_mode(mode),
            output: OutputOptions::for_mode(mode),
            parallelism,
            max_depth: None,
            strict_export_presence: mode.is_development(),
            cache_dir: None,
        }
    }

    pub fn development(root: impl Into<PathBuf>) -> Self {
        Self::new(root, Mode::Development)
    }

    pub fn production(root: impl Into<PathBuf>) -> Self {
        Self::new(root, Mode::Production)
    }

    /// Fonts, images, JSON, stylesheets and scripts, in that order.
    pub fn default_rules() -> Vec<LoaderRule> {
        vec![
            LoaderRule::new(
                "fonts",
                Matcher::suffix([".woff", ".woff2", ".ttf", ".eot", ".otf"]),
                AssetLoader::default(),
            ),
            LoaderRule::new(
                "images",
                Matcher::Any(vec![Matcher::mime("image/*"), Matcher::suffix([".wasm"])]),
                AssetLoader::default(),
            ),
            LoaderRule::new("json", Matcher::suffix([".json"]), JsonLoader),
            LoaderRule::new("css", Matcher::suffix([".css"]), CssLoader),
            LoaderRule::new(
                "ecmascript",
                Matcher::suffix(SCRIPT_EXTENSIONS.iter().copied()),
                EcmaScriptLoader,
            ),
        ]
    }

    pub fn entry(mut self, name: impl Into<String>, specifier: impl Into<String>) -> Self {
        self.entries.insert(name.into(), specifier.into());
        self
    }

    pub fn alias(mut self, prefix: impl Into<String>, replacement: impl Into<String>) -> Self {
        self.resolve.alias.insert(prefix.into(), replacement.into());
        self
    }

    /// Replace the loader chain.
    pub fn rules(mut self, rules: Vec<LoaderRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Append a rule after the existing ones.
    pub fn rule(mut self, rule: LoaderRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn define(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.define.insert(key.into(), value);
        self
    }

    pub fn no_parse(mut self, pattern: Regex) -> Self {
        self.no_parse.push(pattern);
        self
    }

    pub fn optimization(mut self, optimization: OptimizationOptions) -> Self {
        self.optimization = optimization;
        self
    }

    pub fn output(mut self, output: OutputOptions) -> Self {
        self.output = output;
        self
    }

    pub fn parallelism(mut self, jobs: usize) -> Self {
        self.parallelism = jobs.max(1);
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn strict_export_presence(mut self, strict: bool) -> Self {
        self.strict_export_presence = strict;
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// The loader chain actually run: the configured rules, preceded by a
    /// define rule for scripts when `define` is non-empty.
    pub fn effective_rules(&self) -> Vec<LoaderRule> {
        let mut rules = Vec::with_capacity(self.rules.len() + 1);
        if !self.define.is_empty() {
            rules.push(LoaderRule::new(
                "define",
                Matcher::suffix(SCRIPT_EXTENSIONS.iter().copied()),
                DefineLoader::new(self.define.clone()),
            ));
        }
        rules.extend(self.rules.iter().cloned());
        rules
    }
}
