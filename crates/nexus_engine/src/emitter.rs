//! Rendering planned chunks into output artifacts.
//!
//! The emitter works purely in memory. Callers that want files on disk use
//! [`BuildResult::write_to`].

use nexus_chunker::{concatenate_modules, content_hash, line_count, short_hash, SHORT_HASH_LEN};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, LazyLock};

use crate::config::{BuildConfig, HtmlOptions};
use crate::error::EmitError;
use crate::graph::{Module, ModuleGraph, ModuleId};
use crate::planner::{Chunk, ChunkKind};
use crate::runtime::NEXUS_RUNTIME_JS;

/// Hex digits substituted for a bare `[contenthash]`.
pub const DEFAULT_HASH_LEN: usize = 20;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\[\]]*)\]").expect("valid regex"));

const DEFAULT_HTML: &str = "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n</head>\n<body>\n</body>\n</html>\n";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Chunk,
    SourceMap,
    Asset,
    Html,
    Manifest,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    /// Chunk the artifact was rendered from, if any.
    pub chunk: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Entry name -> files to load, in order.
    pub entries: BTreeMap<String, Vec<String>>,
    /// Chunk name -> file.
    pub chunks: BTreeMap<String, String>,
    pub assets: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildResult {
    /// Output file name -> artifact.
    pub artifacts: BTreeMap<String, Artifact>,
    pub manifest: Manifest,
    /// Warnings that did not fail the build.
    pub diagnostics: Vec<String>,
}

impl BuildResult {
    pub fn artifact(&self, file: &str) -> Option<&Artifact> {
        self.artifacts.get(file)
    }

    /// Artifact contents as UTF-8, if present and valid.
    pub fn text(&self, file: &str) -> Option<&str> {
        self.artifacts
            .get(file)
            .and_then(|a| std::str::from_utf8(&a.bytes).ok())
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(String::as_str)
    }

    pub async fn write_to(&self, dir: impl AsRef<Path>) -> std::io::Result<()> {
        let dir = dir.as_ref();
        for (file, artifact) in &self.artifacts {
            let path = dir.join(file);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &artifact.bytes).await?;
        }
        tracing::info!("Wrote {} files to {}", self.artifacts.len(), dir.display());
        Ok(())
    }
}

/// A module re-rendered for a live runtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotUpdate {
    pub module_id: String,
    /// Registration call, evaluated by `__nexus_apply_update__`.
    pub code: String,
}

struct RenderedChunk {
    body: String,
    map: Option<String>,
}

pub struct Emitter {
    config: Arc<BuildConfig>,
}

impl Emitter {
    pub fn new(config: Arc<BuildConfig>) -> Self {
        Self { config }
    }

    /// Runtime id of a module: its root-relative path with named modules,
    /// a short hash of that path otherwise.
    pub fn module_id(&self, id: &ModuleId) -> String {
        let relative = id.relative_to(&self.config.root);
        if self.config.optimization.named_modules {
            relative
        } else {
            short_hash(relative.as_bytes(), SHORT_HASH_LEN)
        }
    }

    pub fn render_module(&self, module: &Module) -> String {
        let deps: serde_json::Map<String, serde_json::Value> = module
            .dependencies
            .iter()
            .map(|d| (d.specifier.clone(), self.module_id(&d.target).into()))
            .collect();
        let newline = if module.code.ends_with('\n') { "" } else { "\n" };
        format!(
            "__nexus_register__({}, {}, function (require, module, exports) {{\n{}{}}});\n",
            quote(&self.module_id(&module.id)),
            serde_json::Value::Object(deps),
            module.code,
            newline
        )
    }

    pub fn render_hot_updates(&self, graph: &ModuleGraph, ids: &[ModuleId]) -> Vec<HotUpdate> {
        ids.iter()
            .filter_map(|id| graph.module(id))
            .map(|module| HotUpdate {
                module_id: self.module_id(&module.id),
                code: self.render_module(module),
            })
            .collect()
    }

    pub fn emit(&self, graph: &ModuleGraph, chunks: &[Chunk]) -> Result<BuildResult, EmitError> {
        let mut result = BuildResult::default();

        for chunk in chunks {
            let rendered = self.render_chunk(graph, chunk, &mut result.diagnostics);
            let template = match chunk.kind {
                ChunkKind::Entry => &self.config.output.filename,
                ChunkKind::Shared => &self.config.output.chunk_filename,
            };
            let file = self.render_filename(template, &chunk.name, rendered.body.as_bytes())?;

            let mut body = rendered.body;
            if let Some(map) = rendered.map {
                let map_file = format!("{file}.map");
                let basename = map_file.rsplit('/').next().unwrap_or(&map_file);
                body.push_str(&format!("//# sourceMappingURL={basename}\n"));
                insert(&mut result, map_file, ArtifactKind::SourceMap, Some(&chunk.name), map.into_bytes())?;
            }
            insert(&mut result, file.clone(), ArtifactKind::Chunk, Some(&chunk.name), body.into_bytes())?;
            result.manifest.chunks.insert(chunk.name.clone(), file);
        }

        for chunk in chunks.iter().filter(|c| c.kind == ChunkKind::Entry) {
            let files = chunk
                .depends_on
                .iter()
                .chain(std::iter::once(&chunk.name))
                .filter_map(|name| result.manifest.chunks.get(name).cloned())
                .collect();
            result.manifest.entries.insert(chunk.name.clone(), files);
        }

        let mut assets = BTreeMap::new();
        for module in graph.modules() {
            for asset in &module.assets {
                assets
                    .entry(format!("assets/{}", asset.name))
                    .or_insert_with(|| asset.bytes.clone());
            }
        }
        for (file, bytes) in assets {
            result.manifest.assets.push(file.clone());
            insert(&mut result, file, ArtifactKind::Asset, None, bytes)?;
        }

        if let Some(html) = &self.config.output.html {
            let document = self.render_html(html, &result.manifest);
            insert(&mut result, html.filename.clone(), ArtifactKind::Html, None, document.into_bytes())?;
        }

        let manifest = serde_json::to_string_pretty(&result.manifest).unwrap_or_default();
        insert(
            &mut result,
            "manifest.json".to_string(),
            ArtifactKind::Manifest,
            None,
            manifest.into_bytes(),
        )?;

        Ok(result)
    }

    fn render_chunk(&self, graph: &ModuleGraph, chunk: &Chunk, diagnostics: &mut Vec<String>) -> RenderedChunk {
        let modules: Vec<&Module> = chunk.modules.iter().filter_map(|id| graph.module(id)).collect();
        let rendered: Vec<(String, String)> = modules
            .iter()
            .map(|m| (self.module_id(&m.id), self.render_module(m)))
            .collect();
        let refs: Vec<(&str, &str)> = rendered.iter().map(|(id, code)| (id.as_str(), code.as_str())).collect();
        let (concatenated, spans) = concatenate_modules(&refs);

        let mut body = String::with_capacity(NEXUS_RUNTIME_JS.len() + concatenated.len() + 64);
        body.push_str(NEXUS_RUNTIME_JS);
        let prelude_lines = line_count(NEXUS_RUNTIME_JS);
        body.push_str(&concatenated);
        if let (ChunkKind::Entry, Some(entry)) = (chunk.kind, &chunk.entry) {
            body.push_str(&format!("__nexus_require__({});\n", quote(&self.module_id(entry))));
        }

        let map = self.config.output.source_maps.then(|| {
            let mut sections = Vec::new();
            for (module, span) in modules.iter().zip(&spans) {
                let Some(raw) = &module.map else {
                    continue;
                };
                let mut map: serde_json::Value = match serde_json::from_str(raw) {
                    Ok(map) => map,
                    Err(e) => {
                        diagnostics.push(format!("source map of {} is not valid JSON: {}", module.id, e));
                        continue;
                    }
                };
                let resource = module.id.resource();
                let path = module.id.path().to_string_lossy();
                if let Some(sources) = map.get_mut("sources").and_then(|s| s.as_array_mut()) {
                    for source in sources {
                        if source.as_str() == Some(resource.as_str()) || source.as_str() == Some(&*path) {
                            *source = format!("nexus://{}", module.id.relative_to(&self.config.root)).into();
                        }
                    }
                }
                sections.push(serde_json::json!({
                    // One line for the registration wrapper.
                    "offset": { "line": prelude_lines + span.start_line + 1, "column": 0 },
                    "map": map,
                }));
            }
            serde_json::json!({ "version": 3, "sections": sections }).to_string()
        });

        RenderedChunk { body, map }
    }

    /// Expand `[name]`, `[contenthash]` and `[contenthash:N]`. Hash
    /// placeholders and the separator before them are dropped in development.
    pub fn render_filename(&self, template: &str, name: &str, body: &[u8]) -> Result<String, EmitError> {
        let unknown = |placeholder: &str| EmitError::UnknownPlaceholder {
            template: template.to_string(),
            placeholder: placeholder.to_string(),
        };

        let mut out = String::with_capacity(template.len() + name.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(template) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            out.push_str(&template[last..whole.start()]);
            last = whole.end();

            let inner = &caps[1];
            let (key, len) = match inner.split_once(':') {
                Some((key, len)) => (key, Some(len)),
                None => (inner, None),
            };
            match (key, len) {
                ("name", None) => out.push_str(name),
                ("contenthash", len) => {
                    let len = match len {
                        None => DEFAULT_HASH_LEN,
                        Some(len) => len
                            .parse::<usize>()
                            .ok()
                            .filter(|n| (1..=64).contains(n))
                            .ok_or_else(|| unknown(whole.as_str()))?,
                    };
                    if self.config.mode.is_development() {
                        if out.ends_with('.') || out.ends_with('-') {
                            out.pop();
                        }
                    } else {
                        out.push_str(&content_hash(body)[..len]);
                    }
                }
                _ => return Err(unknown(whole.as_str())),
            }
        }
        out.push_str(&template[last..]);
        Ok(out)
    }

    fn render_html(&self, html: &HtmlOptions, manifest: &Manifest) -> String {
        let mut seen = HashSet::new();
        let tags: Vec<String> = manifest
            .entries
            .values()
            .flatten()
            .filter(|file| seen.insert(file.as_str()))
            .map(|file| format!("<script src=\"{}{}\"></script>", self.config.output.public_path, file))
            .collect();
        let tags = format!("{}\n", tags.join("\n"));

        let mut document = html.template.clone().unwrap_or_else(|| DEFAULT_HTML.to_string());
        match document.rfind("</body>") {
            Some(index) => document.insert_str(index, &tags),
            None => document.push_str(&tags),
        }
        document
    }
}

fn insert(
    result: &mut BuildResult,
    file: String,
    kind: ArtifactKind,
    chunk: Option<&str>,
    bytes: Vec<u8>,
) -> Result<(), EmitError> {
    if let Some(existing) = result.artifacts.get(&file) {
        return Err(EmitError::FileConflict {
            first: existing.chunk.clone().unwrap_or_else(|| format!("{:?}", existing.kind)),
            second: chunk.map(str::to_string).unwrap_or_else(|| format!("{kind:?}")),
            file,
        });
    }
    result.artifacts.insert(
        file,
        Artifact {
            kind,
            chunk: chunk.map(str::to_string),
            bytes,
        },
    );
    Ok(())
}

fn quote(text: &str) -> String {
    serde_json::Value::from(text).to_string()
}
