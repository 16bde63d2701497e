use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::Path;

use crate::loaders::ES_MODULE_MARKER;
use crate::pipeline::{EmittedAsset, Transform, TransformInput, TransformOutput};

/// Files smaller than this are inlined as data URIs.
pub const DEFAULT_INLINE_LIMIT: usize = 8 * 1024;

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "bmp" => "image/bmp",
        "wasm" => "application/wasm",
        "json" => "application/json",
        "js" | "mjs" | "cjs" | "jsx" | "ts" | "mts" | "tsx" => "text/javascript",
        "css" => "text/css",
        "html" | "htm" => "text/html",
        "map" => "application/json",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "eot" => "application/vnd.ms-fontobject",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Images, fonts and other binary files.
///
/// Small files become a base64 data URI default export; larger ones are
/// emitted under `assets/` and export their public URL. The limit can be
/// overridden per rule with `{"inline_limit": <bytes>}`.
#[derive(Clone, Debug)]
pub struct AssetLoader {
    pub inline_limit: usize,
}

impl Default for AssetLoader {
    fn default() -> Self {
        Self {
            inline_limit: DEFAULT_INLINE_LIMIT,
        }
    }
}

impl Transform for AssetLoader {
    fn transform(&self, input: &TransformInput<'_>) -> anyhow::Result<TransformOutput> {
        let limit = input
            .options
            .get("inline_limit")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(self.inline_limit);
        let path = input.module.path();

        if input.raw.len() < limit {
            let uri = format!("data:{};base64,{}", mime_for_path(path), STANDARD.encode(input.raw));
            return Ok(TransformOutput::code(format!(
                "{ES_MODULE_MARKER}\nexports.default = {};\n",
                serde_json::to_string(&uri)?
            )));
        }

        let name = asset_name(path, input.raw);
        let url = format!("{}assets/{}", input.public_path, name);
        Ok(TransformOutput {
            code: format!(
                "{ES_MODULE_MARKER}\nexports.default = {};\n",
                serde_json::to_string(&url)?
            ),
            assets: vec![EmittedAsset {
                name,
                bytes: input.raw.to_vec(),
            }],
            ..TransformOutput::default()
        })
    }
}

/// `<stem>.<hash><.ext>`, content-addressed so equal names mean equal bytes.
fn asset_name(path: &Path, bytes: &[u8]) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("asset");
    let hash = nexus_chunker::short_hash(bytes, nexus_chunker::SHORT_HASH_LEN);
    match path.extension().and_then(|s| s.to_str()) {
        Some(ext) => format!("{stem}.{hash}.{ext}"),
        None => format!("{stem}.{hash}"),
    }
}
