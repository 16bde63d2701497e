//! Built-in loaders.

mod asset;
mod css;
mod define;
mod ecmascript;
mod json;

pub use asset::{mime_for_path, AssetLoader, DEFAULT_INLINE_LIMIT};
pub use css::CssLoader;
pub use define::DefineLoader;
pub use ecmascript::{link_module, scan_dependencies, EcmaScriptLoader, LinkedModule};
pub use json::JsonLoader;

/// Prelude marking a module's exports as coming from ES module syntax, so the
/// runtime does not synthesize a `default` export for it.
pub(crate) const ES_MODULE_MARKER: &str = "exports.__esModule = true;";
