use anyhow::Context;

use crate::loaders::ES_MODULE_MARKER;
use crate::pipeline::{Transform, TransformInput, TransformOutput};

/// Validates JSON and exports it as the default export.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonLoader;

impl Transform for JsonLoader {
    fn transform(&self, input: &TransformInput<'_>) -> anyhow::Result<TransformOutput> {
        let value: serde_json::Value = serde_json::from_str(input.code)
            .with_context(|| format!("invalid JSON in {}", input.module))?;
        Ok(TransformOutput::code(format!(
            "{ES_MODULE_MARKER}\nexports.default = {};\n",
            serde_json::to_string(&value)?
        )))
    }
}
