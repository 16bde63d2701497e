use regex::{Captures, Regex};
use std::collections::BTreeMap;

use crate::pipeline::{Transform, TransformInput, TransformOutput};

/// Compile-time constants: replaces identifiers such as
/// `process.env.NODE_ENV_TYPE` with JSON literals.
#[derive(Clone, Debug)]
pub struct DefineLoader {
    definitions: BTreeMap<String, String>,
    pattern: Option<Regex>,
}

impl DefineLoader {
    pub fn new(definitions: BTreeMap<String, serde_json::Value>) -> Self {
        let definitions: BTreeMap<String, String> = definitions
            .into_iter()
            .map(|(key, value)| (key, value.to_string()))
            .collect();

        // Longest keys first so `a.b.c` wins over `a.b`.
        let mut keys: Vec<&str> = definitions.keys().map(String::as_str).collect();
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        let alternatives: Vec<String> = keys.iter().map(|k| regex::escape(k)).collect();

        let pattern = if alternatives.is_empty() {
            None
        } else {
            Regex::new(&format!(r"\b(?:{})\b", alternatives.join("|"))).ok()
        };

        Self {
            definitions,
            pattern,
        }
    }
}

impl Transform for DefineLoader {
    fn transform(&self, input: &TransformInput<'_>) -> anyhow::Result<TransformOutput> {
        let Some(pattern) = &self.pattern else {
            return Ok(TransformOutput::code(input.code));
        };
        let code = pattern.replace_all(input.code, |caps: &Captures<'_>| {
            self.definitions
                .get(&caps[0])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        });
        Ok(TransformOutput::code(code.into_owned()))
    }
}
