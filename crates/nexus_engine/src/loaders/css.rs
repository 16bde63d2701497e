use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::pipeline::{Transform, TransformInput, TransformOutput};

static IMPORT_RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@import\s+(?:url\(\s*["']?([^"')\s]+)["']?\s*\)|["']([^"']+)["'])[^;]*;"#)
        .expect("valid regex")
});

static URL_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"url\(\s*["']?([^"')\s]+)["']?\s*\)"#).expect("valid regex"));

/// Stylesheets become a module that injects a `<style>` tag.
///
/// `@import` rules turn into requires of the imported stylesheet and `url()`
/// references are rewritten to the URL exported by the referenced module.
/// Remote, `data:` and fragment URLs are left alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct CssLoader;

impl Transform for CssLoader {
    fn transform(&self, input: &TransformInput<'_>) -> anyhow::Result<TransformOutput> {
        let mut dependencies = Vec::new();
        let mut requires = String::new();

        let without_imports = IMPORT_RULE.replace_all(input.code, |caps: &Captures<'_>| {
            let target = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            match local_specifier(target) {
                Some(spec) => {
                    requires.push_str(&format!("require({});\n", quote(&spec)));
                    push_unique(&mut dependencies, spec);
                    String::new()
                }
                None => caps[0].to_string(),
            }
        });

        let mut parts = Vec::new();
        let mut last = 0;
        for caps in URL_REF.captures_iter(&without_imports) {
            let Some(spec) = local_specifier(&caps[1]) else {
                continue;
            };
            let Some(whole) = caps.get(0) else {
                continue;
            };
            parts.push(quote(&without_imports[last..whole.start()]));
            parts.push(format!("\"url(\" + require({}).default + \")\"", quote(&spec)));
            last = whole.end();
            push_unique(&mut dependencies, spec);
        }
        parts.push(quote(&without_imports[last..]));

        let style_id = format!(
            "nexus-style-{}",
            nexus_chunker::short_hash(input.module.resource().as_bytes(), nexus_chunker::SHORT_HASH_LEN)
        );

        let code = format!(
            r#"{requires}const id = {id};
let style = document.getElementById(id);
if (!style) {{
  style = document.createElement("style");
  style.id = id;
  document.head.appendChild(style);
}}
style.textContent = {css};
exports.__esModule = true;
exports.default = style;
if (module.hot) {{
  module.hot.accept();
  module.hot.dispose(() => style.remove());
}}
"#,
            id = quote(&style_id),
            css = parts.join(" + "),
        );

        Ok(TransformOutput::code(code).with_dependencies(dependencies))
    }
}

fn quote(text: &str) -> String {
    serde_json::Value::from(text).to_string()
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

/// Specifier for a reference that should be bundled, if it is one.
fn local_specifier(reference: &str) -> Option<String> {
    let reference = reference.trim();
    let remote = ["data:", "http:", "https:", "//", "#"];
    if reference.is_empty() || remote.iter().any(|p| reference.starts_with(p)) {
        return None;
    }
    if let Some(package) = reference.strip_prefix('~') {
        return Some(package.to_string());
    }
    if reference.starts_with('.') || reference.starts_with('/') {
        Some(reference.to_string())
    } else {
        Some(format!("./{reference}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_specifier() {
        assert_eq!(local_specifier("logo.png").as_deref(), Some("./logo.png"));
        assert_eq!(local_specifier("../a.css").as_deref(), Some("../a.css"));
        assert_eq!(local_specifier("~normalize.css").as_deref(), Some("normalize.css"));
        assert_eq!(local_specifier("https://cdn/x.css"), None);
        assert_eq!(local_specifier("data:image/png;base64,AA"), None);
        assert_eq!(local_specifier("#filter"), None);
    }
}
