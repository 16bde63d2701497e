//! Chunk identity and concatenation primitives.
//!
//! Everything here is deterministic: the same input always yields the same
//! identifiers and the same bytes, which keeps hashed output names stable
//! across machines and runs.

use sha2::{Digest, Sha256};

/// Length of the short hex digests used in chunk names.
pub const SHORT_HASH_LEN: usize = 8;

/// Full hex SHA-256 of arbitrary bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// First `len` hex characters of the content hash.
pub fn short_hash(bytes: &[u8], len: usize) -> String {
    let mut hash = content_hash(bytes);
    hash.truncate(len.min(hash.len()));
    hash
}

/// Generate a chunk id from the identities of its modules.
///
/// Order-insensitive: the ids are sorted before hashing, so two planners that
/// collected the same module set in a different order agree on the id.
pub fn generate_chunk_id(modules: &[String]) -> String {
    let mut sorted: Vec<&str> = modules.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut hasher = Sha256::new();
    for module in sorted {
        hasher.update(module.as_bytes());
        // Separator so ["ab", "c"] and ["a", "bc"] differ.
        hasher.update([0u8]);
    }
    let mut id = format!("{:x}", hasher.finalize());
    id.truncate(SHORT_HASH_LEN);
    id
}

/// A module placed into a chunk body, with the line it starts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpan {
    pub id: String,
    pub start_line: usize,
}

/// Concatenate modules into a single chunk body.
///
/// Each module is preceded by a `// Module: <id>` banner. Returns the body and
/// the line offset of every module's first code line (used for index source
/// maps).
pub fn concatenate_modules(modules: &[(&str, &str)]) -> (String, Vec<ModuleSpan>) {
    let mut output = String::new();
    let mut spans = Vec::with_capacity(modules.len());
    let mut line = 0;

    for (id, content) in modules {
        output.push_str("// Module: ");
        output.push_str(id);
        output.push('\n');
        line += 1;

        spans.push(ModuleSpan {
            id: (*id).to_string(),
            start_line: line,
        });

        output.push_str(content);
        if !content.ends_with('\n') {
            output.push('\n');
        }
        output.push('\n');
        line += line_count(content) + 1;
    }

    (output, spans)
}

/// Number of lines `text` occupies once a trailing newline is ensured.
pub fn line_count(text: &str) -> usize {
    if text.is_empty() {
        return 1;
    }
    let newlines = text.matches('\n').count();
    if text.ends_with('\n') {
        newlines
    } else {
        newlines + 1
    }
}
