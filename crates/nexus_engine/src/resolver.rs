//! Specifier resolution over a [`FileStore`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::config::ResolveOptions;
use crate::error::ResolutionError;
use crate::graph::ModuleId;
use crate::store::FileStore;

/// A successful resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub id: ModuleId,
    /// Candidates tested before the hit. A file appearing at one of these
    /// paths could change the outcome.
    pub probes: Vec<PathBuf>,
}

#[derive(Clone)]
pub struct FileResolver {
    store: Arc<dyn FileStore>,
    options: ResolveOptions,
}

impl FileResolver {
    pub fn new(store: Arc<dyn FileStore>, options: ResolveOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    /// Resolve `specifier` as written in a module located in `from_dir`.
    pub fn resolve(&self, specifier: &str, from_dir: &Path) -> Result<Resolution, ResolutionError> {
        let mut searched = Vec::new();
        let fail = |searched: Vec<PathBuf>| ResolutionError {
            specifier: specifier.to_string(),
            from: from_dir.to_path_buf(),
            searched,
        };

        if specifier.is_empty() || specifier.contains('\0') {
            return Err(fail(searched));
        }

        let (request, query) = match specifier.split_once('?') {
            Some((request, query)) => (request, Some(query)),
            None => (specifier, None),
        };
        let request = self.apply_alias(request);

        let found = if is_path_like(&request) {
            let base = if Path::new(&request).is_absolute() {
                PathBuf::from(&request)
            } else {
                from_dir.join(&request)
            };
            self.try_path(&normalize(&base), &mut searched)
        } else {
            self.try_modules(&request, from_dir, &mut searched)
        };

        match found {
            Some(path) => {
                let id = match query {
                    Some(query) => ModuleId::with_query(path, query),
                    None => ModuleId::new(path),
                };
                // The last probe is the hit itself.
                searched.pop();
                Ok(Resolution {
                    id,
                    probes: searched,
                })
            }
            None => Err(fail(searched)),
        }
    }

    fn apply_alias(&self, request: &str) -> String {
        let best = self
            .options
            .alias
            .iter()
            .filter(|(prefix, _)| {
                request == prefix.as_str()
                    || request
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|(prefix, _)| prefix.len());

        match best {
            Some((prefix, replacement)) => format!("{}{}", replacement, &request[prefix.len()..]),
            None => request.to_string(),
        }
    }

    fn try_modules(&self, request: &str, from_dir: &Path, searched: &mut Vec<PathBuf>) -> Option<PathBuf> {
        for dir in from_dir.ancestors() {
            for modules in &self.options.modules {
                let candidate = normalize(&dir.join(modules).join(request));
                if let Some(found) = self.try_path(&candidate, searched) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Verbatim file, then extensions, then directory (package or index).
    fn try_path(&self, path: &Path, searched: &mut Vec<PathBuf>) -> Option<PathBuf> {
        if let Some(found) = self.try_file(path, searched) {
            return Some(found);
        }
        if self.store.is_dir(path) {
            if let Some(found) = self.try_package(path, searched) {
                return Some(found);
            }
            return self.try_index(path, searched);
        }
        None
    }

    fn try_file(&self, path: &Path, searched: &mut Vec<PathBuf>) -> Option<PathBuf> {
        searched.push(path.to_path_buf());
        if self.store.is_file(path) {
            return Some(path.to_path_buf());
        }
        for ext in &self.options.extensions {
            let candidate = with_suffix(path, ext);
            searched.push(candidate.clone());
            if self.store.is_file(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    fn try_index(&self, dir: &Path, searched: &mut Vec<PathBuf>) -> Option<PathBuf> {
        for ext in &self.options.extensions {
            let candidate = dir.join(format!("index{ext}"));
            searched.push(candidate.clone());
            if self.store.is_file(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    fn try_package(&self, dir: &Path, searched: &mut Vec<PathBuf>) -> Option<PathBuf> {
        let manifest = dir.join("package.json");
        // Recorded even when absent: creating or editing it can move the hit.
        searched.push(manifest.clone());
        if !self.store.is_file(&manifest) {
            return None;
        }
        let bytes = self.store.read(&manifest).ok()?;
        let package: serde_json::Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Ignoring malformed {}: {}", manifest.display(), e);
                return None;
            }
        };

        for field in &self.options.main_fields {
            // `browser` may also be a replacement map; only plain paths count.
            let Some(main) = package.get(field).and_then(|v| v.as_str()) else {
                continue;
            };
            let target = normalize(&dir.join(main));
            if target == dir {
                continue;
            }
            if let Some(found) = self.try_file(&target, searched) {
                return Some(found);
            }
            if self.store.is_dir(&target) {
                if let Some(found) = self.try_index(&target, searched) {
                    return Some(found);
                }
            }
        }
        None
    }
}

/// Per-pass memo of `(from_dir, specifier)` lookups, shared by workers.
#[derive(Default)]
pub struct ResolveCache {
    entries: Mutex<HashMap<(PathBuf, String), Result<Resolution, ResolutionError>>>,
}

impl ResolveCache {
    pub fn resolve(
        &self,
        resolver: &FileResolver,
        specifier: &str,
        from_dir: &Path,
    ) -> Result<Resolution, ResolutionError> {
        let key = (from_dir.to_path_buf(), specifier.to_string());
        if let Some(hit) = self.entries.lock().get(&key) {
            return hit.clone();
        }
        let result = resolver.resolve(specifier, from_dir);
        self.entries.lock().insert(key, result.clone());
        result
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn is_path_like(request: &str) -> bool {
    request.starts_with('/')
        || request.starts_with("./")
        || request.starts_with("../")
        || request == "."
        || request == ".."
        || Path::new(request).is_absolute()
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Lexically remove `.` and `..` components.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/src/./a/../b.js")), PathBuf::from("/src/b.js"));
        assert_eq!(normalize(Path::new("/../etc")), PathBuf::from("/etc"));
    }

    #[test]
    fn test_path_like() {
        assert!(is_path_like("./a"));
        assert!(is_path_like("../a"));
        assert!(is_path_like("/abs"));
        assert!(!is_path_like("react"));
        assert!(!is_path_like("@scope/pkg"));
    }
}
