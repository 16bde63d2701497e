//! File store collaborators.
//!
//! The engine never touches the file system directly; it asks a [`FileStore`]
//! whether paths exist, reads bytes, and subscribes to change notifications.

use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// Invoked with the paths that changed.
pub type ChangeCallback = Arc<dyn Fn(Vec<PathBuf>) + Send + Sync>;

/// Keeps a subscription alive; dropping it stops notifications.
pub struct WatchGuard {
    _handle: Box<dyn Any + Send>,
}

impl WatchGuard {
    pub fn new(handle: impl Any + Send) -> Self {
        Self {
            _handle: Box::new(handle),
        }
    }
}

pub trait FileStore: Send + Sync {
    fn kind(&self, path: &Path) -> Option<EntryKind>;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    fn watch(&self, paths: &[PathBuf], on_change: ChangeCallback) -> io::Result<WatchGuard>;

    fn exists(&self, path: &Path) -> bool {
        self.kind(path).is_some()
    }

    fn is_file(&self, path: &Path) -> bool {
        self.kind(path) == Some(EntryKind::File)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.kind(path) == Some(EntryKind::Dir)
    }
}

struct MemoryWatcher {
    roots: Vec<PathBuf>,
    on_change: ChangeCallback,
    active: Arc<AtomicBool>,
}

struct MemoryWatchHandle {
    active: Arc<AtomicBool>,
}

impl Drop for MemoryWatchHandle {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// In-memory store. Directories exist implicitly as prefixes of file paths.
#[derive(Default)]
pub struct MemoryFileStore {
    files: RwLock<BTreeMap<PathBuf, Vec<u8>>>,
    watchers: Mutex<Vec<MemoryWatcher>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files<I, P, B>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, B)>,
        P: Into<PathBuf>,
        B: Into<Vec<u8>>,
    {
        let store = Self::new();
        {
            let mut map = store.files.write();
            for (path, bytes) in files {
                map.insert(path.into(), bytes.into());
            }
        }
        store
    }

    /// Create or replace a file and notify watchers.
    pub fn write(&self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) {
        let path = path.into();
        self.files.write().insert(path.clone(), bytes.into());
        self.notify(path);
    }

    /// Delete a file and notify watchers. Returns whether it existed.
    pub fn remove(&self, path: &Path) -> bool {
        let existed = self.files.write().remove(path).is_some();
        if existed {
            self.notify(path.to_path_buf());
        }
        existed
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    fn notify(&self, path: PathBuf) {
        let callbacks: Vec<ChangeCallback> = {
            let mut watchers = self.watchers.lock();
            watchers.retain(|w| w.active.load(Ordering::SeqCst));
            watchers
                .iter()
                .filter(|w| w.roots.iter().any(|root| path.starts_with(root)))
                .map(|w| w.on_change.clone())
                .collect()
        };
        for callback in callbacks {
            callback(vec![path.clone()]);
        }
    }
}

impl FileStore for MemoryFileStore {
    fn kind(&self, path: &Path) -> Option<EntryKind> {
        let files = self.files.read();
        if files.contains_key(path) {
            return Some(EntryKind::File);
        }
        // PathBuf ordering is component-wise, so children sort right after the
        // directory itself.
        files
            .range(path.to_path_buf()..)
            .next()
            .filter(|(candidate, _)| candidate.starts_with(path))
            .map(|_| EntryKind::Dir)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files.read().get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )
        })
    }

    fn watch(&self, paths: &[PathBuf], on_change: ChangeCallback) -> io::Result<WatchGuard> {
        let active = Arc::new(AtomicBool::new(true));
        self.watchers.lock().push(MemoryWatcher {
            roots: paths.to_vec(),
            on_change,
            active: active.clone(),
        });
        Ok(WatchGuard::new(MemoryWatchHandle { active }))
    }
}

/// Store backed by the operating system's file system.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsFileStore;

impl FileStore for OsFileStore {
    fn kind(&self, path: &Path) -> Option<EntryKind> {
        let meta = std::fs::metadata(path).ok()?;
        if meta.is_dir() {
            Some(EntryKind::Dir)
        } else {
            Some(EntryKind::File)
        }
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn watch(&self, paths: &[PathBuf], on_change: ChangeCallback) -> io::Result<WatchGuard> {
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if event.kind.is_access() || event.paths.is_empty() {
                        return;
                    }
                    on_change(event.paths);
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default(),
        )
        .map_err(io::Error::other)?;

        for path in paths {
            watcher
                .watch(path, RecursiveMode::Recursive)
                .map_err(io::Error::other)?;
            tracing::info!("Watcher started on {}", path.display());
        }

        Ok(WatchGuard::new(watcher))
    }
}
