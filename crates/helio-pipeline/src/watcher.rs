//! Plugin shader change notifications
//!
//! A file watcher running on its own thread reports changed paths through a
//! [`ChangeNotifier`]. The notifier maps each path to the plugin it belongs
//! to and queues that plugin id. The pipeline drains the queue at the start
//! of every tick.

use crate::config::PipelineSettings;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Distinct plugin ids a queue holds before it drops new ones
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Deduplicating set of plugins waiting for a reload
#[derive(Debug, Clone)]
pub struct ReloadQueue {
    pending: Arc<Mutex<HashSet<String>>>,
    capacity: usize,
}

impl ReloadQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashSet::new())),
            capacity: capacity.max(1),
        }
    }

    /// Queue a plugin id; `false` if the queue is full
    pub fn push(&self, plugin_id: &str) -> bool {
        let mut pending = self.pending.lock();
        if pending.contains(plugin_id) {
            return true;
        }
        if pending.len() >= self.capacity {
            log::warn!(
                "Reload queue full ({} plugins), dropping change for '{}'",
                self.capacity,
                plugin_id
            );
            return false;
        }
        pending.insert(plugin_id.to_string());
        true
    }

    /// Take every queued id, leaving an empty set behind
    pub fn drain(&self) -> Vec<String> {
        let taken = std::mem::take(&mut *self.pending.lock());
        let mut ids: Vec<String> = taken.into_iter().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Producer handle for a watcher thread
    pub fn notifier(&self, filter: PluginWatchFilter) -> ChangeNotifier {
        ChangeNotifier {
            queue: self.clone(),
            filter,
        }
    }
}

impl Default for ReloadQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// Maps changed files to the plugin directory they live in
#[derive(Debug, Clone)]
pub struct PluginWatchFilter {
    root: PathBuf,
    suffix: String,
}

impl PluginWatchFilter {
    pub fn new(root: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            suffix: suffix.into(),
        }
    }

    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(settings.plugins_root.clone(), settings.shader_suffix.clone())
    }

    /// Plugin id for a changed path, `None` if the change is irrelevant
    pub fn plugin_id(&self, path: &Path) -> Option<String> {
        if !path.to_string_lossy().ends_with(&self.suffix) {
            log::debug!("Ignoring change to non-shader file {}", path.display());
            return None;
        }
        let Ok(relative) = path.strip_prefix(&self.root) else {
            log::debug!("Ignoring change outside the plugins root: {}", path.display());
            return None;
        };

        let mut components = relative.components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(id)), Some(_)) => id.to_str().map(str::to_string),
            _ => {
                log::debug!("Ignoring change not inside a plugin: {}", path.display());
                None
            }
        }
    }
}

/// Cloneable producer side of a [`ReloadQueue`]
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    queue: ReloadQueue,
    filter: PluginWatchFilter,
}

impl ChangeNotifier {
    /// Report a changed file; returns whether a plugin reload was queued
    pub fn file_changed(&self, path: impl AsRef<Path>) -> bool {
        match self.filter.plugin_id(path.as_ref()) {
            Some(id) => self.queue.push(&id),
            None => false,
        }
    }
}
