//! Profile cache
//!
//! Profiles outlive a run so a reload can show names and pictures before the
//! network answers. The file-backed cache coalesces writes: `put` only marks
//! the store dirty and a background task flushes at most once per interval.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use relaycover_core::{Identity, Profile};

use crate::error::DriverError;

pub trait ProfileCache: Send + Sync {
    fn get(&self, identity: &Identity) -> Option<Profile>;
    fn put(&self, profile: Profile);
}

/// Process-local cache
#[derive(Debug, Default)]
pub struct MemoryProfileCache {
    profiles: RwLock<HashMap<Identity, Profile>>,
}

impl MemoryProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }
}

impl ProfileCache for MemoryProfileCache {
    fn get(&self, identity: &Identity) -> Option<Profile> {
        self.profiles.read().get(identity).cloned()
    }

    fn put(&self, profile: Profile) {
        self.profiles.write().insert(profile.identity.clone(), profile);
    }
}

/// JSON file store with coalesced writes
#[derive(Debug)]
pub struct FileProfileCache {
    path: PathBuf,
    profiles: RwLock<HashMap<Identity, Profile>>,
    dirty: AtomicBool,
}

impl FileProfileCache {
    /// Open the store at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Arc<Self> {
        let path = path.into();
        let profiles = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Vec<Profile>>(&text) {
                Ok(list) => list.into_iter().map(|p| (p.identity.clone(), p)).collect(),
                Err(e) => {
                    warn!("Ignoring corrupt profile cache {}: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        debug!("Loaded {} cached profiles from {}", profiles.len(), path.display());

        Arc::new(Self {
            path,
            profiles: RwLock::new(profiles),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }

    /// Write the store if anything changed since the last flush.
    pub fn flush(&self) -> Result<bool, DriverError> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        let mut list: Vec<Profile> = self.profiles.read().values().cloned().collect();
        list.sort_by(|a, b| a.identity.cmp(&b.identity));
        let text = serde_json::to_string(&list)?;

        let tmp = self.path.with_extension("tmp");
        let written = std::fs::write(&tmp, text).and_then(|()| std::fs::rename(&tmp, &self.path));
        if let Err(e) = written {
            self.dirty.store(true, Ordering::Release);
            return Err(e.into());
        }
        debug!("Flushed {} profiles to {}", list.len(), self.path.display());
        Ok(true)
    }

    /// Flush every `interval` until the cache is dropped.
    pub fn spawn_flusher(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    return;
                };
                if let Err(e) = cache.flush() {
                    warn!("Profile cache flush failed: {}", e);
                }
            }
        })
    }
}

impl ProfileCache for FileProfileCache {
    fn get(&self, identity: &Identity) -> Option<Profile> {
        self.profiles.read().get(identity).cloned()
    }

    fn put(&self, profile: Profile) {
        self.profiles.write().insert(profile.identity.clone(), profile);
        self.dirty.store(true, Ordering::Release);
    }
}
