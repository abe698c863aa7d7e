//! Resolution of application names to live audio sessions
//!
//! Sessions come and go as applications start and stop playback, so nothing
//! here holds on to them: every resolution enumerates the endpoint again.
//! What is cached is the comparatively expensive process id → executable
//! name lookup, for a bounded time.

use crate::domain::audio::{AudioBackend, AudioSession};
use crate::domain::clock::{Clock, SystemClock};
use crate::domain::volume::MASTER;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Name reported for a process that could not be inspected
pub const UNKNOWN_PROCESS: &str = "<unknown>";

/// Default lifetime of a cached process name
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct CacheEntry {
    name: String,
    resolved_at: Instant,
}

/// Time-bounded process id → executable name cache
///
/// Entries are never invalidated when a process exits; they age out after
/// the configured lifetime and the next lookup goes back to the OS.
pub struct ProcessNameCache {
    entries: Mutex<HashMap<u32, CacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ProcessNameCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// Cached name for `pid`, if one was stored less than `ttl` ago
    pub fn get_fresh(&self, pid: u32) -> Option<String> {
        let now = self.clock.now();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&pid)
            .filter(|entry| now.saturating_duration_since(entry.resolved_at) < self.ttl)
            .map(|entry| entry.name.clone())
    }

    /// Store (or refresh) the name for `pid`, stamped with the current time.
    ///
    /// Entries that have outlived `ttl` are dropped on the way, so pids of
    /// long-gone processes do not accumulate.
    pub fn insert(&self, pid: u32, name: String) {
        let resolved_at = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, entry| {
            resolved_at.saturating_duration_since(entry.resolved_at) < self.ttl
        });
        entries.insert(pid, CacheEntry { name, resolved_at });
    }

    /// Number of stored entries, stale ones included
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Resolves application names to the sessions their processes own
pub struct SessionResolver {
    cache: ProcessNameCache,
}

impl SessionResolver {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: ProcessNameCache::new(ttl, clock),
        }
    }

    /// Resolver on the system clock
    pub fn with_ttl(ttl: Duration) -> Self {
        Self::new(ttl, Arc::new(SystemClock))
    }

    pub fn cache(&self) -> &ProcessNameCache {
        &self.cache
    }

    /// Executable file name for `pid`.
    ///
    /// A fresh cache hit is returned without touching the OS. A failed lookup
    /// yields [`UNKNOWN_PROCESS`] and is not cached, so it is retried next time.
    pub fn process_name<B: AudioBackend + ?Sized>(&self, backend: &B, pid: u32) -> String {
        if let Some(name) = self.cache.get_fresh(pid) {
            trace!(pid, name = %name, "Process name cache hit");
            return name;
        }

        let name = match backend.process_image_path(pid) {
            Ok(path) => path
                .file_name()
                .map(|file_name| file_name.to_string_lossy().into_owned()),
            Err(e) => {
                debug!(pid, error = %e, "Process lookup failed");
                None
            }
        };

        match name {
            Some(name) => {
                self.cache.insert(pid, name.clone());
                name
            }
            None => UNKNOWN_PROCESS.to_string(),
        }
    }

    /// Every live session whose owning executable is named `name`
    /// (case-insensitive).
    ///
    /// `master` never matches a session; it denotes the endpoint itself and
    /// is handled by the caller. Enumeration failures and sessions whose
    /// owner cannot be determined are skipped, not reported.
    pub fn resolve_sessions<B: AudioBackend + ?Sized>(
        &self,
        backend: &B,
        name: &str,
    ) -> Vec<Box<dyn AudioSession>> {
        let wanted = name.to_lowercase();
        if wanted == MASTER {
            return Vec::new();
        }

        let sessions = match backend.sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(target_name = name, error = %e, "Failed to enumerate audio sessions");
                return Vec::new();
            }
        };

        let matched: Vec<_> = sessions
            .into_iter()
            .filter(|session| match session.process_id() {
                Ok(pid) => {
                    let owner = self.process_name(backend, pid);
                    owner != UNKNOWN_PROCESS && owner.to_lowercase() == wanted
                }
                Err(e) => {
                    trace!(error = %e, "Skipping session without process id");
                    false
                }
            })
            .collect();

        trace!(target_name = name, count = matched.len(), "Resolved sessions");
        matched
    }
}
