// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Registry of per-key async locks.
//!
//! Locks are created on first use and evicted by a background sweeper once they have been
//! idle (not held, not awaited) for longer than the configured TTL.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use hashbrown::HashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

struct Entry {
    lock: Arc<Mutex<()>>,
    last_used: Instant,
}

#[derive(Default)]
struct Registry {
    entries: StdMutex<HashMap<String, Entry>>,
}

impl Registry {
    fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> R) -> R {
        #[allow(clippy::expect_used)]
        let mut entries = self.entries.lock().expect("lock poisoned");
        f(&mut entries)
    }

    fn evict_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        self.with_entries(|entries| {
            let before = entries.len();
            // strong_count == 1 means only the registry references the lock
            entries.retain(|_, entry| {
                Arc::strong_count(&entry.lock) > 1 || now.duration_since(entry.last_used) < ttl
            });
            before - entries.len()
        })
    }
}

/// Guard for one named lock. The lock is released when the guard is dropped.
pub struct NamedGuard {
    _guard: OwnedMutexGuard<()>,
}

pub struct NamedMutex {
    registry: Arc<Registry>,
    cancel: CancellationToken,
}

impl NamedMutex {
    /// Creates the registry and spawns its sweeper, which runs every `ttl` until the
    /// registry is dropped.
    pub fn new(ttl: Duration) -> Self {
        let registry = Arc::new(Registry::default());
        let cancel = CancellationToken::new();

        let sweeper_registry = Arc::clone(&registry);
        let sweeper_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ttl);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let evicted = sweeper_registry.evict_idle(ttl);
                        if evicted > 0 {
                            trace!("Evicted {evicted} idle named locks");
                        }
                    }
                    () = sweeper_cancel.cancelled() => break,
                }
            }
        });

        Self { registry, cancel }
    }

    /// Waits for exclusive access to `name`.
    pub async fn lock(&self, name: &str) -> NamedGuard {
        let lock = self.registry.with_entries(|entries| {
            let entry = entries.entry_ref(name).or_insert_with(|| Entry {
                lock: Arc::new(Mutex::new(())),
                last_used: Instant::now(),
            });
            entry.last_used = Instant::now();
            Arc::clone(&entry.lock)
        });
        NamedGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of locks currently registered.
    pub fn len(&self) -> usize {
        self.registry.with_entries(|entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for NamedMutex {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
