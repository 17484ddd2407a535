//! Memory-bounded song cache
//!
//! Byte-accurate LRU over decoded songs with pinning. The currently-playing
//! song and any preloaded setlist are pinned and never evicted; everything
//! else is evicted least-recently-used-first once the byte budget is
//! exceeded. Concurrent misses for the same song coalesce onto a single
//! decode (the original design let two callers race to decode the same song
//! twice; the single-flight slot closes that hole).
//!
//! The audio thread never touches this module; the cache mutex is held only
//! by control threads, and never across a decode.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::events::{AppEvent, EventBus};
use crate::loader::{SongLoader, SongLoadError};
use crate::song::DecodedSong;

/// Cache occupancy snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub used_bytes: u64,
    pub budget_bytes: u64,
}

struct CacheEntry {
    song: Arc<DecodedSong>,
    bytes: u64,
    pinned: bool,
    last_used: u64,
}

/// Single-flight slot shared by every caller waiting on one decode
struct InFlight {
    done: Mutex<Option<Result<Arc<DecodedSong>, SongLoadError>>>,
    cond: Condvar,
    cancel: AtomicBool,
    pin_requested: AtomicBool,
}

impl InFlight {
    fn new(pin: bool) -> Self {
        Self {
            done: Mutex::new(None),
            cond: Condvar::new(),
            cancel: AtomicBool::new(false),
            pin_requested: AtomicBool::new(pin),
        }
    }

    fn wait(&self) -> Result<Arc<DecodedSong>, SongLoadError> {
        let guard = self.done.lock().expect("in-flight slot poisoned");
        let guard = self
            .cond
            .wait_while(guard, |done| done.is_none())
            .expect("in-flight slot poisoned");
        guard.clone().expect("woken with empty slot")
    }

    fn complete(&self, result: Result<Arc<DecodedSong>, SongLoadError>) {
        *self.done.lock().expect("in-flight slot poisoned") = Some(result);
        self.cond.notify_all();
    }
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    in_flight: HashMap<String, Arc<InFlight>>,
    budget_bytes: u64,
    used_bytes: u64,
    /// Monotonic recency counter; bumped on every hit and insert
    tick: u64,
    /// Tracks whether the pinned-set-over-budget warning fired for the
    /// current violation episode
    over_budget_warned: bool,
}

/// Byte-bounded LRU of decoded songs
pub struct SongCache {
    inner: Mutex<CacheInner>,
    loader: SongLoader,
    events: EventBus,
}

enum MissRole {
    /// This caller runs the decode
    Owner(Arc<InFlight>),
    /// Another caller is already decoding; wait on its slot
    Waiter(Arc<InFlight>),
}

impl SongCache {
    pub fn new(loader: SongLoader, events: EventBus, budget_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
                budget_bytes,
                used_bytes: 0,
                tick: 0,
                over_budget_warned: false,
            }),
            loader,
            events,
        }
    }

    /// Return the cached song, or decode and insert it
    pub fn get_or_load(&self, song_id: &str) -> Result<Arc<DecodedSong>, SongLoadError> {
        self.get_or_load_inner(song_id, false)
    }

    /// Like [`Self::get_or_load`], but the entry lands (or becomes) pinned
    pub fn get_or_load_pinned(&self, song_id: &str) -> Result<Arc<DecodedSong>, SongLoadError> {
        self.get_or_load_inner(song_id, true)
    }

    fn get_or_load_inner(&self, song_id: &str, pin: bool) -> Result<Arc<DecodedSong>, SongLoadError> {
        let role = {
            let mut inner = self.lock();

            if let Some(entry) = inner.entries.get(song_id) {
                let song = entry.song.clone();
                inner.tick += 1;
                let tick = inner.tick;
                let entry = inner.entries.get_mut(song_id).expect("entry vanished");
                entry.last_used = tick;
                if pin {
                    entry.pinned = true;
                }
                return Ok(song);
            }

            match inner.in_flight.get(song_id) {
                Some(slot) => {
                    if pin {
                        slot.pin_requested.store(true, Ordering::Release);
                    }
                    MissRole::Waiter(slot.clone())
                }
                None => {
                    let slot = Arc::new(InFlight::new(pin));
                    inner.in_flight.insert(song_id.to_string(), slot.clone());
                    MissRole::Owner(slot)
                }
            }
        };

        match role {
            MissRole::Waiter(slot) => slot.wait(),
            MissRole::Owner(slot) => {
                // Decode outside the cache lock.
                let result = self.loader.load(song_id, &slot.cancel);

                {
                    let mut inner = self.lock();
                    inner.in_flight.remove(song_id);

                    if let Ok(song) = &result {
                        // A removal that raced the decode wins: stay absent.
                        if !slot.cancel.load(Ordering::Acquire) {
                            let bytes = song.bytes;
                            inner.tick += 1;
                            let tick = inner.tick;
                            inner.entries.insert(
                                song_id.to_string(),
                                CacheEntry {
                                    song: song.clone(),
                                    bytes,
                                    pinned: slot.pin_requested.load(Ordering::Acquire),
                                    last_used: tick,
                                },
                            );
                            inner.used_bytes += bytes;
                            self.evict_over_budget(&mut inner);
                            self.check_pinned_budget(&mut inner);
                        }
                    }
                }

                slot.complete(result.clone());
                result
            }
        }
    }

    /// Forbid eviction of an entry (no-op if absent)
    pub fn pin(&self, song_id: &str) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.get_mut(song_id) {
            entry.pinned = true;
        } else if let Some(slot) = inner.in_flight.get(song_id) {
            slot.pin_requested.store(true, Ordering::Release);
        }
        self.check_pinned_budget(&mut inner);
    }

    /// Allow eviction again and re-run the eviction pass
    pub fn unpin(&self, song_id: &str) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.get_mut(song_id) {
            entry.pinned = false;
        } else if let Some(slot) = inner.in_flight.get(song_id) {
            slot.pin_requested.store(false, Ordering::Release);
        }
        self.evict_over_budget(&mut inner);
        self.check_pinned_budget(&mut inner);
    }

    /// Update the byte budget and evict down to it
    pub fn set_byte_budget(&self, bytes: u64) {
        let mut inner = self.lock();
        inner.budget_bytes = bytes;
        self.evict_over_budget(&mut inner);
        self.check_pinned_budget(&mut inner);
    }

    /// Evict all unpinned entries
    pub fn clear(&self) {
        let mut inner = self.lock();
        let before = inner.entries.len();
        let mut freed = 0;
        inner.entries.retain(|_, entry| {
            if entry.pinned {
                true
            } else {
                freed += entry.bytes;
                false
            }
        });
        inner.used_bytes -= freed;
        log::info!(
            "cache cleared: {} entries dropped, {} bytes freed",
            before - inner.entries.len(),
            freed
        );
    }

    /// Evict one song; cancels its load if it is still in flight
    pub fn remove(&self, song_id: &str) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.remove(song_id) {
            inner.used_bytes -= entry.bytes;
        }
        if let Some(slot) = inner.in_flight.get(song_id) {
            slot.cancel.store(true, Ordering::Release);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            used_bytes: inner.used_bytes,
            budget_bytes: inner.budget_bytes,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().expect("song cache mutex poisoned")
    }

    /// Walk LRU tail-first, skipping pinned entries, until under budget
    fn evict_over_budget(&self, inner: &mut CacheInner) {
        while inner.used_bytes > inner.budget_bytes {
            let victim = inner
                .entries
                .iter()
                .filter(|(_, e)| !e.pinned)
                .min_by_key(|(_, e)| e.last_used)
                .map(|(id, _)| id.clone());

            match victim {
                Some(id) => {
                    let entry = inner.entries.remove(&id).expect("victim vanished");
                    inner.used_bytes -= entry.bytes;
                    log::debug!("evicted song {} ({} bytes)", id, entry.bytes);
                }
                // Only pinned entries remain; the budget is effectively
                // raised to cover them.
                None => break,
            }
        }
    }

    /// Emit the over-budget warning once per violation episode
    fn check_pinned_budget(&self, inner: &mut CacheInner) {
        let pinned_bytes: u64 = inner
            .entries
            .values()
            .filter(|e| e.pinned)
            .map(|e| e.bytes)
            .sum();

        if pinned_bytes > inner.budget_bytes {
            if !inner.over_budget_warned {
                inner.over_budget_warned = true;
                self.events.emit(AppEvent::CacheWarning {
                    kind: "BudgetBelowPinnedSet".to_string(),
                    message: format!(
                        "pinned songs ({} bytes) exceed the cache budget ({} bytes); budget raised to cover them",
                        pinned_bytes, inner.budget_bytes
                    ),
                });
            }
        } else {
            inner.over_budget_warned = false;
        }
    }
}
