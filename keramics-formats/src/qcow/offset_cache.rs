/* Copyright 2024-2025 Joachim Metz <joachim.metz@gmail.com>
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License. You may
 * obtain a copy of the License at https://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
 * WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied. See the
 * License for the specific language governing permissions and limitations
 * under the License.
 */

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex};

/// State of a single cache slot while a physical load is in flight.
enum OffsetCacheSlot<T> {
    /// Another thread is loading this key; waiters block on the condition variable.
    Pending,
    /// The value is loaded and immutable.
    Ready(T),
}

struct OffsetCacheState<T> {
    entries: HashMap<u64, OffsetCacheSlot<T>>,
    /// Least-recently-used order of *ready* keys; the front is evicted first.
    lru_order: VecDeque<u64>,
}

impl<T> OffsetCacheState<T> {
    fn touch(&mut self, key: u64) {
        self.lru_order.retain(|existing_key| *existing_key != key);
        self.lru_order.push_back(key);
    }

    fn evict_to_capacity(&mut self, capacity: usize) {
        while self.lru_order.len() > capacity {
            if let Some(oldest_key) = self.lru_order.pop_front() {
                self.entries.remove(&oldest_key);
            } else {
                break;
            }
        }
    }
}

/// A bounded LRU cache keyed by absolute on-disk offset, with single-flight loading.
///
/// At most one physical load is ever in flight for a given key: a miss registers a `Pending`
/// marker and releases the lock while the caller-supplied loader runs; concurrent requesters for
/// the same key block on a condition variable until the loader completes, then read the cached
/// value. Values are immutable once inserted and are handed out by (cheap) clone, so callers
/// typically instantiate this over an `Arc<[u8]>` or similar reference-counted buffer.
pub struct OffsetCache<T> {
    capacity: usize,
    state: Mutex<OffsetCacheState<T>>,
    condvar: Condvar,
}

impl<T: Clone> OffsetCache<T> {
    /// Creates a new cache retaining at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(OffsetCacheState {
                entries: HashMap::new(),
                lru_order: VecDeque::new(),
            }),
            condvar: Condvar::new(),
        }
    }

    /// Retrieves the cached value for `key`, loading it with `load` on a miss.
    ///
    /// Guarantees at most one invocation of `load` per key under concurrent access. A failed
    /// load clears the in-flight marker and wakes waiters, who retry the load themselves (the
    /// failure is not cached, so a transient I/O error on one reader does not poison the key for
    /// others).
    pub fn get_or_load<E, F>(&self, key: u64, load: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            match state.entries.get(&key) {
                Some(OffsetCacheSlot::Ready(value)) => {
                    let value: T = value.clone();
                    state.touch(key);
                    return Ok(value);
                }
                Some(OffsetCacheSlot::Pending) => {
                    state = match self.condvar.wait(state) {
                        Ok(state) => state,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                }
                None => break,
            }
        }
        state.entries.insert(key, OffsetCacheSlot::Pending);
        drop(state);

        let load_result: Result<T, E> = load();

        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        match load_result {
            Ok(value) => {
                state.entries.insert(key, OffsetCacheSlot::Ready(value.clone()));
                state.touch(key);
                state.evict_to_capacity(self.capacity);
                drop(state);
                self.condvar.notify_all();
                Ok(value)
            }
            Err(error) => {
                state.entries.remove(&key);
                drop(state);
                self.condvar.notify_all();
                Err(error)
            }
        }
    }

    /// Number of entries currently resident (for tests and diagnostics).
    pub fn len(&self) -> usize {
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.entries.len()
    }
}
