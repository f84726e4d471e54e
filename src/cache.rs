// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query-result cache: TTL-bounded, capacity-bounded LRU.
//!
//! Keyed by (lowercase-trimmed query, top_k). Entries expire `ttl_ms`
//! after insertion and the least-recently-accessed entry is evicted when
//! the cache is full. The indexer clears the cache after every run, since
//! cached rankings must not outlive their underlying data.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::utils::now_ms;

struct CacheSlot<T> {
    value: T,
    created_at: u64,
    last_access: u64,
}

/// TTL + LRU cache for search results.
pub struct QueryCache<T> {
    slots: Mutex<HashMap<String, CacheSlot<T>>>,
    ttl_ms: u64,
    capacity: usize,
}

impl<T: Clone> QueryCache<T> {
    pub fn new(ttl_ms: u64, capacity: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl_ms,
            capacity: capacity.max(1),
        }
    }

    fn key(query: &str, top_k: usize) -> String {
        format!("{}|{}", query.trim().to_lowercase(), top_k)
    }

    /// Look up a cached result; expired entries are removed on access.
    pub fn get(&self, query: &str, top_k: usize) -> Option<T> {
        let key = Self::key(query, top_k);
        let now = now_ms();
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());

        let expired = match slots.get(&key) {
            Some(slot) => now.saturating_sub(slot.created_at) >= self.ttl_ms,
            None => return None,
        };

        if expired {
            slots.remove(&key);
            return None;
        }

        let slot = slots.get_mut(&key)?;
        slot.last_access = now;
        Some(slot.value.clone())
    }

    /// Insert a result, evicting the least-recently-accessed entry at
    /// capacity.
    pub fn set(&self, query: &str, top_k: usize, value: T) {
        let key = Self::key(query, top_k);
        let now = now_ms();
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());

        if !slots.contains_key(&key) && slots.len() >= self.capacity {
            if let Some(oldest) = slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_access)
                .map(|(k, _)| k.clone())
            {
                slots.remove(&oldest);
            }
        }

        slots.insert(
            key,
            CacheSlot {
                value,
                created_at: now,
                last_access: now,
            },
        );
    }

    /// Drop every entry. Called when an indexing run completes.
    pub fn invalidate_all(&self) {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
