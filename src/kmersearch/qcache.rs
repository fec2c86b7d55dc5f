use crate::kmersearch::kmer::PostingKey;
use crate::kmersearch::seq::PackedSeq;
use fxhash::{FxHashMap, FxHasher};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::hash::{Hash, Hasher};

/// Stable hash of a filtered posting-key array, used to key the
/// adjusted-min-score cache.
pub fn hash_posting_keys(keys: &[PostingKey]) -> u64 {
    let mut h = FxHasher::default();
    keys.len().hash(&mut h);
    for key in keys {
        key.kmer.hash(&mut h);
        key.ordinal.hash(&mut h);
    }
    h.finish()
}

/* ------------------------------------------------------------------------- */
/*  Pattern cache: query text → extracted posting keys, LRU                  */
/* ------------------------------------------------------------------------- */

struct PatternEntry {
    keys: Vec<PostingKey>,
    last_used: u64,
}

/// Caches the extractor output per (query text, k). Least-recently-used
/// entries are evicted at capacity; capacity 0 disables the cache.
pub struct PatternCache {
    map: FxHashMap<(String, u8), PatternEntry>,
    capacity: usize,
    tick: u64,
}

impl PatternCache {
    pub fn new(capacity: usize) -> PatternCache {
        PatternCache {
            map: FxHashMap::default(),
            capacity,
            tick: 0,
        }
    }

    pub fn get(&mut self, query: &str, k: u8) -> Option<&[PostingKey]> {
        self.tick += 1;
        let tick = self.tick;
        match self.map.get_mut(&(query.to_string(), k)) {
            Some(entry) => {
                entry.last_used = tick;
                Some(&entry.keys)
            }
            None => None,
        }
    }

    pub fn put(&mut self, query: &str, k: u8, keys: Vec<PostingKey>) {
        if self.capacity == 0 {
            return;
        }
        if self.map.len() >= self.capacity && !self.map.contains_key(&(query.to_string(), k)) {
            // Evict the least recently used entry.
            if let Some(victim) = self
                .map
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                self.map.remove(&victim);
            }
        }
        self.tick += 1;
        self.map.insert(
            (query.to_string(), k),
            PatternEntry {
                keys,
                last_used: self.tick,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/* ------------------------------------------------------------------------- */
/*  Adjusted-min-score cache: key-array hash → score, FIFO                   */
/* ------------------------------------------------------------------------- */

pub struct MinScoreCache {
    map: FxHashMap<u64, u32>,
    order: VecDeque<u64>,
    capacity: usize,
}

impl MinScoreCache {
    pub fn new(capacity: usize) -> MinScoreCache {
        MinScoreCache {
            map: FxHashMap::default(),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub fn get(&self, keys_hash: u64) -> Option<u32> {
        self.map.get(&keys_hash).copied()
    }

    pub fn put(&mut self, keys_hash: u64, score: u32) {
        if self.capacity == 0 {
            return;
        }
        if self.map.insert(keys_hash, score).is_none() {
            self.order.push_back(keys_hash);
            while self.map.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.map.remove(&oldest);
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/* ------------------------------------------------------------------------- */
/*  Rawscore cache: (stored copy, query copy) → score, min-heap eviction     */
/* ------------------------------------------------------------------------- */

/// Scoring output kept per (stored sequence, query) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawscoreInfo {
    pub raw: u32,
    pub stored_key_count: u32,
    pub query_key_count: u32,
}

type RawscoreKey = (PackedSeq, String);

struct RawscoreEntry {
    info: RawscoreInfo,
    stamp: u64,
}

/// Caches exact raw scores. When full, the entry with the lowest match
/// count is evicted first, on the assumption that low scorers are the
/// least likely to be re-verified.
///
/// The heap holds one record per insertion; records whose stamp no longer
/// matches the live entry are skipped on pop.
pub struct RawscoreCache {
    map: FxHashMap<RawscoreKey, RawscoreEntry>,
    heap: BinaryHeap<Reverse<(u32, u64, RawscoreKey)>>,
    capacity: usize,
    stamp: u64,
}

impl RawscoreCache {
    pub fn new(capacity: usize) -> RawscoreCache {
        RawscoreCache {
            map: FxHashMap::default(),
            heap: BinaryHeap::new(),
            capacity,
            stamp: 0,
        }
    }

    pub fn get(&self, stored: &PackedSeq, query: &str) -> Option<RawscoreInfo> {
        self.map
            .get(&(stored.clone(), query.to_string()))
            .map(|e| e.info)
    }

    pub fn put(&mut self, stored: &PackedSeq, query: &str, info: RawscoreInfo) {
        if self.capacity == 0 {
            return;
        }
        self.stamp += 1;
        let key = (stored.clone(), query.to_string());
        self.heap
            .push(Reverse((info.raw, self.stamp, key.clone())));
        self.map.insert(
            key,
            RawscoreEntry {
                info,
                stamp: self.stamp,
            },
        );
        while self.map.len() > self.capacity {
            match self.heap.pop() {
                Some(Reverse((_, stamp, key))) => {
                    // Skip stale heap records from overwritten entries.
                    if self.map.get(&key).map(|e| e.stamp) == Some(stamp) {
                        self.map.remove(&key);
                    }
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/* ------------------------------------------------------------------------- */
/*  Arena                                                                    */
/* ------------------------------------------------------------------------- */

/// The three query-time caches, rebuilt together so capacity changes take
/// effect at the next clear.
pub struct QueryCaches {
    pub pattern: PatternCache,
    pub min_score: MinScoreCache,
    pub rawscore: RawscoreCache,
}

impl QueryCaches {
    pub fn new(
        pattern_capacity: usize,
        min_score_capacity: usize,
        rawscore_capacity: usize,
    ) -> QueryCaches {
        QueryCaches {
            pattern: PatternCache::new(pattern_capacity),
            min_score: MinScoreCache::new(min_score_capacity),
            rawscore: RawscoreCache::new(rawscore_capacity),
        }
    }

    /// Drop every cached entry and re-read capacities.
    pub fn clear_and_resize(
        &mut self,
        pattern_capacity: usize,
        min_score_capacity: usize,
        rawscore_capacity: usize,
    ) {
        log::debug!(
            "rebuilding query caches (pattern={}, min_score={}, rawscore={})",
            pattern_capacity,
            min_score_capacity,
            rawscore_capacity
        );
        *self = QueryCaches::new(pattern_capacity, min_score_capacity, rawscore_capacity);
    }
}
