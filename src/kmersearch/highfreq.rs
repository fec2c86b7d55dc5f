use crate::kmersearch::errors::{EngineError, Result};
use crate::kmersearch::store::{Fingerprint, MetadataStore, RelId};
use fxhash::{FxHashMap, FxHashSet};
use std::sync::{Arc, Mutex, OnceLock};

/// Per-process copy of the persisted high-frequency set for one column.
pub struct LocalHighfreqCache {
    pub rel: RelId,
    pub fingerprint: Fingerprint,
    set: FxHashSet<u64>,
}

impl LocalHighfreqCache {
    #[inline]
    pub fn contains(&self, kmer: u64) -> bool {
        self.set.contains(&kmer)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

/// The cross-worker variant: one segment per process tree, attached by
/// every worker that needs it. Values count how often a key was loaded;
/// membership is what matters to callers.
pub struct SharedSegment {
    pub rel: RelId,
    pub fingerprint: Fingerprint,
    map: FxHashMap<u64, u64>,
}

impl SharedSegment {
    #[inline]
    pub fn contains(&self, kmer: u64) -> bool {
        self.map.contains_key(&kmer)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// The one shared segment slot. The first loader populates it; later
/// attachers clone the handle read-only. Invalidation clears the slot and
/// the segment is freed when the last handle drops.
fn shared_slot() -> &'static Mutex<Option<Arc<SharedSegment>>> {
    static SLOT: OnceLock<Mutex<Option<Arc<SharedSegment>>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(None))
}

/// Verify that the current configuration agrees with the stored analysis
/// fingerprint for `rel`, returning that fingerprint.
fn checked_fingerprint(
    store: &MetadataStore,
    current: &Fingerprint,
    rel: &RelId,
) -> Result<Fingerprint> {
    let meta = store
        .analysis_meta(rel)
        .ok_or_else(|| EngineError::MissingMetadata {
            table: rel.table.clone(),
            column: rel.column.clone(),
        })?;
    if !meta.fingerprint.matches(current) {
        return Err(EngineError::ConfigMismatch {
            table: rel.table.clone(),
            column: rel.column.clone(),
            current: current.to_string(),
            stored: meta.fingerprint.to_string(),
        });
    }
    Ok(meta.fingerprint)
}

/// Build the process-local cache by streaming the persisted records in
/// `batch_size` chunks.
pub fn load_local(
    store: &MetadataStore,
    current: &Fingerprint,
    rel: &RelId,
    batch_size: usize,
) -> Result<LocalHighfreqCache> {
    let fingerprint = checked_fingerprint(store, current, rel)?;
    let records = store.highfreq_kmers(rel).unwrap_or(&[]);

    let mut set = FxHashSet::default();
    set.reserve(records.len());
    for batch in records.chunks(batch_size.max(1)) {
        set.extend(batch.iter().copied());
    }
    log::debug!(
        "loaded local high-frequency cache for {}: {} k-mers",
        rel,
        set.len()
    );
    Ok(LocalHighfreqCache {
        rel: rel.clone(),
        fingerprint,
        set,
    })
}

/// Attach to the shared segment, populating it on first use.
///
/// A worker that finds the slot occupied with a different fingerprint must
/// not proceed against it; that state only occurs when an analysis or
/// configuration change raced the worker.
pub fn attach_shared(
    store: &MetadataStore,
    current: &Fingerprint,
    rel: &RelId,
    batch_size: usize,
) -> Result<Arc<SharedSegment>> {
    let mut slot = shared_slot().lock().unwrap();
    if let Some(segment) = slot.as_ref() {
        if segment.rel == *rel && segment.fingerprint.matches(current) {
            return Ok(Arc::clone(segment));
        }
        return Err(EngineError::ConfigMismatch {
            table: rel.table.clone(),
            column: rel.column.clone(),
            current: current.to_string(),
            stored: segment.fingerprint.to_string(),
        });
    }

    let fingerprint = checked_fingerprint(store, current, rel)?;
    let records = store.highfreq_kmers(rel).unwrap_or(&[]);
    let mut map = FxHashMap::default();
    map.reserve(records.len());
    for batch in records.chunks(batch_size.max(1)) {
        for &kmer in batch {
            *map.entry(kmer).or_insert(0) += 1;
        }
    }
    log::debug!(
        "populated shared high-frequency cache for {}: {} k-mers",
        rel,
        map.len()
    );
    let segment = Arc::new(SharedSegment {
        rel: rel.clone(),
        fingerprint,
        map,
    });
    *slot = Some(Arc::clone(&segment));
    Ok(segment)
}

/// Free the shared segment if it belongs to `rel`.
pub fn invalidate_shared(rel: &RelId) {
    let mut slot = shared_slot().lock().unwrap();
    if slot.as_ref().is_some_and(|seg| seg.rel == *rel) {
        log::debug!("invalidating shared high-frequency cache for {}", rel);
        *slot = None;
    }
}

/// Free the shared segment unconditionally. Test support.
pub fn reset_shared() {
    *shared_slot().lock().unwrap() = None;
}

/// The caches one engine context holds on to between queries.
#[derive(Default)]
pub struct HighfreqState {
    pub local: Option<LocalHighfreqCache>,
    pub shared: Option<Arc<SharedSegment>>,
}

/// A loaded view the extractor can test membership against.
pub enum HighfreqView<'a> {
    Local(&'a LocalHighfreqCache),
    Shared(Arc<SharedSegment>),
}

impl HighfreqView<'_> {
    #[inline]
    pub fn contains(&self, kmer: u64) -> bool {
        match self {
            HighfreqView::Local(cache) => cache.contains(kmer),
            HighfreqView::Shared(segment) => segment.contains(kmer),
        }
    }
}

impl HighfreqState {
    /// Lazily load (or re-validate) the cache for `rel` and return a
    /// membership view. A held cache whose fingerprint no longer matches
    /// the current configuration is dropped and reloaded.
    pub fn ensure_loaded(
        &mut self,
        store: &MetadataStore,
        current: &Fingerprint,
        rel: &RelId,
        use_shared: bool,
        batch_size: usize,
    ) -> Result<HighfreqView<'_>> {
        if use_shared {
            let stale = self
                .shared
                .as_ref()
                .map(|seg| seg.rel != *rel || !seg.fingerprint.matches(current))
                .unwrap_or(true);
            if stale {
                // A diverged handle is freed whether or not the reload works.
                self.shared = None;
                self.shared = Some(attach_shared(store, current, rel, batch_size)?);
            }
            Ok(HighfreqView::Shared(Arc::clone(
                self.shared.as_ref().unwrap(),
            )))
        } else {
            let stale = self
                .local
                .as_ref()
                .map(|cache| cache.rel != *rel || !cache.fingerprint.matches(current))
                .unwrap_or(true);
            if stale {
                self.local = None;
                self.local = Some(load_local(store, current, rel, batch_size)?);
            }
            Ok(HighfreqView::Local(self.local.as_ref().unwrap()))
        }
    }

    /// Drop any cached state for `rel`, both the context handles and the
    /// process-wide shared segment.
    pub fn invalidate(&mut self, rel: &RelId) {
        if self.local.as_ref().is_some_and(|c| c.rel == *rel) {
            self.local = None;
        }
        if self.shared.as_ref().is_some_and(|s| s.rel == *rel) {
            self.shared = None;
        }
        invalidate_shared(rel);
    }
}
