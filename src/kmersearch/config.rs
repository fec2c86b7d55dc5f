use crate::kmersearch::errors::{EngineError, Result};
use crate::kmersearch::highfreq::HighfreqState;
use crate::kmersearch::kmer::{MAX_KMER_SIZE, MAX_OCCUR_BITS, MIN_KMER_SIZE};
use crate::kmersearch::qcache::QueryCaches;
use crate::kmersearch::store::{Fingerprint, MetadataStore};

/// The engine's configuration variables.
///
/// `kmer_size` has no default and must be set before any index operation;
/// everything else carries the documented default.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// k, in 4..=32
    pub kmer_size: Option<u8>,
    /// bits reserved for the occurrence ordinal in packed keys, 0..=16
    pub occur_bitlen: u8,
    /// high-frequency threshold as a fraction of rows, 0..=1
    pub max_appearance_rate: f64,
    /// high-frequency threshold as an absolute row count; 0 disables
    pub max_appearance_nrow: u64,
    /// baseline for the adjusted minimum score
    pub min_score: u32,
    /// filter high-frequency k-mers out of extraction
    pub preclude_highfreq_kmer: bool,
    /// use the shared high-frequency cache variant
    pub force_use_parallel_highfreq_kmer_cache: bool,
    pub rawscore_cache_max_entries: usize,
    pub query_pattern_cache_max_entries: usize,
    pub actual_min_score_cache_max_entries: usize,
    pub highfreq_kmer_cache_load_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            kmer_size: None,
            occur_bitlen: 8,
            max_appearance_rate: 0.05,
            max_appearance_nrow: 0,
            min_score: 1,
            preclude_highfreq_kmer: false,
            force_use_parallel_highfreq_kmer_cache: false,
            rawscore_cache_max_entries: 4096,
            query_pattern_cache_max_entries: 4096,
            actual_min_score_cache_max_entries: 4096,
            highfreq_kmer_cache_load_batch_size: 4096,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(k) = self.kmer_size {
            if !(MIN_KMER_SIZE..=MAX_KMER_SIZE).contains(&k) {
                return Err(EngineError::KmerSizeOutOfRange { k: k as u32 });
            }
        }
        if self.occur_bitlen > MAX_OCCUR_BITS {
            return Err(EngineError::InvalidInput {
                reason: format!(
                    "occur_bitlen {} out of range, must be in 0..=16",
                    self.occur_bitlen
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.max_appearance_rate) {
            return Err(EngineError::InvalidInput {
                reason: format!(
                    "max_appearance_rate {} out of range, must be in 0..=1",
                    self.max_appearance_rate
                ),
            });
        }
        if self.highfreq_kmer_cache_load_batch_size == 0 {
            return Err(EngineError::InvalidInput {
                reason: "highfreq_kmer_cache_load_batch_size must be positive".into(),
            });
        }
        Ok(())
    }

    /// The configured k, required for every extraction and index path.
    pub fn kmer_size(&self) -> Result<u8> {
        self.kmer_size.ok_or_else(|| EngineError::InvalidInput {
            reason: "kmer_size is not set; it is required before any index operation".into(),
        })
    }

    /// Current-configuration fingerprint, compared against persisted
    /// analysis and index fingerprints.
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        Ok(Fingerprint {
            kmer_size: self.kmer_size()?,
            occur_bits: self.occur_bitlen,
            max_appearance_rate: self.max_appearance_rate,
            max_appearance_nrow: self.max_appearance_nrow,
        })
    }

    /// Preclusion requires the shared cache variant before an index build
    /// may proceed.
    pub fn check_preclude_preconditions(&self) -> Result<()> {
        if self.preclude_highfreq_kmer && !self.force_use_parallel_highfreq_kmer_cache {
            return Err(EngineError::SharedCacheRequired);
        }
        Ok(())
    }
}

/// Process-wide engine state: configuration, the metadata store handle,
/// the query caches, and the high-frequency cache slots.
///
/// Every top-level operation takes the context explicitly; dropping it
/// releases the cache handles it holds.
pub struct EngineContext {
    pub config: EngineConfig,
    pub store: MetadataStore,
    pub caches: QueryCaches,
    pub highfreq: HighfreqState,
}

impl EngineContext {
    pub fn new(config: EngineConfig) -> Result<EngineContext> {
        EngineContext::with_store(config, MetadataStore::new())
    }

    /// Build a context over an existing store, e.g. one loaded from a
    /// metadata directory.
    pub fn with_store(config: EngineConfig, store: MetadataStore) -> Result<EngineContext> {
        config.validate()?;
        let caches = QueryCaches::new(
            config.query_pattern_cache_max_entries,
            config.actual_min_score_cache_max_entries,
            config.rawscore_cache_max_entries,
        );
        Ok(EngineContext {
            config,
            store,
            caches,
            highfreq: HighfreqState::default(),
        })
    }

    /// Apply a configuration change: validate, swap it in, and rebuild the
    /// query caches so the new capacities take effect.
    pub fn reconfigure(&mut self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        self.caches.clear_and_resize(
            config.query_pattern_cache_max_entries,
            config.actual_min_score_cache_max_entries,
            config.rawscore_cache_max_entries,
        );
        self.config = config;
        Ok(())
    }
}
