use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
/// Errors surfaced by the engine core.
///
/// Cache overflow is handled by eviction and is deliberately not an error.
pub enum EngineError {
    #[error("invalid input: {reason}")]
    /// Malformed sequence text or an out-of-range parameter
    InvalidInput {
        /// what was wrong with the input
        reason: String,
    },

    #[error("invalid {alphabet} character {chr:?} at position {position}")]
    /// A character outside the selected alphabet
    InvalidCharacter {
        /// alphabet name ("DNA2" or "DNA4")
        alphabet: &'static str,
        chr: char,
        position: usize,
    },

    #[error("k-mer size {k} out of range, must be in 4..=32")]
    /// k outside the supported window range
    KmerSizeOutOfRange { k: u32 },

    #[error(
        "configuration does not match stored fingerprint for {table}.{column}: \
         current {current}, stored {stored}"
    )]
    /// Query-time configuration disagrees with an index or cache fingerprint
    ConfigMismatch {
        table: String,
        column: String,
        current: String,
        stored: String,
    },

    #[error(
        "no high-frequency analysis found for {table}.{column}; \
         run the analysis before enabling high-frequency preclusion"
    )]
    /// Preclusion requested but no analysis record exists
    MissingMetadata { table: String, column: String },

    #[error("{op} failed on {path}: {source}")]
    /// I/O failure on a file-backed hash table or metadata file
    ResourceExhausted {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupted hash table file {path}: {detail}")]
    /// Bad magic or version in a persisted file; the file should be removed
    Corruption { path: PathBuf, detail: String },

    #[error("analysis cancelled")]
    /// Cooperative cancellation observed during a parallel analysis
    Cancelled,

    #[error("metadata writes are rejected while parallel workers are active")]
    /// A host-level mutation was attempted before parallel mode was cleared
    ParallelModeActive,

    #[error(
        "preclude_highfreq_kmer requires force_use_parallel_highfreq_kmer_cache \
         before an index can be built"
    )]
    /// Precondition between the preclusion and shared-cache settings
    SharedCacheRequired,
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Wrap an I/O error with the operation name and offending path.
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::ResourceExhausted {
            op,
            path: path.into(),
            source,
        }
    }
}
