use crate::kmersearch::config::EngineConfig;
use clap::{value_parser, Args};
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct CorpusArgs {
    /// Corpus file with one sequence per line [path]
    #[clap(
        short = 'i',
        long,
        value_parser,
        required = true,
        help_heading = "Core"
    )]
    pub input: PathBuf,

    /// Logical table name used in metadata records [string]
    #[clap(long, default_value = "corpus", help_heading = "Core")]
    pub table: String,

    /// Logical column name used in metadata records [string]
    #[clap(long, default_value = "seq", help_heading = "Core")]
    pub column: String,
}

#[derive(Debug, Args)]
pub struct MetaDirArgs {
    /// Directory for the persisted metadata tables [path]
    ///
    /// Written by `analyze`, read by `search`, `undo` and
    /// `correctedscore`. Omitting it keeps all metadata in memory for
    /// the duration of the run.
    #[clap(short = 'm', long, value_parser, help_heading = "Core")]
    pub meta_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct EngineArgs {
    /// K-mer window size [integer]
    #[clap(short = 'k', long, value_parser = value_parser!(u8).range(4..=32), required = true, help_heading = "Engine")]
    pub kmer_size: u8,

    /// Bits reserved for the occurrence ordinal in posting keys [integer]
    #[clap(long, default_value = "8", value_parser = value_parser!(u8).range(0..=16), help_heading = "Engine")]
    pub occur_bitlen: u8,

    /// High-frequency threshold as a fraction of rows [real]
    #[clap(long, default_value = "0.05", help_heading = "Engine")]
    pub max_appearance_rate: f64,

    /// High-frequency threshold as an absolute row count; 0 disables [integer]
    #[clap(long, default_value = "0", help_heading = "Engine")]
    pub max_appearance_nrow: u64,

    /// Minimum shared-k-mer count for a row to match [integer]
    #[clap(long, default_value = "1", help_heading = "Engine")]
    pub min_score: u32,

    /// Exclude high-frequency k-mers from posting lists [flag]
    ///
    /// Requires the shared high-frequency cache and a prior `analyze`.
    #[clap(long, help_heading = "Engine")]
    pub preclude_highfreq_kmer: bool,

    /// Use the shared high-frequency cache variant [flag]
    #[clap(long, help_heading = "Engine")]
    pub force_parallel_highfreq_cache: bool,

    /// Rawscore cache capacity [integer]
    #[clap(long, default_value = "4096", help_heading = "Caches")]
    pub rawscore_cache_max_entries: usize,

    /// Query pattern cache capacity [integer]
    #[clap(long, default_value = "4096", help_heading = "Caches")]
    pub query_pattern_cache_max_entries: usize,

    /// Adjusted-min-score cache capacity [integer]
    #[clap(long, default_value = "4096", help_heading = "Caches")]
    pub actual_min_score_cache_max_entries: usize,

    /// Rows per batch when loading the high-frequency set [integer]
    #[clap(long, default_value = "4096", value_parser = value_parser!(u32).range(1..), help_heading = "Caches")]
    pub highfreq_cache_load_batch_size: u32,
}

impl EngineArgs {
    pub fn to_config(&self) -> EngineConfig {
        EngineConfig {
            kmer_size: Some(self.kmer_size),
            occur_bitlen: self.occur_bitlen,
            max_appearance_rate: self.max_appearance_rate,
            max_appearance_nrow: self.max_appearance_nrow,
            min_score: self.min_score,
            preclude_highfreq_kmer: self.preclude_highfreq_kmer,
            force_use_parallel_highfreq_kmer_cache: self.force_parallel_highfreq_cache,
            rawscore_cache_max_entries: self.rawscore_cache_max_entries,
            query_pattern_cache_max_entries: self.query_pattern_cache_max_entries,
            actual_min_score_cache_max_entries: self.actual_min_score_cache_max_entries,
            highfreq_kmer_cache_load_batch_size: self.highfreq_cache_load_batch_size as usize,
        }
    }
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Number of analysis workers (increases RAM usage) [integer]
    #[clap(short = 't', long, default_value = "1", help_heading = "Analysis")]
    pub n_threads: usize,

    /// In-memory batch entries per worker before spilling to disk [integer]
    #[clap(long, default_value = "65536", help_heading = "Analysis")]
    pub batch_flush_threshold: usize,

    /// Memory budget for merging worker tables (MiB) [integer]
    #[clap(long, default_value = "64", help_heading = "Analysis")]
    pub merge_mem_mib: u64,
}
