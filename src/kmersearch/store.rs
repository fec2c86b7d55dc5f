use crate::kmersearch::errors::{EngineError, Result};
use fxhash::FxHashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A corpus column: the unit an analysis or index is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelId {
    pub table: String,
    pub column: String,
}

impl RelId {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> RelId {
        RelId {
            table: table.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for RelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// The configuration tuple identifying a compatible analysis/index state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fingerprint {
    pub kmer_size: u8,
    pub occur_bits: u8,
    pub max_appearance_rate: f64,
    pub max_appearance_nrow: u64,
}

impl Fingerprint {
    /// Absolute tolerance when comparing the appearance-rate field; the
    /// other fields compare exactly.
    pub const RATE_TOLERANCE: f64 = 1e-4;

    pub fn matches(&self, other: &Fingerprint) -> bool {
        self.kmer_size == other.kmer_size
            && self.occur_bits == other.occur_bits
            && self.max_appearance_nrow == other.max_appearance_nrow
            && (self.max_appearance_rate - other.max_appearance_rate).abs()
                <= Self::RATE_TOLERANCE
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "k={} occur_bits={} rate={} nrow={}",
            self.kmer_size, self.occur_bits, self.max_appearance_rate, self.max_appearance_nrow
        )
    }
}

/// One analysis record per (table, column): the fingerprint it was run
/// with and when.
#[derive(Debug, Clone)]
pub struct AnalysisMeta {
    pub fingerprint: Fingerprint,
    pub analyzed_at: u64,
}

/// Build-time record of a persisted index, written when the index is
/// created and removed when it is dropped.
#[derive(Debug, Clone)]
pub struct IndexMeta {
    pub index_id: String,
    pub rel: RelId,
    pub fingerprint: Fingerprint,
    pub preclude_highfreq: bool,
    pub created_at: u64,
}

pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The three persisted metadata collections.
///
/// Mutations are rejected while the parallel-mode flag is raised: the
/// analysis leader must clear it after workers join and before it commits
/// results. TSV save/load lets a later process pick the collections up.
#[derive(Default)]
pub struct MetadataStore {
    highfreq: FxHashMap<RelId, Vec<u64>>,
    analysis: FxHashMap<RelId, AnalysisMeta>,
    indexes: FxHashMap<String, IndexMeta>,
    parallel_mode: AtomicBool,
}

impl MetadataStore {
    pub fn new() -> MetadataStore {
        MetadataStore::default()
    }

    /* ---- parallel-mode guard ------------------------------------------ */

    pub fn enter_parallel_mode(&self) {
        self.parallel_mode.store(true, Ordering::SeqCst);
    }

    pub fn exit_parallel_mode(&self) {
        self.parallel_mode.store(false, Ordering::SeqCst);
    }

    pub fn in_parallel_mode(&self) -> bool {
        self.parallel_mode.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<()> {
        if self.in_parallel_mode() {
            return Err(EngineError::ParallelModeActive);
        }
        Ok(())
    }

    /* ---- analysis records --------------------------------------------- */

    /// Store the high-frequency set and its fingerprint as one logical
    /// transaction; a previous analysis for the same column is replaced.
    pub fn insert_analysis(
        &mut self,
        rel: &RelId,
        mut kmers: Vec<u64>,
        meta: AnalysisMeta,
    ) -> Result<()> {
        self.check_writable()?;
        kmers.sort_unstable();
        kmers.dedup();
        self.highfreq.insert(rel.clone(), kmers);
        self.analysis.insert(rel.clone(), meta);
        Ok(())
    }

    /// Delete the high-frequency records and the fingerprint for `rel`,
    /// returning how many k-mer records were removed.
    pub fn remove_analysis(&mut self, rel: &RelId) -> Result<usize> {
        self.check_writable()?;
        if self.analysis.remove(rel).is_none() {
            return Err(EngineError::MissingMetadata {
                table: rel.table.clone(),
                column: rel.column.clone(),
            });
        }
        Ok(self.highfreq.remove(rel).map(|v| v.len()).unwrap_or(0))
    }

    pub fn analysis_meta(&self, rel: &RelId) -> Option<&AnalysisMeta> {
        self.analysis.get(rel)
    }

    /// Sorted high-frequency k-mer values for `rel`; empty when an
    /// analysis exists but found nothing high-frequency.
    pub fn highfreq_kmers(&self, rel: &RelId) -> Option<&[u64]> {
        self.highfreq.get(rel).map(|v| v.as_slice())
    }

    /* ---- index records ------------------------------------------------ */

    pub fn insert_index(&mut self, meta: IndexMeta) -> Result<()> {
        self.check_writable()?;
        self.indexes.insert(meta.index_id.clone(), meta);
        Ok(())
    }

    pub fn remove_index(&mut self, index_id: &str) -> Result<Option<IndexMeta>> {
        self.check_writable()?;
        Ok(self.indexes.remove(index_id))
    }

    pub fn index_meta(&self, index_id: &str) -> Option<&IndexMeta> {
        self.indexes.get(index_id)
    }

    /// All index records on `rel`, sorted by index id for determinism.
    pub fn indexes_for(&self, rel: &RelId) -> Vec<&IndexMeta> {
        let mut out: Vec<&IndexMeta> = self.indexes.values().filter(|m| &m.rel == rel).collect();
        out.sort_unstable_by(|a, b| a.index_id.cmp(&b.index_id));
        out
    }

    /* ---- persistence -------------------------------------------------- */

    /// Write the three collections as TSV files under `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| EngineError::io("create dir", dir, e))?;

        let path = dir.join("highfreq_kmer.tsv");
        let mut w = BufWriter::new(
            File::create(&path).map_err(|e| EngineError::io("create", &path, e))?,
        );
        for (rel, kmers) in sorted_by_rel(&self.highfreq) {
            for kmer in kmers {
                writeln!(w, "{}\t{}\t{}", rel.table, rel.column, kmer)
                    .map_err(|e| EngineError::io("write", &path, e))?;
            }
        }
        w.flush().map_err(|e| EngineError::io("flush", &path, e))?;

        let path = dir.join("highfreq_kmer_meta.tsv");
        let mut w = BufWriter::new(
            File::create(&path).map_err(|e| EngineError::io("create", &path, e))?,
        );
        for (rel, meta) in sorted_by_rel(&self.analysis) {
            let fp = &meta.fingerprint;
            writeln!(
                w,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                rel.table,
                rel.column,
                fp.kmer_size,
                fp.occur_bits,
                fp.max_appearance_rate,
                fp.max_appearance_nrow,
                meta.analyzed_at
            )
            .map_err(|e| EngineError::io("write", &path, e))?;
        }
        w.flush().map_err(|e| EngineError::io("flush", &path, e))?;

        let path = dir.join("gin_index_meta.tsv");
        let mut w = BufWriter::new(
            File::create(&path).map_err(|e| EngineError::io("create", &path, e))?,
        );
        let mut indexes: Vec<&IndexMeta> = self.indexes.values().collect();
        indexes.sort_unstable_by(|a, b| a.index_id.cmp(&b.index_id));
        for meta in indexes {
            let fp = &meta.fingerprint;
            writeln!(
                w,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                meta.index_id,
                meta.rel.table,
                meta.rel.column,
                fp.kmer_size,
                fp.occur_bits,
                fp.max_appearance_rate,
                fp.max_appearance_nrow,
                meta.preclude_highfreq,
                meta.created_at
            )
            .map_err(|e| EngineError::io("write", &path, e))?;
        }
        w.flush().map_err(|e| EngineError::io("flush", &path, e))
    }

    /// Load collections previously written by [`MetadataStore::save`].
    /// Missing files load as empty collections.
    pub fn load(dir: &Path) -> Result<MetadataStore> {
        let mut store = MetadataStore::new();

        let path = dir.join("highfreq_kmer.tsv");
        for fields in read_tsv(&path)? {
            if fields.len() != 3 {
                continue; // malformed line
            }
            let rel = RelId::new(fields[0].clone(), fields[1].clone());
            let kmer = parse_field(&path, &fields[2])?;
            store.highfreq.entry(rel).or_default().push(kmer);
        }
        for kmers in store.highfreq.values_mut() {
            kmers.sort_unstable();
            kmers.dedup();
        }

        let path = dir.join("highfreq_kmer_meta.tsv");
        for fields in read_tsv(&path)? {
            if fields.len() != 7 {
                continue;
            }
            let rel = RelId::new(fields[0].clone(), fields[1].clone());
            let meta = AnalysisMeta {
                fingerprint: Fingerprint {
                    kmer_size: parse_field(&path, &fields[2])?,
                    occur_bits: parse_field(&path, &fields[3])?,
                    max_appearance_rate: parse_field(&path, &fields[4])?,
                    max_appearance_nrow: parse_field(&path, &fields[5])?,
                },
                analyzed_at: parse_field(&path, &fields[6])?,
            };
            store.analysis.insert(rel, meta);
        }

        let path = dir.join("gin_index_meta.tsv");
        for fields in read_tsv(&path)? {
            if fields.len() != 9 {
                continue;
            }
            let meta = IndexMeta {
                index_id: fields[0].clone(),
                rel: RelId::new(fields[1].clone(), fields[2].clone()),
                fingerprint: Fingerprint {
                    kmer_size: parse_field(&path, &fields[3])?,
                    occur_bits: parse_field(&path, &fields[4])?,
                    max_appearance_rate: parse_field(&path, &fields[5])?,
                    max_appearance_nrow: parse_field(&path, &fields[6])?,
                },
                preclude_highfreq: parse_field(&path, &fields[7])?,
                created_at: parse_field(&path, &fields[8])?,
            };
            store.indexes.insert(meta.index_id.clone(), meta);
        }

        Ok(store)
    }
}

fn sorted_by_rel<V>(map: &FxHashMap<RelId, V>) -> Vec<(&RelId, &V)> {
    let mut out: Vec<(&RelId, &V)> = map.iter().collect();
    out.sort_unstable_by(|a, b| (&a.0.table, &a.0.column).cmp(&(&b.0.table, &b.0.column)));
    out
}

/// Read a TSV file into per-line field vectors, skipping blank lines and
/// `#` comments. A missing file reads as empty.
fn read_tsv(path: &Path) -> Result<Vec<Vec<String>>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(EngineError::io("read", path, e)),
    };
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.split('\t').map(String::from).collect())
        .collect())
}

fn parse_field<T: std::str::FromStr>(path: &Path, field: &str) -> Result<T> {
    field.parse().map_err(|_| EngineError::InvalidInput {
        reason: format!("malformed metadata field {:?} in {}", field, path.display()),
    })
}
