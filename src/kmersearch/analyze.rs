use crate::kmersearch::config::EngineContext;
use crate::kmersearch::errors::{EngineError, Result};
use crate::kmersearch::fht::{FhtKind, FileHashTable};
use crate::kmersearch::kmer::extract_distinct_kmers;
use crate::kmersearch::seq::PackedSeq;
use crate::kmersearch::store::{now_epoch_secs, AnalysisMeta, MetadataStore, RelId};
use fxhash::FxHashMap;
use indicatif::ProgressBar;
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Tuning knobs for one analysis run. These mirror host-level resources:
/// requested workers, the in-memory batch size per worker, and the
/// maintenance memory budget the merge phase may use.
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub parallelism: usize,
    pub batch_flush_threshold: usize,
    pub mem_budget_bytes: u64,
}

impl Default for AnalyzeOptions {
    fn default() -> AnalyzeOptions {
        AnalyzeOptions {
            parallelism: 1,
            batch_flush_threshold: 1 << 16,
            mem_budget_bytes: 64 << 20,
        }
    }
}

/// Cooperative cancellation handle; workers poll it between rows and at
/// flush boundaries.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }
}

/// What one analysis run produced.
#[derive(Debug, Clone)]
pub struct AnalysisSummary {
    pub rel: RelId,
    pub total_rows: u64,
    pub distinct_kmers: u64,
    pub highfreq_count: u64,
    pub workers: usize,
    pub elapsed_ms: u64,
}

/// What an undo removed.
#[derive(Debug, Clone)]
pub struct UndoSummary {
    pub rel: RelId,
    pub removed_kmers: u64,
}

/// Raises the store's parallel-mode flag for the worker phase and
/// guarantees it drops again on every exit path.
struct ParallelModeGuard<'a> {
    store: &'a MetadataStore,
}

impl<'a> ParallelModeGuard<'a> {
    fn enter(store: &'a MetadataStore) -> ParallelModeGuard<'a> {
        store.enter_parallel_mode();
        ParallelModeGuard { store }
    }
}

impl Drop for ParallelModeGuard<'_> {
    fn drop(&mut self) {
        self.store.exit_parallel_mode();
    }
}

/// Count, for every distinct k-mer of `rows`, how many rows contain it,
/// then persist the ones crossing the configured thresholds together with
/// the configuration fingerprint.
///
/// Workers operate on disjoint contiguous row ranges and touch nothing
/// but their rows and a private on-disk table under one temporary
/// directory, which also guarantees file cleanup on abort from any cause.
/// All metadata writes happen on the calling thread after the workers have
/// joined and the parallel-mode flag has been cleared.
pub fn perform_highfreq_analysis(
    ctx: &mut EngineContext,
    rel: &RelId,
    rows: &[PackedSeq],
    opts: &AnalyzeOptions,
    cancel: &CancelFlag,
    progress: Option<&ProgressBar>,
) -> Result<AnalysisSummary> {
    let started = Instant::now();
    let k = ctx.config.kmer_size()?;
    let fingerprint = ctx.config.fingerprint()?;

    if rows.is_empty() {
        ctx.store.insert_analysis(
            rel,
            Vec::new(),
            AnalysisMeta {
                fingerprint,
                analyzed_at: now_epoch_secs(),
            },
        )?;
        ctx.highfreq.invalidate(rel);
        ctx.caches.min_score.clear();
        return Ok(AnalysisSummary {
            rel: rel.clone(),
            total_rows: 0,
            distinct_kmers: 0,
            highfreq_count: 0,
            workers: 0,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
    }

    let hardware = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let workers = opts.parallelism.clamp(1, hardware).min(rows.len().max(1));
    let chunk = rows.len().div_ceil(workers).max(1);
    let ranges: Vec<(usize, usize)> = (0..workers)
        .map(|w| (w * chunk, ((w + 1) * chunk).min(rows.len())))
        .filter(|(start, end)| start < end)
        .collect();

    let tmpdir = tempfile::tempdir()
        .map_err(|e| EngineError::io("create temp dir", std::env::temp_dir(), e))?;

    log::info!(
        "analyzing {}: {} rows across {} workers (k={})",
        rel,
        rows.len(),
        ranges.len(),
        workers
    );

    let guard = ParallelModeGuard::enter(&ctx.store);

    let worker_files: Vec<PathBuf> = ranges
        .par_iter()
        .enumerate()
        .map(|(w, &(start, end))| -> Result<PathBuf> {
            let path = tmpdir.path().join(format!("worker_{w}.fht"));
            let expected = ((end - start) as u64).saturating_mul(64);
            let mut table = FileHashTable::create(&path, FhtKind::for_k(k), expected)?;

            let mut batch: FxHashMap<u64, u64> = FxHashMap::default();
            for row in &rows[start..end] {
                cancel.check()?;
                // Presence per row: each distinct k-mer counts once here.
                for kmer in extract_distinct_kmers(row, k)? {
                    *batch.entry(kmer).or_insert(0) += 1;
                }
                if batch.len() >= opts.batch_flush_threshold {
                    cancel.check()?;
                    table.bulk_add(&batch)?;
                    batch.clear();
                }
            }
            if !batch.is_empty() {
                table.bulk_add(&batch)?;
            }
            table.close()?;
            if let Some(pb) = progress {
                pb.inc(1);
            }
            Ok(path)
        })
        .collect::<Result<_>>()?; // first worker error aborts the run

    // Pairwise merge into the first worker's table.
    let mut files = worker_files.into_iter();
    let mut merged = FileHashTable::open(&files.next().expect("at least one worker range"))?;
    for path in files {
        cancel.check()?;
        let src = FileHashTable::open(&path)?;
        merged.merge_from(src, opts.mem_budget_bytes)?;
    }

    let total_rows = rows.len() as u64;
    let rate = ctx.config.max_appearance_rate;
    let nrow = ctx.config.max_appearance_nrow;
    let mut distinct_kmers = 0u64;
    let mut highfreq: Vec<u64> = Vec::new();
    merged.for_each(|kmer, row_count| {
        distinct_kmers += 1;
        if row_count as f64 / total_rows as f64 > rate || (nrow > 0 && row_count > nrow) {
            highfreq.push(kmer);
        }
        Ok(())
    })?;
    let highfreq_count = highfreq.len() as u64;

    // Workers are done; the flag must fall before any metadata write.
    drop(guard);

    ctx.store.insert_analysis(
        rel,
        highfreq,
        AnalysisMeta {
            fingerprint,
            analyzed_at: now_epoch_secs(),
        },
    )?;
    // The previous set (if any) is gone; cached views of it must not survive.
    ctx.highfreq.invalidate(rel);
    ctx.caches.min_score.clear();

    let summary = AnalysisSummary {
        rel: rel.clone(),
        total_rows,
        distinct_kmers,
        highfreq_count,
        workers: ranges.len(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    log::info!(
        "analysis of {} done: {} distinct k-mers, {} high-frequency, {} ms",
        summary.rel,
        summary.distinct_kmers,
        summary.highfreq_count,
        summary.elapsed_ms
    );
    Ok(summary)
}

/// Delete the high-frequency records and fingerprint for `rel` and
/// invalidate every cache that was loaded from them.
pub fn undo_highfreq_analysis(ctx: &mut EngineContext, rel: &RelId) -> Result<UndoSummary> {
    let removed = ctx.store.remove_analysis(rel)?;
    ctx.highfreq.invalidate(rel);
    ctx.caches.min_score.clear();
    log::info!("removed analysis of {}: {} high-frequency k-mers", rel, removed);
    Ok(UndoSummary {
        rel: rel.clone(),
        removed_kmers: removed as u64,
    })
}
