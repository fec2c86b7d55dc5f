use crate::kmersearch::config::EngineContext;
use crate::kmersearch::errors::Result;
use crate::kmersearch::highfreq::HighfreqView;
use crate::kmersearch::kmer::{extract_posting_keys, ExtractParams, PostingKey};
use crate::kmersearch::qcache::hash_posting_keys;
use crate::kmersearch::score::rawscore;
use crate::kmersearch::seq::{self, Alphabet, PackedSeq};
use crate::kmersearch::store::{now_epoch_secs, IndexMeta, RelId};
use fxhash::FxHashMap;
use std::cmp::Ordering;

/// Posting-key ordering used by the access method: shorter keys sort
/// first, equal lengths compare by byte contents.
pub fn compare_partial(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Extracted query keys plus how many raw keys were high-frequency; the
/// latter feeds the adjusted minimum score whether or not the keys were
/// filtered out.
#[derive(Debug, Clone)]
pub struct QueryKeys {
    pub keys: Vec<PostingKey>,
    pub highfreq_hits: u32,
}

fn highfreq_view<'a>(ctx: &'a mut EngineContext, rel: &RelId) -> Result<HighfreqView<'a>> {
    let fingerprint = ctx.config.fingerprint()?;
    ctx.highfreq.ensure_loaded(
        &ctx.store,
        &fingerprint,
        rel,
        ctx.config.force_use_parallel_highfreq_kmer_cache,
        ctx.config.highfreq_kmer_cache_load_batch_size,
    )
}

/// Posting keys of one stored value, for insertion into posting lists.
///
/// With `preclude` set, keys whose k-mer value is high-frequency for `rel`
/// are dropped; the shared cache variant is required in that mode.
pub fn extract_index_keys(
    ctx: &mut EngineContext,
    rel: &RelId,
    packed: &PackedSeq,
    preclude: bool,
) -> Result<Vec<PostingKey>> {
    let params = ExtractParams {
        k: ctx.config.kmer_size()?,
        occur_bits: ctx.config.occur_bitlen,
    };
    let keys = extract_posting_keys(packed, &params)?;
    if !preclude {
        return Ok(keys);
    }
    ctx.config.check_preclude_preconditions()?;
    let view = highfreq_view(ctx, rel)?;
    Ok(keys
        .into_iter()
        .filter(|key| !view.contains(key.kmer))
        .collect())
}

/// Posting keys of a text query, through the pattern cache.
///
/// The cache stores the unfiltered extraction keyed by (query, k);
/// high-frequency filtering and counting happen on the way out, so one
/// cached entry serves both precluding and non-precluding callers.
pub fn extract_query_keys(
    ctx: &mut EngineContext,
    rel: &RelId,
    query: &str,
    alphabet: Alphabet,
    preclude: bool,
) -> Result<QueryKeys> {
    let k = ctx.config.kmer_size()?;
    let params = ExtractParams {
        k,
        occur_bits: ctx.config.occur_bitlen,
    };

    let cached: Option<Vec<PostingKey>> = ctx.caches.pattern.get(query, k).map(<[_]>::to_vec);
    let raw: Vec<PostingKey> = match cached {
        Some(keys) => keys,
        None => {
            let query_seq = seq::encode(alphabet, query)?;
            let keys = extract_posting_keys(&query_seq, &params)?;
            ctx.caches.pattern.put(query, k, keys.clone());
            keys
        }
    };

    if preclude {
        ctx.config.check_preclude_preconditions()?;
    }
    // Without an analysis there is no high-frequency set to consult; that
    // is only an error when preclusion was asked for.
    if ctx.store.analysis_meta(rel).is_none() {
        if preclude {
            highfreq_view(ctx, rel)?; // surfaces MissingMetadata
        }
        return Ok(QueryKeys {
            keys: raw,
            highfreq_hits: 0,
        });
    }

    let view = highfreq_view(ctx, rel)?;
    let highfreq_hits = raw.iter().filter(|key| view.contains(key.kmer)).count() as u32;
    let keys = if preclude {
        raw.into_iter()
            .filter(|key| !view.contains(key.kmer))
            .collect()
    } else {
        raw
    };
    Ok(QueryKeys {
        keys,
        highfreq_hits,
    })
}

/// `max(0, min_score − high-frequency query keys)`, cached by the hash of
/// the filtered key array.
pub fn adjusted_min_score(ctx: &mut EngineContext, query_keys: &QueryKeys) -> u32 {
    let keys_hash = hash_posting_keys(&query_keys.keys);
    if let Some(score) = ctx.caches.min_score.get(keys_hash) {
        return score;
    }
    let score = ctx.config.min_score.saturating_sub(query_keys.highfreq_hits);
    ctx.caches.min_score.put(keys_hash, score);
    score
}

/// Whether a candidate's per-key match bitmap satisfies the adjusted
/// minimum score.
///
/// The second flag always demands a recheck: posting-list agreement is
/// necessary but not sufficient, so the host must re-verify the candidate
/// against the exact raw score.
pub fn consistent(ctx: &mut EngineContext, matches: &[bool], query_keys: &QueryKeys) -> (bool, bool) {
    let hit_count = matches.iter().filter(|&&m| m).count() as u32;
    (hit_count >= adjusted_min_score(ctx, query_keys), true)
}

/* ------------------------------------------------------------------------- */
/*  In-memory inverted index                                                 */
/* ------------------------------------------------------------------------- */

/// One ranked match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub row: usize,
    pub rawscore: u32,
}

/// An inverted index over one column of packed sequences.
///
/// Rows stay owned by the caller; the index holds posting lists from
/// posting key to row ids, mirroring what the host access method stores.
pub struct MemIndex {
    pub meta: IndexMeta,
    postings: FxHashMap<PostingKey, Vec<u32>>,
}

impl MemIndex {
    /// Index `rows`, registering build metadata with the store.
    pub fn build(
        ctx: &mut EngineContext,
        index_id: &str,
        rel: &RelId,
        rows: &[PackedSeq],
    ) -> Result<MemIndex> {
        ctx.config.check_preclude_preconditions()?;
        let preclude = ctx.config.preclude_highfreq_kmer;
        let meta = IndexMeta {
            index_id: index_id.to_string(),
            rel: rel.clone(),
            fingerprint: ctx.config.fingerprint()?,
            preclude_highfreq: preclude,
            created_at: now_epoch_secs(),
        };

        let mut postings: FxHashMap<PostingKey, Vec<u32>> = FxHashMap::default();
        for (row, packed) in rows.iter().enumerate() {
            for key in extract_index_keys(ctx, rel, packed, preclude)? {
                postings.entry(key).or_default().push(row as u32);
            }
        }
        ctx.store.insert_index(meta.clone())?;
        log::info!(
            "built index {} on {}: {} posting keys over {} rows",
            index_id,
            rel,
            postings.len(),
            rows.len()
        );
        Ok(MemIndex { meta, postings })
    }

    /// Drop the index and its build metadata.
    pub fn drop_index(self, ctx: &mut EngineContext) -> Result<()> {
        ctx.store.remove_index(&self.meta.index_id)?;
        Ok(())
    }

    pub fn posting_count(&self) -> usize {
        self.postings.len()
    }

    /// Rows whose posting lists may satisfy `query`, verified against the
    /// exact raw score and ranked by it (ties break on row id).
    pub fn search(
        &self,
        ctx: &mut EngineContext,
        rows: &[PackedSeq],
        query: &str,
    ) -> Result<Vec<SearchHit>> {
        let query_keys = extract_query_keys(
            ctx,
            &self.meta.rel,
            query,
            Alphabet::Dna4,
            self.meta.preclude_highfreq,
        )?;

        // Per-candidate bitmap of which query keys matched a posting list.
        let mut candidates: FxHashMap<u32, Vec<bool>> = FxHashMap::default();
        for (i, key) in query_keys.keys.iter().enumerate() {
            if let Some(posting_rows) = self.postings.get(key) {
                for &row in posting_rows {
                    candidates
                        .entry(row)
                        .or_insert_with(|| vec![false; query_keys.keys.len()])[i] = true;
                }
            }
        }

        let mut hits = Vec::new();
        for (row, matches) in candidates {
            let (ok, recheck) = consistent(ctx, &matches, &query_keys);
            if !ok {
                continue;
            }
            debug_assert!(recheck);
            let score = rawscore(ctx, &rows[row as usize], query)?;
            if score >= ctx.config.min_score {
                hits.push(SearchHit {
                    row: row as usize,
                    rawscore: score,
                });
            }
        }
        hits.sort_unstable_by(|a, b| b.rawscore.cmp(&a.rawscore).then(a.row.cmp(&b.row)));
        Ok(hits)
    }
}
