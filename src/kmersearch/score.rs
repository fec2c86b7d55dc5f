use crate::kmersearch::config::EngineContext;
use crate::kmersearch::errors::Result;
use crate::kmersearch::kmer::{extract_posting_keys, ExtractParams, PostingKey};
use crate::kmersearch::qcache::RawscoreInfo;
use crate::kmersearch::seq::{self, Alphabet, PackedSeq};
use crate::kmersearch::store::RelId;
use fxhash::FxHashSet;

/// Below this stored×query key-pair product a nested loop beats building
/// a hash set.
const NESTED_LOOP_LIMIT: u64 = 100;

/// Count how many query keys match a stored key, with multiplicity bounded
/// by the occurrence ordinal: a k-mer occurring r times on each side
/// contributes `min(r_stored, r_query)`, not 1.
fn shared_key_count(stored_keys: &[PostingKey], query_keys: &[PostingKey]) -> u32 {
    if stored_keys.len() as u64 * (query_keys.len() as u64) < NESTED_LOOP_LIMIT {
        let mut hits = 0u32;
        for qk in query_keys {
            if stored_keys.contains(qk) {
                hits += 1;
            }
        }
        hits
    } else {
        let stored: FxHashSet<&PostingKey> = stored_keys.iter().collect();
        query_keys.iter().filter(|qk| stored.contains(qk)).count() as u32
    }
}

/// Exact raw score plus both key counts, going through the rawscore cache.
///
/// Both sides are extracted without high-frequency filtering. The stored
/// side follows its own alphabet; the query side is text and is encoded as
/// DNA4 so degenerate letters always expand.
pub fn rawscore_info(
    ctx: &mut EngineContext,
    stored: &PackedSeq,
    query: &str,
) -> Result<RawscoreInfo> {
    if let Some(info) = ctx.caches.rawscore.get(stored, query) {
        return Ok(info);
    }

    let params = ExtractParams {
        k: ctx.config.kmer_size()?,
        occur_bits: ctx.config.occur_bitlen,
    };
    let stored_keys = extract_posting_keys(stored, &params)?;
    let query_seq = seq::encode(Alphabet::Dna4, query)?;
    let query_keys = extract_posting_keys(&query_seq, &params)?;

    let info = RawscoreInfo {
        raw: shared_key_count(&stored_keys, &query_keys),
        stored_key_count: stored_keys.len() as u32,
        query_key_count: query_keys.len() as u32,
    };
    ctx.caches.rawscore.put(stored, query, info);
    Ok(info)
}

/// Number of k-mer occurrences shared between a stored sequence and a
/// query string.
pub fn rawscore(ctx: &mut EngineContext, stored: &PackedSeq, query: &str) -> Result<u32> {
    Ok(rawscore_info(ctx, stored, query)?.raw)
}

/// Raw score plus the count of mutual high-frequency k-mer values,
/// compensating for postings the index build excluded by preclusion.
///
/// Without an analysis for `rel` there is no high-frequency set and the
/// corrected score equals the raw score.
pub fn correctedscore(
    ctx: &mut EngineContext,
    rel: &RelId,
    stored: &PackedSeq,
    query: &str,
) -> Result<u32> {
    let raw = rawscore(ctx, stored, query)?;
    if ctx.store.analysis_meta(rel).is_none() {
        return Ok(raw);
    }

    let fingerprint = ctx.config.fingerprint()?;
    let view = ctx.highfreq.ensure_loaded(
        &ctx.store,
        &fingerprint,
        rel,
        ctx.config.force_use_parallel_highfreq_kmer_cache,
        ctx.config.highfreq_kmer_cache_load_batch_size,
    )?;

    let params = ExtractParams {
        k: ctx.config.kmer_size()?,
        occur_bits: ctx.config.occur_bitlen,
    };
    let stored_values: FxHashSet<u64> = extract_posting_keys(stored, &params)?
        .into_iter()
        .map(|key| key.kmer)
        .collect();
    let query_seq = seq::encode(Alphabet::Dna4, query)?;
    let mutual_highfreq = extract_posting_keys(&query_seq, &params)?
        .into_iter()
        .map(|key| key.kmer)
        .collect::<FxHashSet<u64>>()
        .into_iter()
        .filter(|&kmer| stored_values.contains(&kmer) && view.contains(kmer))
        .count() as u32;

    Ok(raw + mutual_highfreq)
}
