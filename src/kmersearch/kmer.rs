use crate::kmersearch::errors::{EngineError, Result};
use crate::kmersearch::seq::{Alphabet, PackedSeq};
use fxhash::FxHashSet;
use smallvec::SmallVec;

pub const MIN_KMER_SIZE: u8 = 4;
pub const MAX_KMER_SIZE: u8 = 32;
pub const MAX_OCCUR_BITS: u8 = 16;

/// A degenerate window expands into at most this many concrete k-mers;
/// windows whose combinatorial product exceeds it are skipped whole.
pub const MAX_EXPANSION: u32 = 10;

/// A k-mer in the narrowest native integer that holds its 2k bits,
/// first base in the most significant pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KmerInt {
    U16(u16),
    U32(u32),
    U64(u64),
}

impl KmerInt {
    /// Wrap `value` in the width dictated by `k` (16/32/64 bits for
    /// k ≤ 8/16/32).
    #[inline]
    pub fn for_k(k: u8, value: u64) -> KmerInt {
        if k <= 8 {
            KmerInt::U16(value as u16)
        } else if k <= 16 {
            KmerInt::U32(value as u32)
        } else {
            KmerInt::U64(value)
        }
    }

    /// The k-mer bits promoted to `u64`; this is also the hash form.
    #[inline]
    pub fn value(self) -> u64 {
        match self {
            KmerInt::U16(v) => v as u64,
            KmerInt::U32(v) => v as u64,
            KmerInt::U64(v) => v,
        }
    }

    #[inline]
    pub fn width_bits(self) -> u32 {
        match self {
            KmerInt::U16(_) => 16,
            KmerInt::U32(_) => 32,
            KmerInt::U64(_) => 64,
        }
    }
}

/// Bulk integer-form output stored in the tightest type for the k in use.
#[derive(Debug, Clone)]
pub enum KmerIntVec {
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
}

impl KmerIntVec {
    pub fn new_for_k(k: u8) -> KmerIntVec {
        if k <= 8 {
            KmerIntVec::U16(Vec::new())
        } else if k <= 16 {
            KmerIntVec::U32(Vec::new())
        } else {
            KmerIntVec::U64(Vec::new())
        }
    }

    #[inline]
    pub fn push(&mut self, value: u64) {
        match self {
            KmerIntVec::U16(v) => v.push(value as u16),
            KmerIntVec::U32(v) => v.push(value as u32),
            KmerIntVec::U64(v) => v.push(value),
        }
    }

    /// Return the value at position `idx` as `u64`.
    #[inline]
    pub fn get(&self, idx: usize) -> u64 {
        match self {
            KmerIntVec::U16(v) => v[idx] as u64,
            KmerIntVec::U32(v) => v[idx] as u64,
            KmerIntVec::U64(v) => v[idx],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            KmerIntVec::U16(v) => v.len(),
            KmerIntVec::U32(v) => v.len(),
            KmerIntVec::U64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One posting: the k-mer bits plus the per-row occurrence ordinal.
///
/// The i-th occurrence of the same k-mer value within one row carries
/// ordinal i−1, so repeats produce distinct postings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PostingKey {
    pub kmer: u64,
    pub ordinal: u16,
}

impl PostingKey {
    #[inline]
    pub fn int_form(&self, k: u8) -> KmerInt {
        KmerInt::for_k(k, self.kmer)
    }

    /// Pack into the `2k + occur_bits`-bit key layout: k-mer bits high,
    /// ordinal bits low, MSB-first within bytes, zeroed tail bits.
    pub fn encode(&self, k: u8, occur_bits: u8) -> SmallVec<[u8; 10]> {
        let total_bits = 2 * k as usize + occur_bits as usize;
        let nbytes = total_bits.div_ceil(8);
        let v = ((self.kmer as u128) << occur_bits) | self.ordinal as u128;
        let shifted = v << (nbytes * 8 - total_bits);
        let be = shifted.to_be_bytes();
        SmallVec::from_slice(&be[16 - nbytes..])
    }

    /// Inverse of [`PostingKey::encode`] for the same `k` and `occur_bits`.
    pub fn decode(bytes: &[u8], k: u8, occur_bits: u8) -> Result<PostingKey> {
        let total_bits = 2 * k as usize + occur_bits as usize;
        let nbytes = total_bits.div_ceil(8);
        if bytes.len() != nbytes {
            return Err(EngineError::InvalidInput {
                reason: format!(
                    "posting key holds {} bytes but k={} with {} occurrence bits requires {}",
                    bytes.len(),
                    k,
                    occur_bits,
                    nbytes
                ),
            });
        }
        let mut be = [0u8; 16];
        be[16 - nbytes..].copy_from_slice(bytes);
        let v = u128::from_be_bytes(be) >> (nbytes * 8 - total_bits);
        let ordinal = (v & ((1u128 << occur_bits) - 1)) as u16;
        let kmer = (v >> occur_bits) as u64;
        Ok(PostingKey { kmer, ordinal })
    }
}

/// Window size and occurrence-bit settings for one extraction pass.
#[derive(Debug, Clone, Copy)]
pub struct ExtractParams {
    pub k: u8,
    pub occur_bits: u8,
}

impl ExtractParams {
    pub fn validate(&self) -> Result<()> {
        if self.k < MIN_KMER_SIZE || self.k > MAX_KMER_SIZE {
            return Err(EngineError::KmerSizeOutOfRange { k: self.k as u32 });
        }
        if self.occur_bits > MAX_OCCUR_BITS {
            return Err(EngineError::InvalidInput {
                reason: format!(
                    "occurrence bit length {} out of range, must be in 0..=16",
                    self.occur_bits
                ),
            });
        }
        Ok(())
    }
}

/* ------------------------------------------------------------------------- */
/*  Occurrence tagging                                                       */
/* ------------------------------------------------------------------------- */

/// Per-row occurrence counter over a sorted compact list of
/// (k-mer value, count) pairs.
///
/// Once a k-mer has been handed out `2^occur_bits` ordinals, further
/// occurrences are dropped rather than capped, so the posting list holds
/// exactly `min(true_count, 2^occur_bits)` entries per (row, k-mer).
struct OccurTagger {
    counts: Vec<(u64, u32)>,
    limit: u32,
}

impl OccurTagger {
    fn new(occur_bits: u8) -> OccurTagger {
        OccurTagger {
            counts: Vec::new(),
            limit: 1u32 << occur_bits,
        }
    }

    /// Ordinal for the next occurrence of `kmer`, or `None` once the
    /// occurrence space is exhausted.
    fn next_ordinal(&mut self, kmer: u64) -> Option<u16> {
        match self.counts.binary_search_by_key(&kmer, |&(v, _)| v) {
            Ok(idx) => {
                let count = self.counts[idx].1;
                if count >= self.limit {
                    return None;
                }
                self.counts[idx].1 = count + 1;
                Some(count as u16)
            }
            Err(idx) => {
                self.counts.insert(idx, (kmer, 1));
                Some(0)
            }
        }
    }
}

/* ------------------------------------------------------------------------- */
/*  Window iteration                                                         */
/* ------------------------------------------------------------------------- */

#[inline]
fn kmer_mask(k: u8) -> u64 {
    if k == 32 {
        u64::MAX
    } else {
        (1u64 << (2 * k)) - 1
    }
}

/// Walk every full DNA2 window left to right, handing the 2k-bit value of
/// each to `emit`. Windows that would run past the last base are simply
/// never formed.
fn each_dna2_window(seq: &PackedSeq, k: u8, mut emit: impl FnMut(u64)) {
    let n = seq.symbol_len();
    let k = k as usize;
    if n < k {
        return;
    }
    let mask = kmer_mask(k as u8);

    let mut code: u64 = 0;
    for i in 0..k {
        code = (code << 2) | seq.code2(i) as u64;
    }
    emit(code & mask);

    for i in k..n {
        code = ((code << 2) | seq.code2(i) as u64) & mask;
        emit(code);
    }
}

/// Walk every full DNA4 window, expanding degenerate positions into all
/// concrete DNA2 k-mers they denote.
///
/// * The expansion product is pre-checked position by position and the
///   whole window is skipped once it passes [`MAX_EXPANSION`] — no k-mer
///   of that window is emitted.
/// * Expansions enumerate in lexicographic base order (A<C<G<T), leftmost
///   position most significant.
fn each_dna4_window(seq: &PackedSeq, k: u8, mut emit: impl FnMut(u64)) {
    let n = seq.symbol_len();
    let k = k as usize;
    if n < k {
        return;
    }

    let mut bases: SmallVec<[SmallVec<[u8; 4]>; 32]> = SmallVec::new();
    for start in 0..=(n - k) {
        // Cheap pre-check: bail on the first position whose branching
        // pushes the product over the ceiling.
        let mut product: u32 = 1;
        let mut fits = true;
        for i in 0..k {
            let branching = seq.code4(start + i).count_ones();
            if branching == 0 {
                // empty base set only occurs in corrupt values; nothing to emit
                fits = false;
                break;
            }
            product *= branching;
            if product > MAX_EXPANSION {
                fits = false;
                break;
            }
        }
        if !fits {
            continue;
        }

        bases.clear();
        for i in 0..k {
            let nib = seq.code4(start + i);
            let mut choices: SmallVec<[u8; 4]> = SmallVec::new();
            for code in 0u8..4 {
                if nib & (1 << code) != 0 {
                    choices.push(code);
                }
            }
            bases.push(choices);
        }

        // Odometer over the per-position choices, rightmost fastest.
        let mut idx: SmallVec<[u8; 32]> = SmallVec::from_elem(0, k);
        loop {
            let mut code: u64 = 0;
            for i in 0..k {
                code = (code << 2) | bases[i][idx[i] as usize] as u64;
            }
            emit(code);

            let mut pos = k;
            loop {
                if pos == 0 {
                    break;
                }
                pos -= 1;
                idx[pos] += 1;
                if (idx[pos] as usize) < bases[pos].len() {
                    break;
                }
                idx[pos] = 0;
            }
            if pos == 0 && idx[0] == 0 {
                break;
            }
        }
    }
}

fn each_window(seq: &PackedSeq, k: u8, emit: impl FnMut(u64)) {
    match seq.alphabet() {
        Alphabet::Dna2 => each_dna2_window(seq, k, emit),
        Alphabet::Dna4 => each_dna4_window(seq, k, emit),
    }
}

/* ------------------------------------------------------------------------- */
/*  Public extraction modes                                                  */
/* ------------------------------------------------------------------------- */

/// Extract every k-mer of `seq` as a posting key with its occurrence
/// ordinal, in positional order.
pub fn extract_posting_keys(seq: &PackedSeq, params: &ExtractParams) -> Result<Vec<PostingKey>> {
    params.validate()?;
    let mut tagger = OccurTagger::new(params.occur_bits);
    let mut out = Vec::new();
    each_window(seq, params.k, |kmer| {
        if let Some(ordinal) = tagger.next_ordinal(kmer) {
            out.push(PostingKey { kmer, ordinal });
        }
    });
    Ok(out)
}

/// Extract every k-mer of `seq` directly into a native integer array,
/// duplicates included, without occurrence tagging.
pub fn extract_ints(seq: &PackedSeq, k: u8) -> Result<KmerIntVec> {
    ExtractParams { k, occur_bits: 0 }.validate()?;
    let mut out = KmerIntVec::new_for_k(k);
    each_window(seq, k, |kmer| out.push(kmer));
    Ok(out)
}

/// The set of distinct k-mer values present in `seq`; this is the
/// presence-per-row view the frequency analyzer aggregates.
pub fn extract_distinct_kmers(seq: &PackedSeq, k: u8) -> Result<FxHashSet<u64>> {
    ExtractParams { k, occur_bits: 0 }.validate()?;
    let mut out = FxHashSet::default();
    each_window(seq, k, |kmer| {
        out.insert(kmer);
    });
    Ok(out)
}
