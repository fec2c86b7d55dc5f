use crate::cli::counters::CorpusLoadCounters;
use crate::kmersearch::seq::{self, Alphabet, PackedSeq};
use anyhow::{Context, Result};
use std::path::Path;

/// Load a corpus file: one sequence per line.
///
/// * Blank lines and lines starting with `#` are skipped.
/// * Each row is packed with the narrowest alphabet that fits it, so pure
///   A/C/G/T rows stay at 2 bits per base.
pub fn load_corpus(path: &Path, counters: &mut CorpusLoadCounters) -> Result<Vec<PackedSeq>> {
    let content =
        std::fs::read_to_string(path).context(format!("Error reading corpus file {:?}", path))?;

    let mut rows = Vec::new();
    for (lineno, line) in content.lines().map(str::trim).enumerate() {
        counters.total += 1;
        if line.is_empty() || line.starts_with('#') {
            counters.skipped += 1;
            continue;
        }
        let alphabet = Alphabet::for_text(line);
        let packed = seq::encode(alphabet, line)
            .context(format!("encoding corpus line {}", lineno + 1))?;
        match alphabet {
            Alphabet::Dna2 => counters.dna2 += 1,
            Alphabet::Dna4 => counters.dna4 += 1,
        }
        counters.loaded += 1;
        rows.push(packed);
    }
    Ok(rows)
}
