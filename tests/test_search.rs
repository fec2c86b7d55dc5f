#[cfg(test)]
mod tests {
    use kmersearch::kmersearch::analyze::{
        perform_highfreq_analysis, AnalyzeOptions, CancelFlag,
    };
    use kmersearch::kmersearch::config::{EngineConfig, EngineContext};
    use kmersearch::kmersearch::errors::EngineError;
    use kmersearch::kmersearch::highfreq::reset_shared;
    use kmersearch::kmersearch::index::*;
    use kmersearch::kmersearch::seq::{encode, Alphabet, PackedSeq};
    use kmersearch::kmersearch::store::RelId;
    use std::cmp::Ordering;

    fn rows(texts: &[&str]) -> Vec<PackedSeq> {
        texts
            .iter()
            .map(|t| encode(Alphabet::for_text(t), t).unwrap())
            .collect()
    }

    fn context() -> EngineContext {
        let config = EngineConfig {
            kmer_size: Some(4),
            occur_bitlen: 2,
            max_appearance_rate: 0.5,
            min_score: 1,
            ..EngineConfig::default()
        };
        EngineContext::new(config).unwrap()
    }

    fn rel() -> RelId {
        RelId::new("corpus", "seq")
    }

    /* --------------------------------------------------------------------- */
    /*  query pipeline                                                       */
    /* --------------------------------------------------------------------- */

    #[test]
    fn unique_query_matches_one_row() {
        let rows = rows(&["AAAAAAAA", "ACGTACGT", "TTTTTTTT"]);
        let mut ctx = context();
        let index = MemIndex::build(&mut ctx, "idx", &rel(), &rows).unwrap();
        // AAAA×4, TTTT×4, and (ACGT,0),(ACGT,1),CGTA,GTAC,TACG
        assert_eq!(index.posting_count(), 13);

        let hits = index.search(&mut ctx, &rows, "ACGT").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].row, 1);
        assert_eq!(hits[0].rawscore, 1);
    }

    #[test]
    fn repeated_kmer_query_matches_by_ordinal_zero() {
        // Row 0 posts AAAA at ordinals 0..=3; the query only posts ordinal
        // 0, so exactly one posting pair matches.
        let rows = rows(&["AAAAAAAA", "ACGTACGT", "TTTTTTTT"]);
        let mut ctx = context();
        let index = MemIndex::build(&mut ctx, "idx", &rel(), &rows).unwrap();

        let hits = index.search(&mut ctx, &rows, "AAAA").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].row, 0);
        assert_eq!(hits[0].rawscore, 1);
    }

    #[test]
    fn hits_rank_by_score_then_row() {
        let rows = rows(&["ACGTAAAA", "ACGTACGT", "CCCCCCCC", "ACGTACGA"]);
        let mut ctx = context();
        let index = MemIndex::build(&mut ctx, "idx", &rel(), &rows).unwrap();

        // ACGTACGT shares the most k-mer occurrences with itself
        let hits = index.search(&mut ctx, &rows, "ACGTACGT").unwrap();
        assert!(hits.len() >= 2);
        assert_eq!(hits[0].row, 1);
        for pair in hits.windows(2) {
            let ord = pair[1]
                .rawscore
                .cmp(&pair[0].rawscore)
                .then(pair[0].row.cmp(&pair[1].row));
            assert_ne!(ord, Ordering::Greater, "hits out of order: {:?}", hits);
        }
    }

    #[test]
    fn min_score_filters_weak_candidates() {
        let rows = rows(&["ACGTAAAA", "ACGTACGT"]);
        let mut ctx = context();
        ctx.config.min_score = 4;
        let index = MemIndex::build(&mut ctx, "idx", &rel(), &rows).unwrap();

        // Row 0 shares only the single ACGT occurrence with the query
        let hits = index.search(&mut ctx, &rows, "ACGTACGT").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].row, 1);
        assert!(hits[0].rawscore >= 4);
    }

    #[test]
    fn degenerate_query_expands_before_matching() {
        let rows = rows(&["AAAAAAAA", "AGAAAGAA", "TTTTTTTT"]);
        let mut ctx = context();
        let index = MemIndex::build(&mut ctx, "idx", &rel(), &rows).unwrap();

        // R = A|G: ARAA covers AAAA (row 0) and AGAA (row 1)
        let hits = index.search(&mut ctx, &rows, "ARAA").unwrap();
        let matched: Vec<usize> = hits.iter().map(|h| h.row).collect();
        assert!(matched.contains(&0));
        assert!(matched.contains(&1));
        assert!(!matched.contains(&2));
    }

    #[test]
    fn oversized_degenerate_query_matches_nothing() {
        let rows = rows(&["AAAAAAAA", "ACGTACGT"]);
        let mut ctx = context();
        let index = MemIndex::build(&mut ctx, "idx", &rel(), &rows).unwrap();
        // NNNN expands to 256 k-mers, past the bound, so no keys exist
        let hits = index.search(&mut ctx, &rows, "NNNN").unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn pattern_cache_serves_repeat_queries() {
        let rows = rows(&["ACGTACGT"]);
        let mut ctx = context();
        let index = MemIndex::build(&mut ctx, "idx", &rel(), &rows).unwrap();

        let first = index.search(&mut ctx, &rows, "ACGT").unwrap();
        assert_eq!(ctx.caches.pattern.len(), 1);
        let second = index.search(&mut ctx, &rows, "ACGT").unwrap();
        assert_eq!(first, second);
        assert_eq!(ctx.caches.pattern.len(), 1);
        // The verification rawscore was cached as well
        assert_eq!(ctx.caches.rawscore.len(), 1);
    }

    /* --------------------------------------------------------------------- */
    /*  access-method contract pieces                                        */
    /* --------------------------------------------------------------------- */

    #[test]
    fn consistent_demands_recheck() {
        let mut ctx = context();
        let q = extract_query_keys(&mut ctx, &rel(), "ACGTA", Alphabet::Dna4, false).unwrap();
        assert_eq!(q.keys.len(), 2);

        let (ok, recheck) = consistent(&mut ctx, &[true, false], &q);
        assert!(ok);
        assert!(recheck);
        let (ok, recheck) = consistent(&mut ctx, &[false, false], &q);
        assert!(!ok);
        assert!(recheck);
    }

    #[test]
    fn adjusted_min_score_never_goes_negative() {
        let mut ctx = context();
        ctx.config.min_score = 0;
        let q = extract_query_keys(&mut ctx, &rel(), "ACGT", Alphabet::Dna4, false).unwrap();
        assert_eq!(adjusted_min_score(&mut ctx, &q), 0);
    }

    #[test]
    fn compare_partial_orders_by_length_then_bytes() {
        assert_eq!(compare_partial(&[1, 2], &[1, 2, 3]), Ordering::Less);
        assert_eq!(compare_partial(&[9], &[1, 2]), Ordering::Less);
        assert_eq!(compare_partial(&[1, 2], &[1, 3]), Ordering::Less);
        assert_eq!(compare_partial(&[1, 2], &[1, 2]), Ordering::Equal);
        assert_eq!(compare_partial(&[2, 0], &[1, 9]), Ordering::Greater);
    }

    #[test]
    fn index_metadata_follows_build_and_drop() {
        let rows = rows(&["ACGTACGT"]);
        let mut ctx = context();
        let index = MemIndex::build(&mut ctx, "idx", &rel(), &rows).unwrap();
        assert!(ctx.store.index_meta("idx").is_some());
        index.drop_index(&mut ctx).unwrap();
        assert!(ctx.store.index_meta("idx").is_none());
    }

    /* --------------------------------------------------------------------- */
    /*  preclusion                                                           */
    /* --------------------------------------------------------------------- */

    #[test]
    fn preclusion_requires_the_shared_cache_variant() {
        let rows = rows(&["ACGTACGT"]);
        let mut ctx = context();
        ctx.config.preclude_highfreq_kmer = true;
        // force_use_parallel_highfreq_kmer_cache stays false
        let result = MemIndex::build(&mut ctx, "idx", &rel(), &rows);
        assert!(matches!(result, Err(EngineError::SharedCacheRequired)));
    }

    #[test]
    fn precluded_index_drops_highfreq_postings_and_lowers_the_bar() {
        reset_shared();

        // AAAA dominates the corpus; ACGT and friends stay rare
        let mut corpus: Vec<&str> = vec!["AAAAAAAA"; 8];
        corpus.push("ACGTACGT");
        corpus.push("AAAAACGT");
        let rows = rows(&corpus);

        let mut ctx = context();
        perform_highfreq_analysis(
            &mut ctx,
            &rel(),
            &rows,
            &AnalyzeOptions::default(),
            &CancelFlag::new(),
            None,
        )
        .unwrap();
        assert_eq!(ctx.store.highfreq_kmers(&rel()).unwrap(), &[0u64]);

        ctx.config.preclude_highfreq_kmer = true;
        ctx.config.force_use_parallel_highfreq_kmer_cache = true;

        let index = MemIndex::build(&mut ctx, "idx", &rel(), &rows).unwrap();

        // Rows of pure AAAA contributed no postings at all
        let only_a = encode(Alphabet::Dna2, "AAAAAAAA").unwrap();
        assert!(extract_index_keys(&mut ctx, &rel(), &only_a, true)
            .unwrap()
            .is_empty());

        // The AAAA query key is itself high-frequency: it is filtered out
        // and the adjusted minimum drops to zero.
        let q = extract_query_keys(&mut ctx, &rel(), "AAAA", Alphabet::Dna4, true).unwrap();
        assert!(q.keys.is_empty());
        assert_eq!(q.highfreq_hits, 1);
        assert_eq!(adjusted_min_score(&mut ctx, &q), 0);

        // A mixed query still reaches the rows through its rare k-mers,
        // and verification runs on the unfiltered raw score.
        let hits = index.search(&mut ctx, &rows, "AAAAACGT").unwrap();
        let matched: Vec<usize> = hits.iter().map(|h| h.row).collect();
        assert!(matched.contains(&9), "rare k-mers must reach row 9");
        assert!(matched.contains(&8));

        reset_shared();
    }
}
