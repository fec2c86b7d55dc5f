#[cfg(test)]
mod tests {
    use kmersearch::kmersearch::config::{EngineConfig, EngineContext};
    use kmersearch::kmersearch::planner::*;
    use kmersearch::kmersearch::store::{Fingerprint, IndexMeta, RelId};

    fn rel() -> RelId {
        RelId::new("corpus", "seq")
    }

    fn context(k: u8) -> EngineContext {
        let config = EngineConfig {
            kmer_size: Some(k),
            occur_bitlen: 8,
            max_appearance_rate: 0.05,
            ..EngineConfig::default()
        };
        EngineContext::new(config).unwrap()
    }

    fn register_index(ctx: &mut EngineContext, index_id: &str, fingerprint: Fingerprint) {
        ctx.store
            .insert_index(IndexMeta {
                index_id: index_id.to_string(),
                rel: rel(),
                fingerprint,
                preclude_highfreq: false,
                created_at: 0,
            })
            .unwrap();
    }

    fn fingerprint(k: u8, rate: f64) -> Fingerprint {
        Fingerprint {
            kmer_size: k,
            occur_bits: 8,
            max_appearance_rate: rate,
            max_appearance_nrow: 0,
        }
    }

    fn leaf(index_id: &str, cost: f64) -> PathNode {
        PathNode::Index(IndexPath {
            index_id: index_id.to_string(),
            startup_cost: cost / 10.0,
            total_cost: cost,
            clauses: vec!["seq %% query".to_string()],
        })
    }

    /* --------------------------------------------------------------------- */
    /*  leaf gating                                                          */
    /* --------------------------------------------------------------------- */

    #[test]
    fn matching_index_keeps_its_costs() {
        let mut ctx = context(8);
        register_index(&mut ctx, "good", fingerprint(8, 0.05));

        let mut paths = vec![leaf("good", 100.0)];
        gate_paths(&ctx, &rel(), &mut paths).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].total_cost(), 100.0);
    }

    #[test]
    fn mismatched_index_gets_the_sentinel() {
        let mut ctx = context(8);
        register_index(&mut ctx, "stale", fingerprint(12, 0.05));

        let mut paths = vec![leaf("stale", 100.0)];
        gate_paths(&ctx, &rel(), &mut paths).unwrap();
        assert_eq!(paths[0].startup_cost(), DISQUALIFIED_COST);
        assert_eq!(paths[0].total_cost(), DISQUALIFIED_COST);
    }

    #[test]
    fn rate_comparison_uses_the_tolerance() {
        let mut ctx = context(8);
        register_index(&mut ctx, "near", fingerprint(8, 0.05 + 0.5e-4));
        register_index(&mut ctx, "far", fingerprint(8, 0.06));

        let mut paths = vec![leaf("near", 10.0), leaf("far", 10.0)];
        gate_paths(&ctx, &rel(), &mut paths).unwrap();
        assert_eq!(paths[0].total_cost(), 10.0, "within tolerance");
        assert_eq!(paths[1].total_cost(), DISQUALIFIED_COST);
    }

    #[test]
    fn unmanaged_indexes_are_left_alone() {
        let ctx = context(8);
        // No metadata registered: not a core-managed index
        let mut paths = vec![leaf("btree_idx", 42.0)];
        gate_paths(&ctx, &rel(), &mut paths).unwrap();
        assert_eq!(paths[0].total_cost(), 42.0);
    }

    #[test]
    fn all_core_indexes_disqualify_when_none_match() {
        let mut ctx = context(8);
        register_index(&mut ctx, "a", fingerprint(12, 0.05));
        register_index(&mut ctx, "b", fingerprint(16, 0.05));

        let mut paths = vec![leaf("a", 5.0), leaf("b", 7.0)];
        gate_paths(&ctx, &rel(), &mut paths).unwrap();
        assert!(paths
            .iter()
            .all(|p| p.total_cost() == DISQUALIFIED_COST));
        // No matching sibling exists, so nothing was synthesized
        assert_eq!(paths.len(), 2);
    }

    /* --------------------------------------------------------------------- */
    /*  propagation and synthesis                                            */
    /* --------------------------------------------------------------------- */

    fn bitmap_or(children: Vec<PathNode>, cost: f64) -> PathNode {
        PathNode::BitmapOr {
            startup_cost: cost / 10.0,
            total_cost: cost,
            children,
        }
    }

    #[test]
    fn sentinel_propagates_through_bitmap_trees() {
        let mut ctx = context(8);
        register_index(&mut ctx, "good", fingerprint(8, 0.05));
        register_index(&mut ctx, "stale", fingerprint(12, 0.05));

        let tree = PathNode::BitmapAnd {
            startup_cost: 1.0,
            total_cost: 30.0,
            children: vec![
                leaf("good", 10.0),
                bitmap_or(vec![leaf("stale", 20.0)], 20.0),
            ],
        };
        let mut paths = vec![tree];
        gate_paths(&ctx, &rel(), &mut paths).unwrap();

        // The stale leaf, its enclosing or-node, and the root all carry
        // the sentinel; the good leaf keeps its own costs.
        assert_eq!(paths[0].total_cost(), DISQUALIFIED_COST);
        let PathNode::BitmapAnd { children, .. } = &paths[0] else {
            panic!("root must stay a bitmap and");
        };
        assert_eq!(children[0].total_cost(), 10.0);
        assert_eq!(children[1].total_cost(), DISQUALIFIED_COST);
    }

    #[test]
    fn disqualified_bitmap_gains_a_sibling_alternative() {
        let mut ctx = context(8);
        register_index(&mut ctx, "good", fingerprint(8, 0.05));
        register_index(&mut ctx, "stale", fingerprint(12, 0.05));

        let mut paths = vec![bitmap_or(vec![leaf("stale", 20.0)], 20.0)];
        gate_paths(&ctx, &rel(), &mut paths).unwrap();

        // The original is still present (re-priced), plus one alternative
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].total_cost(), DISQUALIFIED_COST);

        let PathNode::BitmapOr { children, total_cost, .. } = &paths[1] else {
            panic!("alternative must be a bitmap or");
        };
        // Pre-sentinel costs and clauses survive the substitution
        assert_eq!(*total_cost, 20.0);
        let PathNode::Index(alt_leaf) = &children[0] else {
            panic!("alternative child must be an index path");
        };
        assert_eq!(alt_leaf.index_id, "good");
        assert_eq!(alt_leaf.total_cost, 20.0);
        assert_eq!(alt_leaf.clauses, vec!["seq %% query".to_string()]);
    }

    #[test]
    fn plain_index_paths_get_no_alternative() {
        let mut ctx = context(8);
        register_index(&mut ctx, "good", fingerprint(8, 0.05));
        register_index(&mut ctx, "stale", fingerprint(12, 0.05));

        let mut paths = vec![leaf("stale", 20.0)];
        gate_paths(&ctx, &rel(), &mut paths).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].total_cost(), DISQUALIFIED_COST);
    }
}
