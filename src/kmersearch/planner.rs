use crate::kmersearch::config::EngineContext;
use crate::kmersearch::errors::Result;
use crate::kmersearch::store::RelId;
use fxhash::FxHashSet;

/// Cost written into a path whose index cannot serve the current
/// configuration; large enough that the host never picks it.
pub const DISQUALIFIED_COST: f64 = 1e10;

/// One index scan the host planner is considering.
#[derive(Debug, Clone)]
pub struct IndexPath {
    pub index_id: String,
    pub startup_cost: f64,
    pub total_cost: f64,
    pub clauses: Vec<String>,
}

/// A candidate path tree: a plain index scan or a bitmap combination.
#[derive(Debug, Clone)]
pub enum PathNode {
    Index(IndexPath),
    BitmapAnd {
        startup_cost: f64,
        total_cost: f64,
        children: Vec<PathNode>,
    },
    BitmapOr {
        startup_cost: f64,
        total_cost: f64,
        children: Vec<PathNode>,
    },
}

impl PathNode {
    pub fn startup_cost(&self) -> f64 {
        match self {
            PathNode::Index(p) => p.startup_cost,
            PathNode::BitmapAnd { startup_cost, .. } | PathNode::BitmapOr { startup_cost, .. } => {
                *startup_cost
            }
        }
    }

    pub fn total_cost(&self) -> f64 {
        match self {
            PathNode::Index(p) => p.total_cost,
            PathNode::BitmapAnd { total_cost, .. } | PathNode::BitmapOr { total_cost, .. } => {
                *total_cost
            }
        }
    }

    fn disqualify(&mut self) {
        match self {
            PathNode::Index(p) => {
                p.startup_cost = DISQUALIFIED_COST;
                p.total_cost = DISQUALIFIED_COST;
            }
            PathNode::BitmapAnd {
                startup_cost,
                total_cost,
                ..
            }
            | PathNode::BitmapOr {
                startup_cost,
                total_cost,
                ..
            } => {
                *startup_cost = DISQUALIFIED_COST;
                *total_cost = DISQUALIFIED_COST;
            }
        }
    }
}

/// Re-price mismatched leaves and propagate the sentinel upward.
/// Mismatched index ids are collected for the synthesis step.
fn gate_node(
    ctx: &EngineContext,
    node: &mut PathNode,
    mismatched: &mut FxHashSet<String>,
) -> Result<bool> {
    match node {
        PathNode::Index(path) => {
            // An index without build metadata is not managed here.
            let Some(meta) = ctx.store.index_meta(&path.index_id) else {
                return Ok(false);
            };
            let current = ctx.config.fingerprint()?;
            if meta.fingerprint.matches(&current) {
                return Ok(false);
            }
            log::warn!(
                "index {} disqualified: built with {}, current {}",
                path.index_id,
                meta.fingerprint,
                current
            );
            mismatched.insert(path.index_id.clone());
            node.disqualify();
            Ok(true)
        }
        PathNode::BitmapAnd { children, .. } | PathNode::BitmapOr { children, .. } => {
            let mut any = false;
            for child in children.iter_mut() {
                any |= gate_node(ctx, child, mismatched)?;
            }
            if any {
                node.disqualify();
            }
            Ok(any)
        }
    }
}

/// Copy a path tree, pointing every mismatched leaf at `substitute_id`
/// while keeping the clauses and the pre-sentinel costs.
fn substitute_leaves(
    node: &PathNode,
    mismatched: &FxHashSet<String>,
    substitute_id: &str,
) -> PathNode {
    match node {
        PathNode::Index(path) => {
            let mut path = path.clone();
            if mismatched.contains(&path.index_id) {
                path.index_id = substitute_id.to_string();
            }
            PathNode::Index(path)
        }
        PathNode::BitmapAnd {
            startup_cost,
            total_cost,
            children,
        } => PathNode::BitmapAnd {
            startup_cost: *startup_cost,
            total_cost: *total_cost,
            children: children
                .iter()
                .map(|c| substitute_leaves(c, mismatched, substitute_id))
                .collect(),
        },
        PathNode::BitmapOr {
            startup_cost,
            total_cost,
            children,
        } => PathNode::BitmapOr {
            startup_cost: *startup_cost,
            total_cost: *total_cost,
            children: children
                .iter()
                .map(|c| substitute_leaves(c, mismatched, substitute_id))
                .collect(),
        },
    }
}

/// Gate the candidate paths on `rel` against the current configuration.
///
/// * Leaves whose build fingerprint mismatches get the sentinel cost, and
///   the sentinel propagates through enclosing bitmap nodes.
/// * A disqualified bitmap path gains one alternative rebuilt on a sibling
///   index whose fingerprint does match, when such a sibling exists.
///
/// Paths are never removed; the final choice stays with the host's cost
/// comparison.
pub fn gate_paths(ctx: &EngineContext, rel: &RelId, paths: &mut Vec<PathNode>) -> Result<()> {
    let current = ctx.config.fingerprint()?;
    let sibling: Option<String> = ctx
        .store
        .indexes_for(rel)
        .into_iter()
        .find(|meta| meta.fingerprint.matches(&current))
        .map(|meta| meta.index_id.clone());

    let mut alternatives: Vec<PathNode> = Vec::new();
    for node in paths.iter_mut() {
        let pristine = node.clone();
        let mut mismatched = FxHashSet::default();
        let disqualified = gate_node(ctx, node, &mut mismatched)?;
        if !disqualified {
            continue;
        }
        let is_bitmap = matches!(
            pristine,
            PathNode::BitmapAnd { .. } | PathNode::BitmapOr { .. }
        );
        if is_bitmap {
            if let Some(sibling_id) = &sibling {
                alternatives.push(substitute_leaves(&pristine, &mismatched, sibling_id));
            }
        }
    }
    paths.extend(alternatives);
    Ok(())
}
