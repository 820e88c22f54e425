use schema_view::FieldPath;
use serde_json::Value;

use crate::tree::{FilterTree, LeafOp};

/// Bounds extracted from `gt`/`gte`/`lt`/`lte` leaves against one field
/// path, used by the rollover-pruning hook (spec §4.1 step 8).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeBounds {
    pub gt: Option<Value>,
    pub gte: Option<Value>,
    pub lt: Option<Value>,
    pub lte: Option<Value>,
}

impl RangeBounds {
    fn is_empty(&self) -> bool {
        self.gt.is_none() && self.gte.is_none() && self.lt.is_none() && self.lte.is_none()
    }

    fn merge(&mut self, other: RangeBounds) {
        self.gt = self.gt.take().or(other.gt);
        self.gte = self.gte.take().or(other.gte);
        self.lt = self.lt.take().or(other.lt);
        self.lte = self.lte.take().or(other.lte);
    }
}

/// Routing hook (step 9): collects the `equal_to_any_of` values filtered on
/// `routing_path`, as long as they're reachable through a conjunction
/// (top-level `all_of` / implicit AND). Values inside a `not` or an
/// `any_of` branch don't constrain the routing set and are ignored.
pub fn extract_routing_values(tree: &FilterTree, routing_path: &FieldPath) -> Option<Vec<Value>> {
    match tree {
        FilterTree::Leaf(leaf) if &leaf.path == routing_path => match &leaf.op {
            LeafOp::EqualToAnyOf(values) => Some(values.clone()),
            _ => None,
        },
        FilterTree::AllOf(children) => children
            .iter()
            .find_map(|child| extract_routing_values(child, routing_path)),
        _ => None,
    }
}

/// Rollover-pruning hook (step 8): collects range bounds on `time_path`
/// reachable through a conjunction, mirroring `extract_routing_values`.
pub fn extract_range_bounds(tree: &FilterTree, time_path: &FieldPath) -> Option<RangeBounds> {
    match tree {
        FilterTree::Leaf(leaf) if &leaf.path == time_path => {
            let mut bounds = RangeBounds::default();
            match &leaf.op {
                LeafOp::Gt(v) => bounds.gt = Some(v.clone()),
                LeafOp::Gte(v) => bounds.gte = Some(v.clone()),
                LeafOp::Lt(v) => bounds.lt = Some(v.clone()),
                LeafOp::Lte(v) => bounds.lte = Some(v.clone()),
                _ => return None,
            }
            Some(bounds)
        }
        FilterTree::AllOf(children) => {
            let mut combined = RangeBounds::default();
            for child in children {
                if let Some(bounds) = extract_range_bounds(child, time_path) {
                    combined.merge(bounds);
                }
            }
            if combined.is_empty() {
                None
            } else {
                Some(combined)
            }
        }
        _ => None,
    }
}
