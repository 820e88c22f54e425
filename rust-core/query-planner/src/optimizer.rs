use crate::query::DatastoreQuery;

/// Merges a wave's DatastoreQueries that differ only in aggregations into
/// the minimum set of searches (spec §4.4).
pub struct QueryOptimizer;

impl QueryOptimizer {
    /// Partitions `queries` by merge-compatibility and folds each
    /// partition via `DatastoreQuery::merge`. A query count mismatch
    /// within a partition (e.g. two plans differ only by one lacking any
    /// aggregations at all, and so can't logically merge) simply keeps
    /// both as independent members of the output set — `merge` already
    /// enforces the compatibility contract, so a rejected merge here just
    /// means that partitioning pass missed a real incompatibility and the
    /// query stays un-merged rather than being dropped.
    pub fn optimize(queries: Vec<DatastoreQuery>) -> Vec<DatastoreQuery> {
        Self::optimize_with_trace(queries.into_iter().enumerate().collect())
            .into_iter()
            .map(|(query, _)| query)
            .collect()
    }

    /// Same merge as `optimize`, but keeps track of which input indices
    /// (the caller's own numbering, not positional) ended up folded into
    /// each output query — the dispatcher needs this to hand every
    /// original plan its merged query's single response back, since the
    /// optimizer may reduce `k` aggregation-only plans to one search.
    pub fn optimize_with_trace(queries: Vec<(usize, DatastoreQuery)>) -> Vec<(DatastoreQuery, Vec<usize>)> {
        let mut merged: Vec<(DatastoreQuery, Vec<usize>)> = Vec::with_capacity(queries.len());

        'next_query: for (source_index, query) in queries {
            for (existing, sources) in merged.iter_mut() {
                if let Ok(combined) = existing.merge(&query) {
                    *existing = combined;
                    sources.push(source_index);
                    continue 'next_query;
                }
            }
            merged.push((query, vec![source_index]));
        }

        merged
    }
}
