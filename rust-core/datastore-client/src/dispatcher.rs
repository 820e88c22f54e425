use std::collections::HashMap;
use std::sync::Arc;

use query_planner::{DatastoreQuery, GroupingAdapter, QueryOptimizer};
use serde_json::Value;

use crate::client::DatastoreClient;
use crate::deadline::Deadline;
use crate::error::DispatchError;
use crate::wire::synthetic_empty_response;

/// One query dispatched in a wave, tagged with the cluster it targets
/// (from the backing `IndexDefinition::query_cluster`, resolved by the
/// caller before handing queries to the dispatcher).
pub struct ClusterTagged {
    pub cluster: String,
    pub query: DatastoreQuery,
}

/// Either the raw msearch response body for one query, or the isolated
/// failure it hit — kept per-query so a single upstream error doesn't
/// necessarily fail the whole wave (spec §7 propagation policy).
pub enum QueryResult {
    Response(Value),
    Failed(DispatchError),
}

/// Packs pending `DatastoreQuery` values into one multi-search envelope
/// per cluster per wave, enforces the request's monotonically-shrinking
/// deadline, and never issues anything but a read verb (spec §4.5).
/// The only place this engine suspends for I/O (spec §5).
pub struct MsearchDispatcher {
    client: Arc<dyn DatastoreClient>,
    cluster_urls: HashMap<String, String>,
    /// Grouping strategy used to encode every aggregation node below a
    /// query's root (spec §4.3, §6 `subAggregationGroupingAdapter`) — the
    /// root of an aggregation tree always encodes as `CompositeAdapter`.
    sub_aggregation_adapter: Arc<dyn GroupingAdapter + Send + Sync>,
}

impl MsearchDispatcher {
    pub fn new(
        client: Arc<dyn DatastoreClient>,
        cluster_urls: HashMap<String, String>,
        sub_aggregation_adapter: Arc<dyn GroupingAdapter + Send + Sync>,
    ) -> Self {
        Self { client, cluster_urls, sub_aggregation_adapter }
    }

    /// Dispatches one wave: queries already known to be short-circuited
    /// (spec §4.2 `short_circuit?`) are never sent over the wire; the rest
    /// are grouped by cluster and sent as one msearch call per cluster.
    /// Returns one `QueryResult` per input query, in the same order.
    ///
    /// Fails the whole wave only when the deadline has already elapsed
    /// before any dispatch begins; an individual cluster's transport
    /// failure is isolated to the queries routed to that cluster.
    pub async fn dispatch(
        &self,
        deadline: &Deadline,
        queries: Vec<ClusterTagged>,
    ) -> Result<Vec<QueryResult>, DispatchError> {
        let remaining = deadline.remaining_ms();
        if remaining <= 0 {
            return Err(DispatchError::RequestExceededDeadline(remaining));
        }

        let mut results: Vec<Option<QueryResult>> = (0..queries.len()).map(|_| None).collect();
        let mut by_cluster: HashMap<String, Vec<(usize, DatastoreQuery)>> = HashMap::new();

        for (index, tagged) in queries.into_iter().enumerate() {
            if tagged.query.short_circuit() {
                results[index] = Some(QueryResult::Response(synthetic_empty_response()));
            } else {
                by_cluster.entry(tagged.cluster).or_default().push((index, tagged.query));
            }
        }

        for (cluster, indexed) in by_cluster {
            let cluster_url = match self.cluster_urls.get(&cluster) {
                Some(url) => url.clone(),
                None => {
                    let error = DispatchError::UnknownCluster(cluster.clone());
                    for (index, _) in indexed {
                        results[index] = Some(QueryResult::Failed(DispatchError::UnknownCluster(cluster.clone())));
                    }
                    tracing::warn!(%cluster, %error, "dispatch skipped unroutable cluster");
                    continue;
                }
            };

            // Fold plans that differ only in their aggregations into the
            // minimum set of searches before building msearch bodies
            // (spec §4.4); every source index that got folded into one
            // merged query shares that query's single response below.
            let original_count = indexed.len();
            let merged = QueryOptimizer::optimize_with_trace(indexed);
            if merged.len() < original_count {
                tracing::debug!(
                    %cluster,
                    query_count = merged.len(),
                    plans_folded = original_count,
                    "optimizer merged aggregation-only plans into fewer searches"
                );
            }

            let timeout_ms = deadline.remaining_ms().max(0) as u64;
            let encoded: Result<Vec<_>, _> = merged
                .iter()
                .map(|(query, _)| query.to_header_body_with_aggs(timeout_ms, self.sub_aggregation_adapter.as_ref()))
                .collect();
            let bodies = match encoded {
                Ok(bodies) => bodies,
                Err(error) => {
                    tracing::warn!(%cluster, %error, "failed to encode aggregation request");
                    for (_, sources) in &merged {
                        for &index in sources {
                            results[index] = Some(QueryResult::Failed(DispatchError::SearchFailed(
                                cluster.clone(),
                                error.to_string(),
                            )));
                        }
                    }
                    continue;
                }
            };

            tracing::debug!(%cluster, searches = bodies.len(), timeout_ms, "dispatching msearch wave");

            match self.client.msearch(&cluster_url, &bodies).await {
                Ok(responses) => {
                    for ((_, sources), response) in merged.into_iter().zip(responses.into_iter()) {
                        let result = match response.into_result() {
                            Ok(body) => body,
                            Err(message) => {
                                for &index in &sources {
                                    results[index] = Some(QueryResult::Failed(DispatchError::SearchFailed(
                                        cluster.clone(),
                                        message.clone(),
                                    )));
                                }
                                continue;
                            }
                        };
                        for &index in &sources {
                            results[index] = Some(QueryResult::Response(result.clone()));
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(%cluster, %error, "msearch transport failure");
                    for (_, sources) in &merged {
                        for &index in sources {
                            results[index] = Some(QueryResult::Failed(match &error {
                                DispatchError::Transport(c, m) => {
                                    DispatchError::Transport(c.clone(), m.clone())
                                }
                                other => DispatchError::SearchFailed(cluster.clone(), other.to_string()),
                            }));
                        }
                    }
                }
            }
        }

        Ok(results.into_iter().map(|r| r.expect("every index assigned")).collect())
    }
}
