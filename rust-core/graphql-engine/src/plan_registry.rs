use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use datastore_client::{ClusterTagged, Deadline, MsearchDispatcher, QueryResult};
use query_planner::DatastoreQuery;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};

use crate::error::EngineError;

/// Decodes one plan's raw msearch response body into the resolver's typed
/// result. Kept as a trait rather than a closure on `PlanHandle` so the
/// handle itself stays `Clone`-free and cheap to pass into `async move`
/// resolver blocks.
pub trait PlanResult: Sized {
    fn decode(raw: &Value) -> Result<Self, EngineError>;
}

/// The decoded `hits.hits[]._source` array for a plain document query.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHits(pub Vec<Value>);

impl PlanResult for RawHits {
    fn decode(raw: &Value) -> Result<Self, EngineError> {
        let hits = raw
            .get("hits")
            .and_then(|h| h.get("hits"))
            .and_then(Value::as_array)
            .ok_or_else(|| EngineError::Invariant("msearch response missing hits.hits".to_string()))?;
        Ok(RawHits(
            hits.iter().map(|hit| hit.get("_source").cloned().unwrap_or(Value::Null)).collect(),
        ))
    }
}

/// The raw `aggregations` object for an aggregation query, passed through
/// unparsed so the aggregation resolver can hand it to the configured
/// `GroupingAdapter`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAggregation(pub Value);

impl PlanResult for RawAggregation {
    fn decode(raw: &Value) -> Result<Self, EngineError> {
        Ok(RawAggregation(raw.get("aggregations").cloned().unwrap_or(Value::Null)))
    }
}

/// A GraphQL-only handle to a not-yet-dispatched plan (spec §9 "coroutine
/// control flow": resolvers return `PlanHandle<T>` rather than calling the
/// dispatcher directly; the bridge redeems it after a wave flush).
pub struct PlanHandle<T> {
    id: u64,
    _marker: PhantomData<T>,
}

struct RegistryState {
    next_id: u64,
    pending: HashMap<u64, (String, DatastoreQuery)>,
    results: HashMap<u64, Result<Value, EngineError>>,
    flush_in_flight: bool,
    flush_done: Arc<Notify>,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            next_id: 0,
            pending: HashMap::new(),
            results: HashMap::new(),
            flush_in_flight: false,
            flush_done: Arc::new(Notify::new()),
        }
    }
}

/// Per-request plan registry (spec §9). Resolvers `submit` a
/// `DatastoreQuery` tagged with its target cluster and get back a
/// `PlanHandle` immediately, with no I/O performed yet; `resolve` is the
/// two-phase walk's suspension point — it collects every plan submitted
/// since the last flush, dispatches them as one wave, and wakes every
/// waiter, mirroring the teacher's `Arc<RwLock<ModelRegistry>>` pattern in
/// `model_resolvers.rs` generalized from a read-through cache to a
/// write-once-per-wave batch.
pub struct PlanRegistry {
    dispatcher: Arc<MsearchDispatcher>,
    deadline: Deadline,
    state: Mutex<RegistryState>,
}

impl PlanRegistry {
    pub fn new(dispatcher: Arc<MsearchDispatcher>, deadline: Deadline) -> Self {
        Self { dispatcher, deadline, state: Mutex::new(RegistryState::default()) }
    }

    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    pub async fn submit<T: PlanResult>(&self, cluster: String, query: DatastoreQuery) -> PlanHandle<T> {
        let mut state = self.state.lock().await;
        let id = state.next_id;
        state.next_id += 1;
        state.pending.insert(id, (cluster, query));
        PlanHandle { id, _marker: PhantomData }
    }

    /// Redeems a handle: awaits (or triggers) the wave that carries it,
    /// then decodes its slice of the response.
    pub async fn resolve<T: PlanResult>(&self, handle: PlanHandle<T>) -> Result<T, EngineError> {
        let raw = self.await_wave(handle.id).await?;
        T::decode(&raw)
    }

    async fn await_wave(&self, id: u64) -> Result<Value, EngineError> {
        loop {
            let notify = {
                let mut state = self.state.lock().await;
                if let Some(result) = state.results.remove(&id) {
                    return result;
                }
                if state.flush_in_flight {
                    state.flush_done.clone()
                } else {
                    state.flush_in_flight = true;
                    drop(state);
                    // Give sibling resolvers scheduled in this same tick a
                    // chance to submit before the wave is cut (spec §4.8
                    // "collect plans from all currently-resolvable fields").
                    tokio::task::yield_now().await;
                    self.flush().await?;
                    continue;
                }
            };
            notify.notified().await;
        }
    }

    async fn flush(&self) -> Result<(), EngineError> {
        let (ids, tagged): (Vec<u64>, Vec<ClusterTagged>) = {
            let mut state = self.state.lock().await;
            let drained: Vec<(u64, (String, DatastoreQuery))> = state.pending.drain().collect();
            drained
                .into_iter()
                .map(|(id, (cluster, query))| (id, ClusterTagged { cluster, query }))
                .unzip()
        };

        if ids.is_empty() {
            self.finish_wave(HashMap::new()).await;
            return Ok(());
        }

        tracing::debug!(plans = ids.len(), "flushing plan registry wave");

        let outcome = self.dispatcher.dispatch(&self.deadline, tagged).await;
        let mut results = HashMap::with_capacity(ids.len());
        match outcome {
            Ok(responses) => {
                for (id, response) in ids.into_iter().zip(responses.into_iter()) {
                    results.insert(
                        id,
                        match response {
                            QueryResult::Response(value) => Ok(value),
                            QueryResult::Failed(error) => Err(EngineError::from(error)),
                        },
                    );
                }
                self.finish_wave(results).await;
                Ok(())
            }
            Err(error) => {
                let engine_error = EngineError::from(error);
                for id in ids {
                    results.insert(id, Err(engine_error_clone(&engine_error)));
                }
                self.finish_wave(results).await;
                Err(engine_error)
            }
        }
    }

    async fn finish_wave(&self, results: HashMap<u64, Result<Value, EngineError>>) {
        let mut state = self.state.lock().await;
        state.results.extend(results);
        state.flush_in_flight = false;
        let old_notify = std::mem::replace(&mut state.flush_done, Arc::new(Notify::new()));
        drop(state);
        old_notify.notify_waiters();
    }
}

fn engine_error_clone(error: &EngineError) -> EngineError {
    match error {
        EngineError::Validation(message) => EngineError::Validation(message.clone()),
        EngineError::DeadlineExceeded { remaining_ms } => {
            EngineError::DeadlineExceeded { remaining_ms: *remaining_ms }
        }
        EngineError::SearchFailed(message) => EngineError::SearchFailed(message.clone()),
        EngineError::MissingMapping(message) => EngineError::MissingMapping(message.clone()),
        EngineError::Invariant(message) => EngineError::Invariant(message.clone()),
    }
}
