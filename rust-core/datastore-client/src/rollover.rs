use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use schema_view::RolloverGranularity;
use tokio::sync::{Mutex, RwLock};

use crate::error::DispatchError;

/// One concrete rollover slice: a physical index name and the half-open
/// time range `[range_start, range_end)` it covers (spec GLOSSARY).
#[derive(Debug, Clone, PartialEq)]
pub struct RolloverSlice {
    pub index_name: String,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
}

impl RolloverSlice {
    pub fn overlaps(&self, gte: Option<DateTime<Utc>>, lt: Option<DateTime<Utc>>) -> bool {
        let after_start = lt.map(|lt| self.range_start < lt).unwrap_or(true);
        let before_end = gte.map(|gte| self.range_end > gte).unwrap_or(true);
        after_start && before_end
    }
}

/// Discovers the concrete rollover slices backing a logical index, e.g. by
/// calling the datastore's `_cat/indices` API and parsing the rollover
/// naming convention. Out of scope per spec §1 ("indexing pipeline"); this
/// crate only consumes the result.
#[async_trait]
pub trait RolloverSource: Send + Sync {
    async fn fetch_slices(&self, logical_name: &str) -> Result<Vec<RolloverSlice>, DispatchError>;
}

/// One logical index's rollover shape as the source needs it: which
/// cluster to ask and how to parse the date out of each concrete index
/// name it gets back.
#[derive(Debug, Clone)]
struct WatchedIndex {
    cluster_url: String,
    granularity: RolloverGranularity,
}

/// Production `RolloverSource`: discovers concrete rollover slices by
/// calling the datastore's `_cat/indices` API (grounded on the teacher's
/// `elasticsearch`/`reqwest` transport choice in `client.rs`) and parsing
/// the rollover naming convention (`{logical_name}_rollover__{date}`,
/// date format keyed by the index's configured granularity). This is the
/// one piece of this crate that reaches into "how the indexing pipeline
/// names its indices" — an out-of-scope collaborator per spec §1 — so it
/// only ever reads, never assumes write access.
pub struct CatIndicesRolloverSource {
    http: reqwest::Client,
    watched: HashMap<String, WatchedIndex>,
}

impl CatIndicesRolloverSource {
    pub fn new(watched: HashMap<String, (String, RolloverGranularity)>) -> Self {
        Self {
            http: reqwest::Client::new(),
            watched: watched
                .into_iter()
                .map(|(name, (cluster_url, granularity))| (name, WatchedIndex { cluster_url, granularity }))
                .collect(),
        }
    }
}

fn parse_slice(logical_name: &str, index_name: &str, granularity: RolloverGranularity) -> Option<RolloverSlice> {
    let date_fragment = index_name.rsplit("__").next()?;
    let (range_start, range_end) = match granularity {
        RolloverGranularity::Day => {
            let date = chrono::NaiveDate::parse_from_str(date_fragment, "%Y-%m-%d").ok()?;
            let start = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?);
            (start, start + chrono::Duration::days(1))
        }
        RolloverGranularity::Month => {
            let date = chrono::NaiveDate::parse_from_str(&format!("{date_fragment}-01"), "%Y-%m-%d").ok()?;
            let start = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?);
            let next_month = if date.month() == 12 {
                chrono::NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)?
            } else {
                chrono::NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)?
            };
            (start, Utc.from_utc_datetime(&next_month.and_hms_opt(0, 0, 0)?))
        }
        RolloverGranularity::Year => {
            let year: i32 = date_fragment.parse().ok()?;
            let start = Utc.from_utc_datetime(&chrono::NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)?);
            let end = Utc.from_utc_datetime(&chrono::NaiveDate::from_ymd_opt(year + 1, 1, 1)?.and_hms_opt(0, 0, 0)?);
            (start, end)
        }
    };
    Some(RolloverSlice { index_name: index_name.to_string(), range_start, range_end })
        .filter(|_| index_name.starts_with(&format!("{logical_name}_rollover__")))
}

#[async_trait]
impl RolloverSource for CatIndicesRolloverSource {
    async fn fetch_slices(&self, logical_name: &str) -> Result<Vec<RolloverSlice>, DispatchError> {
        let Some(watched) = self.watched.get(logical_name) else { return Ok(vec![]) };

        let url = format!("{}/_cat/indices/{logical_name}_rollover__*?format=json", watched.cluster_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(watched.cluster_url.clone(), e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(vec![]);
        }
        if !response.status().is_success() {
            let status = response.status();
            return Err(DispatchError::SearchFailed(watched.cluster_url.clone(), format!("_cat/indices returned {status}")));
        }

        let body: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| DispatchError::MalformedResponse(watched.cluster_url.clone(), e.to_string()))?;

        Ok(body
            .iter()
            .filter_map(|row| row.get("index").and_then(serde_json::Value::as_str))
            .filter_map(|name| parse_slice(logical_name, name, watched.granularity))
            .collect())
    }
}

/// Read-mostly cache of rollover slices per logical index (spec §5: "a
/// small cached projection of known rollover indices per cluster"), kept
/// current by a guarded single-flight refresh so concurrent requests for
/// the same logical index never trigger more than one in-flight refresh
/// (spec §5 "Shared resource policy"). Generalizes the teacher's
/// `SyncService` background-task idiom (`indexing/src/sync.rs`) from an
/// event-channel push model to a periodic pull, since rollover-index
/// discovery has no natural write-event to subscribe to from this layer.
pub struct RolloverCache {
    slices: RwLock<HashMap<String, Vec<RolloverSlice>>>,
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    source: Arc<dyn RolloverSource>,
}

impl RolloverCache {
    pub fn new(source: Arc<dyn RolloverSource>) -> Self {
        Self {
            slices: RwLock::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
            source,
        }
    }

    /// Returns the cached slices for `logical_name`, populating the cache
    /// on first access. Never mutates on the hot path beyond that initial
    /// fill — refreshing a warm entry is the job of `spawn_refresh_loop`.
    pub async fn slices_for(&self, logical_name: &str) -> Result<Vec<RolloverSlice>, DispatchError> {
        if let Some(cached) = self.slices.read().await.get(logical_name) {
            return Ok(cached.clone());
        }
        self.refresh(logical_name).await
    }

    /// At most one in-flight refresh per logical index: concurrent callers
    /// for the same key share the same per-key lock and so serialize
    /// behind the first refresh rather than each issuing their own.
    async fn refresh(&self, logical_name: &str) -> Result<Vec<RolloverSlice>, DispatchError> {
        let key_lock = {
            let mut locks = self.refresh_locks.lock().await;
            locks
                .entry(logical_name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = key_lock.lock().await;

        // Another caller may have completed the refresh while we waited on
        // `_guard`; re-check before hitting the source again.
        if let Some(cached) = self.slices.read().await.get(logical_name) {
            return Ok(cached.clone());
        }

        let fetched = self.source.fetch_slices(logical_name).await?;
        self.slices
            .write()
            .await
            .insert(logical_name.to_string(), fetched.clone());
        Ok(fetched)
    }

    /// Spawns a background task that periodically refreshes every logical
    /// index currently cached, bounding how stale the rollover projection
    /// can get without putting a refresh on any request's critical path.
    pub fn spawn_refresh_loop(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                let keys: Vec<String> = cache.slices.read().await.keys().cloned().collect();
                for key in keys {
                    if let Err(error) = cache.refresh(&key).await {
                        tracing::warn!(index = %key, %error, "rollover cache refresh failed");
                    }
                }
            }
        })
    }
}
