use std::collections::HashMap;

use schema_view::IndexDefinition;
use serde::Deserialize;

use crate::error::EngineError;

/// Which grouping strategy sub-aggregations compile to (spec §4.3,
/// selected per-process rather than per-request since it depends on the
/// target datastore version).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingAdapterKind {
    Composite,
    NonComposite,
}

fn default_enforce_read_only() -> bool {
    true
}

/// The `GraphqlEngineConfig` block (spec §6 "Configuration"), loaded once
/// per process the same way `ontology-engine` loads `OntologyConfig` from
/// YAML/JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphqlEngineConfig {
    #[serde(rename = "timeoutInMs")]
    pub timeout_in_ms: u64,
    #[serde(rename = "defaultPageSize")]
    pub default_page_size: u32,
    #[serde(rename = "maxPageSize")]
    pub max_page_size: u32,
    #[serde(rename = "indexDefinitions")]
    #[serde(default)]
    pub index_definitions: HashMap<String, IndexDefinition>,
    #[serde(rename = "subAggregationGroupingAdapter")]
    pub sub_aggregation_grouping_adapter: GroupingAdapterKind,
    #[serde(rename = "enforceMsearchReadOnly")]
    #[serde(default = "default_enforce_read_only")]
    pub enforce_msearch_read_only: bool,
    /// Not itself part of spec §6's configuration block (cluster
    /// provisioning is an out-of-scope collaborator per spec §8), but the
    /// dispatcher needs a concrete URL per logical cluster name to run at
    /// all, so this engine carries the map as a supplement.
    #[serde(rename = "clusterUrls")]
    #[serde(default)]
    pub cluster_urls: HashMap<String, String>,
}

impl GraphqlEngineConfig {
    pub fn from_yaml(source: &str) -> Result<Self, EngineError> {
        serde_yaml::from_str(source).map_err(|e| EngineError::Invariant(format!("invalid config: {e}")))
    }

    pub fn from_json(source: &str) -> Result<Self, EngineError> {
        serde_json::from_str(source).map_err(|e| EngineError::Invariant(format!("invalid config: {e}")))
    }

    /// Clamps a caller-requested page size against `default_page_size`/
    /// `max_page_size` (spec §6).
    pub fn effective_page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_page_size)
            .min(self.max_page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
timeoutInMs: 5000
defaultPageSize: 10
maxPageSize: 100
subAggregationGroupingAdapter: non_composite
indexDefinitions:
  widgets:
    logical_name: widgets
    queryCluster: main
clusterUrls:
  main: "http://localhost:9200"
"#
    }

    #[test]
    fn loads_from_yaml() {
        let config = GraphqlEngineConfig::from_yaml(sample_yaml()).unwrap();
        assert_eq!(config.timeout_in_ms, 5000);
        assert_eq!(config.sub_aggregation_grouping_adapter, GroupingAdapterKind::NonComposite);
        assert_eq!(config.cluster_urls.get("main").unwrap(), "http://localhost:9200");
        assert!(config.enforce_msearch_read_only, "defaults to the safe read-only setting");
    }

    #[test]
    fn clamps_page_size_to_the_configured_maximum() {
        let config = GraphqlEngineConfig::from_yaml(sample_yaml()).unwrap();
        assert_eq!(config.effective_page_size(Some(500)), 100);
        assert_eq!(config.effective_page_size(None), 10);
        assert_eq!(config.effective_page_size(Some(20)), 20);
    }
}
