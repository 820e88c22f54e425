mod aggregation;
mod cursor;
mod error;
mod optimizer;
mod query;

pub use aggregation::{
    composite_after_key_present, decode_aggregations, encode_aggregations, AdapterKind,
    AggregatedValueFunction, AggregatedValueSpec, AggregationNode, CompositeAdapter, CountDetail,
    DateGroupingOutput, DateOffset, DecodedBucket, Exactness, Grouping, GroupingAdapter,
    NonCompositeAdapter, TruncationUnit,
};
pub use cursor::{
    decode_cursor, decode_grouping_cursor, encode_cursor, encode_grouping_cursor,
    is_singleton_cursor, singleton_cursor,
};
pub use error::PlanError;
pub use optimizer::QueryOptimizer;
pub use query::{render_filter, DatastoreQuery, IndexTarget, Pagination, RoutingSet, SortKey, SortOrder};
