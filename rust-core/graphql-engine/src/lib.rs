pub mod aggregation_builder;
pub mod aggregation_resolver;
pub mod config;
pub mod connection;
pub mod error;
pub mod plan_registry;
pub mod query_builder;
pub mod relationship;
pub mod scalars;
pub mod schema_builder;

pub use config::GraphqlEngineConfig;
pub use error::EngineError;
