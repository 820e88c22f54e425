mod client;
mod deadline;
mod dispatcher;
mod error;
mod rollover;
mod wire;

pub use client::{DatastoreClient, ElasticsearchDatastoreClient, ReqwestDatastoreClient};
pub use deadline::Deadline;
pub use dispatcher::{ClusterTagged, MsearchDispatcher, QueryResult};
pub use error::DispatchError;
pub use rollover::{CatIndicesRolloverSource, RolloverCache, RolloverSlice, RolloverSource};
pub use wire::{decode_msearch_responses, encode_msearch_envelope, synthetic_empty_response, MsearchResponse};

#[cfg(any(test, feature = "test-util"))]
pub use client::ScriptedDatastoreClient;
