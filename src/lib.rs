/// Identity lookup cache orchestrator
///
/// Answers user, group, SID and certificate lookups from a local cache,
/// a negative cache and one or more remote identity domains.

pub mod api;
pub mod backend;
pub mod cache_req;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod ncache;
pub mod server;
pub mod store;

pub use error::{LookupError, LookupResult};
