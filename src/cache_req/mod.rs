/// Cache request orchestration
///
/// A request names what to look up (`data`), is driven through the
/// configured domains by the orchestrator, and yields per-domain results
/// (`result`). `policy` decides freshness and persistence, `inflight`
/// keeps backend refreshes single-flight, `plugins` are the lookup entry
/// points.

pub mod data;
pub mod inflight;
pub mod orchestrator;
pub mod plugins;
pub mod policy;
pub mod result;

pub use data::{CacheReqData, CacheReqType, DomainKey, EntityFamily, KeyShape, LookupKey, OptLevel};
pub use inflight::{InflightRefreshes, RefreshOutcome};
pub use orchestrator::{CacheReq, ReqOptions};
pub use plugins::{LookupDefaults, Plugins};
pub use policy::{Freshness, PersistPlan, RefreshPolicy};
pub use result::{copy_limited, page, CacheRequestResult, LimitedResult};
