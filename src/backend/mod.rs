/// Backend clients: authoritative identity sources behind each domain
///
/// The orchestrator only ever talks to a backend through `BackendClient`.
/// Transport failures are reported separately from "not found" so a
/// flaky backend is never mistaken for an absent entry.

pub mod http;

pub use http::HttpBackend;

use crate::cache_req::{DomainKey, EntityFamily};
use crate::domain::DomainInfo;
use crate::store::IdentityRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Answer to a refresh or enumeration call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendReply {
    pub found: bool,
    pub records: Vec<IdentityRecord>,
    /// Whether the backend maintains a modify stamp on its records
    pub supports_modstamp: bool,
}

impl BackendReply {
    pub fn found(records: Vec<IdentityRecord>, supports_modstamp: bool) -> Self {
        Self {
            found: !records.is_empty(),
            records,
            supports_modstamp,
        }
    }

    pub fn not_found() -> Self {
        Self {
            found: false,
            records: Vec::new(),
            supports_modstamp: true,
        }
    }
}

/// Backend transport errors; both kinds are soft, per-domain failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unavailable(String),

    #[error("backend protocol error: {0}")]
    Protocol(String),
}

impl BackendError {
    /// Whether the failure says the backend itself is down
    pub fn is_offline(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Targeted refresh of the records matching `key`
    async fn refresh(&self, domain: &DomainInfo, key: &DomainKey) -> BackendResult<BackendReply>;

    /// Full enumeration of one entity family
    async fn enumerate(&self, domain: &DomainInfo, family: EntityFamily)
        -> BackendResult<BackendReply>;

    /// Cheap reachability check
    async fn ping(&self, domain: &DomainInfo) -> BackendResult<()>;
}
