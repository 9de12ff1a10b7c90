/// Local persistent cache of identity records
///
/// The durable cache keeps the full records; the timestamp cache keeps what
/// the fast path needs to decide whether a record changed (modify stamp and
/// when it was last written).

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::cache_req::{DomainKey, EntityFamily, PersistPlan};
use crate::domain::DomainInfo;
use crate::error::LookupResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One identity record (user or group)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub family: EntityFamily,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    /// Names of the groups a user belongs to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub member_of: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modify_stamp: Option<String>,
}

impl IdentityRecord {
    pub fn user(name: &str, uid: u32) -> Self {
        Self::new(EntityFamily::User, name, uid)
    }

    pub fn group(name: &str, gid: u32) -> Self {
        Self::new(EntityFamily::Group, name, gid)
    }

    fn new(family: EntityFamily, name: &str, id: u32) -> Self {
        Self {
            family,
            name: name.to_string(),
            id: Some(id),
            upn: None,
            sid: None,
            certificate: None,
            member_of: Vec::new(),
            attributes: BTreeMap::new(),
            modify_stamp: None,
        }
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attributes
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    pub fn with_upn(mut self, upn: &str) -> Self {
        self.upn = Some(upn.to_string());
        self
    }

    pub fn with_sid(mut self, sid: &str) -> Self {
        self.sid = Some(sid.to_string());
        self
    }

    pub fn with_certificate(mut self, cert: &str) -> Self {
        self.certificate = Some(cert.to_string());
        self
    }

    pub fn with_member_of(mut self, group: &str) -> Self {
        self.member_of.push(group.to_string());
        self
    }

    pub fn with_modify_stamp(mut self, stamp: &str) -> Self {
        self.modify_stamp = Some(stamp.to_string());
        self
    }

    /// Canonical bytes of everything the backend controls except the
    /// modify stamp; two records with equal digests are identical
    pub fn attribute_digest(&self) -> Vec<u8> {
        let view = serde_json::json!({
            "name": self.name,
            "id": self.id,
            "upn": self.upn,
            "sid": self.sid,
            "certificate": self.certificate,
            "member_of": self.member_of,
            "attributes": self.attributes,
        });
        serde_json::to_vec(&view).unwrap_or_default()
    }

    /// Copy keeping only the listed free-form attributes
    pub fn project(&self, attrs: &[String]) -> Self {
        if attrs.is_empty() {
            return self.clone();
        }
        let mut projected = self.clone();
        projected.attributes.retain(|k, _| attrs.iter().any(|a| a == k));
        projected
    }
}

/// Record as held in the durable cache
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub record: IdentityRecord,
    /// Last time a backend vouched for this record
    pub last_refresh: DateTime<Utc>,
    pub timestamp: Option<TimestampEntry>,
}

/// Timestamp cache row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampEntry {
    pub modify_stamp: Option<String>,
    pub written_at: DateTime<Utc>,
}

/// Records found for a key plus the refresh time that governs them
#[derive(Debug, Clone)]
pub struct StoreHit {
    pub records: Vec<IdentityRecord>,
    pub last_refresh: DateTime<Utc>,
}

/// Record handed to write-through with its persistence plan
#[derive(Debug, Clone)]
pub struct PersistRecord {
    pub record: IdentityRecord,
    pub plan: PersistPlan,
}

/// Durable identity cache shared by every request
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Records for a key; `None` when the cache holds nothing usable
    async fn lookup(&self, domain: &DomainInfo, key: &DomainKey) -> LookupResult<Option<StoreHit>>;

    /// Single record by family and name, with its timestamp cache row
    async fn fetch(
        &self,
        domain: &DomainInfo,
        family: EntityFamily,
        name: &str,
    ) -> LookupResult<Option<StoredRecord>>;

    /// Persist backend results according to each record's plan
    async fn write_through(
        &self,
        domain: &DomainInfo,
        key: &DomainKey,
        records: &[PersistRecord],
    ) -> LookupResult<()>;

    /// Drop cached records matching a key the backend no longer knows
    async fn invalidate(&self, domain: &DomainInfo, key: &DomainKey) -> LookupResult<u64>;

    /// Delete records not refreshed since `cutoff`
    async fn cleanup_expired(&self, cutoff: DateTime<Utc>) -> LookupResult<u64>;

    async fn ping(&self) -> LookupResult<()>;
}
