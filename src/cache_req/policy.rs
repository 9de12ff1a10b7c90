/// Refresh policy: cache freshness and how backend results are persisted
use super::OptLevel;
use crate::domain::DomainInfo;
use crate::store::{IdentityRecord, StoredRecord};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// State of cached data relative to its domain's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Serve as is
    Fresh,
    /// Serve, and refresh in the background
    Midpoint,
    /// Refresh before answering
    Expired,
    /// Nothing cached
    Missing,
}

impl Freshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Midpoint => "midpoint",
            Freshness::Expired => "expired",
            Freshness::Missing => "miss",
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(self, Freshness::Fresh | Freshness::Midpoint)
    }
}

/// Classify cached data last refreshed at `last_refresh`
///
/// `refresh_percent` of 0 disables the midpoint refresh.
pub fn freshness(
    domain: &DomainInfo,
    last_refresh: Option<DateTime<Utc>>,
    refresh_percent: u8,
    now: DateTime<Utc>,
) -> Freshness {
    let Some(last_refresh) = last_refresh else {
        return Freshness::Missing;
    };

    let lifetime = domain.entry_cache_timeout;
    // Clock skew may put the refresh in the future
    let elapsed = (now - last_refresh).num_seconds().max(0) as u64;

    if lifetime == 0 || elapsed >= lifetime {
        return Freshness::Expired;
    }

    let percent = u64::from(domain.refresh_percent(refresh_percent));
    if percent > 0 && elapsed.saturating_mul(100) > lifetime.saturating_mul(percent) {
        return Freshness::Midpoint;
    }

    Freshness::Fresh
}

/// One-way optimisation level ratchet for a backend
#[derive(Debug)]
pub struct OptRatchet {
    level: AtomicU8,
}

impl OptRatchet {
    pub fn new(level: OptLevel) -> Self {
        Self {
            level: AtomicU8::new(level.as_u8()),
        }
    }

    pub fn get(&self) -> OptLevel {
        OptLevel::from_u8(self.level.load(Ordering::Acquire))
    }

    /// Lower the ceiling to `to`; a higher value is ignored
    ///
    /// Returns the previous level.
    pub fn downgrade(&self, to: OptLevel) -> OptLevel {
        let prev = OptLevel::from_u8(self.level.fetch_min(to.as_u8(), Ordering::AcqRel));
        debug_assert!(self.get() <= prev);
        prev
    }
}

/// Persistence decision for one backend record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistPlan {
    /// Rewrite the durable record's attributes
    pub attributes: bool,
    /// Rewrite the timestamp cache row
    pub timestamp: bool,
}

impl PersistPlan {
    pub fn full() -> Self {
        Self {
            attributes: true,
            timestamp: true,
        }
    }

    pub fn skip() -> Self {
        Self {
            attributes: false,
            timestamp: false,
        }
    }
}

/// Per-backend optimisation ceilings, shared by every request
#[derive(Debug, Default)]
pub struct RefreshPolicy {
    ratchets: RwLock<HashMap<String, Arc<OptRatchet>>>,
}

impl RefreshPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    fn ratchet(&self, domain: &str) -> Arc<OptRatchet> {
        if let Some(r) = self
            .ratchets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(domain)
        {
            return r.clone();
        }

        self.ratchets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(OptRatchet::new(OptLevel::CompareModifyStamp)))
            .clone()
    }

    /// Current ceiling for a backend
    pub fn ceiling(&self, domain: &str) -> OptLevel {
        self.ratchet(domain).get()
    }

    /// Level a request actually gets: never above what it asked for
    pub fn effective_level(&self, domain: &str, requested: OptLevel) -> OptLevel {
        requested.min(self.ceiling(domain))
    }

    /// Record what a backend said about its capabilities
    ///
    /// Returns true when this call lowered the ceiling.
    pub fn observe_backend(&self, domain: &str, supports_modstamp: bool) -> bool {
        if supports_modstamp {
            return false;
        }

        let ratchet = self.ratchet(domain);
        let prev = ratchet.downgrade(OptLevel::CompareAttributeValues);
        let lowered = prev > ratchet.get();
        if lowered {
            info!(
                domain = %domain,
                from = ?prev,
                to = ?ratchet.get(),
                "Backend lacks modify stamps, optimisation level downgraded"
            );
        }
        lowered
    }
}

/// Decide how to persist `new` given what is stored for it
pub fn persist_plan(
    level: OptLevel,
    new: &IdentityRecord,
    stored: Option<&StoredRecord>,
) -> PersistPlan {
    let Some(stored) = stored else {
        return PersistPlan::full();
    };

    match level {
        OptLevel::None => PersistPlan::full(),
        OptLevel::CompareAttributeValues => compare_attributes(new, stored),
        OptLevel::CompareModifyStamp => {
            let stored_stamp = stored
                .timestamp
                .as_ref()
                .and_then(|t| t.modify_stamp.as_deref())
                .or(stored.record.modify_stamp.as_deref());

            match (new.modify_stamp.as_deref(), stored_stamp) {
                (Some(new_stamp), Some(old_stamp)) if new_stamp == old_stamp => PersistPlan::skip(),
                _ => compare_attributes(new, stored),
            }
        }
    }
}

fn compare_attributes(new: &IdentityRecord, stored: &StoredRecord) -> PersistPlan {
    PersistPlan {
        attributes: true,
        timestamp: new.attribute_digest() != stored.record.attribute_digest(),
    }
}
