/// Orders and filters the domains a request visits
use super::{DomainInfo, DomainRegistry};
use crate::error::{LookupError, LookupResult};
use std::collections::VecDeque;
use std::sync::Arc;

/// Candidate domains for one request, consumed front to back
///
/// The order is the precedence contract for first-match lookups: the
/// orchestrator stops at the first domain that yields records.
#[derive(Debug, Clone)]
pub struct DomainSelector {
    candidates: VecDeque<Arc<DomainInfo>>,
}

impl DomainSelector {
    /// Build the candidate sequence
    ///
    /// An explicit domain yields exactly that domain. A disabled domain is
    /// treated as absent.
    pub fn new(registry: &DomainRegistry, explicit: Option<&str>) -> LookupResult<Self> {
        let candidates = match explicit {
            Some(name) => {
                let domain = registry
                    .get(name)
                    .filter(|d| d.enabled)
                    .ok_or_else(|| LookupError::DomainNotFound(name.to_string()))?;
                VecDeque::from(vec![domain])
            }
            None => registry.enabled().into(),
        };

        Ok(Self { candidates })
    }

    /// Candidates in visiting order, without consuming them
    pub fn candidates(&self) -> impl Iterator<Item = &Arc<DomainInfo>> {
        self.candidates.iter()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

impl Iterator for DomainSelector {
    type Item = Arc<DomainInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        self.candidates.pop_front()
    }
}
