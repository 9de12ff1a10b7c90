/// Identity domains
///
/// A domain is one configured source of identity records: a backend plus
/// its slice of the local cache. The registry keeps them in priority order
/// and tracks whether each backend is currently reachable.

pub mod selector;

pub use selector::DomainSelector;

use crate::config::DomainConfig;
use crate::error::{LookupError, LookupResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// One configured identity domain
#[derive(Debug)]
pub struct DomainInfo {
    pub name: String,
    pub backend_url: String,
    pub enabled: bool,
    pub case_sensitive: bool,
    /// Record lifetime in seconds
    pub entry_cache_timeout: u64,
    pub cache_refresh_percent: Option<u8>,
    pub negative_ttl: Option<u64>,
    online: AtomicBool,
}

impl DomainInfo {
    pub fn from_config(config: &DomainConfig) -> Self {
        Self {
            name: config.name.clone(),
            backend_url: config.backend_url.trim_end_matches('/').to_string(),
            enabled: config.enabled,
            case_sensitive: config.case_sensitive,
            entry_cache_timeout: config.entry_cache_timeout,
            cache_refresh_percent: config.cache_refresh_percent,
            negative_ttl: config.negative_ttl,
            online: AtomicBool::new(true),
        }
    }

    /// Apply the domain's name rules (case folding)
    pub fn normalize(&self, name: &str) -> String {
        let name = name.trim();
        if self.case_sensitive {
            name.to_string()
        } else {
            name.to_lowercase()
        }
    }

    /// Refresh percentage for this domain, falling back to the request's
    pub fn refresh_percent(&self, requested: u8) -> u8 {
        self.cache_refresh_percent.unwrap_or(requested).min(100)
    }

    /// Negative cache TTL for this domain, falling back to the responder's
    pub fn negative_ttl(&self, default_ttl: u64) -> u64 {
        self.negative_ttl.unwrap_or(default_ttl)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::Relaxed);
        if was != online {
            info!(
                domain = %self.name,
                "Domain is now {}",
                if online { "online" } else { "offline" }
            );
        }
    }
}

/// Name split into its short part and the domain it was qualified with
#[derive(Debug, Clone)]
pub struct ParsedName {
    pub name: String,
    pub domain: Option<Arc<DomainInfo>>,
}

/// Configured domains in priority order
#[derive(Debug, Clone)]
pub struct DomainRegistry {
    domains: Vec<Arc<DomainInfo>>,
}

impl DomainRegistry {
    pub fn new(configs: &[DomainConfig]) -> Self {
        Self {
            domains: configs
                .iter()
                .map(|c| Arc::new(DomainInfo::from_config(c)))
                .collect(),
        }
    }

    /// Look up a configured domain by name (case-insensitive)
    pub fn get(&self, name: &str) -> Option<Arc<DomainInfo>> {
        self.domains
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Enabled domains in priority order
    pub fn enabled(&self) -> Vec<Arc<DomainInfo>> {
        self.domains.iter().filter(|d| d.enabled).cloned().collect()
    }

    /// Every configured domain, enabled or not
    pub fn all(&self) -> &[Arc<DomainInfo>] {
        &self.domains
    }

    /// Domain names in priority order
    pub fn list(&self) -> Vec<String> {
        self.domains.iter().map(|d| d.name.clone()).collect()
    }

    /// Online status of a domain's backend
    pub fn is_online(&self, name: &str) -> LookupResult<bool> {
        self.get(name)
            .map(|d| d.is_online())
            .ok_or_else(|| LookupError::DomainNotFound(name.to_string()))
    }

    /// Split `name@domain` when `domain` is configured
    ///
    /// Anything else, including names carrying an unknown `@suffix`, is
    /// returned unqualified.
    pub fn parse_name(&self, input: &str) -> ParsedName {
        let input = input.trim();
        if let Some((short, suffix)) = input.rsplit_once('@') {
            if let Some(domain) = self.get(suffix) {
                if !short.is_empty() {
                    return ParsedName {
                        name: short.to_string(),
                        domain: Some(domain),
                    };
                }
            }
        }

        ParsedName {
            name: input.to_string(),
            domain: None,
        }
    }
}
