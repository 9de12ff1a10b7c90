/// Configuration management for the identity cache responder
use crate::cache_req::OptLevel;
use crate::error::{LookupError, LookupResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub responder: ResponderConfig,
    pub domains: Vec<DomainConfig>,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub cache_db: PathBuf,
}

/// Responder-wide lookup defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderConfig {
    /// Percentage of a record's lifetime after which a background refresh
    /// is started; 0 disables it
    pub cache_refresh_percent: u8,
    /// Negative cache TTL in seconds
    pub negative_ttl: u64,
    /// Optimization level requested by name-service style lookups
    pub optimization_level: OptLevel,
    /// HTTP backend timeout in seconds
    pub backend_timeout: u64,
    /// Allow enumeration requests
    pub enumerate: bool,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            cache_refresh_percent: 0,
            negative_ttl: 15,
            optimization_level: OptLevel::CompareModifyStamp,
            backend_timeout: 10,
            enumerate: false,
        }
    }
}

/// Per-domain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    pub name: String,
    pub backend_url: String,
    pub enabled: bool,
    pub case_sensitive: bool,
    /// Record lifetime in seconds
    pub entry_cache_timeout: u64,
    /// Overrides the responder refresh percentage for this domain
    pub cache_refresh_percent: Option<u8>,
    /// Overrides the responder negative cache TTL for this domain
    pub negative_ttl: Option<u64>,
}

impl DomainConfig {
    /// Domain with default settings, mostly useful for tests and local setups
    pub fn new(name: &str, backend_url: &str) -> Self {
        Self {
            name: name.to_string(),
            backend_url: backend_url.to_string(),
            enabled: true,
            case_sensitive: true,
            entry_cache_timeout: 5400,
            cache_refresh_percent: None,
            negative_ttl: None,
        }
    }

    fn from_env(name: &str) -> LookupResult<Self> {
        let prefix = format!("IDC_DOMAIN_{}_", env_key(name));
        let var = |suffix: &str| env::var(format!("{}{}", prefix, suffix)).ok();

        let backend_url = var("BACKEND_URL")
            .unwrap_or_else(|| format!("http://127.0.0.1:8087/{}", name));
        let enabled = var("ENABLED")
            .and_then(|v| v.parse().ok())
            .unwrap_or(true);
        let case_sensitive = var("CASE_SENSITIVE")
            .and_then(|v| v.parse().ok())
            .unwrap_or(true);
        let entry_cache_timeout = var("ENTRY_CACHE_TIMEOUT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(5400);
        let cache_refresh_percent = match var("CACHE_REFRESH_PERCENT") {
            Some(v) => Some(v.parse().map_err(|_| {
                LookupError::Config(format!("Invalid refresh percentage for domain {}", name))
            })?),
            None => None,
        };
        let negative_ttl = var("NEGATIVE_TTL").and_then(|v| v.parse().ok());

        Ok(Self {
            name: name.to_string(),
            backend_url,
            enabled,
            case_sensitive,
            entry_cache_timeout,
            cache_refresh_percent,
            negative_ttl,
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> LookupResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("IDC_HOSTNAME").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("IDC_PORT")
            .unwrap_or_else(|_| "8086".to_string())
            .parse()
            .map_err(|_| LookupError::Config("Invalid port number".to_string()))?;
        let version = env!("CARGO_PKG_VERSION").to_string();

        let cache_db = env::var("IDC_CACHE_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/cache.sqlite"));

        let cache_refresh_percent = env::var("IDC_CACHE_REFRESH_PERCENT")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .map_err(|_| LookupError::Config("Invalid cache refresh percentage".to_string()))?;
        let negative_ttl = env::var("IDC_NEGATIVE_TTL")
            .unwrap_or_else(|_| "15".to_string())
            .parse()
            .unwrap_or(15);
        let optimization_level = env::var("IDC_OPTIMIZATION_LEVEL")
            .unwrap_or_else(|_| "modstamp".to_string())
            .parse()?;
        let backend_timeout = env::var("IDC_BACKEND_TIMEOUT")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);
        let enumerate = env::var("IDC_ENUMERATE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let domains = env::var("IDC_DOMAINS")
            .unwrap_or_else(|_| "local".to_string())
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(DomainConfig::from_env)
            .collect::<LookupResult<Vec<_>>>()?;

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig { cache_db },
            responder: ResponderConfig {
                cache_refresh_percent,
                negative_ttl,
                optimization_level,
                backend_timeout,
                enumerate,
            },
            domains,
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> LookupResult<()> {
        if self.service.hostname.is_empty() {
            return Err(LookupError::Config("Hostname cannot be empty".to_string()));
        }

        if self.service.port == 0 {
            return Err(LookupError::Config("Port cannot be zero".to_string()));
        }

        if self.domains.is_empty() {
            return Err(LookupError::Config(
                "At least one domain must be configured".to_string(),
            ));
        }

        if self.responder.cache_refresh_percent > 100 {
            return Err(LookupError::Config(
                "Cache refresh percentage must be between 0 and 100".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for domain in &self.domains {
            if !seen.insert(domain.name.to_lowercase()) {
                return Err(LookupError::Config(format!(
                    "Domain {} configured more than once",
                    domain.name
                )));
            }
            if domain.cache_refresh_percent.map_or(false, |p| p > 100) {
                return Err(LookupError::Config(format!(
                    "Cache refresh percentage of domain {} must be between 0 and 100",
                    domain.name
                )));
            }
        }

        Ok(())
    }
}

/// Environment variable fragment for a domain name
fn env_key(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
