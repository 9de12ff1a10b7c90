/// JSON-over-HTTP data provider client
use super::{BackendClient, BackendError, BackendReply, BackendResult};
use crate::cache_req::{DomainKey, EntityFamily};
use crate::domain::DomainInfo;
use crate::error::{LookupError, LookupResult};
use crate::store::IdentityRecord;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Body of a successful backend answer
#[derive(Debug, Deserialize)]
struct WireReply {
    #[serde(default)]
    records: Vec<IdentityRecord>,
    #[serde(default = "default_supports_modstamp")]
    supports_modstamp: bool,
}

fn default_supports_modstamp() -> bool {
    true
}

/// Backend client speaking to one HTTP data provider per domain
#[derive(Clone)]
pub struct HttpBackend {
    http_client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(timeout: Duration) -> LookupResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("identity-cache-req/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| LookupError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    /// `{base}/{segments...}` with each segment percent-encoded
    fn endpoint(domain: &DomainInfo, segments: &[&str]) -> BackendResult<Url> {
        let mut url = Url::parse(&domain.backend_url).map_err(|e| {
            BackendError::Protocol(format!("Invalid backend URL {}: {}", domain.backend_url, e))
        })?;

        url.path_segments_mut()
            .map_err(|_| {
                BackendError::Protocol(format!("Backend URL {} cannot be a base", domain.backend_url))
            })?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }

    fn collection(family: EntityFamily) -> &'static str {
        match family {
            EntityFamily::User => "users",
            EntityFamily::Group => "groups",
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> BackendResult<BackendReply> {
        let response = request.send().await.map_err(transport_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(BackendReply::not_found()),
            status if status.is_success() => {
                let reply: WireReply = response
                    .json()
                    .await
                    .map_err(|e| BackendError::Protocol(format!("Invalid backend reply: {}", e)))?;
                Ok(BackendReply::found(reply.records, reply.supports_modstamp))
            }
            status => Err(BackendError::Protocol(format!(
                "Backend returned status {}",
                status
            ))),
        }
    }
}

#[async_trait]
impl BackendClient for HttpBackend {
    async fn refresh(&self, domain: &DomainInfo, key: &DomainKey) -> BackendResult<BackendReply> {
        let url = match key {
            DomainKey::Name { family, name } => {
                Self::endpoint(domain, &[Self::collection(*family), "name", name.as_str()])?
            }
            DomainKey::Upn { upn } => Self::endpoint(domain, &["users", "upn", upn.as_str()])?,
            DomainKey::Id { family, id } => {
                Self::endpoint(domain, &[Self::collection(*family), "id", id.to_string().as_str()])?
            }
            DomainKey::Cert { cert } => {
                let url = Self::endpoint(domain, &["users", "cert"])?;
                debug!(domain = %domain.name, "Refreshing by certificate");
                return self
                    .send(
                        self.http_client
                            .post(url)
                            .json(&serde_json::json!({ "certificate": cert })),
                    )
                    .await;
            }
            DomainKey::Sid { sid } => Self::endpoint(domain, &["objects", "sid", sid.as_str()])?,
            DomainKey::Filter { family, pattern } => {
                Self::endpoint(domain, &[Self::collection(*family), "filter", pattern.as_str()])?
            }
            DomainKey::Initgroups { name } => Self::endpoint(domain, &["initgroups", name.as_str()])?,
            DomainKey::InitgroupsByUpn { upn } => {
                Self::endpoint(domain, &["initgroups", "upn", upn.as_str()])?
            }
            DomainKey::Enumerate { family } => return self.enumerate(domain, *family).await,
        };

        debug!(domain = %domain.name, key = %key, url = %url, "Refreshing from backend");
        self.send(self.http_client.get(url)).await
    }

    async fn enumerate(
        &self,
        domain: &DomainInfo,
        family: EntityFamily,
    ) -> BackendResult<BackendReply> {
        let url = Self::endpoint(domain, &[Self::collection(family)])?;
        debug!(domain = %domain.name, url = %url, "Enumerating backend");

        let reply = self.send(self.http_client.get(url)).await?;
        // An empty directory is a complete answer, not an absence
        Ok(BackendReply {
            found: true,
            ..reply
        })
    }

    async fn ping(&self, domain: &DomainInfo) -> BackendResult<()> {
        let url = Self::endpoint(domain, &["health"])?;
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().is_server_error() {
            return Err(BackendError::Unavailable(format!(
                "Backend health returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

fn transport_error(e: reqwest::Error) -> BackendError {
    if e.is_decode() || e.is_body() {
        BackendError::Protocol(e.to_string())
    } else {
        BackendError::Unavailable(e.to_string())
    }
}
