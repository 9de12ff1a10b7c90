/// Lookup entry points
///
/// Each lookup validates its key, builds the request descriptor and picks
/// first-match or all-domain extraction.
use super::{CacheReq, CacheReqData, CacheReqType, CacheRequestResult, OptLevel, ReqOptions};
use crate::config::ResponderConfig;
use crate::domain::DomainInfo;
use crate::error::{LookupError, LookupResult};
use std::sync::Arc;
use tracing::debug;

/// Responder-wide request defaults
#[derive(Debug, Clone)]
pub struct LookupDefaults {
    pub cache_refresh_percent: u8,
    pub opt_level: OptLevel,
    pub enumerate: bool,
}

impl From<&ResponderConfig> for LookupDefaults {
    fn from(config: &ResponderConfig) -> Self {
        Self {
            cache_refresh_percent: config.cache_refresh_percent,
            opt_level: config.optimization_level,
            enumerate: config.enumerate,
        }
    }
}

impl Default for LookupDefaults {
    fn default() -> Self {
        Self::from(&ResponderConfig::default())
    }
}

#[derive(Clone)]
pub struct Plugins {
    cache_req: Arc<CacheReq>,
    defaults: LookupDefaults,
}

impl Plugins {
    pub fn new(cache_req: Arc<CacheReq>, defaults: LookupDefaults) -> Self {
        Self {
            cache_req,
            defaults,
        }
    }

    pub fn cache_req(&self) -> &Arc<CacheReq> {
        &self.cache_req
    }

    fn options(&self, domain: Option<String>, all_domains: bool) -> ReqOptions {
        ReqOptions {
            domain,
            cache_refresh_percent: self.defaults.cache_refresh_percent,
            all_domains,
        }
    }

    async fn single(&self, data: CacheReqData, domain: Option<String>) -> LookupResult<CacheRequestResult> {
        self.cache_req
            .send_single(data, self.options(domain, false))
            .await
    }

    async fn multi(&self, data: CacheReqData, domain: Option<String>) -> LookupResult<Vec<CacheRequestResult>> {
        self.cache_req.send(data, self.options(domain, true)).await
    }

    /// Split a possibly qualified name and reconcile it with an explicit domain
    fn qualify(&self, name: &str, explicit: Option<&str>) -> LookupResult<(String, Option<String>, bool)> {
        let parsed = self.cache_req.registry().parse_name(name);
        let qualified = parsed.domain.is_some();
        let domain = merge_domain(explicit, parsed.domain.as_deref())?;
        Ok((parsed.name, domain, qualified))
    }

    pub async fn user_by_name(&self, name: &str, domain: Option<&str>) -> LookupResult<CacheRequestResult> {
        let (short, domain, qualified) = self.qualify(name, domain)?;
        let data = CacheReqData::name(CacheReqType::UserByName, self.defaults.opt_level, &short)?;

        match self.single(data, domain.clone()).await {
            // `user@realm` with an unknown realm may be a UPN
            Err(e) if e.is_not_found() && !qualified && short.contains('@') => {
                debug!(name = %short, "No user by that name, trying UPN");
                self.user_by_upn(&short, domain.as_deref()).await
            }
            other => other,
        }
    }

    pub async fn user_by_name_all(&self, name: &str, domain: Option<&str>) -> LookupResult<Vec<CacheRequestResult>> {
        let (short, domain, _) = self.qualify(name, domain)?;
        let data = CacheReqData::name(CacheReqType::UserByName, self.defaults.opt_level, &short)?;
        self.multi(data, domain).await
    }

    pub async fn user_by_upn(&self, upn: &str, domain: Option<&str>) -> LookupResult<CacheRequestResult> {
        let data = CacheReqData::name(CacheReqType::UserByUpn, self.defaults.opt_level, upn)?;
        self.single(data, domain.map(str::to_string)).await
    }

    pub async fn user_by_id(&self, uid: u32, domain: Option<&str>) -> LookupResult<CacheRequestResult> {
        let data = CacheReqData::id(CacheReqType::UserById, self.defaults.opt_level, uid)?;
        self.single(data, domain.map(str::to_string)).await
    }

    pub async fn user_by_id_all(&self, uid: u32, domain: Option<&str>) -> LookupResult<Vec<CacheRequestResult>> {
        let data = CacheReqData::id(CacheReqType::UserById, self.defaults.opt_level, uid)?;
        self.multi(data, domain.map(str::to_string)).await
    }

    /// User owning a certificate (PEM or bare base64)
    pub async fn user_by_cert(&self, pem: &str, domain: Option<&str>) -> LookupResult<CacheRequestResult> {
        let data = CacheReqData::cert(CacheReqType::UserByCert, self.defaults.opt_level, pem)?;
        self.single(data, domain.map(str::to_string)).await
    }

    pub async fn user_by_filter(&self, filter: &str, domain: Option<&str>) -> LookupResult<Vec<CacheRequestResult>> {
        let data = CacheReqData::filter(CacheReqType::UserByFilter, self.defaults.opt_level, filter)?;
        self.multi(data, domain.map(str::to_string)).await
    }

    pub async fn group_by_name(&self, name: &str, domain: Option<&str>) -> LookupResult<CacheRequestResult> {
        let (short, domain, _) = self.qualify(name, domain)?;
        let data = CacheReqData::name(CacheReqType::GroupByName, self.defaults.opt_level, &short)?;
        self.single(data, domain).await
    }

    pub async fn group_by_name_all(&self, name: &str, domain: Option<&str>) -> LookupResult<Vec<CacheRequestResult>> {
        let (short, domain, _) = self.qualify(name, domain)?;
        let data = CacheReqData::name(CacheReqType::GroupByName, self.defaults.opt_level, &short)?;
        self.multi(data, domain).await
    }

    pub async fn group_by_id(&self, gid: u32, domain: Option<&str>) -> LookupResult<CacheRequestResult> {
        let data = CacheReqData::id(CacheReqType::GroupById, self.defaults.opt_level, gid)?;
        self.single(data, domain.map(str::to_string)).await
    }

    pub async fn group_by_id_all(&self, gid: u32, domain: Option<&str>) -> LookupResult<Vec<CacheRequestResult>> {
        let data = CacheReqData::id(CacheReqType::GroupById, self.defaults.opt_level, gid)?;
        self.multi(data, domain.map(str::to_string)).await
    }

    pub async fn group_by_filter(&self, filter: &str, domain: Option<&str>) -> LookupResult<Vec<CacheRequestResult>> {
        let data = CacheReqData::filter(CacheReqType::GroupByFilter, self.defaults.opt_level, filter)?;
        self.multi(data, domain.map(str::to_string)).await
    }

    /// User and the groups it belongs to
    ///
    /// Group membership feeds access control, so backend data is always
    /// persisted in full.
    pub async fn initgroups_by_name(&self, name: &str, domain: Option<&str>) -> LookupResult<CacheRequestResult> {
        let (short, domain, _) = self.qualify(name, domain)?;
        let data = CacheReqData::name(CacheReqType::Initgroups, OptLevel::None, &short)?;
        self.single(data, domain).await
    }

    pub async fn initgroups_by_upn(&self, upn: &str, domain: Option<&str>) -> LookupResult<CacheRequestResult> {
        let data = CacheReqData::name(CacheReqType::InitgroupsByUpn, OptLevel::None, upn)?;
        self.single(data, domain.map(str::to_string)).await
    }

    /// User or group by SID; an empty `attrs` returns every attribute
    pub async fn object_by_sid(
        &self,
        sid: &str,
        attrs: &[&str],
        domain: Option<&str>,
    ) -> LookupResult<CacheRequestResult> {
        let data = CacheReqData::sid(CacheReqType::ObjectBySid, self.defaults.opt_level, sid, attrs)?;
        self.single(data, domain.map(str::to_string)).await
    }

    pub async fn enum_users(&self, domain: Option<&str>) -> LookupResult<Vec<CacheRequestResult>> {
        self.enumerate(CacheReqType::EnumUsers, domain).await
    }

    pub async fn enum_groups(&self, domain: Option<&str>) -> LookupResult<Vec<CacheRequestResult>> {
        self.enumerate(CacheReqType::EnumGroups, domain).await
    }

    async fn enumerate(&self, req_type: CacheReqType, domain: Option<&str>) -> LookupResult<Vec<CacheRequestResult>> {
        if !self.defaults.enumerate {
            debug!(req_type = req_type.as_str(), "Enumeration disabled");
            return Ok(Vec::new());
        }

        let data = CacheReqData::enumeration(req_type, self.defaults.opt_level)?;
        self.multi(data, domain.map(str::to_string)).await
    }
}

/// Explicit domain and name qualification must agree
fn merge_domain(explicit: Option<&str>, qualified: Option<&DomainInfo>) -> LookupResult<Option<String>> {
    match (explicit, qualified) {
        (Some(explicit), Some(qualified)) if !explicit.eq_ignore_ascii_case(&qualified.name) => {
            Err(LookupError::InvalidInput(format!(
                "Name is qualified with {} but domain {} was requested",
                qualified.name, explicit
            )))
        }
        (_, Some(qualified)) => Ok(Some(qualified.name.clone())),
        (explicit, None) => Ok(explicit.map(str::to_string)),
    }
}
