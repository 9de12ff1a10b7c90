/// Request descriptor: what a cache request is looking up
use crate::domain::DomainInfo;
use crate::error::{LookupError, LookupResult};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum accepted length of a name, UPN or filter
pub const MAX_NAME_LENGTH: usize = 255;

/// Entity families held in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityFamily {
    User,
    Group,
}

impl EntityFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityFamily::User => "user",
            EntityFamily::Group => "group",
        }
    }
}

impl FromStr for EntityFamily {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(EntityFamily::User),
            "group" => Ok(EntityFamily::Group),
            other => Err(LookupError::Store(format!("Unknown entity family: {}", other))),
        }
    }
}

/// Lookup variants served by the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheReqType {
    UserByName,
    UserByUpn,
    UserById,
    UserByCert,
    UserByFilter,
    GroupByName,
    GroupById,
    GroupByFilter,
    Initgroups,
    InitgroupsByUpn,
    ObjectBySid,
    EnumUsers,
    EnumGroups,
}

/// Shape of the key a request type takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyShape {
    Name,
    Id,
    Cert,
    Sid,
    Filter,
    Nothing,
}

impl CacheReqType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheReqType::UserByName => "user_by_name",
            CacheReqType::UserByUpn => "user_by_upn",
            CacheReqType::UserById => "user_by_id",
            CacheReqType::UserByCert => "user_by_cert",
            CacheReqType::UserByFilter => "user_by_filter",
            CacheReqType::GroupByName => "group_by_name",
            CacheReqType::GroupById => "group_by_id",
            CacheReqType::GroupByFilter => "group_by_filter",
            CacheReqType::Initgroups => "initgroups",
            CacheReqType::InitgroupsByUpn => "initgroups_by_upn",
            CacheReqType::ObjectBySid => "object_by_sid",
            CacheReqType::EnumUsers => "enum_users",
            CacheReqType::EnumGroups => "enum_groups",
        }
    }

    /// Entity family searched; `None` for SID lookups which match either
    pub fn family(&self) -> Option<EntityFamily> {
        match self {
            CacheReqType::UserByName
            | CacheReqType::UserByUpn
            | CacheReqType::UserById
            | CacheReqType::UserByCert
            | CacheReqType::UserByFilter
            | CacheReqType::Initgroups
            | CacheReqType::InitgroupsByUpn
            | CacheReqType::EnumUsers => Some(EntityFamily::User),
            CacheReqType::GroupByName
            | CacheReqType::GroupById
            | CacheReqType::GroupByFilter
            | CacheReqType::EnumGroups => Some(EntityFamily::Group),
            CacheReqType::ObjectBySid => None,
        }
    }

    pub fn key_shape(&self) -> KeyShape {
        match self {
            CacheReqType::UserByName
            | CacheReqType::UserByUpn
            | CacheReqType::GroupByName
            | CacheReqType::Initgroups
            | CacheReqType::InitgroupsByUpn => KeyShape::Name,
            CacheReqType::UserById | CacheReqType::GroupById => KeyShape::Id,
            CacheReqType::UserByCert => KeyShape::Cert,
            CacheReqType::ObjectBySid => KeyShape::Sid,
            CacheReqType::UserByFilter | CacheReqType::GroupByFilter => KeyShape::Filter,
            CacheReqType::EnumUsers | CacheReqType::EnumGroups => KeyShape::Nothing,
        }
    }

    pub fn is_enumeration(&self) -> bool {
        matches!(self, CacheReqType::EnumUsers | CacheReqType::EnumGroups)
    }

    /// Filter and enumeration requests aggregate every domain
    pub fn is_multi_domain(&self) -> bool {
        matches!(
            self,
            CacheReqType::UserByFilter
                | CacheReqType::GroupByFilter
                | CacheReqType::EnumUsers
                | CacheReqType::EnumGroups
        )
    }

    /// Only keyed single-object lookups are remembered as absent
    pub fn uses_negative_cache(&self) -> bool {
        !self.is_multi_domain()
    }
}

/// How hard the backend result write-back tries to avoid cache churn
///
/// Ordered: `None < CompareAttributeValues < CompareModifyStamp`. A level may
/// be lowered while a request runs but never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    /// Always write both the durable and the timestamp cache
    None = 0,
    /// Compare returned attribute values with the stored ones
    CompareAttributeValues = 1,
    /// Compare the modify stamp first, then attribute values
    CompareModifyStamp = 2,
}

impl OptLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => OptLevel::None,
            1 => OptLevel::CompareAttributeValues,
            _ => OptLevel::CompareModifyStamp,
        }
    }
}

impl FromStr for OptLevel {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(OptLevel::None),
            "attr_val" | "attribute_values" => Ok(OptLevel::CompareAttributeValues),
            "modstamp" | "modify_stamp" => Ok(OptLevel::CompareModifyStamp),
            other => Err(LookupError::Config(format!(
                "Unknown optimization level: {}",
                other
            ))),
        }
    }
}

/// Lookup key, one variant per key shape
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LookupKey {
    Name(String),
    Id(u32),
    /// Base64 DER, whitespace and PEM armour stripped
    Cert(String),
    Sid { sid: String, attrs: Vec<String> },
    Filter(String),
    Enumeration,
}

impl LookupKey {
    fn shape(&self) -> KeyShape {
        match self {
            LookupKey::Name(_) => KeyShape::Name,
            LookupKey::Id(_) => KeyShape::Id,
            LookupKey::Cert(_) => KeyShape::Cert,
            LookupKey::Sid { .. } => KeyShape::Sid,
            LookupKey::Filter(_) => KeyShape::Filter,
            LookupKey::Enumeration => KeyShape::Nothing,
        }
    }
}

/// Key after domain normalisation; this is what the store, the negative
/// cache, the backend and the in-flight registry see
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DomainKey {
    Name { family: EntityFamily, name: String },
    Upn { upn: String },
    Id { family: EntityFamily, id: u32 },
    Cert { cert: String },
    Sid { sid: String },
    Filter { family: EntityFamily, pattern: String },
    Initgroups { name: String },
    InitgroupsByUpn { upn: String },
    Enumerate { family: EntityFamily },
}

impl DomainKey {
    pub fn is_enumeration(&self) -> bool {
        matches!(self, DomainKey::Enumerate { .. })
    }

    /// Cached rows cannot prove they are the complete answer for this key
    pub fn bypasses_cache(&self) -> bool {
        matches!(self, DomainKey::Filter { .. })
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainKey::Name { family, name } => write!(f, "{}:name:{}", family.as_str(), name),
            DomainKey::Upn { upn } => write!(f, "user:upn:{}", upn),
            DomainKey::Id { family, id } => write!(f, "{}:id:{}", family.as_str(), id),
            DomainKey::Cert { cert } => write!(f, "user:cert:{}", cert),
            DomainKey::Sid { sid } => write!(f, "object:sid:{}", sid),
            DomainKey::Filter { family, pattern } => {
                write!(f, "{}:filter:{}", family.as_str(), pattern)
            }
            DomainKey::Initgroups { name } => write!(f, "initgr:name:{}", name),
            DomainKey::InitgroupsByUpn { upn } => write!(f, "initgr:upn:{}", upn),
            DomainKey::Enumerate { family } => write!(f, "{}:enum", family.as_str()),
        }
    }
}

/// Immutable description of one cache request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheReqData {
    req_type: CacheReqType,
    key: LookupKey,
    opt_level: OptLevel,
}

impl CacheReqData {
    /// Name-keyed request (name, UPN, initgroups)
    pub fn name(req_type: CacheReqType, opt_level: OptLevel, name: &str) -> LookupResult<Self> {
        let name = validate_name(name)?;
        Self::build(req_type, opt_level, LookupKey::Name(name))
    }

    pub fn id(req_type: CacheReqType, opt_level: OptLevel, id: u32) -> LookupResult<Self> {
        Self::build(req_type, opt_level, LookupKey::Id(id))
    }

    /// Certificate request; accepts PEM or bare base64
    pub fn cert(req_type: CacheReqType, opt_level: OptLevel, pem: &str) -> LookupResult<Self> {
        let cert = canonical_certificate(pem)?;
        Self::build(req_type, opt_level, LookupKey::Cert(cert))
    }

    /// SID request with the attributes the caller wants returned
    ///
    /// An empty attribute list returns every attribute.
    pub fn sid(
        req_type: CacheReqType,
        opt_level: OptLevel,
        sid: &str,
        attrs: &[&str],
    ) -> LookupResult<Self> {
        let sid = validate_sid(sid)?;
        let mut wanted: Vec<String> = Vec::new();
        for attr in attrs.iter().map(|a| a.trim()).filter(|a| !a.is_empty()) {
            if !wanted.iter().any(|w| w == attr) {
                wanted.push(attr.to_string());
            }
        }
        Self::build(req_type, opt_level, LookupKey::Sid { sid, attrs: wanted })
    }

    pub fn filter(req_type: CacheReqType, opt_level: OptLevel, filter: &str) -> LookupResult<Self> {
        let filter = validate_filter(filter)?;
        Self::build(req_type, opt_level, LookupKey::Filter(filter))
    }

    pub fn enumeration(req_type: CacheReqType, opt_level: OptLevel) -> LookupResult<Self> {
        Self::build(req_type, opt_level, LookupKey::Enumeration)
    }

    fn build(req_type: CacheReqType, opt_level: OptLevel, key: LookupKey) -> LookupResult<Self> {
        if req_type.key_shape() != key.shape() {
            return Err(LookupError::InvalidInput(format!(
                "{} does not take a {:?} key",
                req_type.as_str(),
                key.shape()
            )));
        }

        Ok(Self {
            req_type,
            key,
            opt_level,
        })
    }

    pub fn req_type(&self) -> CacheReqType {
        self.req_type
    }

    pub fn key(&self) -> &LookupKey {
        &self.key
    }

    pub fn opt_level(&self) -> OptLevel {
        self.opt_level
    }

    /// Attributes requested by a SID lookup
    pub fn requested_attrs(&self) -> &[String] {
        match &self.key {
            LookupKey::Sid { attrs, .. } => attrs,
            _ => &[],
        }
    }

    /// Name normalised to the domain's rules, for name-keyed requests only
    pub fn lookup_name(&self, domain: &DomainInfo) -> Option<String> {
        match (&self.key, self.req_type) {
            (LookupKey::Name(name), CacheReqType::UserByUpn | CacheReqType::InitgroupsByUpn) => {
                Some(name.to_lowercase())
            }
            (LookupKey::Name(name), _) => Some(domain.normalize(name)),
            _ => None,
        }
    }

    /// Key as seen inside one domain
    pub fn domain_key(&self, domain: &DomainInfo) -> DomainKey {
        let family = self.req_type.family().unwrap_or(EntityFamily::User);
        match (&self.key, self.req_type) {
            (LookupKey::Name(name), CacheReqType::UserByUpn) => DomainKey::Upn {
                upn: name.to_lowercase(),
            },
            (LookupKey::Name(name), CacheReqType::InitgroupsByUpn) => DomainKey::InitgroupsByUpn {
                upn: name.to_lowercase(),
            },
            (LookupKey::Name(name), CacheReqType::Initgroups) => DomainKey::Initgroups {
                name: domain.normalize(name),
            },
            (LookupKey::Name(name), _) => DomainKey::Name {
                family,
                name: domain.normalize(name),
            },
            (LookupKey::Id(id), _) => DomainKey::Id { family, id: *id },
            (LookupKey::Cert(cert), _) => DomainKey::Cert { cert: cert.clone() },
            (LookupKey::Sid { sid, .. }, _) => DomainKey::Sid { sid: sid.clone() },
            (LookupKey::Filter(pattern), _) => DomainKey::Filter {
                family,
                pattern: domain.normalize(pattern),
            },
            (LookupKey::Enumeration, _) => DomainKey::Enumerate { family },
        }
    }
}

fn validate_name(name: &str) -> LookupResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LookupError::InvalidInput("Name cannot be empty".to_string()));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(LookupError::InvalidInput(format!(
            "Name too long (max {} characters)",
            MAX_NAME_LENGTH
        )));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(LookupError::InvalidInput(
            "Name contains control characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

fn validate_sid(sid: &str) -> LookupResult<String> {
    let sid = sid.trim().to_uppercase();
    let mut parts = sid.split('-');
    let valid = parts.next() == Some("S")
        && {
            let rest: Vec<&str> = parts.collect();
            rest.len() >= 2
                && rest
                    .iter()
                    .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
        };

    if !valid {
        return Err(LookupError::InvalidInput(format!("Malformed SID: {}", sid)));
    }
    Ok(sid)
}

fn validate_filter(filter: &str) -> LookupResult<String> {
    let filter = filter.trim();
    if filter.is_empty() {
        return Err(LookupError::InvalidInput("Filter cannot be empty".to_string()));
    }
    if filter.len() > MAX_NAME_LENGTH {
        return Err(LookupError::InvalidInput("Filter too long".to_string()));
    }
    let allowed = |c: char| c.is_alphanumeric() || matches!(c, '*' | '.' | '-' | '_' | '@' | '$');
    if !filter.chars().all(allowed) {
        return Err(LookupError::InvalidInput(format!(
            "Filter contains unsupported characters: {}",
            filter
        )));
    }
    Ok(filter.to_string())
}

/// Strip PEM armour and whitespace, check the body decodes, re-encode
pub fn canonical_certificate(pem: &str) -> LookupResult<String> {
    let body: String = pem
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("-----"))
        .collect();

    if body.is_empty() {
        return Err(LookupError::InvalidInput("Certificate is empty".to_string()));
    }

    let der = STANDARD
        .decode(body.as_bytes())
        .map_err(|e| LookupError::InvalidInput(format!("Invalid certificate encoding: {}", e)))?;

    if der.is_empty() {
        return Err(LookupError::InvalidInput("Certificate is empty".to_string()));
    }

    Ok(STANDARD.encode(der))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainConfig;

    fn domain(case_sensitive: bool) -> DomainInfo {
        let mut config = DomainConfig::new("ldap.example", "http://ldap");
        config.case_sensitive = case_sensitive;
        DomainInfo::from_config(&config)
    }

    #[test]
    fn test_key_must_match_type() {
        assert!(CacheReqData::name(CacheReqType::UserByName, OptLevel::None, "alice").is_ok());
        assert!(matches!(
            CacheReqData::name(CacheReqType::UserById, OptLevel::None, "alice"),
            Err(LookupError::InvalidInput(_))
        ));
        assert!(CacheReqData::id(CacheReqType::GroupByName, OptLevel::None, 10).is_err());
        assert!(CacheReqData::enumeration(CacheReqType::UserByName, OptLevel::None).is_err());
        assert!(CacheReqData::enumeration(CacheReqType::EnumGroups, OptLevel::None).is_ok());
    }

    #[test]
    fn test_name_validation() {
        assert!(CacheReqData::name(CacheReqType::UserByName, OptLevel::None, "   ").is_err());
        assert!(CacheReqData::name(CacheReqType::UserByName, OptLevel::None, "a\u{7}b").is_err());
        let long = "a".repeat(MAX_NAME_LENGTH + 1);
        assert!(CacheReqData::name(CacheReqType::UserByName, OptLevel::None, &long).is_err());
    }

    #[test]
    fn test_certificate_canonical_form() {
        let pem = "-----BEGIN CERTIFICATE-----\nAAEC\nAwQF\n-----END CERTIFICATE-----\n";
        let data = CacheReqData::cert(CacheReqType::UserByCert, OptLevel::None, pem).unwrap();
        assert_eq!(data.key(), &LookupKey::Cert("AAECAwQF".to_string()));

        assert!(CacheReqData::cert(CacheReqType::UserByCert, OptLevel::None, "not base64!").is_err());
        assert!(CacheReqData::cert(CacheReqType::UserByCert, OptLevel::None, "").is_err());
    }

    #[test]
    fn test_sid_validation_and_attrs() {
        let data = CacheReqData::sid(
            CacheReqType::ObjectBySid,
            OptLevel::None,
            "s-1-5-21-1004",
            &["mail", " ", "mail", "gecos"],
        )
        .unwrap();
        assert_eq!(data.requested_attrs(), &["mail".to_string(), "gecos".to_string()]);
        assert!(matches!(data.key(), LookupKey::Sid { sid, .. } if sid == "S-1-5-21-1004"));

        assert!(CacheReqData::sid(CacheReqType::ObjectBySid, OptLevel::None, "S-1", &[]).is_err());
        assert!(CacheReqData::sid(CacheReqType::ObjectBySid, OptLevel::None, "X-1-5", &[]).is_err());
        assert!(CacheReqData::sid(CacheReqType::ObjectBySid, OptLevel::None, "S-1-x-3", &[]).is_err());
    }

    #[test]
    fn test_filter_validation() {
        assert!(CacheReqData::filter(CacheReqType::UserByFilter, OptLevel::None, "adm*").is_ok());
        assert!(CacheReqData::filter(CacheReqType::UserByFilter, OptLevel::None, "a%b").is_err());
        assert!(CacheReqData::filter(CacheReqType::UserByFilter, OptLevel::None, "a[b]").is_err());
    }

    #[test]
    fn test_domain_key_normalisation() {
        let data = CacheReqData::name(CacheReqType::UserByName, OptLevel::None, "Alice").unwrap();
        assert_eq!(
            data.domain_key(&domain(false)),
            DomainKey::Name {
                family: EntityFamily::User,
                name: "alice".to_string()
            }
        );
        assert_eq!(data.lookup_name(&domain(true)), Some("Alice".to_string()));

        let upn = CacheReqData::name(CacheReqType::UserByUpn, OptLevel::None, "Alice@REALM").unwrap();
        assert_eq!(
            upn.domain_key(&domain(true)),
            DomainKey::Upn {
                upn: "alice@realm".to_string()
            }
        );

        let id = CacheReqData::id(CacheReqType::GroupById, OptLevel::None, 42).unwrap();
        assert_eq!(id.lookup_name(&domain(true)), None);
        assert_eq!(id.domain_key(&domain(true)).to_string(), "group:id:42");
    }

    #[test]
    fn test_opt_level_order_and_parsing() {
        assert!(OptLevel::None < OptLevel::CompareAttributeValues);
        assert!(OptLevel::CompareAttributeValues < OptLevel::CompareModifyStamp);
        assert_eq!("attr_val".parse::<OptLevel>().unwrap(), OptLevel::CompareAttributeValues);
        assert_eq!("MODSTAMP".parse::<OptLevel>().unwrap(), OptLevel::CompareModifyStamp);
        assert!("fastest".parse::<OptLevel>().is_err());
        assert_eq!(OptLevel::from_u8(OptLevel::None.as_u8()), OptLevel::None);
    }

    #[test]
    fn test_request_classes() {
        assert!(CacheReqType::EnumUsers.is_multi_domain());
        assert!(CacheReqType::GroupByFilter.is_multi_domain());
        assert!(!CacheReqType::UserByName.is_multi_domain());
        assert!(CacheReqType::UserByCert.uses_negative_cache());
        assert!(!CacheReqType::UserByFilter.uses_negative_cache());
        assert_eq!(CacheReqType::ObjectBySid.family(), None);
    }
}
