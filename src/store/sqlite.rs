/// SQLite-backed identity cache
use super::{IdentityRecord, LocalStore, PersistRecord, StoreHit, StoredRecord, TimestampEntry};
use crate::cache_req::data::canonical_certificate;
use crate::cache_req::{DomainKey, EntityFamily};
use crate::domain::DomainInfo;
use crate::error::{LookupError, LookupResult};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;

const SELECT_RECORDS: &str = r#"
    SELECT family, name, id, upn, sid, certificate, member_of, attributes,
           modify_stamp, last_refresh,
           (SELECT t.modify_stamp FROM timestamp_cache t
             WHERE t.domain = cache_entry.domain
               AND t.family = cache_entry.family
               AND t.name_key = cache_entry.name_key) AS ts_modify_stamp,
           (SELECT t.written_at FROM timestamp_cache t
             WHERE t.domain = cache_entry.domain
               AND t.family = cache_entry.family
               AND t.name_key = cache_entry.name_key) AS ts_written_at
    FROM cache_entry
"#;

/// Positional parameter for dynamically assembled queries
enum Param {
    Text(String),
    Int(i64),
}

/// Identity cache manager
#[derive(Clone)]
pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Open (or create) the cache database and run migrations
    pub async fn connect(path: &Path) -> LookupResult<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .busy_timeout(Duration::from_secs(5)),
            )
            .await?;

        let store = Self::new(db);
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory cache, used by tests and ephemeral setups
    pub async fn connect_in_memory() -> LookupResult<Self> {
        // A single connection that never idles out keeps the database alive
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self::new(db);
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> LookupResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .map_err(|e| LookupError::Internal(format!("Migration failed: {}", e)))?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Records of one domain matching `condition`
    async fn select(
        &self,
        domain: &str,
        condition: &str,
        params: Vec<Param>,
    ) -> LookupResult<Vec<StoredRecord>> {
        let sql = format!(
            "{} WHERE domain = ? AND {} ORDER BY name_key",
            SELECT_RECORDS, condition
        );

        let mut query = sqlx::query(&sql).bind(domain.to_string());
        for param in params {
            query = match param {
                Param::Text(v) => query.bind(v),
                Param::Int(v) => query.bind(v),
            };
        }

        let rows = query.fetch_all(&self.db).await?;
        rows.iter().map(row_to_stored).collect()
    }

    /// Delete records of one domain matching `condition`, timestamps included
    async fn delete(&self, domain: &str, condition: &str, params: Vec<Param>) -> LookupResult<u64> {
        let ts_sql = format!(
            "DELETE FROM timestamp_cache WHERE domain = ? AND (family, name_key) IN \
             (SELECT family, name_key FROM cache_entry WHERE domain = ? AND {})",
            condition
        );
        let entry_sql = format!("DELETE FROM cache_entry WHERE domain = ? AND {}", condition);

        let mut tx = self.db.begin().await?;

        let mut query = sqlx::query(&ts_sql)
            .bind(domain.to_string())
            .bind(domain.to_string());
        for param in &params {
            query = match param {
                Param::Text(v) => query.bind(v.clone()),
                Param::Int(v) => query.bind(*v),
            };
        }
        query.execute(&mut *tx).await?;

        let mut query = sqlx::query(&entry_sql).bind(domain.to_string());
        for param in params {
            query = match param {
                Param::Text(v) => query.bind(v),
                Param::Int(v) => query.bind(v),
            };
        }
        let deleted = query.execute(&mut *tx).await?.rows_affected();

        tx.commit().await?;
        Ok(deleted)
    }

    async fn user_by_name(&self, domain: &DomainInfo, name: &str) -> LookupResult<Vec<StoredRecord>> {
        self.select(
            &domain.name,
            "family = 'user' AND name_key = ?",
            vec![Param::Text(name.to_string())],
        )
        .await
    }

    async fn user_by_upn(&self, domain: &DomainInfo, upn: &str) -> LookupResult<Vec<StoredRecord>> {
        self.select(
            &domain.name,
            "family = 'user' AND upn_key = ?",
            vec![Param::Text(upn.to_lowercase())],
        )
        .await
    }

    /// A user followed by the cached groups it is a member of
    async fn initgroups(
        &self,
        domain: &DomainInfo,
        users: Vec<StoredRecord>,
    ) -> LookupResult<Option<StoreHit>> {
        let Some(user) = users.into_iter().next() else {
            return Ok(None);
        };

        let group_keys: Vec<String> = user
            .record
            .member_of
            .iter()
            .map(|g| domain.normalize(g))
            .collect();

        let groups = if group_keys.is_empty() {
            Vec::new()
        } else {
            let keys = serde_json::to_string(&group_keys)
                .map_err(|e| LookupError::Store(format!("Cannot encode group list: {}", e)))?;
            self.select(
                &domain.name,
                "family = 'group' AND name_key IN (SELECT value FROM json_each(?))",
                vec![Param::Text(keys)],
            )
            .await?
        };

        let last_refresh = user.last_refresh;
        let mut records = vec![user.record];
        records.extend(groups.into_iter().map(|g| g.record));

        Ok(Some(StoreHit {
            records,
            last_refresh,
        }))
    }

    async fn enumeration(
        &self,
        domain: &DomainInfo,
        family: EntityFamily,
    ) -> LookupResult<Option<StoreHit>> {
        let state = sqlx::query(
            "SELECT last_refresh FROM enum_state WHERE domain = ?1 AND family = ?2",
        )
        .bind(&domain.name)
        .bind(family.as_str())
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = state else {
            return Ok(None);
        };
        let last_refresh = parse_timestamp(&row.try_get::<String, _>("last_refresh")?)?;

        let records = self
            .select(
                &domain.name,
                "family = ?",
                vec![Param::Text(family.as_str().to_string())],
            )
            .await?
            .into_iter()
            .map(|r| r.record)
            .collect();

        Ok(Some(StoreHit {
            records,
            last_refresh,
        }))
    }

    async fn write_record(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        domain: &DomainInfo,
        persist: &PersistRecord,
        now: &str,
    ) -> LookupResult<()> {
        let record = &persist.record;
        let family = record.family.as_str();
        let name_key = domain.normalize(&record.name);

        if persist.plan.attributes {
            // Stored in the same form certificate lookups are keyed by
            let certificate = record
                .certificate
                .as_ref()
                .map(|c| canonical_certificate(c).unwrap_or_else(|_| c.clone()));
            let member_of = serde_json::to_string(&record.member_of)
                .map_err(|e| LookupError::Store(format!("Cannot encode groups: {}", e)))?;
            let attributes = serde_json::to_string(&record.attributes)
                .map_err(|e| LookupError::Store(format!("Cannot encode attributes: {}", e)))?;

            sqlx::query(
                r#"
                INSERT INTO cache_entry (domain, family, name_key, name, id, upn, upn_key, sid,
                                         certificate, member_of, attributes, modify_stamp, last_refresh)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(domain, family, name_key) DO UPDATE SET
                    name = excluded.name,
                    id = excluded.id,
                    upn = excluded.upn,
                    upn_key = excluded.upn_key,
                    sid = excluded.sid,
                    certificate = excluded.certificate,
                    member_of = excluded.member_of,
                    attributes = excluded.attributes,
                    modify_stamp = excluded.modify_stamp,
                    last_refresh = excluded.last_refresh
                "#,
            )
            .bind(&domain.name)
            .bind(family)
            .bind(&name_key)
            .bind(&record.name)
            .bind(record.id.map(i64::from))
            .bind(&record.upn)
            .bind(record.upn.as_ref().map(|u| u.to_lowercase()))
            .bind(record.sid.as_ref().map(|s| s.to_uppercase()))
            .bind(&certificate)
            .bind(&member_of)
            .bind(&attributes)
            .bind(&record.modify_stamp)
            .bind(now)
            .execute(&mut **tx)
            .await?;
        } else {
            // Unchanged record: the backend still vouched for it
            sqlx::query(
                r#"
                UPDATE cache_entry SET last_refresh = ?1
                WHERE domain = ?2 AND family = ?3 AND name_key = ?4
                "#,
            )
            .bind(now)
            .bind(&domain.name)
            .bind(family)
            .bind(&name_key)
            .execute(&mut **tx)
            .await?;
        }

        if persist.plan.timestamp {
            sqlx::query(
                r#"
                INSERT INTO timestamp_cache (domain, family, name_key, modify_stamp, written_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(domain, family, name_key) DO UPDATE SET
                    modify_stamp = excluded.modify_stamp,
                    written_at = excluded.written_at
                "#,
            )
            .bind(&domain.name)
            .bind(family)
            .bind(&name_key)
            .bind(&record.modify_stamp)
            .bind(now)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }

    /// Drop rows matching `condition` that the current write did not touch
    async fn prune_unrefreshed(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        domain: &DomainInfo,
        condition: &str,
        params: &[Param],
        now: &str,
    ) -> LookupResult<u64> {
        let ts_sql = format!(
            "DELETE FROM timestamp_cache WHERE domain = ? AND (family, name_key) IN \
             (SELECT family, name_key FROM cache_entry \
               WHERE domain = ? AND last_refresh < ? AND {})",
            condition
        );
        let entry_sql = format!(
            "DELETE FROM cache_entry WHERE domain = ? AND last_refresh < ? AND {}",
            condition
        );

        let mut query = sqlx::query(&ts_sql)
            .bind(domain.name.clone())
            .bind(domain.name.clone())
            .bind(now.to_string());
        for param in params {
            query = match param {
                Param::Text(v) => query.bind(v.clone()),
                Param::Int(v) => query.bind(*v),
            };
        }
        query.execute(&mut **tx).await?;

        let mut query = sqlx::query(&entry_sql)
            .bind(domain.name.clone())
            .bind(now.to_string());
        for param in params {
            query = match param {
                Param::Text(v) => query.bind(v.clone()),
                Param::Int(v) => query.bind(*v),
            };
        }
        Ok(query.execute(&mut **tx).await?.rows_affected())
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn lookup(&self, domain: &DomainInfo, key: &DomainKey) -> LookupResult<Option<StoreHit>> {
        let records = match key {
            DomainKey::Name { family, name } => {
                self.select(
                    &domain.name,
                    "family = ? AND name_key = ?",
                    vec![
                        Param::Text(family.as_str().to_string()),
                        Param::Text(name.clone()),
                    ],
                )
                .await?
            }
            DomainKey::Upn { upn } => self.user_by_upn(domain, upn).await?,
            DomainKey::Id { family, id } => {
                self.select(
                    &domain.name,
                    "family = ? AND id = ?",
                    vec![
                        Param::Text(family.as_str().to_string()),
                        Param::Int(i64::from(*id)),
                    ],
                )
                .await?
            }
            DomainKey::Cert { cert } => {
                self.select(
                    &domain.name,
                    "family = 'user' AND certificate = ?",
                    vec![Param::Text(cert.clone())],
                )
                .await?
            }
            DomainKey::Sid { sid } => {
                self.select(&domain.name, "sid = ?", vec![Param::Text(sid.clone())])
                    .await?
            }
            DomainKey::Filter { family, pattern } => {
                self.select(
                    &domain.name,
                    "family = ? AND name_key GLOB ?",
                    vec![
                        Param::Text(family.as_str().to_string()),
                        Param::Text(pattern.clone()),
                    ],
                )
                .await?
            }
            DomainKey::Initgroups { name } => {
                let users = self.user_by_name(domain, name).await?;
                return self.initgroups(domain, users).await;
            }
            DomainKey::InitgroupsByUpn { upn } => {
                let users = self.user_by_upn(domain, upn).await?;
                return self.initgroups(domain, users).await;
            }
            DomainKey::Enumerate { family } => return self.enumeration(domain, *family).await,
        };

        // The stalest record governs the whole answer
        let Some(last_refresh) = records.iter().map(|r| r.last_refresh).min() else {
            return Ok(None);
        };

        Ok(Some(StoreHit {
            records: records.into_iter().map(|r| r.record).collect(),
            last_refresh,
        }))
    }

    async fn fetch(
        &self,
        domain: &DomainInfo,
        family: EntityFamily,
        name: &str,
    ) -> LookupResult<Option<StoredRecord>> {
        let mut records = self
            .select(
                &domain.name,
                "family = ? AND name_key = ?",
                vec![
                    Param::Text(family.as_str().to_string()),
                    Param::Text(domain.normalize(name)),
                ],
            )
            .await?;

        Ok(if records.is_empty() {
            None
        } else {
            Some(records.swap_remove(0))
        })
    }

    async fn write_through(
        &self,
        domain: &DomainInfo,
        key: &DomainKey,
        records: &[PersistRecord],
    ) -> LookupResult<()> {
        let now = format_timestamp(Utc::now());
        let mut tx = self.db.begin().await?;

        for persist in records {
            Self::write_record(&mut tx, domain, persist, &now).await?;
        }

        // Enumerations and filters are complete answers: rows the backend
        // no longer returned are gone
        let pruned = match key {
            DomainKey::Enumerate { family } => {
                let params = [Param::Text(family.as_str().to_string())];
                Self::prune_unrefreshed(&mut tx, domain, "family = ?", &params, &now).await?
            }
            DomainKey::Filter { family, pattern } => {
                let params = [
                    Param::Text(family.as_str().to_string()),
                    Param::Text(pattern.clone()),
                ];
                Self::prune_unrefreshed(&mut tx, domain, "family = ? AND name_key GLOB ?", &params, &now)
                    .await?
            }
            _ => 0,
        };
        if pruned > 0 {
            tracing::debug!(domain = %domain.name, key = %key, pruned, "Pruned records missing from backend answer");
        }

        if let DomainKey::Enumerate { family } = key {
            sqlx::query(
                r#"
                INSERT INTO enum_state (domain, family, last_refresh)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(domain, family) DO UPDATE SET
                    last_refresh = excluded.last_refresh
                "#,
            )
            .bind(&domain.name)
            .bind(family.as_str())
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn invalidate(&self, domain: &DomainInfo, key: &DomainKey) -> LookupResult<u64> {
        match key {
            DomainKey::Name { family, name } => {
                self.delete(
                    &domain.name,
                    "family = ? AND name_key = ?",
                    vec![
                        Param::Text(family.as_str().to_string()),
                        Param::Text(name.clone()),
                    ],
                )
                .await
            }
            DomainKey::Initgroups { name } => {
                self.delete(
                    &domain.name,
                    "family = 'user' AND name_key = ?",
                    vec![Param::Text(name.clone())],
                )
                .await
            }
            DomainKey::Upn { upn } | DomainKey::InitgroupsByUpn { upn } => {
                self.delete(
                    &domain.name,
                    "family = 'user' AND upn_key = ?",
                    vec![Param::Text(upn.to_lowercase())],
                )
                .await
            }
            DomainKey::Id { family, id } => {
                self.delete(
                    &domain.name,
                    "family = ? AND id = ?",
                    vec![
                        Param::Text(family.as_str().to_string()),
                        Param::Int(i64::from(*id)),
                    ],
                )
                .await
            }
            DomainKey::Cert { cert } => {
                self.delete(
                    &domain.name,
                    "family = 'user' AND certificate = ?",
                    vec![Param::Text(cert.clone())],
                )
                .await
            }
            DomainKey::Sid { sid } => {
                self.delete(&domain.name, "sid = ?", vec![Param::Text(sid.clone())])
                    .await
            }
            DomainKey::Filter { family, pattern } => {
                self.delete(
                    &domain.name,
                    "family = ? AND name_key GLOB ?",
                    vec![
                        Param::Text(family.as_str().to_string()),
                        Param::Text(pattern.clone()),
                    ],
                )
                .await
            }
            // Enumeration refreshes never report absence
            DomainKey::Enumerate { .. } => Ok(0),
        }
    }

    async fn cleanup_expired(&self, cutoff: DateTime<Utc>) -> LookupResult<u64> {
        let cutoff = format_timestamp(cutoff);
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM timestamp_cache WHERE (domain, family, name_key) IN
                (SELECT domain, family, name_key FROM cache_entry WHERE last_refresh < ?1)
            "#,
        )
        .bind(&cutoff)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM cache_entry WHERE last_refresh < ?1")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM enum_state WHERE last_refresh < ?1")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted)
    }

    async fn ping(&self) -> LookupResult<()> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}

fn row_to_stored(row: &SqliteRow) -> LookupResult<StoredRecord> {
    let family: EntityFamily = row.try_get::<String, _>("family")?.parse()?;
    let id = row
        .try_get::<Option<i64>, _>("id")?
        .map(u32::try_from)
        .transpose()
        .map_err(|e| LookupError::Store(format!("Invalid cached id: {}", e)))?;
    let member_of = serde_json::from_str(&row.try_get::<String, _>("member_of")?)
        .map_err(|e| LookupError::Store(format!("Corrupt group list: {}", e)))?;
    let attributes = serde_json::from_str(&row.try_get::<String, _>("attributes")?)
        .map_err(|e| LookupError::Store(format!("Corrupt attributes: {}", e)))?;

    let record = IdentityRecord {
        family,
        name: row.try_get("name")?,
        id,
        upn: row.try_get("upn")?,
        sid: row.try_get("sid")?,
        certificate: row.try_get("certificate")?,
        member_of,
        attributes,
        modify_stamp: row.try_get("modify_stamp")?,
    };

    let timestamp = match row.try_get::<Option<String>, _>("ts_written_at")? {
        Some(written_at) => Some(TimestampEntry {
            modify_stamp: row.try_get("ts_modify_stamp")?,
            written_at: parse_timestamp(&written_at)?,
        }),
        None => None,
    };

    Ok(StoredRecord {
        record,
        last_refresh: parse_timestamp(&row.try_get::<String, _>("last_refresh")?)?,
        timestamp,
    })
}

/// Fixed-width RFC3339 so that text comparison orders by time
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> LookupResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LookupError::Store(format!("Invalid timestamp: {}", e)))
}
