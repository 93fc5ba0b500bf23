//! Hash-chained audit trail.
//!
//! Every entry stores `hash = SHA256(prev_hash || payload)` where `payload`
//! is the canonical JSON of the entry's columns, so a rewritten or removed
//! row breaks the chain from that point on.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

pub mod auditable;
pub use auditable::{AuditStatus, Auditable};

/// Ambient request metadata captured with audit entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl RequestContext {
    /// Extract context from request headers. The socket address, when known,
    /// is applied afterwards with [`RequestContext::with_ip`].
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        let ip = header("x-forwarded-for")
            .and_then(|s| s.split(',').next().map(|first| first.trim().to_string()))
            .filter(|s| !s.is_empty())
            .or_else(|| header("x-real-ip"));

        Self {
            ip,
            user_agent: header(axum::http::header::USER_AGENT.as_str()),
            request_id: header("x-request-id"),
            session_id: header("x-session-id"),
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub context: RequestContext,
}

impl AuditEntry {
    pub fn new(action: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: None,
            actor_id: None,
            old_values: None,
            new_values: None,
            status: AuditStatus::Success,
            error_message: None,
            context: RequestContext::default(),
        }
    }

    /// Successful change to `entity`, optionally with its previous state.
    pub fn change<T: Auditable>(action: &str, actor_id: Uuid, entity: &T, old: Option<&T>) -> Self {
        let mut entry = Self::new(action, T::resource_type())
            .actor(Some(actor_id))
            .resource(entity.resource_id());
        entry.new_values = Some(entity.audit_snapshot());
        entry.old_values = old.map(Auditable::audit_snapshot);
        entry
    }

    pub fn actor(mut self, actor_id: Option<Uuid>) -> Self {
        self.actor_id = actor_id;
        self
    }

    pub fn resource(mut self, id: Uuid) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn failed(mut self, status: AuditStatus, message: impl Into<String>) -> Self {
        self.status = status;
        self.error_message = Some(message.into());
        self
    }

    pub fn context(mut self, context: &RequestContext) -> Self {
        self.context = context.clone();
        self
    }
}

/// Column values exactly as stored; the chain hashes this shape.
#[derive(Debug, Clone, Serialize, FromRow)]
struct StoredEntry {
    id: String,
    occurred_at: String,
    user_id: Option<String>,
    action: String,
    resource_type: String,
    resource_id: Option<String>,
    old_values: Option<String>,
    new_values: Option<String>,
    status: String,
    error_message: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    request_id: Option<String>,
    session_id: Option<String>,
}

impl StoredEntry {
    fn from_entry(entry: &AuditEntry) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            occurred_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            user_id: entry.actor_id.map(|id| id.to_string()),
            action: entry.action.clone(),
            resource_type: entry.resource_type.clone(),
            resource_id: entry.resource_id.map(|id| id.to_string()),
            old_values: entry.old_values.as_ref().map(Value::to_string),
            new_values: entry.new_values.as_ref().map(Value::to_string),
            status: entry.status.as_str().to_string(),
            error_message: entry.error_message.clone(),
            ip_address: entry.context.ip.clone(),
            user_agent: entry.context.user_agent.clone(),
            request_id: entry.context.request_id.clone(),
            session_id: entry.context.session_id.clone(),
        }
    }

    fn chain_hash(&self, prev_hash: Option<&str>) -> String {
        let payload = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        if let Some(prev) = prev_hash {
            hasher.update(prev.as_bytes());
        }
        hasher.update(payload.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Append an entry on a connection that already holds the write lock
/// (an open write transaction, or `BEGIN IMMEDIATE`). Returns the new hash.
pub async fn append(conn: &mut SqliteConnection, entry: &AuditEntry) -> Result<String, sqlx::Error> {
    let stored = StoredEntry::from_entry(entry);

    let prev_hash: Option<String> = sqlx::query_scalar("SELECT hash FROM audit_logs ORDER BY rowid DESC LIMIT 1")
        .fetch_optional(&mut *conn)
        .await?;
    let hash = stored.chain_hash(prev_hash.as_deref());

    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, occurred_at, user_id, action, resource_type, resource_id, old_values, new_values, status, error_message, ip_address, user_agent, request_id, session_id, prev_hash, hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&stored.id)
    .bind(&stored.occurred_at)
    .bind(&stored.user_id)
    .bind(&stored.action)
    .bind(&stored.resource_type)
    .bind(&stored.resource_id)
    .bind(&stored.old_values)
    .bind(&stored.new_values)
    .bind(&stored.status)
    .bind(&stored.error_message)
    .bind(&stored.ip_address)
    .bind(&stored.user_agent)
    .bind(&stored.request_id)
    .bind(&stored.session_id)
    .bind(&prev_hash)
    .bind(&hash)
    .execute(&mut *conn)
    .await?;

    Ok(hash)
}

/// Append outside of any business transaction.
pub async fn append_standalone(pool: &SqlitePool, entry: &AuditEntry) -> Result<String, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

    match append(&mut conn, entry).await {
        Ok(hash) => {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok(hash)
        }
        Err(err) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            Err(err)
        }
    }
}

/// Best-effort variant for failure paths: a broken audit write is logged,
/// never surfaced to the caller.
pub async fn record_best_effort(pool: &SqlitePool, entry: AuditEntry) {
    if let Err(err) = append_standalone(pool, &entry).await {
        tracing::error!(
            action = %entry.action,
            status = entry.status.as_str(),
            error = %err,
            "failed to write audit entry"
        );
    }
}

/// Recompute the whole chain. Returns the id of the first entry whose hash
/// does not match, or `None` when the chain is intact.
pub async fn verify_chain(pool: &SqlitePool) -> Result<Option<String>, sqlx::Error> {
    let rows: Vec<(StoredEntry, Option<String>, String)> = sqlx::query_as::<_, ChainRow>(
        "SELECT id, occurred_at, user_id, action, resource_type, resource_id, old_values, new_values, status, error_message, ip_address, user_agent, request_id, session_id, prev_hash, hash FROM audit_logs ORDER BY rowid",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|row| (row.entry, row.prev_hash, row.hash))
    .collect();

    let mut expected_prev: Option<String> = None;
    for (entry, prev_hash, hash) in rows {
        if prev_hash != expected_prev || entry.chain_hash(prev_hash.as_deref()) != hash {
            return Ok(Some(entry.id));
        }
        expected_prev = Some(hash);
    }
    Ok(None)
}

#[derive(FromRow)]
struct ChainRow {
    #[sqlx(flatten)]
    entry: StoredEntry,
    prev_hash: Option<String>,
    hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "10.0.0.9".parse().unwrap());
        headers.insert("x-request-id", "req-1".parse().unwrap());

        let ctx = RequestContext::from_headers(&headers);
        assert_eq!(ctx.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(ctx.request_id.as_deref(), Some("req-1"));
        assert_eq!(ctx.session_id, None);
    }

    #[test]
    fn hash_depends_on_previous_link() {
        let entry = StoredEntry::from_entry(&AuditEntry::new("activity:approve", "activity"));
        let first = entry.chain_hash(None);
        let linked = entry.chain_hash(Some(&first));
        assert_ne!(first, linked);
        assert_eq!(first.len(), 64);
        assert_eq!(entry.chain_hash(None), first);
    }
}
