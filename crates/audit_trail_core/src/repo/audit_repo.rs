//! Append-only audit store contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist finalized audit records with their property rows.
//! - Provide the read-side query surface (by entity, time range, actor).
//!
//! # Invariants
//! - No update or delete path exists; the schema aborts both.
//! - One `append` call is one IMMEDIATE transaction: all records or none.

use crate::db::DbError;
use crate::model::audit::{AuditAction, FinalizedAuditRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Row id of a persisted audit entry.
pub type AuditEntryId = i64;

pub type AuditStoreResult<T> = Result<T, AuditStoreError>;

#[derive(Debug)]
pub enum AuditStoreError {
    Db(DbError),
    InvalidData(String),
    /// Backend could not be reached. For `AuditStore` implementations that
    /// sit on a remote sink or queue rather than SQLite.
    Unavailable(String),
}

impl Display for AuditStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted audit data: {message}"),
            Self::Unavailable(message) => write!(f, "audit store unavailable: {message}"),
        }
    }
}

impl Error for AuditStoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidData(_) | Self::Unavailable(_) => None,
        }
    }
}

impl From<DbError> for AuditStoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for AuditStoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Append-only sink for finalized audit records.
pub trait AuditStore {
    /// Appends all records atomically and returns their ids in input order.
    fn append(&self, records: &[FinalizedAuditRecord]) -> AuditStoreResult<Vec<AuditEntryId>>;
}

impl<T: AuditStore + ?Sized> AuditStore for &T {
    fn append(&self, records: &[FinalizedAuditRecord]) -> AuditStoreResult<Vec<AuditEntryId>> {
        (**self).append(records)
    }
}

/// Persisted audit entry (read model).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub entity_name: String,
    pub entity_id: String,
    pub action: AuditAction,
    pub timestamp: DateTime<Utc>,
    pub actor_id: Uuid,
    pub actor_name: String,
    pub changes_json: Option<String>,
}

/// Persisted per-property row of an audit entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntryProperty {
    pub id: i64,
    pub audit_entry_id: AuditEntryId,
    pub property_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// Filters for listing audit entries. Empty filters match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditQuery {
    pub entity_name: Option<String>,
    pub entity_id: Option<String>,
    pub actor_id: Option<Uuid>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: u32,
}

const ENTRY_SELECT_SQL: &str = "SELECT
    id,
    entity_name,
    entity_id,
    action,
    timestamp_utc,
    actor_id,
    actor_name,
    changes_json
FROM audit_entries";

/// SQLite-backed audit store.
pub struct SqliteAuditStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAuditStore<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Lists entries ordered by timestamp, then id.
    pub fn list_entries(&self, query: &AuditQuery) -> AuditStoreResult<Vec<AuditEntry>> {
        let mut sql = format!("{ENTRY_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(entity_name) = &query.entity_name {
            sql.push_str(" AND entity_name = ?");
            bind_values.push(Value::Text(entity_name.clone()));
        }
        if let Some(entity_id) = &query.entity_id {
            sql.push_str(" AND entity_id = ?");
            bind_values.push(Value::Text(entity_id.clone()));
        }
        if let Some(actor_id) = query.actor_id {
            sql.push_str(" AND actor_id = ?");
            bind_values.push(Value::Text(actor_id.to_string()));
        }
        if let Some(from) = query.from {
            sql.push_str(" AND timestamp_utc >= ?");
            bind_values.push(Value::Text(format_timestamp(from)));
        }
        if let Some(to) = query.to {
            sql.push_str(" AND timestamp_utc < ?");
            bind_values.push(Value::Text(format_timestamp(to)));
        }

        sql.push_str(" ORDER BY timestamp_utc ASC, id ASC");

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_entry_row(row)?);
        }
        Ok(entries)
    }

    /// Property rows of one entry, in insertion order.
    pub fn entry_properties(&self, id: AuditEntryId) -> AuditStoreResult<Vec<AuditEntryProperty>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, audit_entry_id, property_name, old_value, new_value
             FROM audit_entry_properties
             WHERE audit_entry_id = ?1
             ORDER BY id ASC;",
        )?;
        let properties = stmt
            .query_map([id], |row| {
                Ok(AuditEntryProperty {
                    id: row.get("id")?,
                    audit_entry_id: row.get("audit_entry_id")?,
                    property_name: row.get("property_name")?,
                    old_value: row.get("old_value")?,
                    new_value: row.get("new_value")?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(properties)
    }

    pub fn count_entries(&self) -> AuditStoreResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM audit_entries;", [], |row| row.get(0))?;
        u64::try_from(count)
            .map_err(|_| AuditStoreError::InvalidData(format!("negative entry count {count}")))
    }
}

impl AuditStore for SqliteAuditStore<'_> {
    fn append(&self, records: &[FinalizedAuditRecord]) -> AuditStoreResult<Vec<AuditEntryId>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(insert_record(&tx, record)?);
        }
        tx.commit()?;

        debug!(
            "event=audit_store_append module=repo status=ok entries={}",
            ids.len()
        );
        Ok(ids)
    }
}

fn insert_record(
    tx: &Transaction<'_>,
    record: &FinalizedAuditRecord,
) -> AuditStoreResult<AuditEntryId> {
    tx.execute(
        "INSERT INTO audit_entries (
            entity_name,
            entity_id,
            action,
            timestamp_utc,
            actor_id,
            actor_name,
            changes_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
        params![
            record.entity_name.as_str(),
            record.entity_id.as_str(),
            record.action.as_str(),
            format_timestamp(record.timestamp),
            record.actor.id.to_string(),
            record.actor.name.as_str(),
            record.changes_json.as_deref(),
        ],
    )?;
    let entry_id = tx.last_insert_rowid();

    let mut stmt = tx.prepare_cached(
        "INSERT INTO audit_entry_properties (
            audit_entry_id,
            property_name,
            old_value,
            new_value
        ) VALUES (?1, ?2, ?3, ?4);",
    )?;
    for change in &record.changes {
        stmt.execute(params![
            entry_id,
            change.property_name.as_str(),
            change.old_value.as_deref(),
            change.new_value.as_deref(),
        ])?;
    }

    Ok(entry_id)
}

/// Fixed-width RFC 3339 so lexical order equals chronological order.
fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_entry_row(row: &Row<'_>) -> AuditStoreResult<AuditEntry> {
    let action_text: String = row.get("action")?;
    let action = AuditAction::parse(&action_text).ok_or_else(|| {
        AuditStoreError::InvalidData(format!(
            "invalid action `{action_text}` in audit_entries.action"
        ))
    })?;

    let timestamp_text: String = row.get("timestamp_utc")?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp_text)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| {
            AuditStoreError::InvalidData(format!(
                "invalid timestamp `{timestamp_text}` in audit_entries.timestamp_utc"
            ))
        })?;

    let actor_text: String = row.get("actor_id")?;
    let actor_id = Uuid::parse_str(&actor_text).map_err(|_| {
        AuditStoreError::InvalidData(format!(
            "invalid uuid `{actor_text}` in audit_entries.actor_id"
        ))
    })?;

    Ok(AuditEntry {
        id: row.get("id")?,
        entity_name: row.get("entity_name")?,
        entity_id: row.get("entity_id")?,
        action,
        timestamp,
        actor_id,
        actor_name: row.get("actor_name")?,
        changes_json: row.get("changes_json")?,
    })
}

#[cfg(test)]
mod tests {
    use super::{format_timestamp, AuditQuery, AuditStore, SqliteAuditStore};
    use crate::db::open_db_in_memory;
    use crate::model::audit::{Actor, AuditAction, FinalizedAuditRecord, PropertyChange};
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    fn record(entity_id: &str, offset_secs: i64, actor: &Actor) -> FinalizedAuditRecord {
        let changes = vec![PropertyChange::new("name", Some("a".into()), Some("b".into()))];
        FinalizedAuditRecord {
            entity_name: "identification_types".to_string(),
            entity_id: entity_id.to_string(),
            action: AuditAction::Updated,
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
                + Duration::seconds(offset_secs),
            actor: actor.clone(),
            changes_json: Some("[]".to_string()),
            changes,
        }
    }

    #[test]
    fn timestamps_keep_fixed_width() {
        let early = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let late = early + Duration::milliseconds(1500);
        assert_eq!(format_timestamp(early).len(), format_timestamp(late).len());
        assert!(format_timestamp(early) < format_timestamp(late));
    }

    #[test]
    fn query_filters_by_actor_and_time_range() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteAuditStore::new(&conn);
        let alice = Actor::new(Uuid::new_v4(), "alice");
        let bob = Actor::new(Uuid::new_v4(), "bob");
        store
            .append(&[
                record("1", 0, &alice),
                record("2", 10, &bob),
                record("3", 20, &alice),
            ])
            .unwrap();

        let by_alice = store
            .list_entries(&AuditQuery {
                actor_id: Some(alice.id),
                ..AuditQuery::default()
            })
            .unwrap();
        assert_eq!(by_alice.len(), 2);

        let window = store
            .list_entries(&AuditQuery {
                from: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 5).unwrap()),
                to: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 20).unwrap()),
                ..AuditQuery::default()
            })
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].entity_id, "2");
        assert_eq!(window[0].actor_name, "bob");
    }

    #[test]
    fn append_of_nothing_writes_nothing() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteAuditStore::new(&conn);
        assert!(store.append(&[]).unwrap().is_empty());
        assert_eq!(store.count_entries().unwrap(), 0);
    }
}
