//! Business-data persistence contract and its SQLite implementation.
//!
//! # Responsibility
//! - Execute the primary write of one unit of work (insert/update/delete).
//! - Write store-generated keys back into the tracked entities.
//!
//! # Invariants
//! - All rows of one primary write are committed in a single transaction.
//! - Generated keys are assigned only after the transaction committed.
//! - Table and column names come from validated `EntityDescriptor`s only.

use crate::audit::extract::classify;
use crate::db::DbError;
use crate::model::entity::KeyGeneration;
use crate::model::tracking::{EntityState, TrackedEntity};
use crate::model::validation::ValidationError;
use crate::model::value::{FieldValue, Snapshot};
use log::debug;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failure of the business write. Propagated to commit callers unchanged.
#[derive(Debug)]
pub enum PrimaryWriteError {
    Validation(ValidationError),
    Db(DbError),
    RowNotFound {
        entity_name: String,
        key: String,
    },
    Rejected(String),
}

impl Display for PrimaryWriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::RowNotFound { entity_name, key } => {
                write!(f, "{entity_name} row not found: {key}")
            }
            Self::Rejected(message) => write!(f, "primary write rejected: {message}"),
        }
    }
}

impl Error for PrimaryWriteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::RowNotFound { .. } | Self::Rejected(_) => None,
        }
    }
}

impl From<ValidationError> for PrimaryWriteError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for PrimaryWriteError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for PrimaryWriteError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Persistence collaborator for business entities.
pub trait PersistenceGateway {
    /// Writes every changed entity of the tracked set and returns the number
    /// of rows written.
    ///
    /// Implementations write store-generated keys back with
    /// `TrackedEntity::assign_key`.
    fn execute_primary_write(&self, tracked: &mut [TrackedEntity])
        -> Result<usize, PrimaryWriteError>;

    /// Reads the entity's primary key after the primary write.
    fn load_current_key(&self, entity: &TrackedEntity) -> Option<String> {
        entity.key()
    }
}

impl<T: PersistenceGateway + ?Sized> PersistenceGateway for &T {
    fn execute_primary_write(
        &self,
        tracked: &mut [TrackedEntity],
    ) -> Result<usize, PrimaryWriteError> {
        (**self).execute_primary_write(tracked)
    }

    fn load_current_key(&self, entity: &TrackedEntity) -> Option<String> {
        (**self).load_current_key(entity)
    }
}

/// Generic SQLite gateway: one table per descriptor, columns named after the
/// auditable fields.
pub struct SqliteEntityGateway<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEntityGateway<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl PersistenceGateway for SqliteEntityGateway<'_> {
    fn execute_primary_write(
        &self,
        tracked: &mut [TrackedEntity],
    ) -> Result<usize, PrimaryWriteError> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut written = 0;
        let mut generated_keys = Vec::new();

        for (index, entity) in tracked.iter().enumerate() {
            let state = classify(entity);
            if state == EntityState::Unchanged {
                continue;
            }
            entity.descriptor().validate()?;

            match state {
                EntityState::Created => {
                    if let Some(key) = insert_row(&tx, entity)? {
                        generated_keys.push((index, key));
                    }
                }
                EntityState::Updated => update_row(&tx, entity)?,
                EntityState::Deleted => delete_row(&tx, entity)?,
                EntityState::Unchanged => {}
            }
            written += 1;
        }

        tx.commit()?;

        for (index, key) in generated_keys {
            tracked[index].assign_key(FieldValue::Integer(key));
        }

        debug!("event=primary_write module=repo status=ok rows={written}");
        Ok(written)
    }
}

/// Inserts one row; returns the generated key for store-keyed entities.
fn insert_row(
    tx: &Transaction<'_>,
    entity: &TrackedEntity,
) -> Result<Option<i64>, PrimaryWriteError> {
    let descriptor = entity.descriptor();
    let store_keyed =
        descriptor.key_generation == KeyGeneration::Store && entity.key_value().is_none();

    let columns: Vec<&str> = descriptor
        .fields
        .iter()
        .copied()
        .filter(|field| !(store_keyed && *field == descriptor.key_field))
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let values = columns
        .iter()
        .map(|column| field_value(entity.current(), column));

    tx.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({});",
            descriptor.entity_name,
            columns.join(", "),
            placeholders.join(", ")
        ),
        params_from_iter(values),
    )?;

    Ok(store_keyed.then(|| tx.last_insert_rowid()))
}

fn update_row(tx: &Transaction<'_>, entity: &TrackedEntity) -> Result<(), PrimaryWriteError> {
    let descriptor = entity.descriptor();
    let original = entity.original();
    let changed: Vec<&str> = descriptor
        .value_fields()
        .filter(|field| original.and_then(|o| o.get(field)) != entity.current().get(field))
        .collect();
    if changed.is_empty() {
        return Ok(());
    }

    let assignments: Vec<String> = changed
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{column} = ?{}", i + 1))
        .collect();
    let mut values: Vec<Value> = changed
        .iter()
        .map(|column| field_value(entity.current(), column))
        .collect();
    values.push(key_param(entity)?);

    let updated = tx.execute(
        &format!(
            "UPDATE {} SET {} WHERE {} = ?{};",
            descriptor.entity_name,
            assignments.join(", "),
            descriptor.key_field,
            values.len()
        ),
        params_from_iter(values),
    )?;
    ensure_row_touched(updated, entity)
}

fn delete_row(tx: &Transaction<'_>, entity: &TrackedEntity) -> Result<(), PrimaryWriteError> {
    let descriptor = entity.descriptor();
    let deleted = tx.execute(
        &format!(
            "DELETE FROM {} WHERE {} = ?1;",
            descriptor.entity_name, descriptor.key_field
        ),
        [key_param(entity)?],
    )?;
    ensure_row_touched(deleted, entity)
}

fn key_param(entity: &TrackedEntity) -> Result<Value, PrimaryWriteError> {
    entity
        .original()
        .and_then(|original| original.get(entity.descriptor().key_field))
        .filter(|key| !key.is_null())
        .map(to_sql_value)
        .ok_or_else(|| {
            PrimaryWriteError::Rejected(format!(
                "{} entity {} has no stored key",
                entity.entity_name(),
                entity.token()
            ))
        })
}

fn ensure_row_touched(count: usize, entity: &TrackedEntity) -> Result<(), PrimaryWriteError> {
    if count > 0 {
        return Ok(());
    }
    Err(PrimaryWriteError::RowNotFound {
        entity_name: entity.entity_name().to_string(),
        key: entity.key().unwrap_or_default(),
    })
}

fn field_value(snapshot: &Snapshot, column: &str) -> Value {
    snapshot.get(column).map_or(Value::Null, to_sql_value)
}

fn to_sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Bool(flag) => Value::Integer(i64::from(*flag)),
        FieldValue::Integer(number) => Value::Integer(*number),
        FieldValue::Real(number) => Value::Real(*number),
        FieldValue::Text(text) => Value::Text(text.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::{PersistenceGateway, PrimaryWriteError, SqliteEntityGateway};
    use crate::db::open_db_in_memory;
    use crate::model::identification_type::IdentificationType;
    use crate::model::tracking::UnitOfWork;

    #[test]
    fn insert_assigns_generated_keys_and_stores_booleans_as_integers() {
        let conn = open_db_in_memory().unwrap();
        let gateway = SqliteEntityGateway::new(&conn);
        let mut uow = UnitOfWork::new();
        let mut inactive = IdentificationType::new("Visa", "FR");
        inactive.deactivate();
        let token = uow.track_new(&inactive).unwrap();

        assert_eq!(gateway.execute_primary_write(uow.entities_mut()).unwrap(), 1);

        let key = uow.key_of(token).unwrap();
        let is_active: i64 = conn
            .query_row(
                "SELECT is_active FROM identification_types WHERE id = ?1;",
                [key.as_str()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(is_active, 0);
    }

    #[test]
    fn update_of_missing_row_rolls_back_the_whole_write() {
        let conn = open_db_in_memory().unwrap();
        let gateway = SqliteEntityGateway::new(&conn);
        let mut ghost = IdentificationType::new("Passport", "US");
        ghost.id = Some(404);

        let mut uow = UnitOfWork::new();
        uow.track_new(&IdentificationType::new("Visa", "US"))
            .unwrap();
        let token = uow.track_loaded(&ghost).unwrap();
        ghost.name = "International Passport".to_string();
        uow.refresh(token, &ghost).unwrap();

        let err = gateway
            .execute_primary_write(uow.entities_mut())
            .unwrap_err();
        assert!(matches!(err, PrimaryWriteError::RowNotFound { ref key, .. } if key == "404"));

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM identification_types;", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(rows, 0);
    }
}
