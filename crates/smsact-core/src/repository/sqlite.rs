//! SQLite repository.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{ActivationRepository, RepositoryError};
use crate::activation::{Activation, LifecycleState, SmsStatus};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS activations (
    id          TEXT PRIMARY KEY,
    external_id TEXT UNIQUE,
    phone       TEXT NOT NULL,
    service_id  TEXT NOT NULL,
    country_id  TEXT NOT NULL,
    state       TEXT NOT NULL,
    sms_status  TEXT NOT NULL,
    price       REAL NOT NULL,
    max_price   REAL NOT NULL,
    sms_code    TEXT,
    sms_text    TEXT,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL,
    expires_at  INTEGER NOT NULL,
    is_retriable INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_activations_state ON activations(state);
";

const COLUMNS: &str = "id, external_id, phone, service_id, country_id, state, sms_status, \
                       price, max_price, sms_code, sms_text, created_at, updated_at, \
                       expires_at, is_retriable";

/// Durable repository backed by a single SQLite database file.
///
/// The connection is serialized behind a mutex; every call is one
/// statement, which is all the atomicity the trait promises.
pub struct SqliteActivationRepository {
    conn: Mutex<Connection>,
}

impl SqliteActivationRepository {
    /// Opens (and if needed creates) the database at `path`.
    ///
    /// # Errors
    ///
    /// [`RepositoryError`] when the file cannot be opened or the schema
    /// cannot be created.
    pub fn open(path: &Path) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory database, mainly for tests.
    ///
    /// # Errors
    ///
    /// [`RepositoryError`] when the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, RepositoryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ActivationRepository for SqliteActivationRepository {
    fn save(&self, activation: &Activation) -> Result<(), RepositoryError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO activations (id, external_id, phone, service_id, country_id, state, \
             sms_status, price, max_price, sms_code, sms_text, created_at, updated_at, \
             expires_at, is_retriable) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15) \
             ON CONFLICT(id) DO UPDATE SET \
                 external_id = excluded.external_id, \
                 phone = excluded.phone, \
                 state = excluded.state, \
                 sms_status = excluded.sms_status, \
                 price = excluded.price, \
                 sms_code = excluded.sms_code, \
                 sms_text = excluded.sms_text, \
                 updated_at = excluded.updated_at",
            params![
                activation.id,
                activation.external_id,
                activation.phone,
                activation.service_id,
                activation.country_id,
                activation.state.as_str(),
                activation.sms_status.as_str(),
                activation.price,
                activation.max_price,
                activation.sms_code,
                activation.sms_text,
                i64::try_from(activation.created_at).unwrap_or(i64::MAX),
                i64::try_from(activation.updated_at).unwrap_or(i64::MAX),
                i64::try_from(activation.expires_at).unwrap_or(i64::MAX),
                activation.is_retriable,
            ],
        )?;
        Ok(())
    }

    fn find_by_id(&self, id: &str) -> Result<Option<Activation>, RepositoryError> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM activations WHERE id = ?1"),
            params![id],
            row_to_activation,
        )
        .optional()?
        .transpose()
    }

    fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Activation>, RepositoryError> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM activations WHERE external_id = ?1"),
            params![external_id],
            row_to_activation,
        )
        .optional()?
        .transpose()
    }

    fn find_active(&self) -> Result<Vec<Activation>, RepositoryError> {
        let conn = self.lock();
        let mut statement = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM activations \
             WHERE state IN ('pending', 'active', 'sms_received') \
             ORDER BY id"
        ))?;
        let rows = statement.query_map([], row_to_activation)?;

        let mut active = Vec::new();
        for row in rows {
            active.push(row??);
        }
        Ok(active)
    }
}

/// Maps a row onto the aggregate. State columns were written through
/// `as_str`, so an unparseable value means the database was edited by
/// hand; that surfaces as a storage error rather than a panic.
fn row_to_activation(row: &Row<'_>) -> rusqlite::Result<Result<Activation, RepositoryError>> {
    let id: String = row.get(0)?;
    let state_raw: String = row.get(5)?;
    let sms_status_raw: String = row.get(6)?;

    let Some(state) = LifecycleState::from_wire(&state_raw) else {
        return Ok(Err(RepositoryError::storage(format!(
            "unknown state {state_raw:?} stored for {id}"
        ))));
    };
    let Some(sms_status) = SmsStatus::from_wire(&sms_status_raw) else {
        return Ok(Err(RepositoryError::storage(format!(
            "unknown sms_status {sms_status_raw:?} stored for {id}"
        ))));
    };

    let created_at: i64 = row.get(11)?;
    let updated_at: i64 = row.get(12)?;
    let expires_at: i64 = row.get(13)?;

    Ok(Ok(Activation {
        id,
        external_id: row.get(1)?,
        phone: row.get(2)?,
        service_id: row.get(3)?,
        country_id: row.get(4)?,
        state,
        sms_status,
        price: row.get(7)?,
        max_price: row.get(8)?,
        sms_code: row.get(9)?,
        sms_text: row.get(10)?,
        created_at: created_at.max(0) as u64,
        updated_at: updated_at.max(0) as u64,
        expires_at: expires_at.max(0) as u64,
        is_retriable: row.get(14)?,
    }))
}
