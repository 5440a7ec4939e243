use crate::domain::models::{ApplicationState, SCHEMA_VERSION};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::state_codec::{decode_state, encode_state};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Single-slot durable copy of the whole application state.
pub trait LocalStore: Send + Sync {
    fn save(&self, state: &ApplicationState) -> Result<(), InfraError>;
    fn load(&self) -> Result<Option<ApplicationState>, InfraError>;

    /// Saves without surfacing failures; the caller's mutation always stands.
    fn save_best_effort(&self, state: &ApplicationState) -> bool {
        match self.save(state) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(error = %error, "local state save failed");
                false
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqliteLocalStore {
    db_path: PathBuf,
    slot: String,
}

impl SqliteLocalStore {
    pub fn new(db_path: impl AsRef<Path>, slot: impl Into<String>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            slot: slot.into(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl LocalStore for SqliteLocalStore {
    fn save(&self, state: &ApplicationState) -> Result<(), InfraError> {
        let payload = encode_state(state)?;
        let connection = self
            .connect()
            .map_err(|error| InfraError::LocalPersistence(error.to_string()))?;
        connection
            .execute(
                "INSERT INTO local_state (slot, payload, schema_version, saved_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(slot) DO UPDATE SET
                   payload = excluded.payload,
                   schema_version = excluded.schema_version,
                   saved_at = excluded.saved_at",
                params![self.slot, payload, SCHEMA_VERSION, Utc::now().to_rfc3339()],
            )
            .map_err(|error| InfraError::LocalPersistence(error.to_string()))?;
        Ok(())
    }

    fn load(&self) -> Result<Option<ApplicationState>, InfraError> {
        let connection = self.connect()?;
        let payload: Option<String> = connection
            .query_row(
                "SELECT payload FROM local_state WHERE slot = ?1",
                params![self.slot],
                |row| row.get(0),
            )
            .optional()?;

        payload.as_deref().map(decode_state).transpose()
    }
}

/// Keeps the encoded payload so tests exercise the same codec path as SQLite.
#[derive(Debug, Default)]
pub struct InMemoryLocalStore {
    payload: Mutex<Option<String>>,
    fail_saves: bool,
}

impl InMemoryLocalStore {
    /// A store whose medium is permanently unavailable.
    pub fn failing() -> Self {
        Self {
            payload: Mutex::new(None),
            fail_saves: true,
        }
    }

    pub fn raw_payload(&self) -> Result<Option<String>, InfraError> {
        Ok(self.slot()?.clone())
    }

    fn slot(&self) -> Result<MutexGuard<'_, Option<String>>, InfraError> {
        self.payload
            .lock()
            .map_err(|error| InfraError::LocalPersistence(format!("local slot lock poisoned: {error}")))
    }
}

impl LocalStore for InMemoryLocalStore {
    fn save(&self, state: &ApplicationState) -> Result<(), InfraError> {
        if self.fail_saves {
            return Err(InfraError::LocalPersistence("storage unavailable".to_string()));
        }
        let payload = encode_state(state)?;
        *self.slot()? = Some(payload);
        Ok(())
    }

    fn load(&self) -> Result<Option<ApplicationState>, InfraError> {
        self.slot()?.as_deref().map(decode_state).transpose()
    }
}
