use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::ffi::ErrorCode;
use rusqlite::{params, Connection, Error as SqliteError, OpenFlags, OptionalExtension};
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};

/// Durable string key/value storage for filter preferences.
pub trait FilterStorage: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> AppResult<()>;
    fn remove(&self, key: &str) -> AppResult<()>;

    fn remove_all(&self, keys: &[&str]) -> AppResult<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys = self.values.lock().keys().cloned().collect::<Vec<_>>();
        keys.sort();
        keys
    }
}

impl FilterStorage for MemoryStorage {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        self.values.lock().remove(key);
        Ok(())
    }

    fn remove_all(&self, keys: &[&str]) -> AppResult<()> {
        let mut values = self.values.lock();
        for key in keys {
            values.remove(*key);
        }
        Ok(())
    }
}

pub struct SqliteStorage {
    connection: Mutex<Connection>,
    path: PathBuf,
    recovered: bool,
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(data_dir: P, file_name: &str) -> AppResult<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join(file_name);

        match establish(&db_path) {
            Ok(connection) => {
                info!(
                    target: "filter_storage",
                    path = %db_path.display(),
                    "filter preference store ready"
                );
                Ok(Self {
                    connection: Mutex::new(connection),
                    path: db_path,
                    recovered: false,
                })
            }
            Err(AppError::Database(err)) if should_attempt_recovery(&err, &db_path) => {
                warn!(
                    target: "filter_storage",
                    path = %db_path.display(),
                    error = %err,
                    "filter preference store unreadable, recreating"
                );
                recover_store(&db_path)?;
                let connection = establish(&db_path)?;
                Ok(Self {
                    connection: Mutex::new(connection),
                    path: db_path,
                    recovered: true,
                })
            }
            Err(err) => Err(err),
        }
    }

    pub fn in_memory() -> AppResult<Self> {
        let connection = Connection::open_in_memory()?;
        run_migrations(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
            path: PathBuf::from(":memory:"),
            recovered: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn recovered(&self) -> bool {
        self.recovered
    }
}

impl FilterStorage for SqliteStorage {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        self.connection
            .lock()
            .query_row(
                "SELECT value FROM filter_preferences WHERE key = ?1 LIMIT 1",
                [key],
                |row| row.get(0),
            )
            .optional()
            .map_err(AppError::from)
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.connection.lock().execute(
            "INSERT INTO filter_preferences (key, value, updated_at)
            VALUES (?1, ?2, DATETIME('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        self.connection
            .lock()
            .execute("DELETE FROM filter_preferences WHERE key = ?1", [key])?;
        Ok(())
    }

    fn remove_all(&self, keys: &[&str]) -> AppResult<()> {
        let mut connection = self.connection.lock();
        let tx = connection.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM filter_preferences WHERE key = ?1")?;
            for key in keys {
                stmt.execute([key])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn establish(db_path: &Path) -> AppResult<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let connection = Connection::open_with_flags(db_path, flags)?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        "#,
    )?;
    run_migrations(&connection)?;
    Ok(connection)
}

fn run_migrations(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS filter_preferences (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (DATETIME('now'))
        );
        "#,
    )?;
    Ok(())
}

fn should_attempt_recovery(err: &SqliteError, db_path: &Path) -> bool {
    if !db_path.exists() {
        return false;
    }

    match err {
        SqliteError::SqliteFailure(code, message) => {
            matches!(code.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
                || message
                    .as_deref()
                    .map(|msg| msg.contains("database disk image is malformed"))
                    .unwrap_or(false)
        }
        _ => false,
    }
}

fn recover_store(db_path: &Path) -> AppResult<()> {
    remove_if_exists(db_path)?;
    remove_if_exists(&sidecar_path(db_path, "wal"))?;
    remove_if_exists(&sidecar_path(db_path, "shm"))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> AppResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Io(err)),
    }
}

fn sidecar_path(db_path: &Path, suffix: &str) -> PathBuf {
    let file_name = db_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    db_path.with_file_name(format!("{file_name}-{suffix}"))
}
