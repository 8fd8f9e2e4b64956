//! DuckDB-backed report document store.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use duckdb::{Connection, params};
use serde_json::Value;
use tracing::info;

use crate::{DocumentKey, DocumentStore, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS report_documents (
    year        INTEGER NOT NULL,
    month       INTEGER NOT NULL,
    section     VARCHAR NOT NULL,
    subsection  VARCHAR NOT NULL,
    body        VARCHAR NOT NULL,
    saved_at    TIMESTAMP NOT NULL DEFAULT current_timestamp
);
CREATE TABLE IF NOT EXISTS report_document_backups (
    year        INTEGER NOT NULL,
    month       INTEGER NOT NULL,
    section     VARCHAR NOT NULL,
    subsection  VARCHAR NOT NULL,
    body        VARCHAR NOT NULL,
    saved_at    TIMESTAMP NOT NULL,
    backed_up_at TIMESTAMP NOT NULL DEFAULT current_timestamp
);
";

/// Report documents in two DuckDB tables: live rows in `report_documents`,
/// superseded rows in `report_document_backups`.
///
/// Supports both in-memory and persistent (file-backed) modes.
pub struct DuckDocumentStore {
    conn: Mutex<Connection>,
}

impl DuckDocumentStore {
    /// Open an in-memory database.
    pub fn open() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open or create a database file.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of backed-up versions of `key`.
    pub fn backup_count(&self, key: &DocumentKey) -> Result<usize, StoreError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT count(*) FROM report_document_backups
             WHERE year = ? AND month = ? AND section = ? AND subsection = ?",
            params![
                key.period.year(),
                key.period.month() as i32,
                key.section,
                key.subsection
            ],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[async_trait]
impl DocumentStore for DuckDocumentStore {
    async fn get(&self, key: &DocumentKey) -> Result<Option<Value>, StoreError> {
        let body: Option<String> = {
            let conn = self.conn();
            let result = conn.query_row(
                "SELECT body FROM report_documents
                 WHERE year = ? AND month = ? AND section = ? AND subsection = ?",
                params![
                    key.period.year(),
                    key.period.month() as i32,
                    key.section,
                    key.subsection
                ],
                |row| row.get::<_, String>(0),
            );
            match result {
                Ok(body) => Some(body),
                Err(duckdb::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            }
        };
        match body {
            Some(b) => Ok(Some(serde_json::from_str(&b)?)),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &DocumentKey,
        document: &Value,
        backup: bool,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(document)?;
        let year = key.period.year();
        let month = key.period.month() as i32;

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        if backup {
            let copied = tx.execute(
                "INSERT INTO report_document_backups
                     (year, month, section, subsection, body, saved_at)
                 SELECT year, month, section, subsection, body, saved_at
                 FROM report_documents
                 WHERE year = ? AND month = ? AND section = ? AND subsection = ?",
                params![year, month, key.section, key.subsection],
            )?;
            if copied > 0 {
                info!(key = %key, "previous document backed up");
            }
        }
        tx.execute(
            "DELETE FROM report_documents
             WHERE year = ? AND month = ? AND section = ? AND subsection = ?",
            params![year, month, key.section, key.subsection],
        )?;
        tx.execute(
            "INSERT INTO report_documents (year, month, section, subsection, body)
             VALUES (?, ?, ?, ?, ?)",
            params![year, month, key.section, key.subsection, body],
        )?;
        tx.commit()?;
        info!(key = %key, "document stored");
        Ok(())
    }
}
