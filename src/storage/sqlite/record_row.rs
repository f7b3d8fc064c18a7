//! Row conversion for state records.

use crate::models::{Metadata, RecordId, StateRecord};
use crate::{Error, Result};
use rusqlite::Row;

/// Column list shared by every record SELECT, in [`RecordRow`] field order.
pub const SELECT_COLUMNS: &str =
    "id, payload, created_at, updated_at, expires_at, compressed, kind, thread_id, session_id, metadata";

/// Raw column values of one `state_records` row.
#[derive(Debug)]
pub struct RecordRow {
    /// Record id.
    pub id: String,
    /// Payload bytes.
    pub payload: Vec<u8>,
    /// Creation timestamp.
    pub created_at: f64,
    /// Update timestamp.
    pub updated_at: f64,
    /// Expiration timestamp.
    pub expires_at: Option<f64>,
    /// Compression flag.
    pub compressed: bool,
    /// Record kind.
    pub kind: Option<String>,
    /// Owning thread.
    pub thread_id: Option<String>,
    /// Owning session.
    pub session_id: Option<String>,
    /// Metadata JSON text.
    pub metadata: Option<String>,
}

impl RecordRow {
    /// Decodes one row fetched with [`SELECT_COLUMNS`].
    ///
    /// # Errors
    ///
    /// Returns the underlying `rusqlite` error on column type mismatch; the
    /// caller wraps it at the operation boundary.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            payload: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
            expires_at: row.get(4)?,
            compressed: row.get(5)?,
            kind: row.get(6)?,
            thread_id: row.get(7)?,
            session_id: row.get(8)?,
            metadata: row.get(9)?,
        })
    }
}

/// Builds a [`StateRecord`] from raw row values.
///
/// # Errors
///
/// Returns [`Error::Operation`] when the persisted metadata is not a JSON
/// object.
pub fn build_record_from_row(row: RecordRow) -> Result<StateRecord> {
    let metadata: Metadata = match row.metadata {
        None => Metadata::new(),
        Some(text) if text.is_empty() => Metadata::new(),
        Some(text) => serde_json::from_str(&text).map_err(|e| Error::Operation {
            operation: "decode_metadata".to_string(),
            cause: format!("record '{}': {e}", row.id),
        })?,
    };

    Ok(StateRecord {
        id: RecordId::new(row.id),
        payload: row.payload,
        created_at: row.created_at,
        updated_at: row.updated_at,
        expires_at: row.expires_at,
        compressed: row.compressed,
        kind: row.kind,
        thread_id: row.thread_id,
        session_id: row.session_id,
        metadata,
    })
}
