//! State record types and identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadata map attached to a record, persisted as JSON.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for a state record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a new record ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the ID is empty (caller left assignment to the engine).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A versioned state record.
///
/// Timestamps are floating-point seconds since the Unix epoch so that
/// comparisons stay numeric. `created_at`/`updated_at` are stamped by the
/// engine on save; `expires_at` is either caller-supplied or derived from
/// the store's default TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Unique identifier; generated on save when left empty.
    pub id: RecordId,
    /// Serialized payload bytes.
    pub payload: Vec<u8>,
    /// Creation timestamp (Unix epoch seconds). Stamped on first save.
    pub created_at: f64,
    /// Last update timestamp (Unix epoch seconds). Stamped on every save.
    pub updated_at: f64,
    /// Expiration timestamp (Unix epoch seconds).
    ///
    /// The record is eligible for lazy expiry and the bulk sweep after this
    /// timestamp. `None` means no expiration. Must be strictly greater than
    /// `created_at` when present.
    pub expires_at: Option<f64>,
    /// Whether the payload bytes are compressed.
    pub compressed: bool,
    /// Optional record kind (e.g. "snapshot", "history").
    pub kind: Option<String>,
    /// Optional owning thread identifier.
    pub thread_id: Option<String>,
    /// Optional owning session identifier.
    pub session_id: Option<String>,
    /// Free-form metadata, persisted as a JSON object.
    pub metadata: Metadata,
}

impl StateRecord {
    /// Creates a record with the given payload and an engine-assigned id.
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            id: RecordId::new(""),
            payload,
            created_at: 0.0,
            updated_at: 0.0,
            expires_at: None,
            compressed: false,
            kind: None,
            thread_id: None,
            session_id: None,
            metadata: Metadata::new(),
        }
    }

    /// Creates a record with a caller-assigned id.
    #[must_use]
    pub fn with_id(id: impl Into<RecordId>, payload: Vec<u8>) -> Self {
        let mut record = Self::new(payload);
        record.id = id.into();
        record
    }

    /// Sets the record kind.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Sets the owning thread id.
    #[must_use]
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Sets the owning session id.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets an explicit expiration timestamp.
    #[must_use]
    pub const fn with_expires_at(mut self, expires_at: f64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Marks the payload as compressed.
    #[must_use]
    pub const fn with_compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Inserts one metadata entry.
    #[must_use]
    pub fn with_metadata_entry(
        mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether the record has expired as of `now`.
    #[must_use]
    pub fn is_expired(&self, now: f64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Validates internal invariants.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Validation`] when `expires_at` is not strictly
    /// greater than `created_at`.
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(expires_at) = self.expires_at {
            if expires_at <= self.created_at {
                return Err(crate::Error::Validation(format!(
                    "expires_at ({expires_at}) must be strictly greater than created_at ({})",
                    self.created_at
                )));
            }
        }
        Ok(())
    }

    /// Approximate in-memory footprint in bytes.
    ///
    /// Used by the streaming engine to bound batch memory. Counts the payload,
    /// optional strings, serialized metadata, and a fixed struct overhead.
    #[must_use]
    pub fn approximate_size(&self) -> usize {
        const STRUCT_OVERHEAD: usize = 128;
        let strings = self.id.as_str().len()
            + self.kind.as_deref().map_or(0, str::len)
            + self.thread_id.as_deref().map_or(0, str::len)
            + self.session_id.as_deref().map_or(0, str::len);
        let metadata = if self.metadata.is_empty() {
            0
        } else {
            serde_json::to_string(&self.metadata).map_or(0, |s| s.len())
        };
        STRUCT_OVERHEAD + self.payload.len() + strings + metadata
    }
}
