//! ============================================================================
//! Shared Types - Messages, chunks, records and errors
//! ============================================================================
//! Data structures passed between the chunker, the memory store and the
//! vector store backends.
//! ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON object stored alongside every vector
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Payload key holding the rendered chunk text
pub const DOCUMENT_KEY: &str = "document";

/// Payload key holding the owning session
pub const SESSION_ID_KEY: &str = "session_id";

// ============================================================================
// Messages
// ============================================================================

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Label used when rendering a message into chunk text
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// A single message in a chat history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Attach a timestamp to the message
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

// ============================================================================
// Chunks
// ============================================================================

/// How a window of messages is rendered into text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatStyle {
    /// `Role: content` lines
    #[default]
    Simple,
    /// `[timestamp] Role: content` lines
    Detailed,
    /// `### Role` headed blocks
    Markdown,
}

impl std::fmt::Display for FormatStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatStyle::Simple => write!(f, "simple"),
            FormatStyle::Detailed => write!(f, "detailed"),
            FormatStyle::Markdown => write!(f, "markdown"),
        }
    }
}

impl std::str::FromStr for FormatStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(FormatStyle::Simple),
            "detailed" => Ok(FormatStyle::Detailed),
            "markdown" | "md" => Ok(FormatStyle::Markdown),
            _ => Err(format!("Unknown format style: {}", s)),
        }
    }
}

/// Provenance attached to a chunk by the chunker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub session_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// Index of the first message in the window
    pub window_start: usize,
    /// Index of the last message in the window (inclusive)
    pub window_end: usize,
    pub message_count: usize,
    pub format_style: FormatStyle,
    /// RFC 3339 creation time
    pub created_at: String,
}

/// A rendered window over a contiguous run of messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ChunkMetadata>,
}

/// Per-call chunking parameters for an insert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingOptions {
    pub window_size: usize,
    pub stride: usize,
    pub format_style: FormatStyle,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            window_size: 3,
            stride: 1,
            format_style: FormatStyle::Simple,
        }
    }
}

// ============================================================================
// Stored records
// ============================================================================

/// A record read back from the vector store (vector omitted)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub payload: Payload,
}

impl MemoryRecord {
    /// The rendered chunk text, empty if the payload has none
    pub fn document(&self) -> &str {
        self.payload
            .get(DOCUMENT_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.payload.get(SESSION_ID_KEY).and_then(|v| v.as_str())
    }
}

/// A similarity search result, most similar first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHit {
    pub id: Uuid,
    pub score: f32,
    pub metadata: Payload,
}

/// A record returned by a session-scoped scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub text: String,
    pub metadata: Payload,
}

/// Result of a successful `insert_history` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertReceipt {
    pub session_id: String,
    pub ids: Vec<Uuid>,
    pub chunk_count: usize,
    pub message_count: usize,
}

/// Distance metric of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    Cosine,
}

/// Fixed schema of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub dimension: usize,
    pub distance: Distance,
}

/// Equality match on a single payload field
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadFilter {
    pub key: String,
    pub value: String,
}

impl PayloadFilter {
    pub fn matches(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn session(session_id: &str) -> Self {
        Self::matches(SESSION_ID_KEY, session_id)
    }

    /// Check a payload against this filter
    pub fn accepts(&self, payload: &Payload) -> bool {
        payload
            .get(&self.key)
            .and_then(|v| v.as_str())
            .map(|v| v == self.value)
            .unwrap_or(false)
    }
}

/// Collection statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub collection: String,
    pub points_count: u64,
}

// ============================================================================
// Errors
// ============================================================================

/// Error kinds raised inside the memory subsystem.
///
/// The public `MemoryStore` methods never surface these; they are mapped to
/// empty/`None`/`false` results and logged. The `try_*` methods return them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MemoryError {
    #[error("Collection does not exist: {0}")]
    CollectionMissing(String),

    #[error("Empty history provided")]
    EmptyHistory,

    #[error("No chunks produced from history")]
    NoChunks,

    #[error("Invalid chunking parameters: {0}")]
    InvalidChunking(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Collection {name} exists with a different schema: {found:?}")]
    SchemaMismatch {
        name: String,
        found: CollectionSchema,
    },

    #[error("Store is locked by another owner: {0}")]
    StoreLocked(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        MemoryError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("Assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert!("robot".parse::<Role>().is_err());
    }

    #[test]
    fn test_format_style_parsing() {
        assert_eq!("simple".parse::<FormatStyle>().unwrap(), FormatStyle::Simple);
        assert_eq!("DETAILED".parse::<FormatStyle>().unwrap(), FormatStyle::Detailed);
        assert_eq!("md".parse::<FormatStyle>().unwrap(), FormatStyle::Markdown);
        assert_eq!(FormatStyle::Markdown.to_string(), "markdown");
    }

    #[test]
    fn test_message_deserializes_without_timestamp() {
        let msg: Message =
            serde_json::from_str(r#"{"role":"assistant","content":"It's Paris."}"#).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.timestamp.is_none());
    }

    #[test]
    fn test_payload_filter_accepts_exact_match_only() {
        let mut payload = Payload::new();
        payload.insert(SESSION_ID_KEY.to_string(), "s1".into());

        assert!(PayloadFilter::session("s1").accepts(&payload));
        assert!(!PayloadFilter::session("s10").accepts(&payload));
        assert!(!PayloadFilter::matches("other", "s1").accepts(&payload));
    }

    #[test]
    fn test_record_document_defaults_to_empty() {
        let record = MemoryRecord {
            id: Uuid::new_v4(),
            payload: Payload::new(),
        };
        assert_eq!(record.document(), "");
        assert!(record.session_id().is_none());
    }
}
