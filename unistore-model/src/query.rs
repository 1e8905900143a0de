use crate::FilterError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::{Duration, Instant};

/// Upper bound on `limit` for a single `query` call.
pub const MAX_QUERY_LIMIT: usize = 1000;

const CURSOR_PREFIX: &str = "after:";

/// Identifies the backend that served a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// DuckDB graph/document store (primary domain).
    DuckdbDocument,
    /// SQLite relational/time-series store (auxiliary domain).
    SqliteRelational,
}

impl BackendKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            BackendKind::DuckdbDocument => "duckdb-document",
            BackendKind::SqliteRelational => "sqlite-relational",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an adapter does with an `id` key supplied in create/update data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPolicy {
    /// The write fails with a validation error.
    Reject,
    /// The key is silently dropped before the write.
    Ignore,
}

/// Opaque pagination cursor. Encodes the id of the last item returned;
/// the next page starts strictly after it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn after(last_id: &str) -> Self {
        Self(URL_SAFE_NO_PAD.encode(format!("{CURSOR_PREFIX}{last_id}")))
    }

    /// Wraps a cursor string received from a caller. Validity is checked by
    /// [`Cursor::last_id`].
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decodes the id this cursor points past.
    pub fn last_id(&self) -> Result<String, FilterError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(self.0.as_bytes())
            .map_err(|_| FilterError::InvalidCursor)?;
        let text = String::from_utf8(bytes).map_err(|_| FilterError::InvalidCursor)?;
        match text.strip_prefix(CURSOR_PREFIX) {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err(FilterError::InvalidCursor),
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rejects limits outside `1..=MAX_QUERY_LIMIT`.
pub fn validate_limit(limit: usize) -> Result<(), FilterError> {
    if limit == 0 || limit > MAX_QUERY_LIMIT {
        return Err(FilterError::InvalidLimit {
            limit,
            max: MAX_QUERY_LIMIT,
        });
    }
    Ok(())
}

/// The wrapper returned by every read, so callers can always see which
/// backend served the data.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult<T> {
    pub items: Vec<T>,
    pub backend: BackendKind,
    pub count: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Cursor>,
}

impl<T> QueryResult<T> {
    pub fn new(items: Vec<T>, backend: BackendKind, started: Instant, next_cursor: Option<Cursor>) -> Self {
        Self {
            count: items.len(),
            items,
            backend,
            elapsed: started.elapsed(),
            next_cursor,
        }
    }

    pub fn empty(backend: BackendKind, started: Instant) -> Self {
        Self::new(Vec::new(), backend, started, None)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn into_first(self) -> Option<T> {
        self.items.into_iter().next()
    }
}

fn serialize_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(elapsed.as_millis() as u64)
}
