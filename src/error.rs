//! Error types shared across the crate.

use thiserror::Error;

/// All errors reported by protoview operations.
///
/// Commit and transaction-cycling failures are deliberately absent: once a
/// caller has been told a transaction scope closed there is no recoverable
/// state left, so those paths abort the process instead of returning.
#[derive(Error, Debug)]
pub enum Error {
    /// The path expression could not be parsed.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The path names a field the message type does not have.
    #[error("unknown field '{field}' in message '{message_type}'")]
    UnknownField {
        field: String,
        message_type: String,
    },

    /// No descriptor for the requested message type is registered.
    #[error("unknown message type '{0}'")]
    UnknownMessageType(String),

    /// An enum number with no corresponding value name was asked for its name.
    #[error("enum '{enum_type}' has no value numbered {number}")]
    UnknownEnumValue { enum_type: String, number: i32 },

    /// The serialized message failed to decode.
    #[error("failed to decode '{message_type}': {source}")]
    Decode {
        message_type: String,
        source: prost::DecodeError,
    },

    /// A populated result row's blob failed to decode.
    ///
    /// Distinct from [`Error::Decode`] so bulk callers can tell a bad stored
    /// row apart from bad input; rows appended before the failure stay in
    /// the list.
    #[error("result row {row_id} is not a valid '{message_type}' payload: {source}")]
    RowDecode {
        row_id: i64,
        message_type: String,
        source: prost::DecodeError,
    },

    /// The table spec violates a structural invariant.
    #[error("invalid table spec for '{table}': {reason}")]
    InvalidSpec { table: String, reason: String },

    /// A result list could not grow to the requested size.
    #[error("result list allocation failed: {0}")]
    ListAlloc(#[from] std::collections::TryReserveError),

    /// The requested capacity does not fit in memory.
    #[error("result list capacity overflow")]
    ListCapacity,

    /// A descriptor set failed to register.
    #[error("failed to register descriptors: {0}")]
    Descriptor(#[from] prost_reflect::DescriptorError),

    /// JSON conversion to or from a message failed.
    #[error("json conversion failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A text-format message failed to parse.
    #[error("text format parse failed: {0}")]
    TextFormat(#[from] prost_reflect::text_format::ParseError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wraps this error for surfacing through a SQL scalar function.
    pub(crate) fn into_sql_error(self) -> rusqlite::Error {
        match self {
            Error::Sqlite(e) => e,
            other => rusqlite::Error::UserFunctionError(Box::new(other)),
        }
    }
}
