//! Error types for the ingest client and channel

use thiserror::Error;

use crate::channel::ChannelState;

/// Result type for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// A row or value that does not fit the table schema
///
/// Schema violations are deterministic and never retried.
#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    /// Row carries a key the schema does not know
    #[error("Column not in schema: {0}")]
    UnknownColumn(String),

    /// Value shape does not match the column type
    #[error("column {column}: cannot coerce {got} to {expected}")]
    TypeMismatch {
        /// Column name
        column: String,
        /// Column type name
        expected: &'static str,
        /// Supplied value kind
        got: &'static str,
    },

    /// Value failed to coerce (bad hex, unparseable date, ...)
    #[error("column {column}: {detail}")]
    Invalid {
        /// Column name
        column: String,
        /// What went wrong
        detail: String,
    },

    /// String exceeds the column length
    #[error("column {column}: value length {len} exceeds limit {max}")]
    LengthExceeded {
        /// Column name
        column: String,
        /// Actual length in characters
        len: usize,
        /// Column length limit
        max: usize,
    },

    /// Number carries more integer digits than the column precision allows
    #[error("column {column}: {digits} integer digits exceed precision {precision}")]
    PrecisionExceeded {
        /// Column name
        column: String,
        /// Integer digit count after rounding
        digits: u32,
        /// Column precision
        precision: u32,
    },

    /// Row serialization failed
    #[error("failed to serialize row: {0}")]
    Serialize(String),
}

/// Errors from the ingest client and channel
#[derive(Debug, Error)]
pub enum IngestError {
    /// HTTP transport failure
    #[error(transparent)]
    Transport(#[from] snowpipe_transport::TransportError),

    /// Authentication failure
    #[error(transparent)]
    Auth(#[from] snowpipe_auth::AuthError),

    /// Schema violation
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The service refused to open the channel
    #[error("channel open rejected: {code}: {message}")]
    OpenRejected {
        /// Service-reported status code
        code: String,
        /// Service-reported message
        message: String,
    },

    /// A continuation token was required but absent
    ///
    /// Either the open response omitted `next_continuation_token`, or a
    /// flush ran before the channel was ever opened.
    #[error("continuation token missing")]
    MissingContinuationToken,

    /// Operation not allowed in the current channel state
    #[error("cannot {operation} while channel is {state}")]
    InvalidState {
        /// The rejected operation
        operation: &'static str,
        /// Current channel state
        state: ChannelState,
    },

    /// Offset tokens must be non-empty
    #[error("offset token must be non-empty")]
    EmptyOffsetToken,

    /// The channel worker is gone (dropped channel or panicked task)
    #[error("channel worker is no longer running")]
    ChannelClosed,

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,
}

impl IngestError {
    /// HTTP status of the underlying service rejection, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(t) => t.status(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_column_message_is_exact() {
        let err = SchemaError::UnknownColumn("UNKNOWN".into());
        assert_eq!(err.to_string(), "Column not in schema: UNKNOWN");
    }

    #[test]
    fn test_invalid_state_display() {
        let err = IngestError::InvalidState {
            operation: "insert rows",
            state: ChannelState::Created,
        };
        assert_eq!(err.to_string(), "cannot insert rows while channel is Created");
    }

    #[test]
    fn test_status_passthrough() {
        let api = snowpipe_transport::ApiError::from_body(409, "{}".into());
        let err = IngestError::Transport(snowpipe_transport::TransportError::Api(api));
        assert_eq!(err.status(), Some(409));
        assert_eq!(IngestError::Cancelled.status(), None);
    }
}
