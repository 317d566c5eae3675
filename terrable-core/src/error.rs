//! Protocol error types

use thiserror::Error;

/// Errors raised while reading or building control-channel messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("no TERRABLE_RESULT_START:/:TERRABLE_RESULT_END markers found, unable to parse result")]
    MissingMarkers,

    #[error("invalid result envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),

    #[error("invalid handler event: {0}")]
    InvalidEvent(#[source] serde_json::Error),
}
