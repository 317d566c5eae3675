//! Core types for terrable
//!
//! This crate holds the control-channel protocol spoken between the isolated
//! execution engine and the orchestrator that drives it: the completion and
//! result markers, the Result Envelope, code-unit framing and the handler
//! invocation wrapper.

pub mod envelope;
pub mod error;
pub mod handler;
pub mod invocation_id;
pub mod protocol;

pub use envelope::{ErrorBody, ResultEnvelope};
pub use error::ProtocolError;
pub use handler::{HandlerContext, HandlerInvocation};
pub use invocation_id::InvocationId;
pub use protocol::{
    encode_code_unit, extract_result, is_completion_line, COMPLETION_MARKER, RESULT_END_MARKER,
    RESULT_START_MARKER,
};
