//! Control channel protocol
//!
//! The orchestrator writes one newline-terminated code unit per invocation to
//! the engine's stdin. The engine answers with arbitrary log output followed by
//! exactly one [`COMPLETION_MARKER`] line. Handler results (and uncaught
//! failures) travel inside the log output as a JSON [`ResultEnvelope`] wrapped
//! between [`RESULT_START_MARKER`] and [`RESULT_END_MARKER`].

use crate::envelope::ResultEnvelope;
use crate::error::ProtocolError;

/// Printed on its own line once an invocation has finished
pub const COMPLETION_MARKER: &str = "CODE_EXECUTION_COMPLETE";

/// Prefix of a serialized Result Envelope
pub const RESULT_START_MARKER: &str = "TERRABLE_RESULT_START:";

/// Suffix of a serialized Result Envelope
pub const RESULT_END_MARKER: &str = ":TERRABLE_RESULT_END";

/// Frame JavaScript source as a single code unit.
///
/// Line feeds are rewritten to carriage returns, which JavaScript also treats
/// as line terminators (template literals normalise both to `\n`), so the
/// source keeps its meaning while fitting on one control-channel line.
pub fn encode_code_unit(source: &str) -> String {
    let mut unit = source.replace("\r\n", "\r").replace('\n', "\r");
    unit.push('\n');
    unit
}

/// Whether an output line is the completion marker
pub fn is_completion_line(line: &str) -> bool {
    line.trim() == COMPLETION_MARKER
}

/// Wrap serialized envelope JSON between the result markers
pub fn wrap_result(json: &str) -> String {
    format!("{RESULT_START_MARKER}{json}{RESULT_END_MARKER}")
}

/// Find and parse the first Result Envelope in engine output
pub fn extract_result(output: &str) -> Result<ResultEnvelope, ProtocolError> {
    let start = output
        .find(RESULT_START_MARKER)
        .ok_or(ProtocolError::MissingMarkers)?
        + RESULT_START_MARKER.len();
    let end = output[start..]
        .find(RESULT_END_MARKER)
        .ok_or(ProtocolError::MissingMarkers)?
        + start;

    serde_json::from_str(&output[start..end]).map_err(ProtocolError::InvalidEnvelope)
}
