//! Invocation buffer and code units
//!
//! Bytes from the control channel accumulate here until a newline arrives.
//! The bytes up to the newline become the in-flight [`CodeUnit`]; anything
//! after it stays pending for the next invocation. Resetting the buffer only
//! drops the in-flight unit, so gated input is never lost nor glued onto a
//! finished unit.
//!
//! A unit ends at the first `\n`. Multi-line source has to be framed with
//! [`terrable_core::encode_code_unit`] before it is written, otherwise each
//! line runs as its own invocation.

use base64::{engine::general_purpose, Engine as _};
use bytes::{Buf, BytesMut};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// One newline-terminated block of handler source, trimmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeUnit {
    source: Arc<str>,
    code_sha256: String,
}

impl CodeUnit {
    pub fn new(source: impl Into<Arc<str>>) -> Self {
        let source = source.into();
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        let code_sha256 = general_purpose::STANDARD.encode(hasher.finalize());

        Self {
            source,
            code_sha256,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Base64 SHA-256 of the source
    pub fn code_sha256(&self) -> &str {
        &self.code_sha256
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }
}

/// Accumulates control-channel bytes and hands out complete code units
#[derive(Debug, Default)]
pub struct InvocationBuffer {
    pending: BytesMut,
    in_flight: Option<CodeUnit>,
}

impl InvocationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw chunk in arrival order
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Take the next complete unit, skipping blank lines.
    ///
    /// Returns `None` while a unit is still in flight or no newline has
    /// arrived yet.
    pub fn take_unit(&mut self) -> Option<CodeUnit> {
        if self.in_flight.is_some() {
            return None;
        }

        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line = self.pending.split_to(newline);
            self.pending.advance(1);

            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                tracing::debug!("Skipping blank code unit");
                continue;
            }

            let unit = CodeUnit::new(trimmed);
            self.in_flight = Some(unit.clone());
            return Some(unit);
        }

        None
    }

    pub fn in_flight(&self) -> Option<&CodeUnit> {
        self.in_flight.as_ref()
    }

    /// Drop the in-flight unit once its invocation completed or failed
    pub fn reset(&mut self) {
        self.in_flight = None;
    }

    /// Bytes received but not yet part of a dispatched unit
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_none() && self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_requires_newline() {
        let mut buffer = InvocationBuffer::new();
        buffer.push(b"complete()");
        assert!(buffer.take_unit().is_none());
        assert_eq!(buffer.pending_len(), 10);

        buffer.push(b";\n");
        let unit = buffer.take_unit().unwrap();
        assert_eq!(unit.source(), "complete();");
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn test_unframed_source_splits_per_line() {
        let source = "const a = 1;\ncomplete();";

        let mut raw = InvocationBuffer::new();
        raw.push(format!("{source}\n").as_bytes());
        assert_eq!(raw.take_unit().unwrap().source(), "const a = 1;");

        let mut framed = InvocationBuffer::new();
        framed.push(terrable_core::encode_code_unit(source).as_bytes());
        assert_eq!(framed.take_unit().unwrap().source(), "const a = 1;\rcomplete();");
        assert_eq!(framed.pending_len(), 0);
    }

    #[test]
    fn test_gated_while_in_flight() {
        let mut buffer = InvocationBuffer::new();
        buffer.push(b"first();\nsecond();\n");

        assert_eq!(buffer.take_unit().unwrap().source(), "first();");
        // second unit is buffered, not handed out
        assert!(buffer.take_unit().is_none());
        assert_eq!(buffer.pending_len(), 10);

        buffer.reset();
        assert_eq!(buffer.take_unit().unwrap().source(), "second();");
    }

    #[test]
    fn test_reset_keeps_pending_tail() {
        let mut buffer = InvocationBuffer::new();
        buffer.push(b"first();\nsec");
        buffer.take_unit().unwrap();

        buffer.reset();
        assert!(buffer.in_flight().is_none());
        assert_eq!(buffer.pending_len(), 3);

        buffer.push(b"ond();\n");
        assert_eq!(buffer.take_unit().unwrap().source(), "second();");
    }

    #[test]
    fn test_blank_lines_skipped() {
        let mut buffer = InvocationBuffer::new();
        buffer.push(b"\n   \r\n  complete();  \n");
        assert_eq!(buffer.take_unit().unwrap().source(), "complete();");
    }

    #[test]
    fn test_only_blank_lines() {
        let mut buffer = InvocationBuffer::new();
        buffer.push(b"\n\n");
        assert!(buffer.take_unit().is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let mut buffer = InvocationBuffer::new();
        let source = "console.log('héllo');\n".as_bytes();
        let split = source.iter().position(|b| *b == 0xC3).unwrap() + 1;

        buffer.push(&source[..split]);
        buffer.push(&source[split..]);

        assert_eq!(buffer.take_unit().unwrap().source(), "console.log('héllo');");
    }

    #[test]
    fn test_code_unit_digest() {
        let a = CodeUnit::new("complete();");
        let b = CodeUnit::new("complete();");
        let c = CodeUnit::new("complete(); ");

        assert_eq!(a.code_sha256(), b.code_sha256());
        assert_ne!(a.code_sha256(), c.code_sha256());
        assert_eq!(a.len(), 11);
    }
}
