//! Engine output streams
//!
//! The control stream (stdout) carries handler logs, result envelopes and
//! completion markers back to the orchestrator. The diagnostic stream (stderr)
//! receives `console.warn` / `console.error`, mirroring Node's stream split.

use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

/// Which stream a line goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Control,
    Diagnostic,
}

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Line-oriented writer pair shared by the engine and every context it builds
#[derive(Clone)]
pub struct Output {
    control: SharedWriter,
    diagnostic: SharedWriter,
}

impl Output {
    pub fn new(
        control: impl Write + Send + 'static,
        diagnostic: impl Write + Send + 'static,
    ) -> Self {
        Self {
            control: Arc::new(Mutex::new(Box::new(control))),
            diagnostic: Arc::new(Mutex::new(Box::new(diagnostic))),
        }
    }

    /// Process stdout / stderr
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }

    /// Write `text` followed by a newline and flush
    pub fn line(&self, stream: Stream, text: &str) -> io::Result<()> {
        let writer = match stream {
            Stream::Control => &self.control,
            Stream::Diagnostic => &self.diagnostic,
        };

        let mut writer = writer.lock();
        writer.write_all(text.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output").finish_non_exhaustive()
    }
}

/// Cloneable in-memory sink, handy for capturing output in tests
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_routed_by_stream() {
        let control = SharedBuffer::new();
        let diagnostic = SharedBuffer::new();
        let output = Output::new(control.clone(), diagnostic.clone());

        output.line(Stream::Control, "to stdout").unwrap();
        output.line(Stream::Diagnostic, "to stderr").unwrap();
        output.line(Stream::Control, "again").unwrap();

        assert_eq!(control.lines(), vec!["to stdout", "again"]);
        assert_eq!(diagnostic.contents(), "to stderr\n");
    }
}
