//! Interoperability report.
//!
//! An append-only trace of a run plus a single success flag. A batch report
//! only accumulates; a real-time report also streams each line to a sink as
//! it is written.

use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::warn;

/// Trace of one run.
pub struct Report {
    lines: Vec<String>,
    success: bool,
    sink: Option<Box<dyn Write + Send>>,
}

impl Report {
    /// Creates a report that only accumulates.
    pub fn batch() -> Self {
        Self {
            lines: Vec::new(),
            success: false,
            sink: None,
        }
    }

    /// Creates a report that also streams every line to `sink`.
    pub fn realtime(sink: impl Write + Send + 'static) -> Self {
        Self {
            lines: Vec::new(),
            success: false,
            sink: Some(Box::new(sink)),
        }
    }

    pub fn is_realtime(&self) -> bool {
        self.sink.is_some()
    }

    /// Appends a line.
    pub fn println(&mut self, line: impl Into<String>) {
        self.push(line.into());
    }

    /// Appends an indented detail line.
    pub fn printtabline(&mut self, line: impl AsRef<str>) {
        self.push(format!("\t{}", line.as_ref()));
    }

    /// Full trace text, one line per entry.
    pub fn output_report(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn set_success(&mut self, success: bool) {
        self.success = success;
    }

    fn push(&mut self, line: String) {
        if let Some(sink) = self.sink.as_mut() {
            let written = writeln!(sink, "{}", line).and_then(|_| sink.flush());
            if let Err(e) = written {
                warn!("Report sink write failed: {}", e);
            }
        }
        self.lines.push(line);
    }
}

impl Default for Report {
    fn default() -> Self {
        Self::batch()
    }
}

impl fmt::Debug for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Report")
            .field("lines", &self.lines.len())
            .field("success", &self.success)
            .field("realtime", &self.is_realtime())
            .finish()
    }
}

/// Cloneable in-memory sink, readable while a run streams into it.
#[derive(Debug, Clone, Default)]
pub struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
