//! Bounded text accumulator for tool output

use std::fmt;

/// Line appended once when a budget is first exceeded
pub const TRUNCATION_SENTINEL: &str = "... [output truncated due to size limits]";

/// Byte and line budgets for one sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLimits {
    pub max_bytes: usize,
    pub max_lines: usize,
}

impl OutputLimits {
    pub fn new(max_bytes: usize, max_lines: usize) -> Self {
        Self {
            max_bytes,
            max_lines,
        }
    }
}

/// Accumulates lines until a byte or line budget is exceeded.
///
/// Once the budget is exceeded the sentinel is written exactly once and all
/// later appends are ignored, so memory stays proportional to the budget no
/// matter how much a tool prints.
#[derive(Debug)]
pub struct BoundedOutputSink {
    limits: OutputLimits,
    buffer: String,
    bytes: usize,
    lines: usize,
    truncated: bool,
}

impl BoundedOutputSink {
    pub fn new(limits: OutputLimits) -> Self {
        Self {
            limits,
            buffer: String::new(),
            bytes: 0,
            lines: 0,
            truncated: false,
        }
    }

    /// Append one line (without its terminator)
    pub fn append(&mut self, line: &str) {
        if self.truncated {
            return;
        }

        let line_bytes = line.len() + 1;
        if self.lines + 1 > self.limits.max_lines || self.bytes + line_bytes > self.limits.max_bytes
        {
            self.truncated = true;
            self.buffer.push_str(TRUNCATION_SENTINEL);
            self.buffer.push('\n');
            return;
        }

        self.buffer.push_str(line);
        self.buffer.push('\n');
        self.bytes += line_bytes;
        self.lines += 1;
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn line_count(&self) -> usize {
        self.lines
    }

    pub fn into_string(self) -> String {
        self.buffer
    }
}

impl fmt::Display for BoundedOutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buffer)
    }
}

/// Re-bound already captured text, e.g. before embedding it in an error
pub fn excerpt(text: &str, limits: OutputLimits) -> String {
    let mut sink = BoundedOutputSink::new(limits);
    for line in text.lines() {
        sink.append(line);
        if sink.is_truncated() {
            break;
        }
    }
    sink.into_string()
}
