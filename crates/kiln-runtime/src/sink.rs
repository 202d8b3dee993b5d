//! Output sink — the per-invocation console buffer.
//!
//! Every `write(...)` and `console.*(...)` call made by a script lands
//! here, in call order. The sink belongs to exactly one execution
//! context; it is created with the context and read once the invocation
//! reaches a terminal state.

use std::cell::RefCell;
use std::rc::Rc;

use crate::codec::encode_text;

/// Append-only byte buffer with a size cap.
///
/// Cloning yields another handle to the same buffer, so the host keeps
/// one handle while the script-side bindings hold the others. Handles
/// are `!Send`: a sink never leaves the thread running its context.
#[derive(Debug, Clone)]
pub struct OutputSink {
    inner: Rc<RefCell<SinkState>>,
}

#[derive(Debug)]
struct SinkState {
    buffer: Vec<u8>,
    limit: usize,
    dropped: usize,
}

impl OutputSink {
    /// Create an empty sink that keeps at most `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SinkState {
                buffer: Vec::new(),
                limit,
                dropped: 0,
            })),
        }
    }

    /// Append the UTF-8 encoding of `text`. No terminator is added.
    pub fn write(&self, text: &str) {
        self.write_bytes(&encode_text(text));
    }

    /// Append raw bytes. Bytes past the cap are counted and discarded.
    pub fn write_bytes(&self, bytes: &[u8]) {
        let mut state = self.inner.borrow_mut();
        let room = state.limit.saturating_sub(state.buffer.len());
        let kept = bytes.len().min(room);
        state.buffer.extend_from_slice(&bytes[..kept]);
        state.dropped += bytes.len() - kept;
    }

    /// Current contents. Does not clear the buffer.
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.borrow().buffer.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().buffer.is_empty()
    }

    /// Bytes discarded because the cap was reached.
    pub fn dropped(&self) -> usize {
        self.inner.borrow().dropped
    }
}

impl Default for OutputSink {
    fn default() -> Self {
        Self::with_limit(crate::limiter::DEFAULT_OUTPUT_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_call_order() {
        let sink = OutputSink::default();
        sink.write("a");
        sink.write("b\n");
        sink.write("c");
        assert_eq!(sink.snapshot(), b"ab\nc");
    }

    #[test]
    fn snapshot_is_idempotent() {
        let sink = OutputSink::default();
        sink.write("hello");
        assert_eq!(sink.snapshot(), sink.snapshot());
        assert_eq!(sink.len(), 5);
    }

    #[test]
    fn clones_share_one_buffer() {
        let sink = OutputSink::default();
        let binding = sink.clone();
        binding.write("from script");
        assert_eq!(sink.snapshot(), b"from script");
    }

    #[test]
    fn writes_are_utf8() {
        let sink = OutputSink::default();
        sink.write("€");
        assert_eq!(sink.snapshot(), vec![226, 130, 172]);
    }

    #[test]
    fn cap_truncates_and_counts() {
        let sink = OutputSink::with_limit(4);
        sink.write("abc");
        sink.write("def");
        assert_eq!(sink.snapshot(), b"abcd");
        assert_eq!(sink.dropped(), 2);
        sink.write("g");
        assert_eq!(sink.dropped(), 3);
    }

    #[test]
    fn new_sinks_start_empty() {
        let first = OutputSink::default();
        first.write("leftover");
        let second = OutputSink::default();
        assert!(second.is_empty());
    }
}
