//! Bounded capture of container output.
//!
//! A tool that floods stdout must not exhaust server memory, but the end of
//! a log is usually where the error is. [`CappedOutput`] keeps the first and
//! the last halves of the budget and counts what it dropped in between.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt};

/// Head and tail of a byte stream within a fixed budget.
#[derive(Debug)]
pub struct CappedOutput {
    head: Vec<u8>,
    tail: VecDeque<u8>,
    head_cap: usize,
    tail_cap: usize,
    total: u64,
}

/// Final text of a captured stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    /// Lossy UTF-8 text, with a marker where bytes were dropped.
    pub text: String,
    /// Whether any bytes were dropped.
    pub truncated: bool,
    /// Total bytes produced by the stream.
    pub total_bytes: u64,
}

impl CappedOutput {
    /// Keep at most `max_bytes` (split evenly between head and tail).
    pub fn new(max_bytes: usize) -> Self {
        let head_cap = max_bytes / 2;
        Self {
            head: Vec::new(),
            tail: VecDeque::new(),
            head_cap,
            tail_cap: max_bytes - head_cap,
            total: 0,
        }
    }

    /// Append a chunk.
    pub fn push(&mut self, mut chunk: &[u8]) {
        self.total += chunk.len() as u64;
        if self.head.len() < self.head_cap {
            let take = (self.head_cap - self.head.len()).min(chunk.len());
            self.head.extend_from_slice(&chunk[..take]);
            chunk = &chunk[take..];
        }
        if self.tail_cap == 0 {
            return;
        }
        if chunk.len() >= self.tail_cap {
            self.tail.clear();
            self.tail.extend(&chunk[chunk.len() - self.tail_cap..]);
            return;
        }
        let overflow = (self.tail.len() + chunk.len()).saturating_sub(self.tail_cap);
        self.tail.drain(..overflow);
        self.tail.extend(chunk);
    }

    /// Bytes seen so far.
    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    /// Render the captured text.
    pub fn finish(&self) -> Captured {
        let kept = (self.head.len() + self.tail.len()) as u64;
        let dropped = self.total.saturating_sub(kept);
        let mut bytes = self.head.clone();
        if dropped > 0 {
            bytes.extend_from_slice(format!("\n... [{dropped} bytes truncated] ...\n").as_bytes());
        }
        bytes.extend(self.tail.iter());
        Captured {
            text: String::from_utf8_lossy(&bytes).into_owned(),
            truncated: dropped > 0,
            total_bytes: self.total,
        }
    }
}

/// Shared buffer filled by [`pump`]; readable even if the pump never ends.
pub type SharedOutput = Arc<Mutex<CappedOutput>>;

/// Create a shared buffer.
pub fn shared(max_bytes: usize) -> SharedOutput {
    Arc::new(Mutex::new(CappedOutput::new(max_bytes)))
}

/// Read `reader` to the end into `sink`.
pub async fn pump<R: AsyncRead + Unpin>(mut reader: R, sink: SharedOutput) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => sink
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(&buf[..n]),
            Err(e) => {
                tracing::debug!(error = %e, "output stream closed with error");
                break;
            }
        }
    }
}

/// Snapshot of a shared buffer.
pub fn snapshot(sink: &SharedOutput) -> Captured {
    sink.lock().unwrap_or_else(|e| e.into_inner()).finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_output_is_untouched() {
        let mut out = CappedOutput::new(64);
        out.push(b"hello ");
        out.push(b"world");
        let captured = out.finish();
        assert_eq!(captured.text, "hello world");
        assert!(!captured.truncated);
        assert_eq!(captured.total_bytes, 11);
    }

    #[test]
    fn keeps_head_and_tail() {
        let mut out = CappedOutput::new(10);
        out.push(b"AAAAA");
        for _ in 0..100 {
            out.push(b"x");
        }
        out.push(b"ZZZZZ");
        let captured = out.finish();
        assert!(captured.truncated);
        assert!(captured.text.starts_with("AAAAA"));
        assert!(captured.text.ends_with("ZZZZZ"));
        assert!(captured.text.contains("[100 bytes truncated]"));
    }

    #[test]
    fn single_large_chunk() {
        let mut out = CappedOutput::new(8);
        let data: Vec<u8> = (b'a'..=b'z').collect();
        out.push(&data);
        let captured = out.finish();
        assert!(captured.text.starts_with("abcd"));
        assert!(captured.text.ends_with("wxyz"));
        assert!(captured.text.contains("[18 bytes truncated]"));
    }

    #[test]
    fn tail_slides_across_chunks() {
        let mut out = CappedOutput::new(4);
        out.push(b"ab");
        out.push(b"cd");
        out.push(b"e");
        let captured = out.finish();
        assert!(captured.text.starts_with("ab"));
        assert!(captured.text.ends_with("de"));
        assert!(captured.text.contains("[1 bytes truncated]"));
    }

    #[tokio::test]
    async fn pump_reads_to_end() {
        let sink = shared(1024);
        pump(&b"line one\nline two\n"[..], sink.clone()).await;
        assert_eq!(snapshot(&sink).text, "line one\nline two\n");
    }
}
