use crate::StreamEvent;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid utf-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("invalid event payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unterminated frame exceeds {0} bytes")]
    Oversized(usize),
}

/// Default cap on bytes buffered for one unfinished frame.
pub const MAX_PENDING: usize = 1 << 20;

/// Encode a single event as a server-sent-events frame.
pub fn encode(event: &StreamEvent) -> Result<String, FrameError> {
    let data = serde_json::to_string(event)?;
    Ok(format!("event: {}\ndata: {}\n\n", event.kind(), data))
}

/// Incremental decoder for an SSE byte stream.
///
/// Chunks may split frames (or UTF-8 sequences) anywhere; bytes are buffered
/// until a blank line terminates the frame. A frame that grows past the
/// limit is dropped and reported as [`FrameError::Oversized`].
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already searched for a terminator.
    scanned: usize,
    limit: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_PENDING)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            limit,
        }
    }

    /// Feed a chunk and return every event completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamEvent, FrameError>> {
        self.buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));
        let mut out = Vec::new();
        loop {
            // a terminator may straddle the previous chunk boundary
            let from = self.scanned.saturating_sub(1);
            match self.buf[from..].windows(2).position(|w| w == b"\n\n") {
                Some(pos) => {
                    let end = from + pos;
                    let frame: Vec<u8> = self.buf.drain(..end + 2).collect();
                    self.scanned = 0;
                    if let Some(res) = parse_frame(&frame[..end]) {
                        out.push(res);
                    }
                }
                None => {
                    self.scanned = self.buf.len();
                    break;
                }
            }
        }
        if self.buf.len() > self.limit {
            self.buf.clear();
            self.scanned = 0;
            out.push(Err(FrameError::Oversized(self.limit)));
        }
        out
    }

    /// Bytes held back waiting for the end of a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn parse_frame(frame: &[u8]) -> Option<Result<StreamEvent, FrameError>> {
    let text = match std::str::from_utf8(frame) {
        Ok(t) => t,
        Err(e) => return Some(Err(e.into())),
    };
    let mut data: Option<String> = None;
    for line in text.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        if field == "data" {
            match data.as_mut() {
                Some(d) => {
                    d.push('\n');
                    d.push_str(value);
                }
                None => data = Some(value.to_string()),
            }
        }
    }
    let data = data?;
    if data.is_empty() {
        return None;
    }
    Some(serde_json::from_str(&data).map_err(FrameError::from))
}
