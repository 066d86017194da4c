use crate::error::ProxyError;
use serde_json::Value;

/// Incremental decoder for the upstream chunked wire.
///
/// Accepts both framings the upstream has been observed to use:
/// `data: {...}` SSE events and newline-delimited JSON (including the
/// `[{...},` / `,{...}]` array stream shape). Frames may be split across
/// chunks arbitrarily; a rolling byte buffer holds the unconsumed tail.
///
/// Repair policy: a prefix that will not parse is retained while new
/// chunks arrive. After `max_retries` consecutive failed attempts on the
/// same prefix the decoder discards up to the next framing boundary and
/// counts one malformed chunk. The buffer is hard-capped; overflow is a
/// terminal error.
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_retries: u32,
    stuck_attempts: u32,
    cap: usize,
    malformed_chunks: u64,
}

impl FrameDecoder {
    pub fn new(max_retries: u32, cap: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_retries,
            stuck_attempts: 0,
            cap,
            malformed_chunks: 0,
        }
    }

    pub fn malformed_chunks(&self) -> u64 {
        self.malformed_chunks
    }

    /// Feed one network chunk; returns every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Value>, ProxyError> {
        if self.buf.len() + chunk.len() > self.cap {
            self.malformed_chunks += 1;
            return Err(ProxyError::MalformedChunk(format!(
                "stream buffer exceeded {} bytes",
                self.cap
            )));
        }
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            match self.try_extract_frame() {
                Extract::Frame(value) => {
                    self.stuck_attempts = 0;
                    frames.push(value);
                }
                Extract::NeedMore => break,
                Extract::Garbage => {
                    self.stuck_attempts += 1;
                    if self.stuck_attempts > self.max_retries {
                        self.discard_to_next_boundary();
                        self.malformed_chunks += 1;
                        self.stuck_attempts = 0;
                        continue;
                    }
                    break;
                }
            }
        }
        Ok(frames)
    }

    /// Flush at end of stream; trailing partial data that parses is
    /// returned, anything else is counted malformed.
    pub fn finish(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        loop {
            match self.try_extract_frame() {
                Extract::Frame(value) => frames.push(value),
                Extract::NeedMore | Extract::Garbage => break,
            }
        }
        self.skip_noise();
        if !self.buf.is_empty() {
            self.malformed_chunks += 1;
            self.buf.clear();
        }
        frames
    }

    /// Drop framing noise: whitespace, array punctuation, `data:` prefixes
    /// and `[DONE]` markers.
    fn skip_noise(&mut self) {
        loop {
            let mut start = 0;
            while start < self.buf.len()
                && matches!(self.buf[start], b' ' | b'\t' | b'\r' | b'\n' | b',' | b'[' | b']')
            {
                // "[DONE]" opens with '[' but is not array framing.
                if self.buf[start] == b'[' && self.buf[start..].starts_with(b"[DONE]") {
                    break;
                }
                start += 1;
            }
            self.buf.drain(..start);

            if self.buf.starts_with(b"data:") {
                self.buf.drain(..5);
                continue;
            }
            if self.buf.starts_with(b"[DONE]") {
                self.buf.drain(..6);
                continue;
            }
            if start == 0 {
                break;
            }
        }
    }

    fn try_extract_frame(&mut self) -> Extract {
        self.skip_noise();
        if self.buf.is_empty() {
            return Extract::NeedMore;
        }
        if self.buf[0] != b'{' {
            return Extract::Garbage;
        }

        let Some(end) = object_span(&self.buf) else {
            return Extract::NeedMore;
        };

        match serde_json::from_slice::<Value>(&self.buf[..end]) {
            Ok(value) => {
                self.buf.drain(..end);
                Extract::Frame(value)
            }
            Err(_) => Extract::Garbage,
        }
    }

    /// Discard the unparsable prefix: through the end of the balanced
    /// object span when one exists, else to the next newline, else all.
    fn discard_to_next_boundary(&mut self) {
        let cut = object_span(&self.buf)
            .or_else(|| self.buf.iter().position(|b| *b == b'\n').map(|i| i + 1))
            .unwrap_or(self.buf.len());
        self.buf.drain(..cut.max(1).min(self.buf.len()));
    }
}

enum Extract {
    Frame(Value),
    NeedMore,
    Garbage,
}

/// Byte length of the balanced top-level JSON object at the start of
/// `buf`, if complete. String-aware brace counting.
fn object_span(buf: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in buf.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *b == b'\\' {
                escaped = true;
            } else if *b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(12, 1024 * 1024)
    }

    #[test]
    fn sse_data_lines_decode() {
        let mut d = decoder();
        let frames = d
            .push(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n")
            .unwrap();
        assert_eq!(frames, vec![json!({"a":1}), json!({"b":2})]);
        assert_eq!(d.malformed_chunks(), 0);
    }

    #[test]
    fn ndjson_and_array_stream_decode() {
        let mut d = decoder();
        let frames = d.push(b"[{\"a\":1},\n{\"b\":2}]\n").unwrap();
        assert_eq!(frames, vec![json!({"a":1}), json!({"b":2})]);
    }

    #[test]
    fn frames_split_across_chunks_reassemble() {
        let mut d = decoder();
        assert!(d.push(b"data: {\"text\": \"he").unwrap().is_empty());
        let frames = d.push(b"llo\"}\n\n").unwrap();
        assert_eq!(frames, vec![json!({"text": "hello"})]);
    }

    #[test]
    fn string_with_braces_does_not_confuse_the_scanner() {
        let mut d = decoder();
        let frames = d.push(br#"{"text": "fn main() { \"}\" }"}"#).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["text"], json!("fn main() { \"}\" }"));
    }

    #[test]
    fn done_markers_and_blank_lines_are_ignored() {
        let mut d = decoder();
        let frames = d.push(b"\n\ndata: [DONE]\n\ndata: {\"a\":1}\n\n").unwrap();
        assert_eq!(frames, vec![json!({"a":1})]);
    }

    #[test]
    fn garbage_is_discarded_after_max_retries() {
        let mut d = FrameDecoder::new(3, 1024);
        // A balanced-but-invalid object parks the decoder on garbage.
        assert!(d.push(b"{invalid}\n").unwrap().is_empty());
        assert!(d.push(b"").unwrap().is_empty());
        assert!(d.push(b"").unwrap().is_empty());
        // Fourth consecutive failure on the same prefix: discard and move on.
        let frames = d.push(b"{\"ok\":true}\n").unwrap();
        assert_eq!(frames, vec![json!({"ok": true})]);
        assert_eq!(d.malformed_chunks(), 1);
    }

    #[test]
    fn buffer_overflow_is_a_hard_error() {
        let mut d = FrameDecoder::new(12, 64);
        let big = vec![b'{'; 100];
        let err = d.push(&big).unwrap_err();
        assert_eq!(err.kind(), "malformed_chunk");
    }

    #[test]
    fn complete_object_without_trailing_newline_decodes_immediately() {
        let mut d = decoder();
        let frames = d.push(b"data: {\"a\":1}").unwrap();
        assert_eq!(frames, vec![json!({"a":1})]);
        assert!(d.finish().is_empty());
        assert_eq!(d.malformed_chunks(), 0);
    }

    #[test]
    fn finish_counts_trailing_garbage() {
        let mut d = decoder();
        let _ = d.push(b"data: {\"a\":");
        let frames = d.finish();
        assert!(frames.is_empty());
        assert_eq!(d.malformed_chunks(), 1);
    }
}
