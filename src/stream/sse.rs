/// Incremental event-stream tokenizer and SSE encoding helpers.
///
/// Upstream bytes arrive in arbitrary chunks. [`Utf8Decoder`] turns them into
/// text without splitting multi-byte characters, [`RecordParser`] assembles
/// complete records, and [`record_stream`] wires both onto a byte stream.
use super::SseRecord;
use futures_util::Stream;
use memchr::memchr_iter;
use smallvec::SmallVec;

const DONE_FRAME: &str = "data: [DONE]\n\n";

struct PendingRecords {
    records: SmallVec<[SseRecord; 8]>,
    head: usize,
}

impl PendingRecords {
    #[inline]
    fn new() -> Self {
        Self {
            records: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<SseRecord> {
        if self.head >= self.records.len() {
            return None;
        }
        let record = std::mem::take(&mut self.records[self.head]);
        self.head += 1;
        if self.head == self.records.len() {
            self.records.clear();
            self.head = 0;
        }
        Some(record)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<SseRecord>) {
        if parsed.is_empty() {
            return;
        }
        self.records.reserve(parsed.len());
        self.records.extend(parsed.drain(..));
    }
}

// ---------------------------------------------------------------------------
// Utf8Decoder
// ---------------------------------------------------------------------------

/// Stateful UTF-8 decoder that carries incomplete trailing sequences over to
/// the next chunk. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes` and append the text to `out`.
    pub fn decode_into(&mut self, bytes: &[u8], out: &mut String) {
        if self.pending.is_empty() {
            let tail = decode_prefix(bytes, out);
            self.pending.extend_from_slice(&bytes[tail..]);
            return;
        }

        self.pending.extend_from_slice(bytes);
        let tail = decode_prefix(&self.pending, out);
        self.pending.drain(..tail);
    }
}

// Decodes as much of `bytes` as is complete; returns the offset of the
// incomplete tail that must wait for more input.
fn decode_prefix(bytes: &[u8], out: &mut String) -> usize {
    let mut offset = 0;
    loop {
        match std::str::from_utf8(&bytes[offset..]) {
            Ok(text) => {
                out.push_str(text);
                return bytes.len();
            }
            Err(e) => {
                let valid_up_to = offset + e.valid_up_to();
                // The prefix was just validated by `from_utf8`.
                out.push_str(
                    std::str::from_utf8(&bytes[offset..valid_up_to]).unwrap_or_default(),
                );
                match e.error_len() {
                    Some(invalid_len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        offset = valid_up_to + invalid_len;
                    }
                    None => return valid_up_to,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RecordParser
// ---------------------------------------------------------------------------

/// Incremental record parser.
///
/// Feed it text chunks split at arbitrary points and it yields fully
/// assembled [`SseRecord`]s:
/// - `event:` sets the record name (value trimmed)
/// - `data:` values are trimmed and appended with no separator
/// - a blank line ends the record; it is emitted if any field was seen
/// - every other line (`:` comments, `id:`, `retry:`) is ignored
/// - both `\n` and `\r\n` terminate lines
#[derive(Debug, Default)]
pub struct RecordParser {
    buffer: String,
    read_offset: usize,
    event: Option<String>,
    data: String,
    seen_field: bool,
}

impl RecordParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed text and return any complete records.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseRecord> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed text and append complete records into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseRecord>) {
        let scan_start = self.buffer.len();
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let bytes = self.buffer.as_bytes();
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            Self::process_line(
                line,
                &mut self.event,
                &mut self.data,
                &mut self.seen_field,
                out,
            );
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    fn process_line(
        line: &str,
        event: &mut Option<String>,
        data: &mut String,
        seen_field: &mut bool,
        out: &mut Vec<SseRecord>,
    ) {
        if line.is_empty() {
            if *seen_field {
                out.push(SseRecord {
                    event: event.take(),
                    data: std::mem::take(data),
                });
                *seen_field = false;
            }
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            data.push_str(value.trim());
            *seen_field = true;
        } else if let Some(value) = line.strip_prefix("event:") {
            *event = Some(value.trim().to_string());
            *seen_field = true;
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

/// Format an unnamed SSE frame carrying `json`.
#[must_use]
pub fn openai_sse_frame(json: &str) -> String {
    let mut out = String::with_capacity(10 + json.len());
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

/// The terminal `[DONE]` frame.
#[must_use]
pub fn done_frame() -> &'static str {
    DONE_FRAME
}

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

/// Split a byte stream into [`SseRecord`]s.
///
/// Records are produced lazily and in order. A read error is yielded once
/// and ends the sequence; an unterminated record at end of input is
/// discarded.
pub fn record_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseRecord, E>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    use futures_util::StreamExt;

    struct State<S> {
        stream: std::pin::Pin<Box<S>>,
        decoder: Utf8Decoder,
        parser: RecordParser,
        text: String,
        parsed: Vec<SseRecord>,
        pending: PendingRecords,
        finished: bool,
    }

    let state = State {
        stream: Box::pin(byte_stream),
        decoder: Utf8Decoder::new(),
        parser: RecordParser::new(),
        text: String::new(),
        parsed: Vec::with_capacity(8),
        pending: PendingRecords::new(),
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(record) = state.pending.pop_front() {
                return Some((Ok(record), state));
            }
            if state.finished {
                return None;
            }

            match state.stream.as_mut().next().await {
                Some(Ok(bytes)) => {
                    state.text.clear();
                    state.decoder.decode_into(&bytes, &mut state.text);
                    state.parser.feed_into(&state.text, &mut state.parsed);
                    state.pending.extend_from_vec(&mut state.parsed);
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(err), state));
                }
                None => return None,
            }
        }
    })
}
