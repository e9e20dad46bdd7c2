/// Incremental UTF-8 decoder for a chunked reply body.
///
/// A multi-byte character split across two chunks is held back until its
/// remaining bytes arrive. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default, Clone)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, returning all text that is complete so far
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut text = String::with_capacity(bytes.len());
        let mut start = 0;

        while start < bytes.len() {
            match std::str::from_utf8(&bytes[start..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    start = bytes.len();
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&bytes[start..valid_end]));
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        None => {
                            // Incomplete trailing sequence, wait for more bytes
                            self.pending = bytes[valid_end..].to_vec();
                            return text;
                        }
                    }
                }
            }
        }

        text
    }

    /// Flush whatever is left once the stream has ended
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Phase of a single send's reply stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IngestPhase {
    #[default]
    Idle,
    Streaming,
    Failed,
}

/// Accumulates a streamed reply chunk by chunk.
///
/// Every accepted chunk yields the full text received so far, so the consumer
/// only ever replaces the displayed text with a longer prefix-consistent one.
#[derive(Debug, Default, Clone)]
pub struct StreamIngestor {
    phase: IngestPhase,
    decoder: Utf8Decoder,
    accumulated: String,
    chunks: usize,
    bytes: usize,
}

impl StreamIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ingesting a new reply
    pub fn begin(&mut self) {
        self.phase = IngestPhase::Streaming;
        self.decoder = Utf8Decoder::new();
        self.accumulated.clear();
        self.chunks = 0;
        self.bytes = 0;
    }

    /// Feed one chunk. Returns the accumulated text when it grew.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Option<&str> {
        if self.phase != IngestPhase::Streaming {
            return None;
        }

        self.chunks += 1;
        self.bytes += chunk.len();

        let delta = self.decoder.decode(chunk);
        if delta.is_empty() {
            return None;
        }
        self.accumulated.push_str(&delta);
        Some(&self.accumulated)
    }

    /// End of data. Returns the accumulated text if flushing added to it.
    pub fn finish(&mut self) -> Option<&str> {
        if self.phase != IngestPhase::Streaming {
            return None;
        }
        self.phase = IngestPhase::Idle;

        let rest = self.decoder.finish();
        if rest.is_empty() {
            return None;
        }
        self.accumulated.push_str(&rest);
        Some(&self.accumulated)
    }

    /// Transport error while streaming
    pub fn fail(&mut self) {
        if self.phase == IngestPhase::Streaming {
            self.phase = IngestPhase::Failed;
        }
    }

    /// Return to idle once a failure has been rolled back
    pub fn reset(&mut self) {
        self.phase = IngestPhase::Idle;
        self.decoder = Utf8Decoder::new();
        self.accumulated.clear();
        self.chunks = 0;
        self.bytes = 0;
    }

    pub fn phase(&self) -> IngestPhase {
        self.phase
    }

    pub fn text(&self) -> &str {
        &self.accumulated
    }

    pub fn has_content(&self) -> bool {
        !self.accumulated.is_empty()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    pub fn byte_count(&self) -> usize {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_chunks_in_order() {
        let mut ingestor = StreamIngestor::new();
        ingestor.begin();

        assert_eq!(ingestor.push_chunk(b"Hi"), Some("Hi"));
        assert_eq!(ingestor.push_chunk(b" there"), Some("Hi there"));
        assert_eq!(ingestor.finish(), None);
        assert_eq!(ingestor.phase(), IngestPhase::Idle);
        assert_eq!(ingestor.text(), "Hi there");
        assert_eq!(ingestor.chunk_count(), 2);
        assert_eq!(ingestor.byte_count(), 8);
    }

    #[test]
    fn holds_back_split_multibyte_characters() {
        let snowman = "☃".as_bytes();
        let mut ingestor = StreamIngestor::new();
        ingestor.begin();

        assert_eq!(ingestor.push_chunk(b"a"), Some("a"));
        assert_eq!(ingestor.push_chunk(&snowman[..1]), None);
        assert_eq!(ingestor.push_chunk(&snowman[1..]), Some("a☃"));
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"ok\xFFgo"), "ok\u{FFFD}go");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn truncated_tail_is_flushed_lossily() {
        let mut ingestor = StreamIngestor::new();
        ingestor.begin();
        ingestor.push_chunk(b"end");
        ingestor.push_chunk(&"é".as_bytes()[..1]);

        assert_eq!(ingestor.finish(), Some("end\u{FFFD}"));
    }

    #[test]
    fn chunks_are_ignored_outside_streaming() {
        let mut ingestor = StreamIngestor::new();
        assert_eq!(ingestor.push_chunk(b"early"), None);

        ingestor.begin();
        ingestor.push_chunk(b"partial");
        ingestor.fail();
        assert_eq!(ingestor.phase(), IngestPhase::Failed);
        assert_eq!(ingestor.push_chunk(b"late"), None);

        ingestor.reset();
        assert_eq!(ingestor.phase(), IngestPhase::Idle);
        assert!(!ingestor.has_content());
    }
}
