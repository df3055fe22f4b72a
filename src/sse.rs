//! SSE framing (spec §4.2): encode a JSON event as `data: <json>\n\n`, and
//! decode a byte stream back into events, tolerating chunk boundaries that
//! split a record or even a UTF-8 codepoint.

use serde::Serialize;

/// Encode one event as a complete SSE record.
pub fn encode<T: Serialize>(event: &T) -> String {
    let json = serde_json::to_string(event).expect("event must serialize");
    format!("data: {json}\n\n")
}

/// Streaming decoder. Feed it chunks via [`SseDecoder::push`]; each call
/// returns the complete records discovered so far, in order. The decoder
/// owns a growing buffer and only ever yields from the bytes it has seen so
/// a pattern split across N chunks is still discoverable once the bytes
/// reassemble into a complete `\n\n`-terminated record.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

/// One decoded record: the concatenation of all `data:` lines in the event,
/// or a parse error if the record's data was not valid JSON / UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedRecord {
    Data(String),
    ParseError(String),
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes and drain any complete records now available.
    /// Partial UTF-8 at the tail of `chunk` is fine: it is retained in the
    /// buffer and completed by a subsequent chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DecodedRecord> {
        self.buffer.extend_from_slice(chunk);
        let mut records = Vec::new();

        loop {
            let Some(boundary) = find_double_newline(&self.buffer) else {
                break;
            };
            let record_bytes: Vec<u8> = self.buffer.drain(..boundary + 2).collect();
            // drop the trailing \n\n itself
            let record_bytes = &record_bytes[..record_bytes.len() - 2];
            records.push(parse_record(record_bytes));
        }

        records
    }

    /// Any bytes still buffered (an incomplete trailing record). Exposed so
    /// callers can detect a stream that ended mid-record.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

fn find_double_newline(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|window| window == b"\n\n")
}

fn parse_record(bytes: &[u8]) -> DecodedRecord {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => return DecodedRecord::ParseError(format!("invalid utf-8: {e}")),
    };

    let data: String = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")))
        .collect::<Vec<_>>()
        .join("\n");

    if data.is_empty() {
        return DecodedRecord::ParseError("record had no data: line".to_string());
    }

    match serde_json::from_str::<serde_json::Value>(&data) {
        Ok(_) => DecodedRecord::Data(data),
        Err(e) => DecodedRecord::ParseError(format!("invalid json: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_a_single_record() {
        let event = json!({"type": "stdout", "data": "hi"});
        let encoded = encode(&event);
        assert_eq!(encoded, "data: {\"data\":\"hi\",\"type\":\"stdout\"}\n\n");
    }

    #[test]
    fn decodes_a_single_chunk_with_multiple_records() {
        let mut decoder = SseDecoder::new();
        let input = b"data: {\"a\":1}\n\ndata: {\"a\":2}\n\n";
        let records = decoder.push(input);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], DecodedRecord::Data("{\"a\":1}".to_string()));
        assert_eq!(records[1], DecodedRecord::Data("{\"a\":2}".to_string()));
    }

    #[test]
    fn reassembles_a_record_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let full = "data: {\"pattern\":\"listening on 3001\"}\n\n";
        let bytes = full.as_bytes();

        let mut discovered = Vec::new();
        // Split into many tiny chunks, including mid-codepoint-safe splits.
        for byte in bytes {
            discovered.extend(decoder.push(&[*byte]));
        }

        assert_eq!(discovered.len(), 1);
        match &discovered[0] {
            DecodedRecord::Data(data) => assert!(data.contains("listening on 3001")),
            other => panic!("expected data record, got {other:?}"),
        }
    }

    #[test]
    fn reassembles_a_record_split_across_n_arbitrary_chunk_boundaries() {
        let full = "data: {\"type\":\"stdout\",\"data\":\"needle-in-a-haystack\"}\n\ndata: {\"type\":\"complete\",\"exitCode\":0,\"success\":true}\n\n";
        let bytes = full.as_bytes();

        for split_every in [1usize, 2, 3, 5, 7, 13] {
            let mut decoder = SseDecoder::new();
            let mut all = Vec::new();
            for chunk in bytes.chunks(split_every) {
                all.extend(decoder.push(chunk));
            }
            assert_eq!(all.len(), 2, "split_every={split_every}");
            let joined = all
                .iter()
                .map(|record| match record {
                    DecodedRecord::Data(data) => data.clone(),
                    DecodedRecord::ParseError(e) => panic!("unexpected parse error: {e}"),
                })
                .collect::<Vec<_>>()
                .join(" ");
            assert!(joined.contains("needle-in-a-haystack"));
        }
    }

    #[test]
    fn a_malformed_record_does_not_poison_the_stream() {
        let mut decoder = SseDecoder::new();
        let input = b"data: not json\n\ndata: {\"ok\":true}\n\n";
        let records = decoder.push(input);
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], DecodedRecord::ParseError(_)));
        assert_eq!(records[1], DecodedRecord::Data("{\"ok\":true}".to_string()));
    }

    #[test]
    fn retains_trailing_partial_record() {
        let mut decoder = SseDecoder::new();
        let records = decoder.push(b"data: {\"a\":1}\n\ndata: {\"a\":2}");
        assert_eq!(records.len(), 1);
        assert!(!decoder.pending().is_empty());
    }
}
