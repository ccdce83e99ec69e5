//! Incremental recovery of records from a large
//! `{"battles":[...],"coops":[...],"images":[...]}` document delivered in
//! arbitrary byte windows.

use serde_json::Value;
use thiserror::Error;

const BATTLES_KEY: &[u8] = b"\"battles\":[";
const COOPS_KEY: &[u8] = b"\"coops\":[";
const IMAGES_KEY: &[u8] = b"\"images\":[";
const KEYS: [(&[u8], StreamMode); 3] = [
    (BATTLES_KEY, StreamMode::Battles),
    (COOPS_KEY, StreamMode::Coops),
    (IMAGES_KEY, StreamMode::Images),
];

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("null character found at {offset}")]
    NullByte { offset: usize },
    #[error("extracted records are not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("input ended inside a record ({pending} bytes pending)")]
    Truncated { pending: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Unknown,
    Battles,
    Coops,
    Images,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportChunk {
    pub battles: Vec<Value>,
    pub coops: Vec<Value>,
    pub images: Vec<Value>,
}

impl ImportChunk {
    pub fn len(&self) -> usize {
        self.battles.len() + self.coops.len() + self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct Fragments {
    battles: Vec<u8>,
    coops: Vec<u8>,
    images: Vec<u8>,
}

impl Fragments {
    fn push(&mut self, mode: StreamMode, record: &[u8]) {
        let target = match mode {
            StreamMode::Battles => &mut self.battles,
            StreamMode::Coops => &mut self.coops,
            StreamMode::Images => &mut self.images,
            StreamMode::Unknown => return,
        };
        target.push(b',');
        target.extend_from_slice(record);
    }

    fn into_chunk(self) -> Result<ImportChunk, StreamError> {
        Ok(ImportChunk {
            battles: parse_array(self.battles)?,
            coops: parse_array(self.coops)?,
            images: parse_array(self.images)?,
        })
    }
}

/// Wraps comma-prefixed fragments into `[...]`, or `[]` when nothing was found.
fn parse_array(mut fragments: Vec<u8>) -> Result<Vec<Value>, StreamError> {
    if fragments.is_empty() {
        fragments.push(b'[');
    } else {
        fragments[0] = b'[';
    }
    fragments.push(b']');
    Ok(serde_json::from_slice(&fragments)?)
}

/// Carries scan state across windows. After an error the parser must be
/// discarded.
pub struct ImportStreamParser {
    mode: StreamMode,
    buffer: Vec<u8>,
    drained: usize,
    depth: usize,
    quote: bool,
    escape: bool,
    prefixes: [usize; 3],
    record_start: Option<usize>,
}

impl Default for ImportStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportStreamParser {
    pub fn new() -> Self {
        Self {
            mode: StreamMode::Unknown,
            buffer: Vec::new(),
            drained: 0,
            depth: 0,
            quote: false,
            escape: false,
            prefixes: [0; 3],
            record_start: None,
        }
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Bytes of the document already released from the buffer.
    pub fn drained(&self) -> usize {
        self.drained
    }

    /// Bytes retained for the next window.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn parse(&mut self, window: &[u8]) -> Result<ImportChunk, StreamError> {
        let scan_from = self.buffer.len();
        self.buffer.extend_from_slice(window);

        let mut fragments = Fragments::default();
        for index in scan_from..self.buffer.len() {
            let byte = self.buffer[index];
            if byte == 0 {
                return Err(StreamError::NullByte {
                    offset: self.drained + index,
                });
            }
            if self.escape {
                self.escape = false;
                continue;
            }
            if byte == b'\\' {
                self.escape = true;
                continue;
            }
            if matches!(byte, b' ' | b'\t' | b'\r' | b'\n') {
                continue;
            }

            if self.depth == 0 && self.match_key(byte) {
                continue;
            }

            if byte == b'"' {
                self.quote = !self.quote;
                continue;
            }
            if self.quote || self.mode == StreamMode::Unknown {
                continue;
            }

            match byte {
                b'{' => {
                    if self.depth == 0 {
                        self.record_start = Some(index);
                    }
                    self.depth += 1;
                }
                b'}' if self.depth > 0 => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        if let Some(start) = self.record_start.take() {
                            fragments.push(self.mode, &self.buffer[start..=index]);
                        }
                    }
                }
                b']' if self.depth == 0 => {
                    self.mode = StreamMode::Unknown;
                }
                _ => {}
            }
        }

        // Everything before an incomplete record has been consumed.
        let drainable = self.record_start.unwrap_or(self.buffer.len());
        self.buffer.drain(..drainable);
        self.drained += drainable;
        if self.record_start.is_some() {
            self.record_start = Some(0);
        }

        fragments.into_chunk()
    }

    /// Confirms the document did not end inside a record.
    pub fn finish(self) -> Result<(), StreamError> {
        if self.depth > 0 || self.record_start.is_some() {
            return Err(StreamError::Truncated {
                pending: self.buffer.len(),
            });
        }
        Ok(())
    }

    /// Advances the per-key partial matches. Returns true when a key completed
    /// and the mode switched. A key may only begin outside a quoted string.
    fn match_key(&mut self, byte: u8) -> bool {
        let mut matched = None;
        for (slot, (key, mode)) in KEYS.iter().enumerate() {
            let progress = self.prefixes[slot];
            if byte == key[progress] && (progress > 0 || !self.quote) {
                self.prefixes[slot] += 1;
            } else if byte == key[0] && !self.quote {
                self.prefixes[slot] = 1;
            } else {
                self.prefixes[slot] = 0;
            }
            if self.prefixes[slot] == key.len() {
                matched = Some(*mode);
            }
        }

        let Some(mode) = matched else {
            return false;
        };
        self.mode = mode;
        self.prefixes = [0; 3];
        self.quote = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feed(document: &[u8], window: usize) -> ImportChunk {
        let mut parser = ImportStreamParser::new();
        let mut all = ImportChunk::default();
        for piece in document.chunks(window) {
            let chunk = parser.parse(piece).expect("parse window");
            all.battles.extend(chunk.battles);
            all.coops.extend(chunk.coops);
            all.images.extend(chunk.images);
        }
        parser.finish().expect("complete document");
        all
    }

    #[test]
    fn brace_inside_quoted_string_is_not_structural() {
        let document = br#"{"battles":[{"id":"a","note":"{not a brace}"}],"coops":[]}"#;

        let whole = feed(document, document.len());
        let bytewise = feed(document, 1);

        assert_eq!(whole.battles, vec![json!({"id": "a", "note": "{not a brace}"})]);
        assert!(whole.coops.is_empty());
        assert_eq!(whole, bytewise);
    }

    #[test]
    fn window_size_does_not_change_extracted_records() {
        let document = json!({
            "battles": [
                {"id": "b1", "name": "quote \" and } brace", "n": [1, {"deep": true}]},
                {"id": "b2", "path": "C:\\dir\\", "tricky": "\"coops\":["},
            ],
            "coops": [
                {"id": "c1", "waves": [{"w": 1}, {"w": 2}]},
            ],
            "images": [
                {"url": "https://example.test/a_0.png"},
            ],
        });
        let bytes = serde_json::to_vec_pretty(&document).expect("encode");

        let whole = feed(&bytes, bytes.len());
        assert_eq!(whole.battles.len(), 2);
        assert_eq!(whole.coops.len(), 1);
        assert_eq!(whole.images.len(), 1);
        assert_eq!(whole.battles[1]["tricky"], json!("\"coops\":["));

        for window in [1, 2, 3, 7, 64] {
            assert_eq!(feed(&bytes, window), whole, "window {window}");
        }
    }

    #[test]
    fn nested_key_inside_record_does_not_switch_mode() {
        let document = br#"{"coops":[{"inner":{"battles":[{"id":"no"}]}}],"battles":[]}"#;
        let chunk = feed(document, 5);

        assert!(chunk.battles.is_empty());
        assert_eq!(
            chunk.coops,
            vec![json!({"inner": {"battles": [{"id": "no"}]}})]
        );
    }

    #[test]
    fn objects_after_a_closed_array_are_not_records() {
        let document = br#"{"battles":[{"id":"a"}],"meta":{"version":1}}"#;
        let chunk = feed(document, 4);

        assert_eq!(chunk.battles, vec![json!({"id": "a"})]);
        assert!(chunk.coops.is_empty());
    }

    #[test]
    fn every_call_returns_parseable_arrays_and_keeps_only_the_partial_record() {
        let mut parser = ImportStreamParser::new();

        let chunk = parser.parse(br#"{"battles":[{"id":"a"},{"id":"#).expect("first");
        assert_eq!(chunk.battles, vec![json!({"id": "a"})]);
        assert_eq!(parser.mode(), StreamMode::Battles);
        assert_eq!(parser.pending(), br#"{"id":"#.len());

        let chunk = parser.parse(br#""b"}],"coops":["#).expect("second");
        assert_eq!(chunk.battles, vec![json!({"id": "b"})]);
        assert_eq!(parser.pending(), 0);
        assert_eq!(parser.mode(), StreamMode::Coops);

        let chunk = parser.parse(b"  ").expect("whitespace only");
        assert!(chunk.is_empty());
        parser.finish().expect("clean end");
    }

    #[test]
    fn preamble_before_any_array_is_not_retained() {
        let mut parser = ImportStreamParser::new();
        let preamble = format!(r#"{{"exportedBy":"{}","#, "x".repeat(4096));

        parser.parse(preamble.as_bytes()).expect("preamble");
        assert_eq!(parser.pending(), 0);
        assert_eq!(parser.drained(), preamble.len());
    }

    #[test]
    fn null_byte_reports_absolute_offset() {
        let mut parser = ImportStreamParser::new();
        parser.parse(br#"{"battles":["#).expect("prefix");

        let err = parser.parse(b"{\"id\":\0}").expect_err("null byte");
        assert!(matches!(err, StreamError::NullByte { offset: 18 }));
    }

    #[test]
    fn finish_rejects_a_truncated_record() {
        let mut parser = ImportStreamParser::new();
        parser.parse(br#"{"battles":[{"id":"a""#).expect("partial");

        assert!(matches!(
            parser.finish(),
            Err(StreamError::Truncated { .. })
        ));
    }
}
