use serde_json::error::Category;

use crate::chat::ChatCompletionChunk;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// Incremental UTF-8 decoder.
///
/// A code point split across two reads is held back until its remaining bytes
/// arrive. Invalid sequences decode to U+FFFD instead of failing the stream.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut input = bytes.as_slice();
        loop {
            match std::str::from_utf8(input) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&input[..valid]));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            input = &input[valid + len..];
                        }
                        None => {
                            self.pending = input[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Drains whatever is still pending; an incomplete sequence becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FramedLines {
    pub lines: Vec<String>,
    pub remainder: String,
}

/// Appends `chunk` to `buffer` and splits off every complete `\n`-terminated line.
///
/// Lines are returned without their terminator and without a trailing `\r`.
/// Text after the last `\n` is returned as `remainder` for the next call.
pub fn split_lines(buffer: &str, chunk: &str) -> FramedLines {
    let mut text = String::with_capacity(buffer.len() + chunk.len());
    text.push_str(buffer);
    text.push_str(chunk);

    let mut lines = Vec::new();
    let mut rest = text.as_str();
    while let Some(pos) = rest.find('\n') {
        let line = &rest[..pos];
        lines.push(line.strip_suffix('\r').unwrap_or(line).to_string());
        rest = &rest[pos + 1..];
    }

    FramedLines {
        lines,
        remainder: rest.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    Blank,
    /// `:`-prefixed keep-alive.
    Comment(&'a str),
    /// `data: [DONE]`.
    Done,
    /// Trimmed payload of a `data: ` line.
    Data(&'a str),
    /// Anything else (other SSE fields, or a continuation of a cut frame).
    Other(&'a str),
}

pub fn classify_line(line: &str) -> Frame<'_> {
    if line.is_empty() {
        return Frame::Blank;
    }
    if let Some(comment) = line.strip_prefix(':') {
        return Frame::Comment(comment);
    }
    if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
        let payload = payload.trim();
        if payload == DONE_SENTINEL {
            return Frame::Done;
        }
        return Frame::Data(payload);
    }
    Frame::Other(line)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadError {
    /// Not (yet) valid JSON: truncated or cut by a stray newline.
    Incomplete,
    /// Valid JSON that is not a completion chunk.
    Shape,
}

/// Parses one `data:` payload and returns `choices[0].delta.content`.
pub fn decode_delta(payload: &str) -> Result<Option<String>, PayloadError> {
    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => Ok(chunk.delta_content().map(str::to_string)),
        Err(err) => match err.classify() {
            Category::Eof | Category::Syntax => Err(PayloadError::Incomplete),
            Category::Data | Category::Io => Err(PayloadError::Shape),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_lines_keeps_partial_remainder() {
        let framed = split_lines("data: {\"a\"", ":1}\r\n: ping\n\ndata: [DO");
        assert_eq!(
            framed.lines,
            vec![
                "data: {\"a\":1}".to_string(),
                ": ping".to_string(),
                String::new(),
            ]
        );
        assert_eq!(framed.remainder, "data: [DO");

        let framed = split_lines(&framed.remainder, "NE]\n");
        assert_eq!(framed.lines, vec!["data: [DONE]".to_string()]);
        assert!(framed.remainder.is_empty());
    }

    #[test]
    fn split_lines_without_newline_only_buffers() {
        let framed = split_lines("", "data: {\"choices\"");
        assert!(framed.lines.is_empty());
        assert_eq!(framed.remainder, "data: {\"choices\"");
    }

    #[test]
    fn decoder_holds_split_code_points() {
        let text = "añ€😀";
        let bytes = text.as_bytes();
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        for byte in bytes {
            out.push_str(&decoder.decode(std::slice::from_ref(byte)));
        }
        out.push_str(&decoder.finish());
        assert_eq!(out, text);
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(decoder.decode(b"\xe2\x82"), "");
        assert!(decoder.has_pending());
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn classify_recognises_frame_kinds() {
        assert_eq!(classify_line(""), Frame::Blank);
        assert_eq!(classify_line(":keep-alive"), Frame::Comment("keep-alive"));
        assert_eq!(classify_line("data: [DONE]"), Frame::Done);
        assert_eq!(classify_line("data:  {\"x\":1} "), Frame::Data("{\"x\":1}"));
        assert_eq!(classify_line("event: message"), Frame::Other("event: message"));
        assert_eq!(classify_line("data:{}"), Frame::Other("data:{}"));
    }

    #[test]
    fn decode_delta_distinguishes_truncation_from_shape() {
        assert_eq!(
            decode_delta(r#"{"choices":[{"delta":{"content":"hi"}}]}"#),
            Ok(Some("hi".to_string()))
        );
        assert_eq!(decode_delta(r#"{"choices":[]}"#), Ok(None));
        assert_eq!(
            decode_delta(r#"{"choices":[{"delta":{"content":"h"#),
            Err(PayloadError::Incomplete)
        );
        assert_eq!(decode_delta("{not valid json"), Err(PayloadError::Incomplete));
        assert_eq!(decode_delta(r#"{"choices":"nope"}"#), Err(PayloadError::Shape));
    }
}
