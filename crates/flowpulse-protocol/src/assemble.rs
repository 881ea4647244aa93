//! Turns raw body chunks into ordered content deltas.
//!
//! The assembler owns the single text buffer of one stream. Each [`push`]
//! decodes a chunk, frames complete lines and returns the deltas they carried,
//! in wire order. A `data:` payload that fails to parse is held back and joined
//! with the text that follows it, so a frame cut by a stray newline is recovered
//! instead of dropped. [`finish`] is the best-effort flush at end of stream.
//!
//! [`push`]: DeltaAssembler::push
//! [`finish`]: DeltaAssembler::finish

use crate::sse::{
    DONE_SENTINEL, Frame, PayloadError, Utf8Decoder, classify_line, decode_delta, split_lines,
};

/// A held fragment larger than this can no longer be a cut frame.
const MAX_HELD_BYTES: usize = 1024 * 1024;

/// Result of feeding one chunk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Step {
    pub deltas: Vec<String>,
    /// `[DONE]` was seen; no further input is processed.
    pub done: bool,
    /// Held payloads abandoned because a new frame started before they parsed.
    pub dropped: Vec<String>,
}

/// Result of the end-of-stream flush. Parse failures land in `dropped`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Flush {
    pub deltas: Vec<String>,
    pub dropped: Vec<String>,
}

enum LineOutcome {
    Delta(String),
    Done,
    Skip,
}

#[derive(Debug, Default)]
pub struct DeltaAssembler {
    decoder: Utf8Decoder,
    buffer: String,
    held: Option<String>,
    done: bool,
}

impl DeltaAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn push(&mut self, chunk: &[u8]) -> Step {
        let mut step = Step::default();
        if self.done {
            step.done = true;
            return step;
        }

        let text = self.decoder.decode(chunk);
        let framed = split_lines(&self.buffer, &text);
        self.buffer = framed.remainder;

        for line in &framed.lines {
            match self.accept_line(line, &mut step.dropped) {
                LineOutcome::Delta(delta) => step.deltas.push(delta),
                LineOutcome::Done => {
                    self.finish_at_sentinel();
                    step.done = true;
                    break;
                }
                LineOutcome::Skip => {}
            }
        }
        step
    }

    /// Best-effort flush of whatever is left once the body ends without `[DONE]`.
    pub fn finish(&mut self) -> Flush {
        let mut flush = Flush::default();
        if self.done {
            return flush;
        }
        self.done = true;

        let mut tail = std::mem::take(&mut self.buffer);
        tail.push_str(&self.decoder.finish());
        let tail = tail.trim();

        if let Some(held) = self.held.take() {
            if is_continuation(tail) {
                let joined = format!("{held}{tail}");
                match decode_delta(&joined) {
                    Ok(Some(delta)) => flush.deltas.push(delta),
                    Ok(None) => {}
                    Err(_) => flush.dropped.push(joined),
                }
                return flush;
            }
            flush.dropped.push(held);
        }

        if tail.is_empty() || tail.starts_with(':') {
            return flush;
        }
        let payload = tail.strip_prefix("data:").unwrap_or(tail).trim();
        if payload.is_empty() || payload == DONE_SENTINEL {
            return flush;
        }
        match decode_delta(payload) {
            Ok(Some(delta)) => flush.deltas.push(delta),
            Ok(None) => {}
            Err(_) => flush.dropped.push(payload.to_string()),
        }
        flush
    }

    fn finish_at_sentinel(&mut self) {
        self.done = true;
        self.buffer.clear();
        self.held = None;
    }

    fn accept_line(&mut self, line: &str, dropped: &mut Vec<String>) -> LineOutcome {
        let frame = classify_line(line);

        if let Some(held) = self.held.take() {
            match frame {
                Frame::Blank => {
                    self.held = Some(held);
                    return LineOutcome::Skip;
                }
                Frame::Comment(_) => {
                    // A cut could land right before a `:` token.
                    let joined = format!("{held}{line}");
                    return match decode_delta(&joined) {
                        Ok(delta) => delta.map_or(LineOutcome::Skip, LineOutcome::Delta),
                        Err(_) => {
                            self.held = Some(held);
                            LineOutcome::Skip
                        }
                    };
                }
                Frame::Other(_) => return self.parse_payload(format!("{held}{line}"), dropped),
                Frame::Data(_) | Frame::Done => dropped.push(held),
            }
        }

        match frame {
            Frame::Blank | Frame::Comment(_) | Frame::Other(_) => LineOutcome::Skip,
            Frame::Done => LineOutcome::Done,
            Frame::Data(payload) => self.parse_payload(payload.to_string(), dropped),
        }
    }

    fn parse_payload(&mut self, payload: String, dropped: &mut Vec<String>) -> LineOutcome {
        match decode_delta(&payload) {
            Ok(Some(delta)) => LineOutcome::Delta(delta),
            Ok(None) | Err(PayloadError::Shape) => LineOutcome::Skip,
            Err(PayloadError::Incomplete) => {
                if payload.len() > MAX_HELD_BYTES {
                    dropped.push(payload);
                } else {
                    self.held = Some(payload);
                }
                LineOutcome::Skip
            }
        }
    }
}

fn is_continuation(tail: &str) -> bool {
    !tail.is_empty() && !tail.starts_with("data:") && !tail.starts_with(':')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices":[{"delta":{"content":content}}]})
        )
    }

    fn collect(assembler: &mut DeltaAssembler, chunks: &[&[u8]]) -> (Vec<String>, bool) {
        let mut deltas = Vec::new();
        let mut done = false;
        for chunk in chunks {
            let step = assembler.push(chunk);
            deltas.extend(step.deltas);
            if step.done {
                done = true;
                break;
            }
        }
        (deltas, done)
    }

    #[test]
    fn emits_deltas_in_order_for_every_split_point() {
        let fragments = ["Hel", "lo, ", "wörld ", "😀", "!"];
        let mut wire = String::new();
        for fragment in fragments {
            wire.push_str(&frame(fragment));
        }
        wire.push_str("data: [DONE]\n\n");
        let bytes = wire.as_bytes();

        for split in 0..=bytes.len() {
            let mut assembler = DeltaAssembler::new();
            let (deltas, done) = collect(&mut assembler, &[&bytes[..split], &bytes[split..]]);
            assert!(done, "split at {split}");
            assert_eq!(deltas, fragments, "split at {split}");
        }
    }

    #[test]
    fn byte_at_a_time_matches_single_read() {
        let mut wire = String::new();
        for fragment in ["α", "β", "γ"] {
            wire.push_str(&frame(fragment));
        }
        let mut assembler = DeltaAssembler::new();
        let chunks: Vec<&[u8]> = wire.as_bytes().chunks(1).collect();
        let (deltas, done) = collect(&mut assembler, &chunks);
        assert!(!done);
        assert_eq!(deltas, vec!["α", "β", "γ"]);
        assert_eq!(assembler.finish(), Flush::default());
    }

    #[test]
    fn stops_at_done_even_with_trailing_bytes_in_same_read() {
        let wire = format!("{}data: [DONE]\n{}", frame("a"), frame("b"));
        let mut assembler = DeltaAssembler::new();
        let step = assembler.push(wire.as_bytes());
        assert_eq!(step.deltas, vec!["a"]);
        assert!(step.done);
        assert!(assembler.is_done());

        let step = assembler.push(frame("c").as_bytes());
        assert!(step.deltas.is_empty());
        assert!(step.done);
        assert_eq!(assembler.finish(), Flush::default());
    }

    #[test]
    fn ignores_comments_blank_and_foreign_lines() {
        let wire = format!(
            ":keep-alive\n\n{}event: ping\nid: 7\n: another\r\n{}",
            frame("x"),
            frame("y")
        );
        let mut assembler = DeltaAssembler::new();
        let step = assembler.push(wire.as_bytes());
        assert_eq!(step.deltas, vec!["x", "y"]);
        assert!(step.dropped.is_empty());
    }

    #[test]
    fn skips_chunks_without_content() {
        let wire = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n\
                    data: {\"usage\":{\"total_tokens\":3},\"choices\":[]}\n\
                    data: {\"choices\":\"bogus\"}\n";
        let mut assembler = DeltaAssembler::new();
        let step = assembler.push(wire.as_bytes());
        assert!(step.deltas.is_empty());
        assert!(step.dropped.is_empty());
    }

    #[test]
    fn frame_cut_by_stray_newline_is_rebuffered() {
        let mut assembler = DeltaAssembler::new();
        let step = assembler.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"par\n");
        assert!(step.deltas.is_empty());
        assert!(step.dropped.is_empty());

        let step = assembler.push(b"tial\"}}]}\n\n");
        assert_eq!(step.deltas, vec!["partial"]);

        let step = assembler.push(frame("next").as_bytes());
        assert_eq!(step.deltas, vec!["next"]);
    }

    #[test]
    fn malformed_frame_is_dropped_when_next_frame_starts() {
        let wire = format!("data: {{not valid json\n\n{}", frame("ok"));
        let mut assembler = DeltaAssembler::new();
        let step = assembler.push(wire.as_bytes());
        assert_eq!(step.deltas, vec!["ok"]);
        assert_eq!(step.dropped, vec!["{not valid json".to_string()]);
    }

    #[test]
    fn flush_parses_unterminated_tail() {
        let mut assembler = DeltaAssembler::new();
        let step = assembler.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}");
        assert!(step.deltas.is_empty());
        let flush = assembler.finish();
        assert_eq!(flush.deltas, vec!["tail"]);
        assert!(flush.dropped.is_empty());
    }

    #[test]
    fn flush_swallows_broken_tail() {
        let mut assembler = DeltaAssembler::new();
        let step = assembler.push(format!("{}data: {{\"choices\":[{{\"del", frame("a")).as_bytes());
        assert_eq!(step.deltas, vec!["a"]);
        let flush = assembler.finish();
        assert!(flush.deltas.is_empty());
        assert_eq!(flush.dropped, vec!["{\"choices\":[{\"del".to_string()]);
        assert_eq!(assembler.finish(), Flush::default());
    }

    #[test]
    fn flush_joins_held_fragment_with_tail() {
        let mut assembler = DeltaAssembler::new();
        assembler.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"fin\n");
        assembler.push(b"al\"}}]}");
        let flush = assembler.finish();
        assert_eq!(flush.deltas, vec!["final"]);
    }

    #[test]
    fn flush_ignores_done_and_comment_tails() {
        let mut assembler = DeltaAssembler::new();
        assembler.push(b"data: [DONE]");
        assert_eq!(assembler.finish(), Flush::default());

        let mut assembler = DeltaAssembler::new();
        assembler.push(b": keep-alive");
        assert_eq!(assembler.finish(), Flush::default());
    }
}
