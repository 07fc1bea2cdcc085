//! Newline framing for chunked input.
//!
//! Input arrives in whatever pieces the pipe delivers: half a request, three
//! requests at once, a request split inside a multi-byte character. The
//! framer buffers bytes until a `\n` completes a line and hands out each
//! complete line exactly once.

/// Output of the framer for one completed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete, non-blank line without its terminator.
    Line(Vec<u8>),
    /// A line longer than the limit; its bytes were dropped.
    Oversized { size: usize },
}

/// Accumulates input chunks into complete lines.
#[derive(Debug)]
pub struct LineFramer {
    buffer: Vec<u8>,
    max_line_bytes: usize,
    /// Size seen so far of an oversized line still being skipped.
    discarding: Option<usize>,
}

impl LineFramer {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line_bytes,
            discarding: None,
        }
    }

    /// Feeds one chunk and returns every line it completed, in order.
    ///
    /// Bytes after the last newline stay buffered for the next chunk.
    /// Blank lines produce nothing, and a trailing `\r` is stripped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.complete(&rest[..pos], &mut frames);
            rest = &rest[pos + 1..];
        }
        self.accumulate(rest);

        frames
    }

    /// Number of bytes held for an unfinished line.
    pub fn buffered(&self) -> usize {
        self.discarding.unwrap_or(self.buffer.len())
    }

    fn complete(&mut self, head: &[u8], frames: &mut Vec<Frame>) {
        if let Some(seen) = self.discarding.take() {
            frames.push(Frame::Oversized {
                size: seen + head.len(),
            });
            return;
        }

        let size = self.buffer.len() + head.len();
        if size > self.max_line_bytes {
            self.buffer.clear();
            frames.push(Frame::Oversized { size });
            return;
        }

        self.buffer.extend_from_slice(head);
        let mut line = std::mem::take(&mut self.buffer);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        frames.push(Frame::Line(line));
    }

    fn accumulate(&mut self, partial: &[u8]) {
        if let Some(seen) = self.discarding.as_mut() {
            *seen += partial.len();
            return;
        }

        let size = self.buffer.len() + partial.len();
        if size > self.max_line_bytes {
            self.buffer = Vec::new();
            self.discarding = Some(size);
        } else {
            self.buffer.extend_from_slice(partial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LIMIT: usize = 1024;

    fn lines(frames: Vec<Frame>) -> Vec<String> {
        frames
            .into_iter()
            .map(|frame| match frame {
                Frame::Line(bytes) => String::from_utf8(bytes).unwrap(),
                Frame::Oversized { size } => format!("<oversized {size}>"),
            })
            .collect()
    }

    #[test]
    fn test_single_complete_line() {
        let mut framer = LineFramer::new(LIMIT);
        assert_eq!(
            lines(framer.push(b"{\"method\":\"status\"}\n")),
            vec![r#"{"method":"status"}"#]
        );
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_chunk_without_newline_is_buffered() {
        let mut framer = LineFramer::new(LIMIT);
        assert!(framer.push(b"{\"method\":").is_empty());
        assert_eq!(framer.buffered(), 10);
        assert_eq!(
            lines(framer.push(b"\"status\"}\n")),
            vec![r#"{"method":"status"}"#]
        );
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_many_lines_in_one_chunk() {
        let mut framer = LineFramer::new(LIMIT);
        assert_eq!(lines(framer.push(b"a\nb\nc")), vec!["a", "b"]);
        assert_eq!(lines(framer.push(b"\n")), vec!["c"]);
    }

    #[test]
    fn test_strips_carriage_return_and_skips_blank_lines() {
        let mut framer = LineFramer::new(LIMIT);
        assert_eq!(lines(framer.push(b"a\r\n\n  \r\nb\n")), vec!["a", "b"]);
    }

    #[test]
    fn test_split_inside_multibyte_character() {
        let text = "{\"code\":\"π\"}\n".as_bytes();
        let split = text.iter().position(|b| *b == 0xcf).unwrap() + 1;
        let mut framer = LineFramer::new(LIMIT);
        assert!(framer.push(&text[..split]).is_empty());
        assert_eq!(lines(framer.push(&text[split..])), vec!["{\"code\":\"π\"}"]);
    }

    #[test]
    fn test_every_split_point_yields_same_lines() {
        let stream = b"{\"method\":\"connect\"}\n{\"method\":\"status\",\"args\":[]}\nx\n";
        let expected = vec![
            r#"{"method":"connect"}"#.to_string(),
            r#"{"method":"status","args":[]}"#.to_string(),
            "x".to_string(),
        ];

        for first in 0..=stream.len() {
            for second in first..=stream.len() {
                let mut framer = LineFramer::new(LIMIT);
                let mut out = Vec::new();
                out.extend(lines(framer.push(&stream[..first])));
                out.extend(lines(framer.push(&stream[first..second])));
                out.extend(lines(framer.push(&stream[second..])));
                assert_eq!(out, expected, "split at {first}/{second}");
                assert_eq!(framer.buffered(), 0);
            }
        }
    }

    #[test]
    fn test_oversized_line_in_one_chunk() {
        let mut framer = LineFramer::new(4);
        assert_eq!(
            lines(framer.push(b"abcdefgh\nok\n")),
            vec!["<oversized 8>", "ok"]
        );
    }

    #[test]
    fn test_oversized_line_across_chunks_is_skipped_to_newline() {
        let mut framer = LineFramer::new(4);
        assert!(framer.push(b"abc").is_empty());
        assert!(framer.push(b"defg").is_empty());
        assert!(framer.push(b"hij").is_empty());
        assert_eq!(framer.buffered(), 10);
        assert_eq!(lines(framer.push(b"k\nok\n")), vec!["<oversized 11>", "ok"]);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_line_at_exact_limit_is_accepted() {
        let mut framer = LineFramer::new(4);
        assert_eq!(lines(framer.push(b"abcd\n")), vec!["abcd"]);
    }
}
