//! Line framing for the feed's byte stream, and the login line.
//!
//! The transport hands over arbitrary chunks; a line is only emitted once
//! its terminator has been seen. The trailing partial segment is carried
//! into the next `push`.

use crate::config::FeedConfig;

/// Longest partial line kept across reads before it is thrown away.
pub const MAX_LINE_BYTES: usize = 16 * 1024;

/// Accumulates bytes and splits them into complete lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
    discarded: u64,
}

impl LineFramer {
    pub fn new() -> Self {
        LineFramer::default()
    }

    /// Append one read's worth of bytes. Returns every line completed by
    /// this chunk, without the `\r\n` (or bare `\n`) terminator. Empty
    /// lines are skipped; invalid UTF-8 is replaced, not rejected.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            let mut line = &self.buf[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            if !line.is_empty() {
                lines.push(String::from_utf8_lossy(line).into_owned());
            }
            start = end + 1;
        }
        self.buf.drain(..start);

        if self.buf.len() > MAX_LINE_BYTES {
            self.buf.clear();
            self.discarded += 1;
        }

        lines
    }

    /// Bytes of the partial line currently carried over.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Number of oversized partial lines thrown away so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Drop any carried-over partial line (new connection).
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

/// Server comments and keepalives start with `#`.
pub fn is_comment(line: &str) -> bool {
    line.starts_with('#')
}

/// The single line written upstream after connecting.
pub fn login_line(feed: &FeedConfig) -> String {
    format!(
        "user {} pass {} soft {} {} filter {}\r\n",
        feed.user, feed.pass, feed.client, feed.version, feed.filter
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_lines() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"one\r\ntwo\r\n");
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_partial_line_carried_over() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"FLR1>OGFLR:/12"), Vec::<String>::new());
        assert_eq!(framer.pending(), 14);

        let lines = framer.push(b"3456h\r\nFLR2");
        assert_eq!(lines, vec!["FLR1>OGFLR:/123456h"]);
        assert_eq!(framer.pending(), 4);
    }

    #[test]
    fn test_terminator_split_across_reads() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"abc\r").is_empty());
        assert_eq!(framer.push(b"\ndef\r\n"), vec!["abc", "def"]);
    }

    #[test]
    fn test_bare_newline_and_empty_lines() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"a\n\r\n\nb\n"), vec!["a", "b"]);
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"ab\xffcd\r\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ab"));
        assert!(lines[0].ends_with("cd"));
    }

    #[test]
    fn test_oversized_partial_discarded() {
        let mut framer = LineFramer::new();
        framer.push(&vec![b'x'; MAX_LINE_BYTES + 1]);
        assert_eq!(framer.pending(), 0);
        assert_eq!(framer.discarded(), 1);

        assert_eq!(framer.push(b"ok\r\n"), vec!["ok"]);
    }

    #[test]
    fn test_reset_drops_partial() {
        let mut framer = LineFramer::new();
        framer.push(b"half a li");
        framer.reset();
        assert_eq!(framer.push(b"ne\r\n"), vec!["ne"]);
    }

    #[test]
    fn test_is_comment() {
        assert!(is_comment("# aprsc 2.1.14"));
        assert!(!is_comment("FLR1>OGFLR:/123456h"));
    }

    #[test]
    fn test_login_line() {
        let feed = FeedConfig::default();
        let line = login_line(&feed);
        assert_eq!(
            line,
            format!(
                "user FOCACH pass -1 soft ogn-live {} filter r/46.8182/8.2275/250\r\n",
                feed.version
            )
        );
    }
}
