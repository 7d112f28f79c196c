//! Folded-line reader
//!
//! iCalendar content lines may be split across physical lines, where a
//! continuation starts with a single SPACE or TAB (RFC 5545, 3.1). The
//! reader joins continuations back into logical lines, accepting both
//! CRLF and bare LF terminators, and tags each logical line with the
//! physical line number it ended on.

use crate::error::ParseError;

pub(crate) struct LineReader<'a> {
    input: &'a [u8],
    pos: usize,
    line: usize,
    file: &'a str,
}

impl<'a> LineReader<'a> {
    pub(crate) fn new(input: &'a [u8], file: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 0,
            file,
        }
    }

    /// 1-based number of the last physical line consumed.
    pub(crate) fn line(&self) -> usize {
        self.line
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Produce the next logical line.
    ///
    /// Fails only when called with no input left.
    pub(crate) fn next_line(&mut self) -> Result<String, ParseError> {
        if self.is_empty() {
            return Err(ParseError::new(self.file, self.line, "unterminated line"));
        }

        let mut buf: Vec<u8> = Vec::new();

        while self.pos < self.input.len() {
            let rest = &self.input[self.pos..];
            self.line += 1;

            let Some(nl) = rest.iter().position(|&b| b == b'\n') else {
                // EOF without a terminator: take whatever remains.
                buf.extend_from_slice(rest);
                self.pos = self.input.len();
                break;
            };

            let mut len = nl;
            if len > 0 && rest[len - 1] == b'\r' {
                len -= 1;
            }
            buf.extend_from_slice(&rest[..len]);
            self.pos += nl + 1;

            // A SPACE or TAB after the terminator continues the line;
            // the marker byte itself is dropped.
            match self.input.get(self.pos) {
                Some(b' ') | Some(b'\t') => self.pos += 1,
                _ => break,
            }
        }

        String::from_utf8(buf)
            .map_err(|_| ParseError::new(self.file, self.line, "invalid UTF-8 in line"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(input: &[u8]) -> Vec<(usize, String)> {
        let mut r = LineReader::new(input, "<buffer>");
        let mut out = Vec::new();
        while !r.is_empty() {
            let s = r.next_line().expect("line");
            out.push((r.line(), s));
        }
        out
    }

    #[test]
    fn crlf_and_bare_lf() {
        let lines = read_all(b"A:1\r\nB:2\nC:3\r\n");
        assert_eq!(
            lines,
            vec![
                (1, "A:1".to_string()),
                (2, "B:2".to_string()),
                (3, "C:3".to_string()),
            ]
        );
    }

    #[test]
    fn continuation_joins_without_separator() {
        let lines = read_all(b"SUMMARY:Hello\r\n  world\r\nUID:x\r\n");
        // Only the marker byte is dropped; the second space survives.
        assert_eq!(lines[0], (2, "SUMMARY:Hello world".to_string()));
        assert_eq!(lines[1], (3, "UID:x".to_string()));
    }

    #[test]
    fn tab_continuation() {
        let lines = read_all(b"DESCRIPTION:a\r\n\tb\r\n");
        assert_eq!(lines[0], (2, "DESCRIPTION:ab".to_string()));
    }

    #[test]
    fn eof_without_terminator() {
        let lines = read_all(b"A:1\r\nB:2");
        assert_eq!(lines[1], (2, "B:2".to_string()));
    }

    #[test]
    fn empty_input_fails() {
        let mut r = LineReader::new(b"", "<buffer>");
        let err = r.next_line().expect_err("must fail");
        assert_eq!(err.message, "unterminated line");
    }

    #[test]
    fn multi_way_fold() {
        let lines = read_all(b"X:a\r\n b\r\n c\r\n");
        assert_eq!(lines, vec![(3, "X:abc".to_string())]);
    }
}
