//! Folding printer
//!
//! Emits `NAME[;PARAMS]:VALUE\r\n` per preserved node, folding output
//! lines before they reach 75 octets. A fold is CRLF plus one SPACE;
//! the space counts against the next line's width. Folding never lands
//! inside a UTF-8 sequence: bytes are classified by the well-formed
//! 1/2/3/4-byte patterns and written as whole sequences, while bytes
//! that fit no pattern go out alone, never merged with a neighbour.

use crate::parser::{Calendar, Node};

/// Written octets per line before folding kicks in.
const FOLD_COL: usize = 74;

fn fold(out: &mut Vec<u8>, col: &mut usize) {
    out.extend_from_slice(b"\r\n ");
    *col = 1;
}

/// Write a single structural byte (the `;` and `:` separators).
fn put_sep(out: &mut Vec<u8>, b: u8, col: &mut usize) {
    if *col == FOLD_COL {
        fold(out, col);
    }
    out.push(b);
    *col += 1;
}

/// Length of the UTF-8 sequence starting at `b[0]`, by the W3C
/// well-formed byte patterns, or `None` for a stray byte.
fn utf8_len(b: &[u8]) -> Option<usize> {
    let at = |i: usize| b.get(i).copied().unwrap_or(0);
    match b[0] {
        0x09 | 0x0A | 0x0D | 0x20..=0x7E => Some(1),
        0xC2..=0xDF if (0x80..=0xBF).contains(&at(1)) => Some(2),
        0xE0 if (0xA0..=0xBF).contains(&at(1)) && (0x80..=0xBF).contains(&at(2)) => Some(3),
        0xE1..=0xEC | 0xEE | 0xEF
            if (0x80..=0xBF).contains(&at(1)) && (0x80..=0xBF).contains(&at(2)) =>
        {
            Some(3)
        }
        0xED if (0x80..=0x9F).contains(&at(1)) && (0x80..=0xBF).contains(&at(2)) => Some(3),
        0xF0 if (0x90..=0xBF).contains(&at(1))
            && (0x80..=0xBF).contains(&at(2))
            && (0x80..=0xBF).contains(&at(3)) =>
        {
            Some(4)
        }
        0xF1..=0xF3
            if (0x80..=0xBF).contains(&at(1))
                && (0x80..=0xBF).contains(&at(2))
                && (0x80..=0xBF).contains(&at(3)) =>
        {
            Some(4)
        }
        0xF4 if (0x80..=0x8F).contains(&at(1))
            && (0x80..=0xBF).contains(&at(2))
            && (0x80..=0xBF).contains(&at(3)) =>
        {
            Some(4)
        }
        _ => None,
    }
}

/// Write content bytes, folding between whole UTF-8 sequences.
fn put_bytes(out: &mut Vec<u8>, bytes: &[u8], col: &mut usize) {
    let mut i = 0;
    while i < bytes.len() {
        let len = utf8_len(&bytes[i..]).unwrap_or(1);
        if *col + len >= FOLD_COL {
            fold(out, col);
        }
        out.extend_from_slice(&bytes[i..i + len]);
        *col += len;
        i += len;
    }
}

fn write_node(node: &Node, out: &mut Vec<u8>) {
    let mut col = 0usize;
    put_bytes(out, node.name.as_bytes(), &mut col);
    if let Some(params) = &node.params {
        put_sep(out, b';', &mut col);
        put_bytes(out, params.as_bytes(), &mut col);
    }
    put_sep(out, b':', &mut col);
    put_bytes(out, node.value.as_bytes(), &mut col);
    out.extend_from_slice(b"\r\n");
}

impl Calendar {
    /// Print the calendar in preserved node order.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        for node in &self.nodes {
            write_node(node, out);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Folded output runs a little over the raw line lengths.
        let raw: usize = self
            .nodes
            .iter()
            .map(|n| n.name.len() + n.value.len() + 8)
            .sum();
        let mut out = Vec::with_capacity(raw + raw / 16);
        self.write_to(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::Calendar;

    fn print(cal: &Calendar) -> Vec<u8> {
        cal.to_bytes()
    }

    /// Strip fold markers, restoring logical lines.
    fn unfold(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i..].starts_with(b"\r\n ") {
                i += 3;
            } else {
                out.push(bytes[i]);
                i += 1;
            }
        }
        out
    }

    fn max_line_octets(bytes: &[u8]) -> usize {
        bytes
            .split(|&b| b == b'\n')
            .map(|l| l.strip_suffix(b"\r").unwrap_or(l).len())
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn short_lines_pass_through() {
        let ics = b"BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:u1\r\nDTSTART:20240102T101500Z\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
        let cal = Calendar::parse(ics, None).expect("calendar");
        assert_eq!(print(&cal), ics.to_vec());
    }

    #[test]
    fn long_ascii_line_folds_under_limit() {
        let summary = "x".repeat(300);
        let ics = format!(
            "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:u1\r\nDTSTART:20240102T101500Z\r\nSUMMARY:{summary}\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n"
        );
        let cal = Calendar::parse(ics.as_bytes(), None).expect("calendar");
        let out = print(&cal);
        assert!(max_line_octets(&out) < 75);
        assert_eq!(unfold(&out), ics.as_bytes().to_vec());
    }

    #[test]
    fn folding_never_splits_utf8() {
        // Three-byte code points across a fold boundary.
        let summary = "žžž".repeat(60);
        let ics = format!(
            "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:u1\r\nDTSTART:20240102T101500Z\r\nSUMMARY:{summary}\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n"
        );
        let cal = Calendar::parse(ics.as_bytes(), None).expect("calendar");
        let out = print(&cal);

        assert!(max_line_octets(&out) < 75);
        for line in out.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            // Each physical line must itself be valid UTF-8.
            assert!(std::str::from_utf8(line).is_ok());
        }
        assert_eq!(unfold(&out), ics.as_bytes().to_vec());
    }

    #[test]
    fn four_byte_sequences_stay_whole() {
        let summary = "𝄞".repeat(80);
        let ics = format!(
            "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:u1\r\nDTSTART:20240102T101500Z\r\nSUMMARY:{summary}\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n"
        );
        let cal = Calendar::parse(ics.as_bytes(), None).expect("calendar");
        let out = print(&cal);
        for line in out.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            assert!(std::str::from_utf8(line).is_ok());
        }
        assert_eq!(unfold(&out), ics.as_bytes().to_vec());
    }

    #[test]
    fn params_are_printed_with_separator() {
        let ics = "BEGIN:VCALENDAR\r\n\
            BEGIN:VTIMEZONE\r\n\
            TZID:US/Eastern\r\n\
            END:VTIMEZONE\r\n\
            BEGIN:VEVENT\r\n\
            UID:u1\r\n\
            DTSTART;TZID=US/Eastern:20240102T101500\r\n\
            END:VEVENT\r\n\
            END:VCALENDAR\r\n";
        let cal = Calendar::parse(ics.as_bytes(), None).expect("calendar");
        assert_eq!(print(&cal), ics.as_bytes().to_vec());
    }

    #[test]
    fn reparse_after_print_is_structurally_equal() {
        let summary = "event žvaigždė ".repeat(20);
        let ics = format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:u1\r\nDTSTART:20240102T101500Z\r\nRRULE:FREQ=DAILY;COUNT=3\r\nSUMMARY:{summary}\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n"
        );
        let first = Calendar::parse(ics.as_bytes(), None).expect("first parse");
        let second = Calendar::parse(&print(&first), None).expect("reparse");
        assert_eq!(first.components, second.components);
        assert_eq!(first.nodes, second.nodes);
        // Printing is a fixed point after one normalization.
        assert_eq!(print(&first), print(&second));
    }
}
