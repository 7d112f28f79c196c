//! Input validation shared by the HTTP layer and the admin tool

/// Maximum displayname length accepted for a collection.
pub const MAX_DISPLAYNAME_LENGTH: usize = 1024;

/// Maximum free-form description length.
pub const MAX_DESCRIPTION_LENGTH: usize = 4096;

/// Maximum path-segment length for collection and resource names.
pub const MAX_PATH_LENGTH: usize = 256;

/// Whether a byte belongs to the set a URL path segment may carry
/// without escaping: RFC 3986 unreserved + sub-delims + `:` + `@`.
fn url_safe_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'-' | b'.'
                | b'_'
                | b'~'
                | b'!'
                | b'$'
                | b'&'
                | b'\''
                | b'('
                | b')'
                | b'*'
                | b'+'
                | b','
                | b';'
                | b'='
                | b':'
                | b'@'
        )
}

/// Whether a path segment is safe to use as a principal, collection,
/// or resource name. Empty segments and dot traversal are rejected
/// outright.
pub fn safe_path_segment(s: &str) -> bool {
    if s.is_empty() || s == "." || s == ".." || s.len() > MAX_PATH_LENGTH {
        return false;
    }
    s.bytes().all(url_safe_byte)
}

/// Whether a string is an HTML-style RGB(A) colour: `#` followed by 6
/// or 8 hex digits, any case.
pub fn valid_colour(s: &str) -> bool {
    let b = s.as_bytes();
    if b.len() != 7 && b.len() != 9 {
        return false;
    }
    if b[0] != b'#' {
        return false;
    }
    b[1..].iter().all(|c| c.is_ascii_hexdigit())
}

/// Whether a string is a plausible displayname.
pub fn valid_displayname(s: &str) -> bool {
    !s.is_empty() && s.len() < MAX_DISPLAYNAME_LENGTH
}

/// Whether a string is a plausible description.
pub fn valid_description(s: &str) -> bool {
    s.len() < MAX_DESCRIPTION_LENGTH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_segments() {
        assert!(safe_path_segment("alice"));
        assert!(safe_path_segment("a.ics"));
        assert!(safe_path_segment("calendar-proxy-read"));
        assert!(safe_path_segment("u1@example.com"));

        assert!(!safe_path_segment(""));
        assert!(!safe_path_segment("."));
        assert!(!safe_path_segment(".."));
        assert!(!safe_path_segment("a/b"));
        assert!(!safe_path_segment("a b"));
        assert!(!safe_path_segment("a%20b"));
        assert!(!safe_path_segment("naïve"));
        assert!(!safe_path_segment(&"x".repeat(MAX_PATH_LENGTH + 1)));
    }

    #[test]
    fn colours() {
        assert!(valid_colour("#B90E28"));
        assert!(valid_colour("#b90e28ff"));
        assert!(!valid_colour("B90E28"));
        assert!(!valid_colour("#B90E2"));
        assert!(!valid_colour("#B90E28F"));
        assert!(!valid_colour("#GGGGGG"));
        assert!(!valid_colour("not-a-colour"));
    }
}
