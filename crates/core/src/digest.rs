//! HTTP Digest hash primitives (RFC 2617)
//!
//! The protocol pins MD5; the stored credential is HA1 so cleartext
//! passwords never reach the database.

use md5::{Digest, Md5};

pub fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// HA1: the stored credential hash.
pub fn credential_hash(user: &str, realm: &str, password: &str) -> String {
    md5_hex(&format!("{user}:{realm}:{password}"))
}

/// The response value a client must present for a request.
pub fn expected_response(ha1: &str, nonce: &str, method: &str, uri: &str) -> String {
    let ha2 = md5_hex(&format!("{method}:{uri}"));
    md5_hex(&format!("{ha1}:{nonce}:{ha2}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_is_stable() {
        // RFC 1321 test vector.
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn response_depends_only_on_inputs() {
        let ha1 = credential_hash("alice", "kalends", "secret");
        let a = expected_response(&ha1, "00AA00AA00AA00AA", "GET", "/alice/cal/");
        let b = expected_response(&ha1, "00AA00AA00AA00AA", "GET", "/alice/cal/");
        assert_eq!(a, b);

        assert_ne!(
            a,
            expected_response(&ha1, "00AA00AA00AA00AB", "GET", "/alice/cal/")
        );
        assert_ne!(
            a,
            expected_response(&ha1, "00AA00AA00AA00AA", "PUT", "/alice/cal/")
        );
        assert_ne!(
            a,
            expected_response(&ha1, "00AA00AA00AA00AA", "GET", "/alice/other/")
        );

        let other = credential_hash("alice", "kalends", "hunter2");
        assert_ne!(
            a,
            expected_response(&other, "00AA00AA00AA00AA", "GET", "/alice/cal/")
        );
    }
}
