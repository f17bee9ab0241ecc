//! Content-addressed chunk hashing.
//!
//! The hash gates upserts in the vector store: a re-ingested chunk whose
//! normalized text is unchanged must produce the identical digest, so line
//! endings are folded to `\n` before hashing.

use std::borrow::Cow;

use sha2::{Digest, Sha256};

/// Fold `\r\n` and lone `\r` into `\n`. Returns the input untouched when no
/// carriage returns are present.
pub fn normalize_line_endings(text: &str) -> Cow<'_, str> {
    if !text.contains('\r') {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

/// SHA-256 over the UTF-8 bytes of the normalized text, lowercase hex.
#[must_use]
pub fn chunk_hash(text: &str) -> String {
    let normalized = normalize_line_endings(text);
    let digest = Sha256::digest(normalized.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_folds_crlf_and_lone_cr() {
        assert_eq!(normalize_line_endings("a\r\nb\rc\n"), "a\nb\nc\n");
        assert!(matches!(
            normalize_line_endings("no carriage returns"),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn hash_is_line_ending_insensitive() {
        assert_eq!(chunk_hash("alpha\r\nbeta"), chunk_hash("alpha\nbeta"));
        assert_eq!(chunk_hash("alpha\rbeta"), chunk_hash("alpha\nbeta"));
        assert_ne!(chunk_hash("alpha beta"), chunk_hash("alpha  beta"));
    }

    #[test]
    fn hash_matches_known_vector() {
        // sha256("") — guards against accidental double-hashing.
        assert_eq!(
            chunk_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
