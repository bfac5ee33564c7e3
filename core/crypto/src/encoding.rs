//! Base64 text encoding for moving key material around as text.
//!
//! Not part of the AEAD framing. Standard alphabet, padded, never wrapped.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use streamseal_common::{Error, Result};

/// Encode bytes as a single line of standard base64.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64 text.
///
/// Surrounding ASCII whitespace is ignored so that key files ending in a
/// newline load cleanly. Interior whitespace is an error.
///
/// # Errors
/// - `InvalidEncoding` if the text is not valid padded base64
pub fn decode(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text.trim_matches(|c: char| c.is_ascii_whitespace()))
        .map_err(|e| Error::InvalidEncoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_vector() {
        assert_eq!(encode(b"foobar"), "Zm9vYmFy");
        assert_eq!(decode("Zm9vYmFy").unwrap(), b"foobar");
    }

    #[test]
    fn test_no_line_breaks() {
        let long = vec![0x5au8; 4096];
        assert!(!encode(&long).contains('\n'));
    }

    #[test]
    fn test_trailing_newline_tolerated() {
        assert_eq!(decode("Zm9v\n").unwrap(), b"foo");
    }

    #[test]
    fn test_invalid_input() {
        assert!(matches!(decode("Zm9v!"), Err(Error::InvalidEncoding(_))));
        assert!(matches!(decode("Zm 9v"), Err(Error::InvalidEncoding(_))));
    }

    proptest! {
        #[test]
        fn prop_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            prop_assert_eq!(decode(&encode(&bytes)).unwrap(), bytes);
        }
    }
}
