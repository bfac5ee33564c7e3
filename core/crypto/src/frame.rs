//! Wire framing: the clear stream header and the encrypted length header.
//!
//! ```text
//! stream          := header iv inner_header_ct ciphertext tag
//! header          := "ivlen=" DIGITS "," "taglen=" DIGITS "\n"   (clear, authenticated)
//! iv              := BYTES[ivlen / 8]
//! inner_header_ct := Enc("datalen=" DIGITS "\n")
//! ciphertext      := Enc(plaintext)
//! tag             := BYTES[taglen]
//! ```

use streamseal_common::{Error, Result};

/// Smallest IV a stream may declare, in bits.
pub const MIN_IV_BITS: usize = 96;

/// Largest IV a stream may declare, in bits (8 KiB).
pub const MAX_IV_BITS: usize = 1 << 16;

/// Tag length bounds in bytes.
pub const MIN_TAG_LEN: usize = 12;
pub const MAX_TAG_LEN: usize = 16;

/// Longest clear header line accepted, newline included.
pub const MAX_HEADER_LINE: usize = 128;

/// Longest encrypted length header, newline included.
///
/// `datalen=` plus the 20 digits of `u64::MAX` plus the newline is 29 bytes.
pub const MAX_INNER_HEADER: usize = 30;

const IV_PREFIX: &str = "ivlen=";
const TAG_PREFIX: &str = "taglen=";
const DATA_PREFIX: &str = "datalen=";

/// Parameters carried in the clear header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    /// IV length in bits.
    pub iv_len_bits: usize,
    /// Tag length in bytes.
    pub tag_len: usize,
}

impl StreamHeader {
    /// Encode as `ivlen=<bits>,taglen=<bytes>\n`.
    pub fn encode(&self) -> Vec<u8> {
        format!("{}{},{}{}\n", IV_PREFIX, self.iv_len_bits, TAG_PREFIX, self.tag_len).into_bytes()
    }

    /// IV length in bytes.
    pub fn iv_len(&self) -> usize {
        self.iv_len_bits / 8
    }

    /// Parse a header line including its trailing newline.
    ///
    /// # Errors
    /// - `MalformedHeader` if the line does not match the grammar, the IV is
    ///   not whole bytes or over 8 KiB, or the tag length is out of range
    /// - `IvTooShort` if the IV is under 96 bits
    pub fn parse(line: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(line)
            .map_err(|_| Error::MalformedHeader("header is not ASCII".into()))?;
        let body = text
            .strip_suffix('\n')
            .ok_or_else(|| Error::MalformedHeader("header is not newline terminated".into()))?;
        let (iv_part, tag_part) = body
            .split_once(',')
            .ok_or_else(|| Error::MalformedHeader(format!("unrecognised header {:?}", body)))?;

        let iv_len_bits = parse_field(iv_part, IV_PREFIX)?;
        let tag_len = parse_field(tag_part, TAG_PREFIX)?;

        if iv_len_bits < MIN_IV_BITS {
            return Err(Error::IvTooShort { bits: iv_len_bits });
        }
        if iv_len_bits % 8 != 0 || iv_len_bits > MAX_IV_BITS {
            return Err(Error::MalformedHeader(format!(
                "ivlen {} is not a whole number of bytes up to {} bits",
                iv_len_bits, MAX_IV_BITS
            )));
        }
        if !(MIN_TAG_LEN..=MAX_TAG_LEN).contains(&tag_len) {
            return Err(Error::MalformedHeader(format!(
                "taglen {} outside {}..={}",
                tag_len, MIN_TAG_LEN, MAX_TAG_LEN
            )));
        }

        Ok(Self {
            iv_len_bits,
            tag_len,
        })
    }
}

/// The encrypted `datalen=<N>\n` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnerHeader {
    /// True plaintext length in bytes.
    pub data_len: u64,
}

impl InnerHeader {
    /// Encode as `datalen=<N>\n`.
    pub fn encode(&self) -> Vec<u8> {
        format!("{}{}\n", DATA_PREFIX, self.data_len).into_bytes()
    }

    /// Parse a decrypted length header including its trailing newline.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let body = bytes
            .strip_suffix(b"\n")
            .and_then(|b| std::str::from_utf8(b).ok())
            .ok_or_else(|| Error::MalformedHeader("length header not found in ciphertext".into()))?;
        let data_len = parse_field(body, DATA_PREFIX)?;
        Ok(Self { data_len })
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, prefix: &str) -> Result<T> {
    let digits = field
        .strip_prefix(prefix)
        .ok_or_else(|| Error::MalformedHeader(format!("expected {:?} in {:?}", prefix, field)))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::MalformedHeader(format!(
            "{:?} is not a decimal number",
            digits
        )));
    }
    digits
        .parse()
        .map_err(|_| Error::MalformedHeader(format!("{:?} out of range", digits)))
}
