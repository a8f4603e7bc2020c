//! Master key decoding from the command line.
//!
//! Keys are given as `key || salt` in hex (`-k`) or base64 (`-b`), and the
//! optional MKI (`-i`) in hex. Decoding is strict: the caller checks the
//! decoded length against the policy's `cipher_key_len` with
//! [`decode_key_material`] rather than padding or truncating.

use std::fmt;

use base64::Engine;
use thiserror::Error;

/// Largest accepted MKI (bytes).
pub const MAX_MKI_LEN: usize = 128;

/// Errors produced while decoding key material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("odd number of hex digits ({0})")]
    OddLength(usize),
    #[error("invalid hex digit {digit:?} at position {position}")]
    InvalidDigit { digit: char, position: usize },
    #[error("invalid base64 input: {0}")]
    InvalidCharacter(String),
    #[error("too few digits in key/salt (should be {expected} digits, found {found})")]
    TooShort { expected: usize, found: usize },
    #[error("too many digits in key/salt (should be {expected} digits, found {found})")]
    TooLong { expected: usize, found: usize },
    #[error("MKI longer than {MAX_MKI_LEN} bytes ({0})")]
    MkiTooLong(usize),
}

/// How the master key was written on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyEncoding {
    #[default]
    Hex,
    Base64,
}

impl KeyEncoding {
    /// Number of input characters that encode `len` bytes.
    pub fn expected_chars(self, len: usize) -> usize {
        match self {
            KeyEncoding::Hex => len * 2,
            KeyEncoding::Base64 => len.div_ceil(3) * 4,
        }
    }
}

/// Decode a hex string, two digits per byte, most significant nibble first.
pub fn decode_hex(text: &str) -> Result<Vec<u8>, KeyError> {
    let digits = text.as_bytes();
    if digits.len() % 2 != 0 {
        return Err(KeyError::OddLength(digits.len()));
    }

    let nibble = |position: usize| -> Result<u8, KeyError> {
        let c = digits[position] as char;
        c.to_digit(16)
            .map(|d| d as u8)
            .ok_or(KeyError::InvalidDigit { digit: c, position })
    };

    let mut out = Vec::with_capacity(digits.len() / 2);
    for i in (0..digits.len()).step_by(2) {
        out.push((nibble(i)? << 4) | nibble(i + 1)?);
    }
    Ok(out)
}

/// Decode standard base64, returning the bytes and the number of `=` padding
/// characters at the end of the input.
pub fn decode_base64(text: &str) -> Result<(Vec<u8>, usize), KeyError> {
    let padding = text.bytes().rev().take_while(|&b| b == b'=').count();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|e| KeyError::InvalidCharacter(e.to_string()))?;
    Ok((bytes, padding))
}

/// Decode `text` and check it carries exactly `expected_len` bytes of key
/// material (cipher key followed by salt).
pub fn decode_key_material(
    text: &str,
    encoding: KeyEncoding,
    expected_len: usize,
) -> Result<Vec<u8>, KeyError> {
    let expected_chars = encoding.expected_chars(expected_len);

    let decoded = match encoding {
        KeyEncoding::Hex => decode_hex(text)?,
        KeyEncoding::Base64 => {
            let (bytes, padding) = decode_base64(text)?;
            tracing::debug!(
                "base64 key: {} chars, {} padding, {} bytes",
                text.len(),
                padding,
                bytes.len()
            );
            bytes
        }
    };

    if decoded.len() < expected_len {
        return Err(KeyError::TooShort {
            expected: expected_chars,
            found: text.len(),
        });
    }
    if text.len() > expected_chars {
        return Err(KeyError::TooLong {
            expected: expected_chars,
            found: text.len(),
        });
    }

    Ok(decoded)
}

/// Decode a hex MKI.
pub fn decode_mki(text: &str) -> Result<Vec<u8>, KeyError> {
    let mki = decode_hex(text)?;
    if mki.len() > MAX_MKI_LEN {
        return Err(KeyError::MkiTooLong(mki.len()));
    }
    Ok(mki)
}

/// Master key, salt and optional MKI for one session.
#[derive(Clone, PartialEq, Eq)]
pub struct MasterKey {
    pub key: Vec<u8>,
    pub salt: Vec<u8>,
    pub mki: Option<Vec<u8>>,
}

impl MasterKey {
    /// Split decoded `key || salt` material after `key_len` bytes.
    pub fn split(material: &[u8], key_len: usize, mki: Option<Vec<u8>>) -> Self {
        let (key, salt) = material.split_at(key_len.min(material.len()));
        MasterKey {
            key: key.to_vec(),
            salt: salt.to_vec(),
            mki,
        }
    }
}

// Keep key bytes out of debug logs.
impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("key_len", &self.key.len())
            .field("salt_len", &self.salt.len())
            .field("mki_len", &self.mki.as_ref().map(Vec::len))
            .finish()
    }
}

/// Lowercase hex rendering used for diagnostics.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("00ff10Ab").unwrap(), vec![0x00, 0xFF, 0x10, 0xAB]);
        assert_eq!(decode_hex("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_decode_hex_nibble_order() {
        for b in 0..=255u8 {
            let text = format!("{:02x}{:02X}", b, b);
            assert_eq!(decode_hex(&text).unwrap(), vec![b, b]);
        }
    }

    #[test]
    fn test_decode_hex_odd_length() {
        assert_eq!(decode_hex("abc"), Err(KeyError::OddLength(3)));
    }

    #[test]
    fn test_decode_hex_invalid_digit() {
        assert_eq!(
            decode_hex("0g"),
            Err(KeyError::InvalidDigit {
                digit: 'g',
                position: 1
            })
        );
        assert!(decode_hex("12 4").is_err());
    }

    #[test]
    fn test_decode_base64_padding() {
        let (bytes, pad) = decode_base64("aGk=").unwrap();
        assert_eq!(bytes, b"hi");
        assert_eq!(pad, 1);

        let (bytes, pad) = decode_base64("aA==").unwrap();
        assert_eq!(bytes, b"h");
        assert_eq!(pad, 2);

        let (_, pad) = decode_base64("aGV5").unwrap();
        assert_eq!(pad, 0);
    }

    #[test]
    fn test_decode_base64_canonical_reencode() {
        for input in ["aSBrbm93IGFsbCB5b3VyIGxpdHRsZSBzZWNyZXRz", "AAEC", "/+8="] {
            let (bytes, _) = decode_base64(input).unwrap();
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            assert_eq!(encoded, input);
        }
    }

    #[test]
    fn test_decode_base64_invalid() {
        assert!(matches!(
            decode_base64("ab$d"),
            Err(KeyError::InvalidCharacter(_))
        ));
    }

    #[test]
    fn test_key_material_hex_exact() {
        let text = "e1f97a0d3e018be0d64fa32c06de41390ec675ad498afeebb6960b3aabe6";
        let key = decode_key_material(text, KeyEncoding::Hex, 30).unwrap();
        assert_eq!(key.len(), 30);
        assert_eq!(key[0], 0xE1);
        assert_eq!(key[29], 0xE6);
    }

    #[test]
    fn test_key_material_hex_too_short() {
        let err = decode_key_material("e1f97a0d", KeyEncoding::Hex, 30).unwrap_err();
        assert_eq!(
            err,
            KeyError::TooShort {
                expected: 60,
                found: 8
            }
        );
    }

    #[test]
    fn test_key_material_hex_too_long() {
        let text = "00".repeat(31);
        let err = decode_key_material(&text, KeyEncoding::Hex, 30).unwrap_err();
        assert_eq!(
            err,
            KeyError::TooLong {
                expected: 60,
                found: 62
            }
        );
    }

    #[test]
    fn test_key_material_base64() {
        // 30 bytes: 16 of key, 14 of salt.
        let key = decode_key_material(
            "aSBrbm93IGFsbCB5b3VyIGxpdHRsZSBzZWNyZXRz",
            KeyEncoding::Base64,
            30,
        )
        .unwrap();
        assert_eq!(&key, b"i know all your little secrets");
    }

    #[test]
    fn test_key_material_base64_padded_256() {
        // 46 bytes encode to 64 characters with "==" padding.
        let text = base64::engine::general_purpose::STANDARD.encode([0x5Au8; 46]);
        assert_eq!(text.len(), 64);
        let key = decode_key_material(&text, KeyEncoding::Base64, 46).unwrap();
        assert_eq!(key.len(), 46);
    }

    #[test]
    fn test_key_material_base64_truncated() {
        let text = base64::engine::general_purpose::STANDARD.encode([1u8; 24]);
        assert!(matches!(
            decode_key_material(&text, KeyEncoding::Base64, 30),
            Err(KeyError::TooShort { .. })
        ));
    }

    #[test]
    fn test_decode_mki() {
        assert_eq!(decode_mki("e1f97a0d").unwrap(), vec![0xE1, 0xF9, 0x7A, 0x0D]);
        let long = "00".repeat(MAX_MKI_LEN + 1);
        assert_eq!(decode_mki(&long), Err(KeyError::MkiTooLong(MAX_MKI_LEN + 1)));
    }

    #[test]
    fn test_master_key_split_and_debug() {
        let material: Vec<u8> = (0..30).collect();
        let mk = MasterKey::split(&material, 16, None);
        assert_eq!(mk.key, (0..16).collect::<Vec<u8>>());
        assert_eq!(mk.salt.len(), 14);
        let dbg = format!("{:?}", mk);
        assert!(dbg.contains("key_len: 16"));
        assert!(!dbg.contains("15"));
    }
}
