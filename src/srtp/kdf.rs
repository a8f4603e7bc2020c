//! Session key derivation (RFC 3711 §4.3) with key derivation rate 0.

use super::cipher::aes_cm_apply;
use super::engine::EngineError;
use super::policy::{CryptoPolicy, CM_SALT_LEN};

const LABEL_RTP_ENCRYPTION: u8 = 0x00;
const LABEL_RTP_AUTH: u8 = 0x01;
const LABEL_RTP_SALT: u8 = 0x02;
const LABEL_RTCP_ENCRYPTION: u8 = 0x03;
const LABEL_RTCP_AUTH: u8 = 0x04;
const LABEL_RTCP_SALT: u8 = 0x05;

/// Which set of labels to derive with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Rtp,
    Rtcp,
}

impl Direction {
    fn labels(self) -> (u8, u8, u8) {
        match self {
            Direction::Rtp => (LABEL_RTP_ENCRYPTION, LABEL_RTP_AUTH, LABEL_RTP_SALT),
            Direction::Rtcp => (LABEL_RTCP_ENCRYPTION, LABEL_RTCP_AUTH, LABEL_RTCP_SALT),
        }
    }
}

/// Session keys for one direction.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct SessionKeys {
    pub cipher_key: Vec<u8>,
    pub auth_key: Vec<u8>,
    pub salt: Vec<u8>,
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("cipher_key_len", &self.cipher_key.len())
            .field("auth_key_len", &self.auth_key.len())
            .field("salt_len", &self.salt.len())
            .finish()
    }
}

/// AES-CM PRF: keystream for IV `(master_salt XOR label << 48) || 0x0000`.
///
/// A master salt shorter than 14 bytes (the 12-byte GCM salt) is
/// zero-padded on the right.
pub(crate) fn prf(
    master_key: &[u8],
    master_salt: &[u8],
    label: u8,
    output_len: usize,
) -> Result<Vec<u8>, EngineError> {
    if master_salt.len() > CM_SALT_LEN {
        return Err(EngineError::BadParam("master salt length"));
    }
    let mut iv = [0u8; 16];
    iv[..master_salt.len()].copy_from_slice(master_salt);
    iv[7] ^= label;

    let mut output = vec![0u8; output_len];
    aes_cm_apply(master_key, &iv, &mut output)?;
    Ok(output)
}

/// Derive the cipher key, auth key and salt `policy` asks for.
pub(crate) fn derive(
    policy: &CryptoPolicy,
    master_key: &[u8],
    master_salt: &[u8],
    direction: Direction,
) -> Result<SessionKeys, EngineError> {
    let (enc, auth, salt) = direction.labels();
    let cipher_key = prf(master_key, master_salt, enc, policy.master_key_len())?;
    let auth_key = if policy.auth_key_len > 0 {
        prf(master_key, master_salt, auth, policy.auth_key_len)?
    } else {
        Vec::new()
    };
    let salt = prf(master_key, master_salt, salt, policy.master_salt_len())?;

    Ok(SessionKeys {
        cipher_key,
        auth_key,
        salt,
    })
}
