//! Cipher primitives: AES counter mode, HMAC-SHA1 and AES-GCM.

use aes::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use super::engine::EngineError;

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type Aes192Ctr = ctr::Ctr128BE<aes::Aes192>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;
type HmacSha1 = Hmac<Sha1>;

/// XOR `buf` with the AES-CM keystream for `key` (16, 24 or 32 bytes).
pub(crate) fn aes_cm_apply(key: &[u8], iv: &[u8; 16], buf: &mut [u8]) -> Result<(), EngineError> {
    fn apply<C: KeyIvInit + StreamCipher>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), EngineError> {
        let mut cipher =
            C::new_from_slices(key, iv).map_err(|_| EngineError::BadParam("AES-CM key length"))?;
        cipher.apply_keystream(buf);
        Ok(())
    }

    match key.len() {
        16 => apply::<Aes128Ctr>(key, iv, buf),
        24 => apply::<Aes192Ctr>(key, iv, buf),
        32 => apply::<Aes256Ctr>(key, iv, buf),
        _ => Err(EngineError::BadParam("AES-CM key length")),
    }
}

/// AES-CM IV (RFC 3711 §4.1.1): `salt XOR (SSRC << 64) XOR (index << 16)`.
///
/// Used for SRTP with `index = ROC << 16 | SEQ`, and for SRTCP with the
/// 31-bit SRTCP index.
pub(crate) fn cm_iv(salt: &[u8], ssrc: u32, index: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[4..8].copy_from_slice(&ssrc.to_be_bytes());
    // 48-bit packet index in bytes 8..14
    iv[8..14].copy_from_slice(&index.to_be_bytes()[2..]);
    for (b, s) in iv.iter_mut().zip(salt.iter().take(14)) {
        *b ^= s;
    }
    iv
}

fn hmac_sha1(key: &[u8], parts: &[&[u8]]) -> Result<HmacSha1, EngineError> {
    let mut mac =
        HmacSha1::new_from_slice(key).map_err(|_| EngineError::BadParam("HMAC key length"))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac)
}

/// Check a truncated HMAC-SHA1 tag over the concatenation of `parts`.
pub(crate) fn hmac_sha1_verify(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> Result<(), EngineError> {
    hmac_sha1(key, parts)?
        .verify_truncated_left(tag)
        .map_err(|_| EngineError::AuthFail)
}

/// Compute a tag of `tag_len` bytes. Only the sending side needs this.
#[cfg(test)]
pub(crate) fn hmac_sha1_tag(key: &[u8], parts: &[&[u8]], tag_len: usize) -> Vec<u8> {
    let mac = hmac_sha1(key, parts).unwrap();
    mac.finalize().into_bytes()[..tag_len].to_vec()
}

/// AES-GCM IV (RFC 7714 §8.1 and §9.1): `salt XOR (SSRC << 48) XOR index`,
/// where `index` is `ROC << 16 | SEQ` for SRTP or the SRTCP index.
pub(crate) fn gcm_iv(salt: &[u8], ssrc: u32, index: u64) -> [u8; 12] {
    let mut iv = [0u8; 12];
    iv[2..6].copy_from_slice(&ssrc.to_be_bytes());
    iv[6..12].copy_from_slice(&index.to_be_bytes()[2..]);
    for (b, s) in iv.iter_mut().zip(salt.iter()) {
        *b ^= s;
    }
    iv
}

#[cfg(feature = "gcm")]
pub(crate) use gcm::GcmCipher;

#[cfg(feature = "gcm")]
mod gcm {
    use aes_gcm::aead::{AeadInPlace, KeyInit};
    use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce, Tag};

    use crate::srtp::engine::EngineError;

    pub(crate) enum GcmCipher {
        Aes128(Box<Aes128Gcm>),
        Aes256(Box<Aes256Gcm>),
    }

    impl std::fmt::Debug for GcmCipher {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                GcmCipher::Aes128(_) => f.write_str("GcmCipher::Aes128"),
                GcmCipher::Aes256(_) => f.write_str("GcmCipher::Aes256"),
            }
        }
    }

    impl GcmCipher {
        pub(crate) fn new(key: &[u8]) -> Result<Self, EngineError> {
            let bad = |_| EngineError::BadParam("AES-GCM key length");
            match key.len() {
                16 => Ok(GcmCipher::Aes128(Box::new(
                    Aes128Gcm::new_from_slice(key).map_err(bad)?,
                ))),
                32 => Ok(GcmCipher::Aes256(Box::new(
                    Aes256Gcm::new_from_slice(key).map_err(bad)?,
                ))),
                _ => Err(EngineError::BadParam("AES-GCM key length")),
            }
        }

        /// Verify `tag` and decrypt `buf` in place.
        pub(crate) fn open(
            &self,
            iv: &[u8; 12],
            aad: &[u8],
            buf: &mut [u8],
            tag: &[u8],
        ) -> Result<(), EngineError> {
            let nonce = Nonce::from_slice(iv);
            let tag = Tag::from_slice(tag);
            let result = match self {
                GcmCipher::Aes128(c) => c.decrypt_in_place_detached(nonce, aad, buf, tag),
                GcmCipher::Aes256(c) => c.decrypt_in_place_detached(nonce, aad, buf, tag),
            };
            result.map_err(|_| EngineError::AuthFail)
        }

        #[cfg(test)]
        pub(crate) fn seal(&self, iv: &[u8; 12], aad: &[u8], buf: &mut [u8]) -> Vec<u8> {
            let nonce = Nonce::from_slice(iv);
            let tag = match self {
                GcmCipher::Aes128(c) => c.encrypt_in_place_detached(nonce, aad, buf),
                GcmCipher::Aes256(c) => c.encrypt_in_place_detached(nonce, aad, buf),
            };
            tag.unwrap().to_vec()
        }
    }
}
