//! Cipher/authentication policy for the RTP and RTCP directions.
//!
//! [`build`] turns the requested services and the resolved suite into a
//! [`CryptoPolicies`] pair; [`Policy`] then attaches the master key and the
//! SSRC selector. Both are immutable once built.

use thiserror::Error;

use super::key::MasterKey;
use super::suite::{CryptoSuite, KeySize, SecurityServices, LEGACY_GCM_TAG_LEN};

/// Master salt length for AES-CM and the null cipher (RFC 3711).
pub const CM_SALT_LEN: usize = 14;

/// Master salt length for AES-GCM (RFC 7714).
pub const GCM_SALT_LEN: usize = 12;

/// HMAC-SHA1 session key length.
pub const HMAC_SHA1_KEY_LEN: usize = 20;

/// HMAC-SHA1-80 tag length.
pub const HMAC_SHA1_80_TAG_LEN: usize = 10;

/// AES-GCM tag length.
pub const GCM_TAG_LEN: usize = 16;

/// Replay window size in packets.
pub const REPLAY_WINDOW_SIZE: u64 = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("neither encryption or authentication were selected")]
    NoServices,
    #[error("GCM mode must always be used with auth enabled")]
    GcmRequiresAuth,
    #[error("AES-GCM does not support {0}-bit keys")]
    GcmKeySize(u32),
    #[error("{0} is not supported by this build")]
    Unsupported(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cipher {
    Null,
    AesCm(KeySize),
    AesGcm(KeySize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    Null,
    HmacSha1,
}

/// Policy for one direction (RTP or RTCP).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoPolicy {
    pub cipher: Cipher,
    /// Master key plus master salt, in bytes.
    pub cipher_key_len: usize,
    pub auth: Auth,
    pub auth_key_len: usize,
    pub auth_tag_len: usize,
    pub sec_serv: SecurityServices,
}

impl CryptoPolicy {
    fn aes_cm(key_size: KeySize, tag_len: usize) -> Self {
        CryptoPolicy {
            cipher: Cipher::AesCm(key_size),
            cipher_key_len: key_size.bytes() + CM_SALT_LEN,
            auth: Auth::HmacSha1,
            auth_key_len: HMAC_SHA1_KEY_LEN,
            auth_tag_len: tag_len,
            sec_serv: SecurityServices::CONF_AND_AUTH,
        }
    }

    fn aes_cm_null_auth(key_size: KeySize) -> Self {
        CryptoPolicy {
            auth: Auth::Null,
            auth_key_len: 0,
            auth_tag_len: 0,
            sec_serv: SecurityServices::CONF,
            ..Self::aes_cm(key_size, 0)
        }
    }

    fn null_cipher_hmac_sha1_80() -> Self {
        CryptoPolicy {
            cipher: Cipher::Null,
            sec_serv: SecurityServices::AUTH,
            ..Self::aes_cm(KeySize::Aes128, HMAC_SHA1_80_TAG_LEN)
        }
    }

    fn rtcp_default() -> Self {
        Self::aes_cm(KeySize::Aes128, HMAC_SHA1_80_TAG_LEN)
    }

    fn aes_gcm(key_size: KeySize) -> Result<Self, PolicyError> {
        if !cfg!(feature = "gcm") {
            return Err(PolicyError::Unsupported("AES-GCM"));
        }
        if key_size == KeySize::Aes192 {
            return Err(PolicyError::GcmKeySize(key_size.bits()));
        }
        Ok(CryptoPolicy {
            cipher: Cipher::AesGcm(key_size),
            cipher_key_len: key_size.bytes() + GCM_SALT_LEN,
            auth: Auth::Null,
            auth_key_len: 0,
            auth_tag_len: GCM_TAG_LEN,
            sec_serv: SecurityServices::CONF_AND_AUTH,
        })
    }

    /// Master key length in bytes (without salt).
    pub fn master_key_len(&self) -> usize {
        match self.cipher {
            Cipher::Null => KeySize::Aes128.bytes(),
            Cipher::AesCm(size) | Cipher::AesGcm(size) => size.bytes(),
        }
    }

    pub fn master_salt_len(&self) -> usize {
        self.cipher_key_len - self.master_key_len()
    }

    pub fn is_gcm(&self) -> bool {
        matches!(self.cipher, Cipher::AesGcm(_))
    }
}

/// The RTP and RTCP policies for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoPolicies {
    pub rtp: CryptoPolicy,
    pub rtcp: CryptoPolicy,
}

/// Choose the cipher/auth pair for the requested services.
pub fn build(services: SecurityServices, suite: &CryptoSuite) -> Result<CryptoPolicies, PolicyError> {
    let key_size = suite.key_size;

    let (mut rtp, mut rtcp) = match (services.confidentiality, services.authentication) {
        (false, false) => return Err(PolicyError::NoServices),
        (true, true) if suite.gcm => (
            CryptoPolicy::aes_gcm(key_size)?,
            CryptoPolicy::aes_gcm(key_size)?,
        ),
        (true, true) => (
            CryptoPolicy::aes_cm(key_size, suite.tag_size),
            CryptoPolicy::aes_cm(key_size, HMAC_SHA1_80_TAG_LEN),
        ),
        (true, false) if suite.gcm => return Err(PolicyError::GcmRequiresAuth),
        (true, false) => (
            CryptoPolicy::aes_cm_null_auth(key_size),
            CryptoPolicy::aes_cm(key_size, HMAC_SHA1_80_TAG_LEN),
        ),
        (false, true) if suite.gcm => (
            CryptoPolicy::aes_gcm(key_size)?,
            CryptoPolicy::aes_gcm(key_size)?,
        ),
        (false, true) => (
            CryptoPolicy::null_cipher_hmac_sha1_80(),
            CryptoPolicy::rtcp_default(),
        ),
    };

    rtp.sec_serv = services;
    rtcp.sec_serv = services;

    if suite.gcm && suite.tag_size == LEGACY_GCM_TAG_LEN {
        tracing::warn!(
            "GCM tag size {} kept at the GCM default of {}",
            suite.tag_size,
            rtp.auth_tag_len
        );
    } else {
        tracing::debug!("setting tag len {}", suite.tag_size);
        rtp.auth_tag_len = suite.tag_size;
    }

    Ok(CryptoPolicies { rtp, rtcp })
}

/// Which streams the session accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsrcSelector {
    /// Any SSRC seen in the capture gets its own stream.
    AnyInbound,
    /// Only this SSRC is decoded.
    Specific(u32),
}

/// Complete session policy, handed to the engine at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub rtp: CryptoPolicy,
    pub rtcp: CryptoPolicy,
    pub master_key: MasterKey,
    pub ssrc: SsrcSelector,
    pub window_size: u64,
}

impl Policy {
    pub fn new(policies: CryptoPolicies, master_key: MasterKey, ssrc: SsrcSelector) -> Self {
        Policy {
            rtp: policies.rtp,
            rtcp: policies.rtcp,
            master_key,
            ssrc,
            window_size: REPLAY_WINDOW_SIZE,
        }
    }
}
