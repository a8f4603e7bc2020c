//! Crypto suite resolution.
//!
//! The command line offers several overlapping ways to pick a cipher: an
//! explicit key size (`-e`), a tag size (`-t`), the GCM flag (`-g`), the auth
//! flag (`-a`) and RFC 4568 suite names (`-c`). They are recorded in
//! command-line order as [`Selection`]s and folded once by [`resolve`] into a
//! single [`CryptoSuite`] plus the requested [`SecurityServices`].

use std::fmt;
use std::ops::BitOr;

use thiserror::Error;

/// Default key size when nothing else selects one.
pub const DEFAULT_KEY_BITS: u32 = 128;

/// Legacy GCM tag size accepted as an alias (see `PolicyBuilder`).
pub const LEGACY_GCM_TAG_LEN: usize = 8;

/// Errors found while resolving the suite.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SuiteError {
    #[error("encryption key size must be 128, 192 or 256 ({0})")]
    InvalidKeySize(u32),
    #[error("Unknown/unsupported crypto suite name {0}")]
    UnknownSuite(String),
    #[error("GCM tag size must be 16 ({0})")]
    InvalidGcmTag(usize),
    #[error("non GCM tag size must be 4 or 10 ({0})")]
    InvalidTag(usize),
}

/// Security services requested for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityServices {
    pub confidentiality: bool,
    pub authentication: bool,
}

impl SecurityServices {
    pub const NONE: Self = SecurityServices {
        confidentiality: false,
        authentication: false,
    };
    pub const CONF: Self = SecurityServices {
        confidentiality: true,
        authentication: false,
    };
    pub const AUTH: Self = SecurityServices {
        confidentiality: false,
        authentication: true,
    };
    pub const CONF_AND_AUTH: Self = SecurityServices {
        confidentiality: true,
        authentication: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.confidentiality && !self.authentication
    }
}

impl BitOr for SecurityServices {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        SecurityServices {
            confidentiality: self.confidentiality || rhs.confidentiality,
            authentication: self.authentication || rhs.authentication,
        }
    }
}

impl fmt::Display for SecurityServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.confidentiality, self.authentication) {
            (true, true) => write!(f, "confidentiality message authentication"),
            (true, false) => write!(f, "confidentiality"),
            (false, true) => write!(f, "message authentication"),
            (false, false) => write!(f, "none"),
        }
    }
}

/// AES key size in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySize {
    Aes128,
    Aes192,
    Aes256,
}

impl KeySize {
    pub fn from_bits(bits: u32) -> Result<Self, SuiteError> {
        match bits {
            128 => Ok(KeySize::Aes128),
            192 => Ok(KeySize::Aes192),
            256 => Ok(KeySize::Aes256),
            other => Err(SuiteError::InvalidKeySize(other)),
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            KeySize::Aes128 => 128,
            KeySize::Aes192 => 192,
            KeySize::Aes256 => 256,
        }
    }

    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }
}

/// A resolved cipher description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoSuite {
    /// RFC 4568 name when the suite was picked by name.
    pub name: Option<&'static str>,
    pub gcm: bool,
    pub key_size: KeySize,
    /// Authentication tag length in bytes.
    pub tag_size: usize,
}

struct NamedSuite {
    name: &'static str,
    gcm: bool,
    key_size: KeySize,
    tag_size: usize,
}

const NAMED_SUITES: &[NamedSuite] = &[
    NamedSuite {
        name: "AES_CM_128_HMAC_SHA1_32",
        gcm: false,
        key_size: KeySize::Aes128,
        tag_size: 4,
    },
    NamedSuite {
        name: "AES_CM_128_HMAC_SHA1_80",
        gcm: false,
        key_size: KeySize::Aes128,
        tag_size: 10,
    },
    NamedSuite {
        name: "AES_192_CM_HMAC_SHA1_32",
        gcm: false,
        key_size: KeySize::Aes192,
        tag_size: 4,
    },
    NamedSuite {
        name: "AES_192_CM_HMAC_SHA1_80",
        gcm: false,
        key_size: KeySize::Aes192,
        tag_size: 10,
    },
    NamedSuite {
        name: "AES_256_CM_HMAC_SHA1_32",
        gcm: false,
        key_size: KeySize::Aes256,
        tag_size: 4,
    },
    NamedSuite {
        name: "AES_256_CM_HMAC_SHA1_80",
        gcm: false,
        key_size: KeySize::Aes256,
        tag_size: 10,
    },
    NamedSuite {
        name: "AEAD_AES_128_GCM",
        gcm: true,
        key_size: KeySize::Aes128,
        tag_size: 16,
    },
    NamedSuite {
        name: "AEAD_AES_256_GCM",
        gcm: true,
        key_size: KeySize::Aes256,
        tag_size: 16,
    },
];

/// Names accepted by `-c`, for usage text.
pub fn suite_names() -> impl Iterator<Item = &'static str> {
    NAMED_SUITES.iter().map(|s| s.name)
}

/// One suite-affecting flag, in the order it appeared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// `-e <bits>`
    KeySize(u32),
    /// `-t <bytes>`
    TagSize(usize),
    /// `-g`
    Gcm,
    /// `-a`
    Auth,
    /// `-c <name>`
    Suite(String),
}

/// Fold the selections into a suite and the requested services.
///
/// Later selections override earlier ones for the same field. The tag size
/// defaults to 16 for GCM and 10 otherwise.
pub fn resolve(selections: &[Selection]) -> Result<(CryptoSuite, SecurityServices), SuiteError> {
    let mut services = SecurityServices::NONE;
    let mut name = None;
    let mut gcm = false;
    let mut key_size = KeySize::from_bits(DEFAULT_KEY_BITS)?;
    let mut tag_size: Option<usize> = None;

    for selection in selections {
        match selection {
            Selection::KeySize(bits) => {
                key_size = KeySize::from_bits(*bits)?;
                services = services | SecurityServices::CONF;
            }
            // Zero means unset.
            Selection::TagSize(bytes) => tag_size = (*bytes != 0).then_some(*bytes),
            Selection::Gcm => {
                gcm = true;
                services = services | SecurityServices::AUTH;
            }
            Selection::Auth => services = services | SecurityServices::AUTH,
            Selection::Suite(requested) => {
                let suite = NAMED_SUITES
                    .iter()
                    .find(|s| s.name.eq_ignore_ascii_case(requested))
                    .ok_or_else(|| SuiteError::UnknownSuite(requested.clone()))?;
                name = Some(suite.name);
                gcm = suite.gcm;
                key_size = suite.key_size;
                tag_size = Some(suite.tag_size);
                services = services | SecurityServices::CONF_AND_AUTH;
            }
        }
    }

    let tag_size = tag_size.unwrap_or(if gcm { 16 } else { 10 });

    if gcm && tag_size != 16 && tag_size != LEGACY_GCM_TAG_LEN {
        return Err(SuiteError::InvalidGcmTag(tag_size));
    }
    if !gcm && tag_size != 4 && tag_size != 10 {
        return Err(SuiteError::InvalidTag(tag_size));
    }

    Ok((
        CryptoSuite {
            name,
            gcm,
            key_size,
            tag_size,
        },
        services,
    ))
}
