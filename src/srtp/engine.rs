//! The unprotect capability the decoder drives.

use thiserror::Error;

use super::policy::Policy;

/// Per-packet and engine setup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("bad parameter: {0}")]
    BadParam(&'static str),
    #[error("packet truncated")]
    Truncated,
    #[error("no context for SSRC 0x{0:08x}")]
    NoContext(u32),
    #[error("replayed packet")]
    ReplayFail,
    #[error("packet index outside the replay window")]
    ReplayOld,
    #[error("authentication failed")]
    AuthFail,
    #[error("MKI does not match")]
    BadMki,
    #[error("cipher failure")]
    CipherFail,
    #[error("{0} is not supported")]
    Unsupported(&'static str),
}

/// An SRTP/SRTCP receiver bound to one [`Policy`].
///
/// Dropping the engine releases it.
pub trait UnprotectEngine: Sized {
    fn create(policy: &Policy) -> Result<Self, EngineError>;

    /// Seed the rollover counter of an existing stream.
    fn set_rollover_counter(&mut self, ssrc: u32, roc: u32) -> Result<(), EngineError>;

    /// Verify and decrypt an SRTP packet in place, returning the RTP length.
    fn unprotect_rtp(&mut self, packet: &mut [u8]) -> Result<usize, EngineError>;

    /// Verify and decrypt an SRTCP packet in place, returning the RTCP length.
    fn unprotect_rtcp(&mut self, packet: &mut [u8]) -> Result<usize, EngineError>;
}
