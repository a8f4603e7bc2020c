//! SRTP/SRTCP receive session (RFC 3711, RFC 7714).
//!
//! Packet layouts handled here:
//!
//! - SRTP, AES-CM or null cipher: `header || payload || MKI || tag`
//! - SRTP, AES-GCM: `header || ciphertext || tag || MKI`
//! - SRTCP, AES-CM: `header || payload || E|index || MKI || tag`
//! - SRTCP, AES-GCM: `header || ciphertext || tag || E|index || MKI`

use std::collections::HashMap;

#[cfg(feature = "gcm")]
use super::cipher::GcmCipher;
use super::cipher::{aes_cm_apply, cm_iv, gcm_iv, hmac_sha1_verify};
use super::engine::{EngineError, UnprotectEngine};
use super::kdf::{self, Direction, SessionKeys};
use super::key::MasterKey;
use super::policy::{
    Auth, Cipher, CryptoPolicy, Policy, SsrcSelector, GCM_TAG_LEN, HMAC_SHA1_KEY_LEN,
    REPLAY_WINDOW_SIZE,
};
use super::replay::{ReplayCheck, ReplayWindow};

/// Fixed RTP header size: V/P/X/CC(1) + M/PT(1) + seq(2) + ts(4) + SSRC(4).
const RTP_HEADER_LEN: usize = 12;

/// Fixed RTCP header size: V/P/RC(1) + PT(1) + length(2) + SSRC(4).
const RTCP_HEADER_LEN: usize = 8;

const SRTCP_INDEX_LEN: usize = 4;
const SRTCP_E_FLAG: u32 = 0x8000_0000;
const SEQ_NUM_MEDIAN: u32 = 1 << 15;

/// Length of the RTP header including CSRCs and the extension, if present.
pub(crate) fn rtp_header_len(data: &[u8]) -> Option<usize> {
    if data.len() < RTP_HEADER_LEN {
        return None;
    }
    let csrc_count = (data[0] & 0x0F) as usize;
    let has_extension = data[0] & 0x10 != 0;
    let mut len = RTP_HEADER_LEN + csrc_count * 4;
    if has_extension {
        if data.len() < len + 4 {
            return None;
        }
        let ext_words = u16::from_be_bytes([data[len + 2], data[len + 3]]) as usize;
        len += 4 + ext_words * 4;
    }
    (data.len() >= len).then_some(len)
}

/// Keys and cipher state for one direction.
#[derive(Debug)]
struct Transform {
    policy: CryptoPolicy,
    keys: SessionKeys,
    #[cfg(feature = "gcm")]
    gcm: Option<GcmCipher>,
}

impl Transform {
    fn new(policy: &CryptoPolicy, master: &MasterKey, direction: Direction) -> Result<Self, EngineError> {
        if policy.is_gcm() {
            if !cfg!(feature = "gcm") {
                return Err(EngineError::Unsupported("AES-GCM"));
            }
            if policy.auth_tag_len != GCM_TAG_LEN {
                return Err(EngineError::Unsupported("truncated GCM tag"));
            }
        }
        if policy.auth == Auth::HmacSha1 && policy.auth_tag_len > HMAC_SHA1_KEY_LEN {
            return Err(EngineError::BadParam("HMAC-SHA1 tag length"));
        }

        let keys = kdf::derive(policy, &master.key, &master.salt, direction)?;

        #[cfg(feature = "gcm")]
        let gcm = match policy.cipher {
            Cipher::AesGcm(_) => Some(GcmCipher::new(&keys.cipher_key)?),
            _ => None,
        };

        Ok(Transform {
            policy: policy.clone(),
            keys,
            #[cfg(feature = "gcm")]
            gcm,
        })
    }

    fn tag_len(&self) -> usize {
        match self.policy.cipher {
            Cipher::AesGcm(_) => GCM_TAG_LEN,
            _ => self.policy.auth_tag_len,
        }
    }

    /// Whether the HMAC tag is checked. Without authentication the tag bytes
    /// are still stripped.
    fn verifies(&self) -> bool {
        self.policy.auth == Auth::HmacSha1 && self.policy.sec_serv.authentication
    }

    fn is_gcm(&self) -> bool {
        self.policy.is_gcm()
    }

    fn encrypts(&self) -> bool {
        self.policy.sec_serv.confidentiality && self.policy.cipher != Cipher::Null
    }

    #[cfg(feature = "gcm")]
    fn gcm_open(&self, iv: &[u8; 12], aad: &[u8], buf: &mut [u8], tag: &[u8]) -> Result<(), EngineError> {
        match &self.gcm {
            Some(gcm) => gcm.open(iv, aad, buf, tag),
            None => Err(EngineError::CipherFail),
        }
    }

    #[cfg(not(feature = "gcm"))]
    fn gcm_open(&self, _iv: &[u8; 12], _aad: &[u8], _buf: &mut [u8], _tag: &[u8]) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("AES-GCM"))
    }
}

/// Receive state for one SSRC.
#[derive(Debug, Default)]
struct Stream {
    /// Rollover counter used until the first packet is accepted.
    roc: u32,
    rtp_window: ReplayWindow,
    rtcp_window: ReplayWindow,
}

impl Stream {
    /// Packet index estimate from RFC 3711 Appendix A.
    fn estimate_index(&self, seq: u16) -> Result<u64, EngineError> {
        let seq = u32::from(seq);
        let Some(highest) = self.rtp_window.highest() else {
            return Ok((u64::from(self.roc) << 16) | u64::from(seq));
        };

        let roc = (highest >> 16) as u32;
        let s_l = (highest & 0xFFFF) as u32;
        let v = if s_l < SEQ_NUM_MEDIAN {
            if seq > s_l + SEQ_NUM_MEDIAN {
                roc.checked_sub(1).ok_or(EngineError::ReplayOld)?
            } else {
                roc
            }
        } else if s_l - SEQ_NUM_MEDIAN > seq {
            roc.wrapping_add(1)
        } else {
            roc
        };
        Ok((u64::from(v) << 16) | u64::from(seq))
    }
}

fn check_replay(window: &ReplayWindow, index: u64) -> Result<(), EngineError> {
    match window.check(index) {
        ReplayCheck::Fresh => Ok(()),
        ReplayCheck::Replayed => Err(EngineError::ReplayFail),
        ReplayCheck::TooOld => Err(EngineError::ReplayOld),
    }
}

fn stream_for(
    streams: &mut HashMap<u32, Stream>,
    selector: SsrcSelector,
    ssrc: u32,
) -> Result<&mut Stream, EngineError> {
    match selector {
        SsrcSelector::Specific(_) => streams.get_mut(&ssrc).ok_or(EngineError::NoContext(ssrc)),
        SsrcSelector::AnyInbound => Ok(streams.entry(ssrc).or_insert_with(|| {
            tracing::debug!("new inbound stream for SSRC 0x{:08x}", ssrc);
            Stream::default()
        })),
    }
}

/// The in-crate [`UnprotectEngine`].
#[derive(Debug)]
pub struct SrtpSession {
    rtp: Transform,
    rtcp: Transform,
    mki: Option<Vec<u8>>,
    selector: SsrcSelector,
    streams: HashMap<u32, Stream>,
}

impl SrtpSession {
    fn check_mki(&self, found: &[u8]) -> Result<(), EngineError> {
        match &self.mki {
            Some(mki) if mki.as_slice() != found => Err(EngineError::BadMki),
            _ => Ok(()),
        }
    }

    fn mki_len(&self) -> usize {
        self.mki.as_ref().map_or(0, Vec::len)
    }
}

impl UnprotectEngine for SrtpSession {
    fn create(policy: &Policy) -> Result<Self, EngineError> {
        if policy.window_size != REPLAY_WINDOW_SIZE {
            return Err(EngineError::BadParam("replay window size"));
        }
        let master = &policy.master_key;
        if master.key.len() != policy.rtp.master_key_len()
            || master.salt.len() != policy.rtp.master_salt_len()
        {
            return Err(EngineError::BadParam("master key length"));
        }

        let rtp = Transform::new(&policy.rtp, master, Direction::Rtp)?;
        let rtcp = Transform::new(&policy.rtcp, master, Direction::Rtcp)?;

        let mut streams = HashMap::new();
        if let SsrcSelector::Specific(ssrc) = policy.ssrc {
            streams.insert(ssrc, Stream::default());
        }

        tracing::debug!(
            "created SRTP session: rtp {:?}/{:?} tag {}, rtcp {:?}/{:?} tag {}, ssrc {:?}",
            policy.rtp.cipher,
            policy.rtp.auth,
            rtp.tag_len(),
            policy.rtcp.cipher,
            policy.rtcp.auth,
            rtcp.tag_len(),
            policy.ssrc
        );

        Ok(SrtpSession {
            rtp,
            rtcp,
            mki: master.mki.clone(),
            selector: policy.ssrc,
            streams,
        })
    }

    /// Restarts replay tracking for the stream.
    fn set_rollover_counter(&mut self, ssrc: u32, roc: u32) -> Result<(), EngineError> {
        let stream = self
            .streams
            .get_mut(&ssrc)
            .ok_or(EngineError::NoContext(ssrc))?;
        stream.roc = roc;
        stream.rtp_window = ReplayWindow::new();
        tracing::debug!("set ROC {} for SSRC 0x{:08x}", roc, ssrc);
        Ok(())
    }

    fn unprotect_rtp(&mut self, packet: &mut [u8]) -> Result<usize, EngineError> {
        let header_len = rtp_header_len(packet).ok_or(EngineError::Truncated)?;
        let seq = u16::from_be_bytes([packet[2], packet[3]]);
        let ssrc = u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]);

        let mki_len = self.mki_len();
        let tag_len = self.rtp.tag_len();
        if packet.len() < header_len + mki_len + tag_len {
            return Err(EngineError::Truncated);
        }
        let payload_end = packet.len() - mki_len - tag_len;
        let mki_start = if self.rtp.is_gcm() {
            payload_end + tag_len
        } else {
            payload_end
        };
        self.check_mki(&packet[mki_start..mki_start + mki_len])?;

        let stream = stream_for(&mut self.streams, self.selector, ssrc)?;
        let index = stream.estimate_index(seq)?;
        check_replay(&stream.rtp_window, index)?;

        let transform = &self.rtp;
        if transform.is_gcm() {
            let iv = gcm_iv(&transform.keys.salt, ssrc, index);
            let (head, rest) = packet.split_at_mut(payload_end);
            let tag = &rest[..tag_len];
            if transform.encrypts() {
                let (aad, ciphertext) = head.split_at_mut(header_len);
                transform.gcm_open(&iv, aad, ciphertext, tag)?;
            } else {
                transform.gcm_open(&iv, head, &mut [], tag)?;
            }
        } else {
            if tag_len > 0 && transform.verifies() {
                let roc = ((index >> 16) as u32).to_be_bytes();
                let tag = &packet[packet.len() - tag_len..];
                hmac_sha1_verify(&transform.keys.auth_key, &[&packet[..payload_end], &roc], tag)?;
            }
            if transform.encrypts() {
                let iv = cm_iv(&transform.keys.salt, ssrc, index);
                aes_cm_apply(
                    &transform.keys.cipher_key,
                    &iv,
                    &mut packet[header_len..payload_end],
                )?;
            }
        }

        stream.rtp_window.record(index);
        Ok(payload_end)
    }

    fn unprotect_rtcp(&mut self, packet: &mut [u8]) -> Result<usize, EngineError> {
        let mki_len = self.mki_len();
        let tag_len = self.rtcp.tag_len();
        let len = packet.len();
        if len < RTCP_HEADER_LEN + SRTCP_INDEX_LEN + mki_len + tag_len {
            return Err(EngineError::Truncated);
        }
        let ssrc = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);

        let (index_start, mki_start, tag_start) = if self.rtcp.is_gcm() {
            let mki_start = len - mki_len;
            let index_start = mki_start - SRTCP_INDEX_LEN;
            (index_start, mki_start, index_start - tag_len)
        } else {
            let tag_start = len - tag_len;
            let mki_start = tag_start - mki_len;
            (mki_start - SRTCP_INDEX_LEN, mki_start, tag_start)
        };
        self.check_mki(&packet[mki_start..mki_start + mki_len])?;

        let trailer = [
            packet[index_start],
            packet[index_start + 1],
            packet[index_start + 2],
            packet[index_start + 3],
        ];
        let e_index = u32::from_be_bytes(trailer);
        let encrypted = e_index & SRTCP_E_FLAG != 0;
        let index = u64::from(e_index & !SRTCP_E_FLAG);

        let stream = stream_for(&mut self.streams, self.selector, ssrc)?;
        check_replay(&stream.rtcp_window, index)?;

        let transform = &self.rtcp;
        let plain_len = if transform.is_gcm() {
            let iv = gcm_iv(&transform.keys.salt, ssrc, index);
            let (head, rest) = packet.split_at_mut(tag_start);
            let tag = &rest[..tag_len];
            if encrypted {
                let (header, ciphertext) = head.split_at_mut(RTCP_HEADER_LEN);
                let mut aad = Vec::with_capacity(RTCP_HEADER_LEN + SRTCP_INDEX_LEN);
                aad.extend_from_slice(header);
                aad.extend_from_slice(&trailer);
                transform.gcm_open(&iv, &aad, ciphertext, tag)?;
            } else {
                let mut aad = Vec::with_capacity(head.len() + SRTCP_INDEX_LEN);
                aad.extend_from_slice(head);
                aad.extend_from_slice(&trailer);
                transform.gcm_open(&iv, &aad, &mut [], tag)?;
            }
            tag_start
        } else {
            if tag_len > 0 {
                hmac_sha1_verify(
                    &transform.keys.auth_key,
                    &[&packet[..mki_start]],
                    &packet[tag_start..],
                )?;
            }
            if encrypted {
                let iv = cm_iv(&transform.keys.salt, ssrc, index);
                aes_cm_apply(
                    &transform.keys.cipher_key,
                    &iv,
                    &mut packet[RTCP_HEADER_LEN..index_start],
                )?;
            }
            index_start
        };

        stream.rtcp_window.record(index);
        Ok(plain_len)
    }
}

/// Sender side, for building protected packets in tests.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::srtp::cipher::hmac_sha1_tag;

    pub(crate) struct Protector {
        rtp: Transform,
        rtcp: Transform,
        mki: Vec<u8>,
    }

    impl Protector {
        pub(crate) fn new(policy: &Policy) -> Self {
            let master = &policy.master_key;
            Protector {
                rtp: Transform::new(&policy.rtp, master, Direction::Rtp).unwrap(),
                rtcp: Transform::new(&policy.rtcp, master, Direction::Rtcp).unwrap(),
                mki: master.mki.clone().unwrap_or_default(),
            }
        }

        pub(crate) fn protect_rtp(&self, plain: &[u8], roc: u32) -> Vec<u8> {
            let header_len = rtp_header_len(plain).unwrap();
            let seq = u16::from_be_bytes([plain[2], plain[3]]);
            let ssrc = u32::from_be_bytes([plain[8], plain[9], plain[10], plain[11]]);
            let index = (u64::from(roc) << 16) | u64::from(seq);
            let t = &self.rtp;
            let mut out = plain.to_vec();

            if t.is_gcm() {
                #[cfg(feature = "gcm")]
                {
                    let gcm = t.gcm.as_ref().unwrap();
                    let iv = gcm_iv(&t.keys.salt, ssrc, index);
                    let tag = if t.encrypts() {
                        let (aad, body) = out.split_at_mut(header_len);
                        gcm.seal(&iv, aad, body)
                    } else {
                        gcm.seal(&iv, &out, &mut [])
                    };
                    out.extend_from_slice(&tag);
                    out.extend_from_slice(&self.mki);
                }
            } else {
                if t.encrypts() {
                    let iv = cm_iv(&t.keys.salt, ssrc, index);
                    aes_cm_apply(&t.keys.cipher_key, &iv, &mut out[header_len..]).unwrap();
                }
                let tag_len = t.tag_len();
                let tag = if t.verifies() {
                    hmac_sha1_tag(&t.keys.auth_key, &[&out, &roc.to_be_bytes()], tag_len)
                } else {
                    vec![0; tag_len]
                };
                out.extend_from_slice(&self.mki);
                out.extend_from_slice(&tag);
            }
            out
        }

        pub(crate) fn protect_rtcp(&self, plain: &[u8], index: u32, encrypt: bool) -> Vec<u8> {
            let ssrc = u32::from_be_bytes([plain[4], plain[5], plain[6], plain[7]]);
            let e_index = if encrypt { index | SRTCP_E_FLAG } else { index };
            let trailer = e_index.to_be_bytes();
            let t = &self.rtcp;
            let mut out = plain.to_vec();

            if t.is_gcm() {
                #[cfg(feature = "gcm")]
                {
                    let gcm = t.gcm.as_ref().unwrap();
                    let iv = gcm_iv(&t.keys.salt, ssrc, u64::from(index));
                    let tag = if encrypt {
                        let mut aad = out[..RTCP_HEADER_LEN].to_vec();
                        aad.extend_from_slice(&trailer);
                        gcm.seal(&iv, &aad, &mut out[RTCP_HEADER_LEN..])
                    } else {
                        let mut aad = out.clone();
                        aad.extend_from_slice(&trailer);
                        gcm.seal(&iv, &aad, &mut [])
                    };
                    out.extend_from_slice(&tag);
                    out.extend_from_slice(&trailer);
                    out.extend_from_slice(&self.mki);
                }
            } else {
                if encrypt {
                    let iv = cm_iv(&t.keys.salt, ssrc, u64::from(index));
                    aes_cm_apply(&t.keys.cipher_key, &iv, &mut out[RTCP_HEADER_LEN..]).unwrap();
                }
                out.extend_from_slice(&trailer);
                let tag = hmac_sha1_tag(&t.keys.auth_key, &[&out], t.tag_len());
                out.extend_from_slice(&self.mki);
                out.extend_from_slice(&tag);
            }
            out
        }
    }

    /// RTP packet with version 2, the given sequence number and SSRC.
    pub(crate) fn rtp_packet(seq: u16, ssrc: u32, payload: &[u8]) -> Vec<u8> {
        let mut pkt = vec![0x80, 0x00];
        pkt.extend_from_slice(&seq.to_be_bytes());
        pkt.extend_from_slice(&(u32::from(seq) * 160).to_be_bytes());
        pkt.extend_from_slice(&ssrc.to_be_bytes());
        pkt.extend_from_slice(payload);
        pkt
    }

    /// Minimal RTCP sender report.
    pub(crate) fn rtcp_sender_report(ssrc: u32) -> Vec<u8> {
        let mut pkt = vec![0u8; 28];
        pkt[0] = 0x80;
        pkt[1] = 200;
        pkt[3] = 6;
        pkt[4..8].copy_from_slice(&ssrc.to_be_bytes());
        pkt[8..].iter_mut().enumerate().for_each(|(i, b)| *b = i as u8);
        pkt
    }
}
