//! Per-frame SRTP/SRTCP decoding session.
//!
//! A [`Decoder`] owns the session policy and the unprotect engine. Each call
//! to [`Decoder::handle`] takes one captured frame, strips the link/IP/UDP
//! framing by a fixed offset, classifies the rest as RTP or RTCP, unprotects
//! it and writes a timestamped hex dump of the plaintext.

pub mod hexdump;

use std::fmt;
use std::io::{self, Write};
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;
use thiserror::Error;

use crate::capture::Frame;
use crate::srtp::{EngineError, Policy, SrtpSession, SsrcSelector, UnprotectEngine};

/// Default byte offset of the RTP packet in a frame (Ethernet + IPv4 + UDP).
pub const DEFAULT_RTP_OFFSET: usize = 42;

/// Expected RTP version field.
const RTP_VERSION: u8 = 2;

/// Payload types reserved for RTCP when multiplexed with RTP (RFC 5761).
const RTCP_MUX_PAYLOAD_TYPES: std::ops::RangeInclusive<u8> = 64..=95;

/// Which transform to apply to each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    #[default]
    Rtp,
    Rtcp,
    /// RTP and RTCP on one port, told apart by payload type.
    RtcpMux,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Rtp => "rtp",
            Mode::Rtcp => "rtcp",
            Mode::RtcpMux => "rtcp-mux",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Rtp,
    Rtcp,
}

/// Decide whether `payload` is RTP or RTCP under `mode`.
pub fn classify(mode: Mode, payload: &[u8]) -> PacketKind {
    match mode {
        Mode::Rtp => PacketKind::Rtp,
        Mode::Rtcp => PacketKind::Rtcp,
        Mode::RtcpMux => match payload.get(1) {
            Some(b) if RTCP_MUX_PAYLOAD_TYPES.contains(&(b & 0x7F)) => PacketKind::Rtcp,
            _ => PacketKind::Rtp,
        },
    }
}

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("failed to create SRTP session: {0}")]
    Engine(#[from] EngineError),
    #[error("setting ROC (-r) requires -s <ssrc>")]
    RocWithoutSsrc,
    #[error("decoder has been shut down")]
    Closed,
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

/// What happened to one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Not SRTP traffic: shorter than the offset, or not RTP version 2.
    Skipped,
    Decoded(PacketKind),
    Failed(PacketKind, EngineError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initialized,
    Running,
    Deinitialized,
}

/// End-of-session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub mode: Mode,
    pub rtp_count: u64,
    pub rtcp_count: u64,
    pub error_count: u64,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if matches!(self.mode, Mode::Rtp | Mode::RtcpMux) {
            writeln!(f, "RTP packets decoded: {}", self.rtp_count)?;
        }
        if matches!(self.mode, Mode::Rtcp | Mode::RtcpMux) {
            writeln!(f, "RTCP packets decoded: {}", self.rtcp_count)?;
        }
        write!(f, "Packet decode errors: {}", self.error_count)
    }
}

pub struct Decoder<E: UnprotectEngine = SrtpSession> {
    policy: Policy,
    mode: Mode,
    rtp_offset: usize,
    engine: Option<E>,
    first_timestamp: Option<Duration>,
    frame_index: u64,
    rtp_count: u64,
    rtcp_count: u64,
    error_count: u64,
    buffer: Vec<u8>,
}

impl<E: UnprotectEngine> Decoder<E> {
    /// Create the engine for `policy` and seed the ROC of a pinned SSRC.
    pub fn init(policy: Policy, mode: Mode, rtp_offset: usize, roc: u32) -> Result<Self, DecoderError> {
        if roc != 0 && policy.ssrc == SsrcSelector::AnyInbound {
            return Err(DecoderError::RocWithoutSsrc);
        }

        let mut engine = E::create(&policy)?;
        if let SsrcSelector::Specific(ssrc) = policy.ssrc {
            if roc != 0 {
                engine.set_rollover_counter(ssrc, roc)?;
            }
        }
        tracing::debug!("decoder initialized: mode {}, offset {}", mode, rtp_offset);

        Ok(Decoder {
            policy,
            mode,
            rtp_offset,
            engine: Some(engine),
            first_timestamp: None,
            frame_index: 0,
            rtp_count: 0,
            rtcp_count: 0,
            error_count: 0,
            buffer: Vec::new(),
        })
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn state(&self) -> State {
        match (&self.engine, self.frame_index) {
            (None, _) => State::Deinitialized,
            (Some(_), 0) => State::Initialized,
            (Some(_), _) => State::Running,
        }
    }

    /// Decode one frame, writing the timestamp and hex dump to `out` on
    /// success. Unprotect failures are counted, not returned.
    pub fn handle<W: Write + ?Sized>(&mut self, frame: &Frame, out: &mut W) -> Result<Outcome, DecoderError> {
        let Some(engine) = self.engine.as_mut() else {
            return Err(DecoderError::Closed);
        };

        self.frame_index += 1;
        let first = *self.first_timestamp.get_or_insert(frame.timestamp);

        let Some(payload) = frame.data.get(self.rtp_offset..) else {
            tracing::trace!("frame {}: shorter than offset, skipped", self.frame_index);
            return Ok(Outcome::Skipped);
        };
        self.buffer.clear();
        self.buffer.extend_from_slice(payload);

        let kind = classify(self.mode, &self.buffer);
        let result = match kind {
            PacketKind::Rtp => {
                if self.buffer.first().map(|b| b >> 6) != Some(RTP_VERSION) {
                    tracing::trace!("frame {}: not RTP version 2, skipped", self.frame_index);
                    return Ok(Outcome::Skipped);
                }
                engine.unprotect_rtp(&mut self.buffer)
            }
            PacketKind::Rtcp => engine.unprotect_rtcp(&mut self.buffer),
        };

        let len = match result {
            Ok(len) => len,
            Err(err) => {
                self.error_count += 1;
                tracing::debug!("frame {}: {:?} unprotect failed: {}", self.frame_index, kind, err);
                return Ok(Outcome::Failed(kind, err));
            }
        };
        match kind {
            PacketKind::Rtp => self.rtp_count += 1,
            PacketKind::Rtcp => self.rtcp_count += 1,
        }

        let delta = frame.timestamp.saturating_sub(first);
        hexdump::write_timestamp(out, delta)?;
        hexdump::write_hexdump(out, &self.buffer[..len])?;
        Ok(Outcome::Decoded(kind))
    }

    /// Release the engine. Safe to call more than once.
    pub fn deinit(&mut self) {
        if self.engine.take().is_some() {
            tracing::debug!("decoder released after {} frames", self.frame_index);
        }
    }

    pub fn report(&self) -> Report {
        Report {
            mode: self.mode,
            rtp_count: self.rtp_count,
            rtcp_count: self.rtcp_count,
            error_count: self.error_count,
        }
    }
}

impl<E: UnprotectEngine> Drop for Decoder<E> {
    fn drop(&mut self) {
        self.deinit();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::capture::dissect::test_support::udp_frame;
    use crate::capture::test_support::pcap_bytes;
    use crate::capture::{CaptureReader, LinkType};
    use crate::srtp::key::{decode_key_material, KeyEncoding};
    use crate::srtp::session::test_support::{rtcp_sender_report, rtp_packet, Protector};
    use crate::srtp::suite::{self, Selection};
    use crate::srtp::{policy, MasterKey};

    const KEY_HEX: &str = "e1f97a0d3e018be0d64fa32c06de41390ec675ad498afeebb6960b3aabe6";

    fn suite_policy(ssrc: SsrcSelector) -> Policy {
        let (suite, services) =
            suite::resolve(&[Selection::Suite("AES_CM_128_HMAC_SHA1_80".into())]).unwrap();
        let policies = policy::build(services, &suite).unwrap();
        let material =
            decode_key_material(KEY_HEX, KeyEncoding::Hex, policies.rtp.cipher_key_len).unwrap();
        let master = MasterKey::split(&material, policies.rtp.master_key_len(), None);
        Policy::new(policies, master, ssrc)
    }

    fn frame_at(micros: u64, payload: &[u8]) -> Frame {
        Frame {
            timestamp: Duration::from_micros(micros),
            link_type: LinkType::Ethernet,
            data: udp_frame([10, 0, 0, 1], [10, 0, 0, 2], 4000, 4002, payload),
        }
    }

    fn decoder(mode: Mode) -> Decoder {
        Decoder::init(suite_policy(SsrcSelector::AnyInbound), mode, DEFAULT_RTP_OFFSET, 0).unwrap()
    }

    #[test]
    fn test_classify_rtcp_mux() {
        assert_eq!(classify(Mode::RtcpMux, &[0x80, 72]), PacketKind::Rtcp);
        assert_eq!(classify(Mode::RtcpMux, &[0x80, 72 | 0x80]), PacketKind::Rtcp);
        assert_eq!(classify(Mode::RtcpMux, &[0x80, 200]), PacketKind::Rtcp);
        assert_eq!(classify(Mode::RtcpMux, &[0x80, 96]), PacketKind::Rtp);
        assert_eq!(classify(Mode::RtcpMux, &[0x80, 0x80 | 96]), PacketKind::Rtp);
        assert_eq!(classify(Mode::RtcpMux, &[0x80, 63]), PacketKind::Rtp);
        assert_eq!(classify(Mode::RtcpMux, &[0x80, 64]), PacketKind::Rtcp);
        assert_eq!(classify(Mode::RtcpMux, &[0x80, 95]), PacketKind::Rtcp);
        assert_eq!(classify(Mode::RtcpMux, &[0x80]), PacketKind::Rtp);
        assert_eq!(classify(Mode::RtcpMux, &[]), PacketKind::Rtp);
    }

    #[test]
    fn test_classify_fixed_modes() {
        assert_eq!(classify(Mode::Rtp, &[0x80, 72]), PacketKind::Rtp);
        assert_eq!(classify(Mode::Rtcp, &[0x80, 96]), PacketKind::Rtcp);
    }

    #[test]
    fn test_replayed_frame_counts_as_error() {
        let protector = Protector::new(&suite_policy(SsrcSelector::AnyInbound));
        let srtp = protector.protect_rtp(&rtp_packet(7, 0x1234, &[0x55; 32]), 0);
        let frame = frame_at(0, &srtp);

        let mut dec = decoder(Mode::Rtp);
        let mut out = Vec::new();
        assert_eq!(dec.handle(&frame, &mut out).unwrap(), Outcome::Decoded(PacketKind::Rtp));
        assert_eq!(
            dec.handle(&frame, &mut out).unwrap(),
            Outcome::Failed(PacketKind::Rtp, EngineError::ReplayFail)
        );
        let report = dec.report();
        assert_eq!(report.rtp_count, 1);
        assert_eq!(report.error_count, 1);
    }

    #[test]
    fn test_short_and_non_rtp_frames_are_skipped() {
        let mut dec = decoder(Mode::Rtp);
        let mut out = Vec::new();

        let short = Frame {
            timestamp: Duration::ZERO,
            link_type: LinkType::Ethernet,
            data: vec![0u8; 20],
        };
        assert_eq!(dec.handle(&short, &mut out).unwrap(), Outcome::Skipped);

        let mut not_v2 = rtp_packet(1, 1, &[0; 30]);
        not_v2[0] = 0x40;
        assert_eq!(dec.handle(&frame_at(1, &not_v2), &mut out).unwrap(), Outcome::Skipped);
        assert_eq!(dec.handle(&frame_at(2, &[]), &mut out).unwrap(), Outcome::Skipped);

        assert_eq!(dec.report().error_count, 0);
        assert!(out.is_empty());
        assert_eq!(dec.state(), State::Running);
    }

    #[test]
    fn test_end_to_end_capture() {
        let policy = suite_policy(SsrcSelector::AnyInbound);
        let protector = Protector::new(&policy);
        let mut packets: Vec<Vec<u8>> = (0..3u16)
            .map(|seq| protector.protect_rtp(&rtp_packet(100 + seq, 0xCAFE, &[seq as u8; 24]), 0))
            .collect();
        let last = packets[1].len() - 1;
        packets[1][last] ^= 0xFF;

        let frames: Vec<(Duration, Vec<u8>)> = packets
            .iter()
            .enumerate()
            .map(|(i, p)| {
                (
                    Duration::from_secs(1_700_000_000) + Duration::from_millis(20 * i as u64),
                    udp_frame([10, 0, 0, 1], [10, 0, 0, 2], 4000, 4002, p),
                )
            })
            .collect();
        let reader = CaptureReader::from_reader(Box::new(Cursor::new(pcap_bytes(&frames)))).unwrap();

        let mut dec = Decoder::<SrtpSession>::init(policy, Mode::Rtp, DEFAULT_RTP_OFFSET, 0).unwrap();
        assert_eq!(dec.state(), State::Initialized);
        let mut out = Vec::new();
        for frame in reader {
            dec.handle(&frame.unwrap(), &mut out).unwrap();
        }
        dec.deinit();

        let report = dec.report();
        assert_eq!(report.rtp_count, 2);
        assert_eq!(report.error_count, 1);

        let text = String::from_utf8(out).unwrap();
        let stamps: Vec<&str> = text.lines().filter(|l| l.contains(':')).collect();
        assert_eq!(stamps, vec!["00:00.000000", "00:00.040000"]);
        assert!(text.contains("0000 80 00 00 64 00 00 3e 80 00 00 ca fe 00 00 00 00 \n"));
        assert!(text.contains("0000 80 00 00 66 "));
        assert_eq!(
            report.to_string(),
            "RTP packets decoded: 2\nPacket decode errors: 1"
        );
    }

    #[test]
    fn test_rtcp_mux_session() {
        let policy = suite_policy(SsrcSelector::AnyInbound);
        let protector = Protector::new(&policy);
        let rtp = protector.protect_rtp(&rtp_packet(1, 5, b"audio"), 0);
        let rtcp = protector.protect_rtcp(&rtcp_sender_report(5), 1, true);

        let mut dec = decoder(Mode::RtcpMux);
        let mut out = Vec::new();
        assert_eq!(
            dec.handle(&frame_at(0, &rtp), &mut out).unwrap(),
            Outcome::Decoded(PacketKind::Rtp)
        );
        assert_eq!(
            dec.handle(&frame_at(10, &rtcp), &mut out).unwrap(),
            Outcome::Decoded(PacketKind::Rtcp)
        );
        let report = dec.report();
        assert_eq!((report.rtp_count, report.rtcp_count), (1, 1));
        assert_eq!(
            report.to_string(),
            "RTP packets decoded: 1\nRTCP packets decoded: 1\nPacket decode errors: 0"
        );
    }

    #[test]
    fn test_report_by_mode() {
        let report = Report {
            mode: Mode::Rtcp,
            rtp_count: 3,
            rtcp_count: 2,
            error_count: 0,
        };
        assert_eq!(
            report.to_string(),
            "RTCP packets decoded: 2\nPacket decode errors: 0"
        );
    }

    #[test]
    fn test_roc_requires_specific_ssrc() {
        let result = Decoder::<SrtpSession>::init(
            suite_policy(SsrcSelector::AnyInbound),
            Mode::Rtp,
            DEFAULT_RTP_OFFSET,
            5,
        );
        assert!(matches!(result, Err(DecoderError::RocWithoutSsrc)));
    }

    #[test]
    fn test_roc_is_seeded_for_pinned_ssrc() {
        let policy = suite_policy(SsrcSelector::Specific(0xBEEF));
        let protector = Protector::new(&policy);
        let srtp = protector.protect_rtp(&rtp_packet(9, 0xBEEF, b"late in the call"), 3);

        let mut dec = Decoder::<SrtpSession>::init(policy, Mode::Rtp, DEFAULT_RTP_OFFSET, 3).unwrap();
        let mut out = Vec::new();
        assert_eq!(
            dec.handle(&frame_at(0, &srtp), &mut out).unwrap(),
            Outcome::Decoded(PacketKind::Rtp)
        );
    }

    #[test]
    fn test_handle_after_deinit() {
        let mut dec = decoder(Mode::Rtp);
        dec.deinit();
        dec.deinit();
        assert_eq!(dec.state(), State::Deinitialized);
        let result = dec.handle(&frame_at(0, &[0x80; 40]), &mut Vec::new());
        assert!(matches!(result, Err(DecoderError::Closed)));
        assert_eq!(dec.report().error_count, 0);
    }

    static RELEASED: AtomicUsize = AtomicUsize::new(0);

    struct CountingEngine;

    impl UnprotectEngine for CountingEngine {
        fn create(_policy: &Policy) -> Result<Self, EngineError> {
            Ok(CountingEngine)
        }

        fn set_rollover_counter(&mut self, _ssrc: u32, _roc: u32) -> Result<(), EngineError> {
            Ok(())
        }

        fn unprotect_rtp(&mut self, packet: &mut [u8]) -> Result<usize, EngineError> {
            Ok(packet.len())
        }

        fn unprotect_rtcp(&mut self, _packet: &mut [u8]) -> Result<usize, EngineError> {
            Err(EngineError::AuthFail)
        }
    }

    impl Drop for CountingEngine {
        fn drop(&mut self) {
            RELEASED.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_drop_releases_engine_once() {
        let before = RELEASED.load(Ordering::SeqCst);
        {
            let mut dec = Decoder::<CountingEngine>::init(
                suite_policy(SsrcSelector::AnyInbound),
                Mode::Rtcp,
                DEFAULT_RTP_OFFSET,
                0,
            )
            .unwrap();
            let mut out = Vec::new();
            assert!(matches!(
                dec.handle(&frame_at(0, &[0x80, 200, 0, 1]), &mut out).unwrap(),
                Outcome::Failed(PacketKind::Rtcp, EngineError::AuthFail)
            ));
            dec.deinit();
        }
        assert_eq!(RELEASED.load(Ordering::SeqCst), before + 1);
    }
}
