//! Capture file reading: pcap and pcapng, optionally gzip-compressed.

pub mod dissect;
pub mod filter;

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use pcap_file::pcap::PcapReader;
use pcap_file::pcapng::{Block, PcapNgReader};
use thiserror::Error;

pub use dissect::LinkType;
pub use filter::{Filter, FilterError};

/// Gzip magic bytes.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("not a pcap or pcapng capture (magic {0:02x?})")]
    UnknownFormat([u8; 4]),
    #[error("capture too short to identify")]
    TooShort,
    #[error("failed to read capture: {0}")]
    Read(#[from] pcap_file::PcapError),
    #[error("packet references unknown pcapng interface {0}")]
    UnknownInterface(u32),
}

/// One captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Capture time since the Unix epoch.
    pub timestamp: Duration,
    pub link_type: LinkType,
    pub data: Vec<u8>,
}

enum Inner {
    Pcap {
        reader: PcapReader<Box<dyn Read>>,
        link_type: LinkType,
    },
    PcapNg {
        reader: PcapNgReader<Box<dyn Read>>,
        interfaces: Vec<LinkType>,
    },
}

/// Sequential reader over the frames of a capture.
pub struct CaptureReader {
    inner: Inner,
    frames: u64,
}

/// Read the first four bytes and hand back a reader that still yields them.
fn sniff(mut reader: Box<dyn Read>) -> Result<([u8; 4], Box<dyn Read>), CaptureError> {
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|_| CaptureError::TooShort)?;
    Ok((magic, Box::new(Cursor::new(magic).chain(reader))))
}

impl CaptureReader {
    /// Open a capture file, or standard input for `-`.
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let source: Box<dyn Read> = if path == Path::new("-") {
            tracing::debug!("reading capture from stdin");
            Box::new(io::stdin().lock())
        } else {
            let file = File::open(path).map_err(|source| CaptureError::Open {
                path: path.to_path_buf(),
                source,
            })?;
            Box::new(file)
        };
        Self::from_reader(source)
    }

    pub fn from_reader(source: Box<dyn Read>) -> Result<Self, CaptureError> {
        let (mut magic, mut source) = sniff(source)?;
        if magic[..2] == GZIP_MAGIC {
            tracing::debug!("capture is gzip-compressed");
            (magic, source) = sniff(Box::new(GzDecoder::new(source)))?;
        }

        let inner = match magic {
            [0xd4, 0xc3, 0xb2, 0xa1]
            | [0xa1, 0xb2, 0xc3, 0xd4]
            | [0x4d, 0x3c, 0xb2, 0xa1]
            | [0xa1, 0xb2, 0x3c, 0x4d] => {
                let reader = PcapReader::new(source)?;
                let link_type = LinkType::from_raw(reader.header().datalink.into());
                tracing::debug!("pcap capture, link type {:?}", link_type);
                Inner::Pcap { reader, link_type }
            }
            [0x0a, 0x0d, 0x0d, 0x0a] => {
                let reader = PcapNgReader::new(source)?;
                tracing::debug!("pcapng capture");
                Inner::PcapNg {
                    reader,
                    interfaces: Vec::new(),
                }
            }
            other => return Err(CaptureError::UnknownFormat(other)),
        };

        Ok(CaptureReader { inner, frames: 0 })
    }

    /// Link type of every frame, when the format fixes it up front.
    /// pcapng declares link types per interface as it goes.
    pub fn link_type(&self) -> Option<LinkType> {
        match &self.inner {
            Inner::Pcap { link_type, .. } => Some(*link_type),
            Inner::PcapNg { .. } => None,
        }
    }

    /// Number of frames returned so far.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Next frame in capture order, or `None` at the end of the capture.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let frame = match &mut self.inner {
            Inner::Pcap { reader, link_type } => match reader.next_packet() {
                None => None,
                Some(packet) => {
                    let packet = packet?;
                    Some(Frame {
                        timestamp: packet.timestamp,
                        link_type: *link_type,
                        data: packet.data.into_owned(),
                    })
                }
            },
            Inner::PcapNg { reader, interfaces } => next_ng_frame(reader, interfaces)?,
        };
        if frame.is_some() {
            self.frames += 1;
        }
        Ok(frame)
    }
}

fn next_ng_frame(
    reader: &mut PcapNgReader<Box<dyn Read>>,
    interfaces: &mut Vec<LinkType>,
) -> Result<Option<Frame>, CaptureError> {
    while let Some(block) = reader.next_block() {
        match block? {
            Block::SectionHeader(_) => interfaces.clear(),
            Block::InterfaceDescription(idb) => {
                let link_type = LinkType::from_raw(idb.linktype.into());
                tracing::debug!("pcapng interface {}: {:?}", interfaces.len(), link_type);
                interfaces.push(link_type);
            }
            Block::EnhancedPacket(epb) => {
                let link_type = *interfaces
                    .get(epb.interface_id as usize)
                    .ok_or(CaptureError::UnknownInterface(epb.interface_id))?;
                return Ok(Some(Frame {
                    timestamp: epb.timestamp,
                    link_type,
                    data: epb.data.into_owned(),
                }));
            }
            Block::SimplePacket(spb) => {
                let link_type = *interfaces.first().ok_or(CaptureError::UnknownInterface(0))?;
                return Ok(Some(Frame {
                    timestamp: Duration::ZERO,
                    link_type,
                    data: spb.data.into_owned(),
                }));
            }
            _ => {}
        }
    }
    Ok(None)
}

impl Iterator for CaptureReader {
    type Item = Result<Frame, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use pcap_file::pcap::{PcapPacket, PcapWriter};

    /// Write an Ethernet pcap holding `frames` as `(timestamp, bytes)`.
    pub(crate) fn pcap_bytes(frames: &[(Duration, Vec<u8>)]) -> Vec<u8> {
        let mut writer = PcapWriter::new(Vec::new()).unwrap();
        for (timestamp, data) in frames {
            let packet = PcapPacket::new(*timestamp, data.len() as u32, data);
            writer.write_packet(&packet).unwrap();
        }
        writer.into_writer()
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use pcap_file::pcapng::blocks::enhanced_packet::EnhancedPacketBlock;
    use pcap_file::pcapng::blocks::interface_description::InterfaceDescriptionBlock;
    use pcap_file::pcapng::PcapNgWriter;
    use pcap_file::DataLink;

    use super::test_support::pcap_bytes;
    use super::*;

    fn sample() -> Vec<(Duration, Vec<u8>)> {
        vec![
            (Duration::from_micros(1_000_000), vec![1u8; 60]),
            (Duration::from_micros(1_020_000), vec![2u8; 61]),
        ]
    }

    fn read_all(bytes: Vec<u8>) -> Vec<Frame> {
        let reader = CaptureReader::from_reader(Box::new(Cursor::new(bytes))).unwrap();
        reader.collect::<Result<Vec<_>, _>>().unwrap()
    }

    #[test]
    fn test_read_pcap() {
        let frames = read_all(pcap_bytes(&sample()));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].timestamp, Duration::from_secs(1));
        assert_eq!(frames[0].link_type, LinkType::Ethernet);
        assert_eq!(frames[1].data, vec![2u8; 61]);
    }

    #[test]
    fn test_read_gzip_pcap() {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&pcap_bytes(&sample())).unwrap();
        let frames = read_all(gz.finish().unwrap());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].timestamp, Duration::from_micros(1_020_000));
    }

    #[test]
    fn test_read_pcapng() {
        let mut writer = PcapNgWriter::new(Vec::new()).unwrap();
        let idb = InterfaceDescriptionBlock {
            linktype: DataLink::ETHERNET,
            snaplen: 0xFFFF,
            options: vec![],
        };
        writer.write_pcapng_block(idb).unwrap();
        for (timestamp, data) in sample() {
            let epb = EnhancedPacketBlock {
                interface_id: 0,
                timestamp,
                original_len: data.len() as u32,
                data: Cow::Owned(data),
                options: vec![],
            };
            writer.write_pcapng_block(epb).unwrap();
        }

        let mut reader =
            CaptureReader::from_reader(Box::new(Cursor::new(writer.into_inner()))).unwrap();
        let first = reader.next_frame().unwrap().unwrap();
        assert_eq!(first.link_type, LinkType::Ethernet);
        assert_eq!(first.data, vec![1u8; 60]);
        assert!(reader.next_frame().unwrap().is_some());
        assert!(reader.next_frame().unwrap().is_none());
        assert_eq!(reader.frame_count(), 2);
    }

    #[test]
    fn test_link_type_known_up_front() {
        let reader =
            CaptureReader::from_reader(Box::new(Cursor::new(pcap_bytes(&sample())))).unwrap();
        assert_eq!(reader.link_type(), Some(LinkType::Ethernet));

        let writer = PcapNgWriter::new(Vec::new()).unwrap();
        let reader =
            CaptureReader::from_reader(Box::new(Cursor::new(writer.into_inner()))).unwrap();
        assert_eq!(reader.link_type(), None);
    }

    #[test]
    fn test_unknown_format() {
        let result = CaptureReader::from_reader(Box::new(Cursor::new(b"hello world".to_vec())));
        assert!(matches!(result, Err(CaptureError::UnknownFormat(_))));
        let result = CaptureReader::from_reader(Box::new(Cursor::new(vec![0xd4])));
        assert!(matches!(result, Err(CaptureError::TooShort)));
    }

    #[test]
    fn test_missing_file() {
        let result = CaptureReader::open(Path::new("/nonexistent/capture.pcap"));
        assert!(matches!(result, Err(CaptureError::Open { .. })));
    }
}
