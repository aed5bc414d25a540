//! The wire transport between a sender and a receiver.
//!
//! Every exchange is a [`Packet`]: a fixed little-endian header announcing the
//! kind of frame it carries and the sizes of its frame header and payload,
//! followed by those two segments.

use binrw::{BinRead, BinWrite};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

mod stream;
pub use stream::{Reader, Stream, Writer};

use frame::{Frame, FrameKind};
pub mod frame;

use crate::{Error, Result};

/// Maximum size of the data segment of a [`Packet`] we accept to read.
pub const MAX_PACKET_SIZE: usize = 64 << 20;

/// The fixed header of a [`Packet`].
#[derive(Debug, Clone, PartialEq, BinRead, BinWrite)]
#[brw(little)]
pub struct Header {
    /// The version of the frame, for retro-compatibility purposes.
    #[br(map(|version: u16| version & 0x7fff))]
    #[bw(map(|version| version | 0x8000))]
    pub version: u16,

    /// The kind of the frame, as a [`FrameKind`] discriminant.
    pub kind: u16,

    /// Size of the header in the data segment.
    pub header_size: u32,

    /// Size of the payload, after the header, in the data segment.
    pub payload_size: u32,
}

impl Header {
    pub const SIZE: usize = 12;
}

#[derive(Debug)]
pub struct Packet {
    pub header: Header,

    /// The frame header followed by the frame payload.
    pub data: Vec<u8>,
}

impl Packet {
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut raw = [0u8; Header::SIZE];
        reader.read_exact(&mut raw).await?;

        let header = Header::read(&mut std::io::Cursor::new(&raw))?;
        let size = header.header_size as usize + header.payload_size as usize;
        if size > MAX_PACKET_SIZE {
            return Err(Error::Oversized(size));
        }

        let mut data = vec![0; size];
        reader.read_exact(&mut data).await?;

        Ok(Self { header, data })
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result {
        let mut raw = Vec::with_capacity(Header::SIZE);
        self.header.write(&mut std::io::Cursor::new(&mut raw))?;

        writer.write_all(&raw).await?;
        writer.write_all(&self.data).await?;

        Ok(())
    }

    /// Serialize a packet of `kind` directly from its segments.
    pub fn encode(kind: FrameKind, header: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
        let mut raw = Vec::with_capacity(Header::SIZE + header.len() + payload.len());

        Header {
            version: kind.version(),
            kind: kind as u16,
            header_size: header.len() as u32,
            payload_size: payload.len() as u32,
        }
        .write(&mut std::io::Cursor::new(&mut raw))?;
        raw.extend_from_slice(header);
        raw.extend_from_slice(payload);

        Ok(raw)
    }

    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let kind = frame.kind();
        let (data, header_size) = frame.encode()?;

        Ok(Self {
            header: Header {
                version: kind.version(),
                kind: kind as u16,
                header_size: header_size as u32,
                payload_size: (data.len() - header_size) as u32,
            },
            data,
        })
    }

    pub fn into_frame(self) -> Result<Frame> {
        let kind = FrameKind::from_repr(self.header.kind)
            .ok_or(Error::UnknownFrameKind(self.header.kind))?;

        Frame::decode(kind, &self.data, self.header.header_size as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        frame::text::{Metadata, Tally},
        *,
    };

    #[tokio::test]
    async fn packets_survive_the_wire() {
        let frame = Metadata::Tally(Tally {
            on_program: true,
            on_preview: false,
        })
        .to_frame()
        .expect("serializable metadata");

        let mut wire = Vec::new();
        Packet::from_frame(&frame)
            .expect("packable frame")
            .write(&mut wire)
            .await
            .expect("writable packet");

        // The version always has its MSB set on the wire.
        assert_eq!(wire[1] & 0x80, 0x80);

        let packet = Packet::read(&mut wire.as_slice())
            .await
            .expect("readable packet");
        assert_eq!(packet.header.version, FrameKind::Text.version());
        assert_eq!(packet.into_frame().expect("valid frame"), frame);
    }

    #[tokio::test]
    async fn oversized_packets_are_refused() {
        let mut wire = Vec::new();
        Header {
            version: 1,
            kind: 0,
            header_size: MAX_PACKET_SIZE as u32,
            payload_size: 1,
        }
        .write(&mut std::io::Cursor::new(&mut wire))
        .expect("writable header");

        assert!(matches!(
            Packet::read(&mut wire.as_slice()).await,
            Err(Error::Oversized(_))
        ));
    }

    #[test]
    fn unknown_kinds_are_refused() {
        let packet = Packet {
            header: Header {
                version: 1,
                kind: 42,
                header_size: 0,
                payload_size: 0,
            },
            data: Vec::new(),
        };

        assert!(matches!(
            packet.into_frame(),
            Err(Error::UnknownFrameKind(42))
        ));
    }
}
