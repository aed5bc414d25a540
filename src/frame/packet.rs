use binrw::{BinRead, BinWrite};

use crate::{Error, Result};

/// The header prefixing compressed payloads, which codec collaborators depend on byte for byte.
///
/// The layout is packed little-endian, and `version` holds the header size:
/// the payload always begins at `base + version`, which lets the header grow
/// without breaking older readers.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct CompressedPacket {
    /// The size of this header in bytes.
    pub version: i32,

    /// The _FourCC_ of the compressed payload.
    pub fourcc: u32,

    /// Presentation timestamp, in 100ns ticks.
    pub pts: i64,

    /// Decode timestamp, in 100ns ticks.
    pub dts: i64,

    pub reserved: u64,

    /// A combination of the `FLAG_*` bits.
    pub flags: u32,

    /// Size of the compressed payload following the header.
    pub data_size: u32,

    /// Size of the codec ancillary data following the payload.
    pub extra_size: u32,
}

impl CompressedPacket {
    /// Size of the header as written by this version of the crate.
    pub const SIZE: usize = 44;

    /// The payload can be decoded on its own.
    pub const FLAG_KEYFRAME: u32 = 1;

    pub fn new(fourcc: u32, pts: i64, dts: i64, keyframe: bool) -> Self {
        Self {
            version: Self::SIZE as i32,
            fourcc,
            pts,
            dts,
            reserved: 0,
            flags: if keyframe { Self::FLAG_KEYFRAME } else { 0 },
            data_size: 0,
            extra_size: 0,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        self.flags & Self::FLAG_KEYFRAME != 0
    }

    /// Read the header at the start of `bytes`, returning it with the payload and ancillary data.
    pub fn parse(bytes: &[u8]) -> Result<(Self, &[u8], &[u8])> {
        if bytes.len() < Self::SIZE {
            return Err(Error::InvalidFrame(format!(
                "compressed packet of {} bytes is shorter than its header",
                bytes.len()
            )));
        }

        let packet = Self::read(&mut std::io::Cursor::new(bytes))?;

        let start = usize::try_from(packet.version)
            .ok()
            .filter(|start| *start >= Self::SIZE)
            .ok_or_else(|| {
                Error::InvalidFrame(format!("invalid packet header size {}", packet.version))
            })?;
        let middle = start + packet.data_size as usize;
        let end = middle + packet.extra_size as usize;

        if bytes.len() < end {
            return Err(Error::InvalidFrame(format!(
                "compressed packet announces {end} bytes, got {}",
                bytes.len()
            )));
        }

        Ok((packet, &bytes[start..middle], &bytes[middle..end]))
    }

    /// Write the header followed by `payload` and `extra`, fixing up the sizes.
    pub fn pack(&self, payload: &[u8], extra: &[u8]) -> Result<Vec<u8>> {
        let packet = Self {
            version: Self::SIZE as i32,
            data_size: payload.len() as u32,
            extra_size: extra.len() as u32,
            ..self.clone()
        };

        let mut data = Vec::with_capacity(Self::SIZE + payload.len() + extra.len());
        packet.write(&mut std::io::Cursor::new(&mut data))?;
        data.extend_from_slice(payload);
        data.extend_from_slice(extra);

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_packed() {
        let packet = CompressedPacket::new(u32::from_le_bytes(*b"H264"), 0x0102, 0x0304, true);
        let data = packet.pack(&[0xaa; 3], &[]).expect("packing");

        assert_eq!(data.len(), CompressedPacket::SIZE + 3);
        assert_eq!(&data[0..4], &44i32.to_le_bytes());
        assert_eq!(&data[4..8], b"H264");
        assert_eq!(&data[8..16], &0x0102i64.to_le_bytes());
        assert_eq!(&data[16..24], &0x0304i64.to_le_bytes());
        assert_eq!(&data[24..32], &[0u8; 8]);
        assert_eq!(&data[32..36], &1u32.to_le_bytes());
        assert_eq!(&data[36..40], &3u32.to_le_bytes());
        assert_eq!(&data[40..44], &0u32.to_le_bytes());
    }

    #[test]
    fn larger_headers_are_skipped() {
        let packet = CompressedPacket::new(u32::from_le_bytes(*b"HEVC"), 0, 0, false);
        let mut data = packet.pack(&[], &[]).expect("packing");

        // A future header with 4 more bytes, and a 2 bytes payload.
        data[0..4].copy_from_slice(&48i32.to_le_bytes());
        data[36..40].copy_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&[0xff; 4]);
        data.extend_from_slice(&[7, 8]);

        let (header, payload, extra) = CompressedPacket::parse(&data).expect("parsing");
        assert_eq!(header.version, 48);
        assert_eq!(payload, &[7u8, 8]);
        assert!(extra.is_empty());
    }

    #[test]
    fn truncated_packets_are_rejected() {
        let packet = CompressedPacket::new(u32::from_le_bytes(*b"H264"), 0, 0, true);
        let data = packet.pack(&[1, 2, 3, 4], &[5]).expect("packing");

        assert!(CompressedPacket::parse(&data[..data.len() - 1]).is_err());
        assert!(CompressedPacket::parse(&data[..10]).is_err());
    }
}
