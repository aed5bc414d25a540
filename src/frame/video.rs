use binrw::{BinRead, BinWrite};
use strum::AsRefStr;

use super::{CompressedPacket, FrameRate, SYNTHESIZE, UNDEFINED};
use crate::{alloc::Ticket, Error, Result};

/// The pixel layout of a [`VideoFrame`], as a _FourCC_.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, BinRead, BinWrite)]
#[strum(serialize_all = "UPPERCASE")]
pub enum VideoFormat {
    /// Packed 4:2:2, 8 bits.
    #[brw(magic = b"UYVY")]
    UYVY,

    /// Packed 4:2:2 followed by an 8 bits alpha plane.
    #[brw(magic = b"UYVA")]
    UYVA,

    /// Semi-planar 4:2:2, 16 bits.
    #[brw(magic = b"P216")]
    P216,

    /// Semi-planar 4:2:2, 16 bits, followed by a 16 bits alpha plane.
    #[brw(magic = b"PA16")]
    PA16,

    /// Planar 4:2:0, V before U.
    #[brw(magic = b"YV12")]
    YV12,

    /// Planar 4:2:0, U before V.
    #[brw(magic = b"I420")]
    I420,

    /// Semi-planar 4:2:0.
    #[brw(magic = b"NV12")]
    NV12,

    #[brw(magic = b"BGRA")]
    BGRA,

    #[brw(magic = b"BGRX")]
    BGRX,

    #[brw(magic = b"RGBA")]
    RGBA,

    #[brw(magic = b"RGBX")]
    RGBX,

    /// SpeedHQ 4:2:2, compressed.
    #[brw(magic = b"SHQ2")]
    SHQ2,

    /// SpeedHQ 4:2:2 with alpha, compressed.
    #[brw(magic = b"SHQ7")]
    SHQ7,

    /// H.264, compressed.
    #[brw(magic = b"H264")]
    H264,

    /// HEVC, compressed.
    #[brw(magic = b"HEVC")]
    HEVC,
}

impl VideoFormat {
    pub fn to_code(&self) -> u32 {
        let mut code = [0u8; 4];
        code.copy_from_slice(&self.as_ref().as_bytes()[..4]);

        u32::from_le_bytes(code)
    }

    /// Whether the payload is an opaque [`CompressedPacket`]-prefixed byte range.
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::SHQ2 | Self::SHQ7 | Self::H264 | Self::HEVC)
    }

    /// Whether the format is a single interleaved plane, where each line is `stride` bytes.
    pub fn is_packed(&self) -> bool {
        matches!(
            self,
            Self::UYVY | Self::BGRA | Self::BGRX | Self::RGBA | Self::RGBX
        )
    }

    /// The natural line stride of the first plane, in bytes.
    pub fn stride(&self, width: u32) -> u32 {
        match self {
            Self::UYVY | Self::UYVA => width * 2,
            Self::P216 | Self::PA16 => width * 2,
            Self::YV12 | Self::I420 | Self::NV12 => width,
            Self::BGRA | Self::BGRX | Self::RGBA | Self::RGBX => width * 4,
            Self::SHQ2 | Self::SHQ7 | Self::H264 | Self::HEVC => 0,
        }
    }

    /// The size of the whole buffer for `height` lines of `stride` bytes, across all planes.
    pub fn buffer_size(&self, stride: u32, height: u32) -> usize {
        let (stride, height) = (stride as usize, height as usize);

        match self {
            Self::UYVY | Self::BGRA | Self::BGRX | Self::RGBA | Self::RGBX => stride * height,
            Self::UYVA => stride * height + stride / 2 * height,
            Self::P216 => stride * height * 2,
            Self::PA16 => stride * height * 3,
            Self::YV12 | Self::I420 | Self::NV12 => stride * height + stride * height / 2,
            Self::SHQ2 | Self::SHQ7 | Self::H264 | Self::HEVC => 0,
        }
    }
}

/// How the lines of a [`VideoFrame`] relate to the video fields.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, BinRead, BinWrite)]
#[brw(repr = u32)]
pub enum FieldMode {
    /// Both fields, interleaved line by line.
    Interleaved = 0,

    /// A full progressive frame.
    #[default]
    Progressive,

    /// The even lines only.
    Field0,

    /// The odd lines only.
    Field1,
}

/// A video frame, along with its timing and format.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: VideoFormat,
    pub frame_rate: FrameRate,

    /// Picture aspect ratio, `0.0` to derive it from the resolution.
    pub aspect_ratio: f32,
    pub field: FieldMode,

    /// Timecode in 100ns ticks, or [`SYNTHESIZE`].
    pub timecode: i64,

    /// Receive time in 100ns ticks since the UNIX epoch, or [`UNDEFINED`].
    pub timestamp: i64,

    /// Line stride of uncompressed data, or total byte size of compressed data.
    pub stride: u32,
    pub data: Vec<u8>,

    /// Per-frame XML metadata.
    pub metadata: Option<String>,

    pub(crate) ticket: Option<Ticket>,
}

impl VideoFrame {
    /// Create a black-zeroed uncompressed frame at its natural stride.
    pub fn new(width: u32, height: u32, format: VideoFormat, frame_rate: FrameRate) -> Self {
        let stride = format.stride(width);

        Self {
            width,
            height,
            format,
            frame_rate,
            aspect_ratio: 0.0,
            field: FieldMode::Progressive,
            timecode: SYNTHESIZE,
            timestamp: UNDEFINED,
            stride,
            data: vec![0; format.buffer_size(stride, height)],
            metadata: None,
            ticket: None,
        }
    }

    /// Create a compressed frame, prefixing `payload` and `extra` with their `packet` header.
    pub fn compressed(
        width: u32,
        height: u32,
        packet: &CompressedPacket,
        payload: &[u8],
        extra: &[u8],
        frame_rate: FrameRate,
    ) -> Result<Self> {
        let format = match &packet.fourcc.to_le_bytes() {
            b"SHQ2" => VideoFormat::SHQ2,
            b"SHQ7" => VideoFormat::SHQ7,
            b"H264" => VideoFormat::H264,
            b"HEVC" => VideoFormat::HEVC,
            code => {
                return Err(Error::InvalidFrame(format!(
                    "unsupported compressed format `{}`",
                    String::from_utf8_lossy(code)
                )))
            }
        };
        let data = packet.pack(payload, extra)?;

        Ok(Self {
            stride: data.len() as u32,
            data,
            ..Self::new(width, height, format, frame_rate)
        })
    }

    /// The aspect ratio, derived from the resolution when unspecified.
    pub fn aspect(&self) -> f32 {
        match self.aspect_ratio {
            ratio if ratio > 0.0 => ratio,
            _ if self.height == 0 => 0.0,
            _ => self.width as f32 / self.height as f32,
        }
    }

    /// Total byte size of the compressed data, an alias of [`VideoFrame::stride`].
    pub fn data_size(&self) -> u32 {
        self.stride
    }

    /// The [`CompressedPacket`] header prefixing the data, for compressed formats.
    pub fn packet(&self) -> Option<CompressedPacket> {
        if !self.format.is_compressed() {
            return None;
        }

        CompressedPacket::parse(&self.data)
            .ok()
            .map(|(packet, ..)| packet)
    }

    /// Whether the frame carries no picture, like before anything was ever received.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    /// Ensure the buffer is large enough for the declared format.
    pub fn validate(&self) -> Result {
        if !self.frame_rate.is_valid() {
            return Err(Error::InvalidFrame(format!(
                "frame rate {}/{} has no cadence",
                self.frame_rate.num, self.frame_rate.den
            )));
        }

        if self.format.is_compressed() {
            CompressedPacket::parse(&self.data[..self.data.len().min(self.stride as usize)])?;

            return Ok(());
        }

        let required = self.format.buffer_size(self.stride, self.height);
        if self.stride < self.format.stride(self.width) || self.data.len() < required {
            return Err(Error::InvalidFrame(format!(
                "{}x{} {} frame needs {required} bytes at stride {}, got {}",
                self.width,
                self.height,
                self.format.as_ref(),
                self.stride,
                self.data.len()
            )));
        }

        Ok(())
    }
}

impl Default for VideoFrame {
    fn default() -> Self {
        Self::new(0, 0, VideoFormat::UYVY, FrameRate::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_layouts() {
        let frame = VideoFrame::new(1920, 1080, VideoFormat::UYVY, FrameRate::default());
        assert_eq!(frame.stride, 3840);
        assert_eq!(frame.data.len(), 3840 * 1080);
        assert!(frame.validate().is_ok());

        let frame = VideoFrame::new(8, 4, VideoFormat::I420, FrameRate::default());
        assert_eq!(frame.data.len(), 8 * 4 * 3 / 2);
    }

    #[test]
    fn short_buffers_are_invalid() {
        let mut frame = VideoFrame::new(4, 4, VideoFormat::BGRA, FrameRate::default());
        frame.data.truncate(10);

        assert!(matches!(frame.validate(), Err(Error::InvalidFrame(_))));
    }

    #[test]
    fn rates_without_cadence_are_invalid() {
        let frame = VideoFrame::new(2, 2, VideoFormat::BGRA, FrameRate::new(0, 0));

        assert!(matches!(frame.validate(), Err(Error::InvalidFrame(_))));
    }

    #[test]
    fn aspect_defaults_to_resolution() {
        let mut frame = VideoFrame::new(1920, 1080, VideoFormat::BGRX, FrameRate::default());
        assert!((frame.aspect() - 16.0 / 9.0).abs() < f32::EPSILON);

        frame.aspect_ratio = 4.0 / 3.0;
        assert!((frame.aspect() - 4.0 / 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn fourcc_codes() {
        assert_eq!(VideoFormat::UYVY.to_code(), u32::from_le_bytes(*b"UYVY"));
        assert_eq!(VideoFormat::HEVC.to_code(), u32::from_le_bytes(*b"HEVC"));
    }

    #[test]
    fn compressed_frames_carry_their_header() {
        let packet = CompressedPacket::new(VideoFormat::H264.to_code(), 10, 5, true);
        let frame =
            VideoFrame::compressed(640, 480, &packet, &[1, 2, 3], &[9], FrameRate::new(25, 1))
                .expect("valid compressed frame");

        assert_eq!(frame.format, VideoFormat::H264);
        assert_eq!(frame.data_size() as usize, frame.data.len());
        assert!(frame.validate().is_ok());

        let header = frame.packet().expect("compressed header");
        assert!(header.is_keyframe());
        assert_eq!((header.data_size, header.extra_size), (3, 1));
    }
}
