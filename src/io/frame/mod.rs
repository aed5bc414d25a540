//! The frames carried by [`Packet`](super::Packet)s, one per stream type.

use derive_more::From;
use strum::{EnumDiscriminants, FromRepr};

use crate::{Error, Result};

mod block;
pub use block::{Block, Payload};

pub mod audio;
pub mod text;
pub mod video;

#[derive(Debug, PartialEq, From, EnumDiscriminants)]
#[strum_discriminants(name(FrameKind))]
#[strum_discriminants(derive(FromRepr, Hash))]
#[strum_discriminants(repr(u16))]
pub enum Frame {
    Video(video::Block),
    Audio(audio::Block),
    Text(text::Block),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        self.into()
    }

    /// Decode a frame of `kind` from a data segment starting with `header_size` bytes of frame header.
    pub fn decode(kind: FrameKind, segment: &[u8], header_size: usize) -> Result<Self> {
        if header_size > segment.len() {
            return Err(Error::InvalidFrame(format!(
                "{header_size} bytes of header in a segment of {}",
                segment.len()
            )));
        }
        let (header, payload) = segment.split_at(header_size);

        Ok(match kind {
            FrameKind::Video => Self::Video(Block::from_raw(header, payload)?),
            FrameKind::Audio => Self::Audio(Block::from_raw(header, payload)?),
            FrameKind::Text => Self::Text(Block::from_raw(header, payload)?),
        })
    }

    /// Encode the frame into a data segment, along with the size of its frame header.
    pub fn encode(&self) -> Result<(Vec<u8>, usize)> {
        let (mut header, mut payload) = match self {
            Self::Video(block) => block.to_raw()?,
            Self::Audio(block) => block.to_raw()?,
            Self::Text(block) => block.to_raw()?,
        };
        let header_size = header.len();

        header.append(&mut payload);

        Ok((header, header_size))
    }

    /// The `ndi_version` greeting.
    pub fn version() -> Result<Self> {
        text::Metadata::Version(Default::default()).to_frame()
    }

    /// The `ndi_identify` greeting, under the local host name.
    pub fn identify(name: &str) -> Result<Self> {
        text::Metadata::Identify(text::Identify {
            name: crate::name(name),
        })
        .to_frame()
    }

    /// The video preferences of a receiver.
    pub fn video_meta(quality: text::VideoQuality, color: text::ColorFormat) -> Result<Self> {
        text::Metadata::Video(text::Video {
            quality,
            color: Some(color),
        })
        .to_frame()
    }

    /// The streams a receiver wants, metadata is always enabled.
    pub fn enabled_streams(video: bool, audio: bool) -> Result<Self> {
        text::Metadata::EnabledStreams(text::EnabledStreams {
            video,
            audio,
            text: true,
        })
        .to_frame()
    }
}

impl FrameKind {
    /// The revision of the frame layout we speak, announced in every packet.
    pub fn version(&self) -> u16 {
        match self {
            Self::Video => 4,
            Self::Audio => 3,
            Self::Text => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{text::Metadata, *};

    #[test]
    fn greetings_are_control_messages() {
        let Frame::Text(block) = Frame::enabled_streams(false, true).expect("valid greeting")
        else {
            panic!("greetings are text frames");
        };

        assert_eq!(
            Metadata::from_block(&block).expect("a control message"),
            Metadata::EnabledStreams(text::EnabledStreams {
                text: true,
                video: false,
                audio: true,
            })
        );
    }

    #[test]
    fn segments_split_at_the_header() {
        let frame = Frame::version().expect("valid greeting");
        let (segment, header_size) = frame.encode().expect("encodable frame");

        assert_eq!(header_size, 8);
        assert_eq!(
            Frame::decode(frame.kind(), &segment, header_size).expect("decodable frame"),
            frame
        );
        assert!(matches!(
            Frame::decode(FrameKind::Text, &segment, segment.len() + 1),
            Err(Error::InvalidFrame(_))
        ));
    }
}
