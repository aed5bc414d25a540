use binrw::{BinRead, BinWrite};

use super::FrameKind;
use crate::{
    alloc::Allocator,
    frame::{AudioFormat, AudioFrame},
    io::Packet,
    Result,
};

pub type Block = super::Block<Spec, super::Payload>;

#[derive(Debug, PartialEq, BinRead, BinWrite)]
#[brw(little)]
pub struct Spec {
    pub fourcc: AudioFormat,
    pub samples: u32,
    pub num_channels: u32,
    pub sample_rate: u32,
    pub timecode: i64,
    pub stride: u32,
    pub metadata: binrw::NullString,
}

impl Spec {
    fn of(frame: &AudioFrame, timecode: i64) -> Self {
        Self {
            fourcc: frame.format,
            samples: frame.samples,
            num_channels: frame.channels,
            sample_rate: frame.sample_rate,
            timecode,
            stride: frame.stride,
            metadata: frame.metadata.as_deref().unwrap_or_default().into(),
        }
    }
}

/// Serialize `frame` into a ready-to-send [`Packet`], without an intermediate copy of its data.
pub fn encode(frame: &AudioFrame) -> Result<Vec<u8>> {
    encode_at(frame, frame.timecode)
}

/// Serialize `frame` like [`encode`], with its timecode replaced by `timecode`.
pub fn encode_at(frame: &AudioFrame, timecode: i64) -> Result<Vec<u8>> {
    let mut header = Vec::new();
    Spec::of(frame, timecode).write(&mut std::io::Cursor::new(&mut header))?;

    Packet::encode(FrameKind::Audio, &header, &frame.data)
}

impl Block {
    pub fn from_frame(frame: &AudioFrame) -> Self {
        Self {
            header: Spec::of(frame, frame.timecode),
            data: frame.data.clone().into(),
        }
    }

    /// Convert the block to an [`AudioFrame`] received at `timestamp`, in a buffer from `allocator`.
    pub fn into_frame(self, allocator: &dyn Allocator, timestamp: i64) -> AudioFrame {
        let Self { header, data } = self;

        let mut buffer = allocator.allocate(data.len());
        buffer.extend_from_slice(&data);

        let metadata = (!header.metadata.0.is_empty())
            .then(|| String::from_utf8_lossy(&header.metadata.0).into_owned());

        AudioFrame {
            sample_rate: header.sample_rate,
            channels: header.num_channels,
            samples: header.samples,
            format: header.fourcc,
            timecode: header.timecode,
            timestamp,
            stride: header.stride,
            data: buffer,
            metadata,
            ticket: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Pool;

    #[test]
    fn audio_blocks_keep_the_samples() {
        let mut frame = AudioFrame::from_planes(48_000, &[vec![0.5; 8], vec![-0.5; 8]]);
        frame.timecode = 99;

        let (header, data) = Block::from_frame(&frame).to_raw().expect("encodable block");
        assert_eq!(data, frame.data);

        let received = Block::from_raw(&header, &data)
            .expect("decodable block")
            .into_frame(&Pool::default(), 7);

        assert_eq!(received.timecode, 99);
        assert_eq!(received.timestamp, 7);
        assert_eq!(received.metadata, None);
        assert_eq!(received.planes(), frame.planes());
    }
}
