use binrw::{BinRead, BinWrite};

use super::FrameKind;
use crate::{
    alloc::Allocator,
    frame::{FieldMode, FrameRate, VideoFormat, VideoFrame},
    io::Packet,
    Result,
};

pub type Block = super::Block<Spec, super::Payload>;

#[derive(Debug, PartialEq, BinRead, BinWrite)]
#[brw(little)]
pub struct Spec {
    pub fourcc: VideoFormat,
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    pub aspect_ratio: f32,
    pub frame_format: FieldMode,
    pub timecode: i64,
    pub stride: u32,
    pub metadata: binrw::NullString,
}

impl Spec {
    fn of(frame: &VideoFrame, timecode: i64) -> Self {
        Self {
            fourcc: frame.format,
            width: frame.width,
            height: frame.height,
            fps_num: frame.frame_rate.num,
            fps_den: frame.frame_rate.den,
            aspect_ratio: frame.aspect_ratio,
            frame_format: frame.field,
            timecode,
            stride: frame.stride,
            metadata: frame.metadata.as_deref().unwrap_or_default().into(),
        }
    }
}

/// Serialize `frame` into a ready-to-send [`Packet`], without an intermediate copy of its data.
pub fn encode(frame: &VideoFrame) -> Result<Vec<u8>> {
    encode_at(frame, frame.timecode)
}

/// Serialize `frame` like [`encode`], with its timecode replaced by `timecode`.
pub fn encode_at(frame: &VideoFrame, timecode: i64) -> Result<Vec<u8>> {
    let mut header = Vec::new();
    Spec::of(frame, timecode).write(&mut std::io::Cursor::new(&mut header))?;

    Packet::encode(FrameKind::Video, &header, &frame.data)
}

impl Block {
    pub fn from_frame(frame: &VideoFrame) -> Self {
        Self {
            header: Spec::of(frame, frame.timecode),
            data: frame.data.clone().into(),
        }
    }

    /// Convert the block to a [`VideoFrame`] received at `timestamp`, in a buffer from `allocator`.
    pub fn into_frame(self, allocator: &dyn Allocator, timestamp: i64) -> VideoFrame {
        let Self { header, data } = self;

        let mut buffer = allocator.allocate(data.len());
        buffer.extend_from_slice(&data);

        let metadata = (!header.metadata.0.is_empty())
            .then(|| String::from_utf8_lossy(&header.metadata.0).into_owned());

        VideoFrame {
            width: header.width,
            height: header.height,
            format: header.fourcc,
            frame_rate: FrameRate::new(header.fps_num, header.fps_den),
            aspect_ratio: header.aspect_ratio,
            field: header.frame_format,
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
    use crate::{alloc::Pool, io::frame::Frame};

    #[tokio::test]
    async fn video_blocks_keep_the_frame_description() {
        let mut frame = VideoFrame::new(4, 2, VideoFormat::BGRA, FrameRate::new(50, 1));
        frame.timecode = 1234;
        frame.field = FieldMode::Interleaved;
        frame.metadata = Some("<hello/>".into());
        frame.data.iter_mut().enumerate().for_each(|(idx, byte)| *byte = idx as u8);

        let raw = encode(&frame).expect("encodable frame");
        let packet = Packet::read(&mut raw.as_slice())
            .await
            .expect("readable packet");

        let Frame::Video(block) = packet.into_frame().expect("decodable frame") else {
            panic!("expected a video frame");
        };
        assert_eq!(block, Block::from_frame(&frame));

        let received = block.into_frame(&Pool::default(), 42);
        assert_eq!(received.timestamp, 42);
        assert_eq!(received.metadata.as_deref(), Some("<hello/>"));
        assert_eq!(
            VideoFrame {
                timestamp: frame.timestamp,
                ..received
            },
            frame
        );
    }
}
