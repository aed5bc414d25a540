use std::{sync::Arc, time::Duration};

use crate::{alloc::Allocator, io::frame::text};

#[cfg(doc)]
use super::Recv;

/// The streams and quality to request from the source.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Bandwidth {
    /// Full-quality video, audio and metadata.
    #[default]
    Highest,

    /// Low-quality video, audio and metadata.
    Lowest,

    /// Only audio and metadata.
    AudioOnly,

    /// Only metadata.
    MetadataOnly,
}

/// Configuration for the [`Recv`] structure.
#[derive(Debug, Clone)]
pub struct Config {
    /// Receiver name to identify as to the source, defaults to `receiver`.
    pub name: Option<String>,

    /// The streams and quality to request from the source.
    pub bandwidth: Bandwidth,

    /// Color format preference, forwarded to the source as-is.
    pub color: text::ColorFormat,

    /// Count of video frames retained until the oldest is dropped. Set to `0` to disable video streaming.
    pub video_queue: usize,

    /// Count of audio frames retained until the oldest is dropped. Set to `0` to disable audio streaming.
    pub audio_queue: usize,

    /// Count of metadata frames retained until the oldest is dropped.
    pub metadata_queue: usize,

    /// Allocation hooks for the frame buffers, defaults to a [`crate::alloc::Pool`].
    pub allocator: Option<Arc<dyn Allocator>>,

    /// Delay between two connection attempts.
    pub reconnect_interval: Duration,

    /// Time allotted to the source to complete the handshake.
    pub handshake_timeout: Duration,
}

impl Config {
    pub(super) fn quality(&self) -> text::VideoQuality {
        match self.bandwidth {
            Bandwidth::Lowest => text::VideoQuality::Low,
            _ => text::VideoQuality::High,
        }
    }

    pub(super) fn wants_video(&self) -> bool {
        self.video_queue != 0 && matches!(self.bandwidth, Bandwidth::Highest | Bandwidth::Lowest)
    }

    pub(super) fn wants_audio(&self) -> bool {
        self.audio_queue != 0 && self.bandwidth != Bandwidth::MetadataOnly
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: None,
            bandwidth: Default::default(),
            color: Default::default(),
            video_queue: 4,
            audio_queue: 16,
            metadata_queue: 32,
            allocator: None,
            reconnect_interval: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(3),
        }
    }
}
