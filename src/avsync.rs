//! Retrieval of the audio matching a video frame, from the audio received by a [`Recv`].

use std::{collections::VecDeque, sync::Mutex, time::Duration};

use crate::{
    alloc::Allocator,
    clock,
    frame::{samples_to_ticks, ticks_to_samples, AudioFrame, VideoFrame, SYNTHESIZE},
    framesync,
    recv::Recv,
};

/// The outcome of [`AvSync::synchronize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvSyncStatus {
    /// The audio frame was filled with the requested count of samples.
    Success,

    /// The audio frame was filled with fewer samples than requested, as the
    /// requested count would have run past the received audio.
    SuccessCountAdjusted,

    /// No audio was ever received.
    NoAudioStream,

    /// The received audio does not cover the video frame, yet or anymore.
    NoMatchFound,

    /// The format of the audio frame was updated to the received one and
    /// no samples were filled, the call must be issued again.
    FormatChanged,

    /// The video frame carries no timecode to synchronize on.
    InternalError,
}

/// Configuration for the [`AvSync`] structure.
#[derive(Debug, Clone)]
pub struct Config {
    /// Timing error tolerated between the video frame and the audio.
    pub tolerance: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tolerance: Duration::from_millis(2),
        }
    }
}

#[derive(Debug)]
struct Buffer {
    planes: Vec<VecDeque<f32>>,
    sample_rate: u32,

    /// Timecode of the first buffered sample.
    timecode: i64,
}

impl Default for Buffer {
    fn default() -> Self {
        Self {
            planes: Vec::new(),
            sample_rate: 0,
            timecode: SYNTHESIZE,
        }
    }
}

impl Buffer {
    fn depth(&self) -> usize {
        self.planes.first().map_or(0, VecDeque::len)
    }

    fn end(&self) -> i64 {
        self.timecode + samples_to_ticks(self.depth(), self.sample_rate)
    }

    fn feed(&mut self, frame: AudioFrame, tolerance: i64, allocator: &dyn Allocator) {
        if frame.format.is_compressed() || frame.timecode == SYNTHESIZE {
            tracing::warn!(
                "Discarding `{}` audio without a timecode, or not planar",
                frame.format.as_ref()
            );
        } else {
            let reformat = frame.sample_rate != self.sample_rate
                || frame.channels as usize != self.planes.len();

            if reformat || self.depth() == 0 || (frame.timecode - self.end()).abs() > tolerance {
                if !reformat && self.depth() != 0 {
                    tracing::debug!("Audio discontinuity, dropping {} samples", self.depth());
                }

                *self = Self {
                    planes: vec![VecDeque::new(); frame.channels as usize],
                    sample_rate: frame.sample_rate,
                    timecode: frame.timecode,
                };
            }

            framesync::extend(&mut self.planes, &frame);
        }

        allocator.free(frame.data);
    }

    fn drop_front(&mut self, count: usize) {
        let count = count.min(self.depth());

        for plane in &mut self.planes {
            plane.drain(..count.min(plane.len()));
        }
        self.timecode += samples_to_ticks(count, self.sample_rate);
    }
}

/// Aligns the audio of a [`Recv`] on the video frames it delivers.
///
/// The synchronizer takes over the audio queue of the receiver.
#[derive(Debug)]
pub struct AvSync<'r> {
    recv: &'r Recv,
    config: Config,
    buffer: Mutex<Buffer>,
}

impl<'r> AvSync<'r> {
    pub fn new(recv: &'r Recv) -> Self {
        Self::with_config(recv, Default::default())
    }

    pub fn with_config(recv: &'r Recv, config: Config) -> Self {
        Self {
            recv,
            config,
            buffer: Default::default(),
        }
    }

    /// Fill `audio` with the received samples starting at the timecode of `video`, without waiting.
    ///
    /// The count of samples requested is `audio.samples`, and the sample rate and channel
    /// count of `audio` must match the received ones, otherwise they are updated and
    /// [`AvSyncStatus::FormatChanged`] is returned. A zero sample count is updated to
    /// the duration of `video`.
    pub fn synchronize(&self, video: &VideoFrame, audio: &mut AudioFrame) -> AvSyncStatus {
        let mut buffer = crate::lock(&self.buffer);
        let tolerance = (self.config.tolerance.as_nanos() / 100) as i64;

        for frame in self.recv.audio_frames().try_iter() {
            buffer.feed(frame, tolerance, self.recv.allocator());
        }

        if buffer.sample_rate == 0 || buffer.planes.is_empty() {
            return AvSyncStatus::NoAudioStream;
        }

        if video.timecode == SYNTHESIZE {
            return AvSyncStatus::InternalError;
        }

        if audio.format.is_compressed()
            || audio.sample_rate != buffer.sample_rate
            || audio.channels as usize != buffer.planes.len()
            || audio.samples == 0
        {
            let samples = match audio.samples {
                0 => {
                    ticks_to_samples(video.frame_rate.duration_ticks(), buffer.sample_rate) as u32
                }
                samples => samples,
            };

            *audio = AudioFrame::silence(buffer.sample_rate, buffer.planes.len() as u32, samples);

            return AvSyncStatus::FormatChanged;
        }

        let tolerance_samples = ticks_to_samples(tolerance, buffer.sample_rate);
        let offset = ticks_to_samples(video.timecode - buffer.timecode, buffer.sample_rate);

        if offset < -tolerance_samples {
            return AvSyncStatus::NoMatchFound;
        }
        if offset > tolerance_samples {
            tracing::trace!("Dropping {offset} samples of audio older than the video");

            buffer.drop_front(offset as usize);
        }

        let requested = audio.samples as usize;
        let depth = buffer.depth();
        let (count, status) = if depth >= requested {
            (requested, AvSyncStatus::Success)
        } else if depth > 0 && (requested - depth) as i64 <= tolerance_samples {
            (depth, AvSyncStatus::SuccessCountAdjusted)
        } else {
            return AvSyncStatus::NoMatchFound;
        };

        let planes = buffer
            .planes
            .iter()
            .map(|plane| plane.iter().take(count).copied().collect::<Vec<_>>())
            .collect::<Vec<_>>();

        *audio = AudioFrame::from_planes(buffer.sample_rate, &planes);
        audio.timecode = buffer.timecode;
        audio.timestamp = clock::now_ticks();

        buffer.drop_front(count);

        status
    }
}
