//! Conversion of the frames pushed by a [`Recv`] into frames pulled at the caller's own cadence.
//!
//! Video goes through a time-base corrector, repeating or dropping frames to follow
//! the caller, and audio through a dynamic resampler, which keeps a steady output
//! rate when the source clock drifts from the local one. Neither ever waits.

use std::{sync::Mutex, time::Duration};

use tokio::time::Instant;

use crate::{
    alloc::Ledger,
    frame::{AudioFrame, FieldMode, VideoFrame},
    recv::Recv,
    Result,
};

mod audio;
mod video;

pub(crate) use audio::extend;

/// Configuration for the [`FrameSync`] structure.
#[derive(Debug, Clone)]
pub struct Config {
    /// Fraction of a frame period by which the caller cadence may deviate
    /// from the nominal one before the time-base is realigned on the local clock.
    pub hysteresis: f64,

    /// Count of video frames buffered for selection.
    pub video_depth: usize,

    /// Audio latency the resampler converges to.
    pub audio_latency: Duration,

    /// Gain of the resampling ratio correction, per unit of relative latency error.
    pub drift_gain: f64,

    /// Bound of the resampling ratio correction.
    pub max_drift: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hysteresis: 0.5,
            video_depth: 4,
            audio_latency: Duration::from_millis(50),
            drift_gain: 0.0001,
            max_drift: 0.005,
        }
    }
}

/// A pull model over the _video_ and _audio_ frames of a [`Recv`].
///
/// The frame synchronizer takes over the video and audio queues of the receiver,
/// which remains usable for metadata and control operations.
#[derive(Debug)]
pub struct FrameSync<'r> {
    recv: &'r Recv,
    config: Config,
    ledger: Ledger,

    video: Mutex<video::Video>,
    audio: Mutex<audio::Audio>,
}

impl<'r> FrameSync<'r> {
    pub fn new(recv: &'r Recv) -> Self {
        Self::with_config(recv, Default::default())
    }

    pub fn with_config(recv: &'r Recv, config: Config) -> Self {
        Self {
            recv,
            config,
            ledger: Ledger::new(),
            video: Default::default(),
            audio: Default::default(),
        }
    }

    /// The video frame best matching the current time, restricted to `field` when a single field is requested.
    ///
    /// This repeats the previous frame when no newer one is due, and returns an empty
    /// frame when nothing was ever received.
    pub fn capture_video(&self, field: FieldMode) -> VideoFrame {
        let mut video = crate::lock(&self.video);

        video.feed(
            self.recv.video_frames().try_iter(),
            self.config.video_depth,
            self.recv.allocator(),
        );
        let mut frame = video.capture(Instant::now(), field, &self.config, self.recv.allocator());

        frame.ticket = Some(self.ledger.issue());
        frame
    }

    /// `samples` of audio at `sample_rate` over `channels`, padded with silence if not enough was received.
    ///
    /// A zero `sample_rate` or `channels` selects the incoming one. When all three are
    /// zero, this returns an empty frame describing the incoming format without consuming any audio.
    pub fn capture_audio(&self, sample_rate: u32, channels: u32, samples: u32) -> AudioFrame {
        let mut audio = crate::lock(&self.audio);

        audio.feed(self.recv.audio_frames().try_iter(), self.recv.allocator());
        let mut frame = match (sample_rate, channels, samples) {
            (0, 0, 0) => audio.format(),
            _ => audio.capture(sample_rate, channels, samples, &self.config),
        };

        frame.ticket = Some(self.ledger.issue());
        frame
    }

    /// The count of samples per channel buffered for [`FrameSync::capture_audio`].
    pub fn audio_queue_depth(&self) -> usize {
        crate::lock(&self.audio).depth()
    }

    /// Give back a frame obtained from [`FrameSync::capture_video`].
    pub fn free_video(&self, frame: VideoFrame) -> Result {
        self.ledger.redeem(frame.ticket)
    }

    /// Give back a frame obtained from [`FrameSync::capture_audio`].
    pub fn free_audio(&self, frame: AudioFrame) -> Result {
        self.ledger.redeem(frame.ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::now_ticks,
        frame::{FrameRate, VideoFormat, TICKS_PER_SECOND},
        Error,
    };

    const NTSC: FrameRate = FrameRate::new(30000, 1001);

    fn recv() -> Recv {
        Recv::new(Default::default()).expect("created within a runtime")
    }

    fn video(marker: u8, age: i64) -> VideoFrame {
        let mut frame = VideoFrame::new(2, 4, VideoFormat::BGRA, NTSC);
        frame.data.fill(marker);
        frame.timestamp = now_ticks() - age;

        frame
    }

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|idx| idx as f32).collect()
    }

    fn exact() -> Config {
        Config {
            drift_gain: 0.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn nothing_received_yields_an_empty_frame() {
        let recv = recv();
        let sync = FrameSync::new(&recv);

        let frame = sync.capture_video(FieldMode::Progressive);
        assert!(frame.is_empty());

        let copy = frame.clone();
        sync.free_video(frame).expect("captured frame");
        assert!(matches!(sync.free_video(copy), Err(Error::NotCaptured)));
    }

    #[tokio::test]
    async fn frames_are_repeated_until_a_newer_one_arrives() {
        let recv = recv();
        let sync = FrameSync::new(&recv);

        recv.push_video(video(7, 0));
        let first = sync.capture_video(FieldMode::Progressive);
        let second = sync.capture_video(FieldMode::Progressive);
        assert_eq!(first.data, second.data);
        assert!(first.data.iter().all(|byte| *byte == 7));

        recv.push_video(video(9, 0));
        let third = sync.capture_video(FieldMode::Progressive);
        assert!(third.data.iter().all(|byte| *byte == 9));
    }

    #[tokio::test]
    async fn late_callers_skip_to_the_latest_frame() {
        let recv = recv();
        let sync = FrameSync::new(&recv);

        let period = NTSC.duration_ticks();
        for (marker, frames_ago) in [(1, 3), (2, 2), (3, 1), (4, 0)] {
            recv.push_video(video(marker, period * frames_ago));
        }

        let frame = sync.capture_video(FieldMode::Progressive);
        assert!(frame.data.iter().all(|byte| *byte == 4));
    }

    #[tokio::test]
    async fn frames_without_cadence_are_still_delivered() {
        let recv = recv();
        let sync = FrameSync::new(&recv);

        let mut frame = VideoFrame::new(2, 2, VideoFormat::BGRA, FrameRate::new(0, 0));
        frame.data.fill(5);
        recv.push_video(frame);

        let first = sync.capture_video(FieldMode::Progressive);
        assert!(!first.is_empty());
        assert!(first.data.iter().all(|byte| *byte == 5));

        let repeated = sync.capture_video(FieldMode::Progressive);
        assert_eq!(repeated.data, first.data);
    }

    #[tokio::test]
    async fn single_fields_are_extracted_from_full_frames() {
        let recv = recv();
        let sync = FrameSync::new(&recv);

        let mut frame = video(0, 0);
        for (line, bytes) in frame.data.chunks_exact_mut(8).enumerate() {
            bytes.fill(line as u8);
        }
        recv.push_video(frame);

        let field = sync.capture_video(FieldMode::Field1);
        assert_eq!(field.height, 2);
        assert_eq!(field.field, FieldMode::Field1);
        assert_eq!(field.data, [[1u8; 8], [3u8; 8]].concat());
    }

    #[tokio::test]
    async fn silence_is_returned_before_any_audio() {
        let recv = recv();
        let sync = FrameSync::new(&recv);

        let frame = sync.capture_audio(48_000, 2, 480);
        assert_eq!((frame.sample_rate, frame.channels, frame.samples), (48_000, 2, 480));
        assert!(frame.planes().iter().flatten().all(|sample| *sample == 0.0));
    }

    #[tokio::test]
    async fn format_queries_do_not_consume_audio() {
        let recv = recv();
        let sync = FrameSync::new(&recv);

        recv.push_audio(AudioFrame::from_planes(44_100, &[ramp(441), ramp(441)]));

        let format = sync.capture_audio(0, 0, 0);
        assert_eq!((format.sample_rate, format.channels, format.samples), (44_100, 2, 0));
        assert_eq!(sync.audio_queue_depth(), 441);
    }

    #[tokio::test]
    async fn matching_rates_pass_samples_through() {
        let recv = recv();
        let sync = FrameSync::with_config(&recv, exact());

        let mut frame = AudioFrame::from_planes(48_000, &[ramp(960), ramp(960)]);
        frame.timecode = 0;
        recv.push_audio(frame);

        let first = sync.capture_audio(48_000, 2, 480);
        assert_eq!(first.planes(), vec![ramp(480), ramp(480)]);
        assert_eq!(first.timecode, 0);
        assert_eq!(sync.audio_queue_depth(), 480);

        let second = sync.capture_audio(48_000, 2, 480);
        assert_eq!(second.channel(0).map(|plane| plane[0]), Some(480.0));
        assert_eq!(second.timecode, TICKS_PER_SECOND / 100);
    }

    #[tokio::test]
    async fn audio_is_resampled_and_remapped() {
        let recv = recv();
        let sync = FrameSync::with_config(&recv, exact());

        recv.push_audio(AudioFrame::from_planes(48_000, &[ramp(960)]));

        let frame = sync.capture_audio(24_000, 2, 240);
        let expected = (0..240).map(|idx| (idx * 2) as f32).collect::<Vec<_>>();
        assert_eq!(frame.planes(), vec![expected.clone(), expected]);
        assert_eq!(sync.audio_queue_depth(), 480);
    }

    #[tokio::test]
    async fn truncated_channels_are_filled_with_silence() {
        let recv = recv();
        let sync = FrameSync::with_config(&recv, exact());

        let mut frame = AudioFrame::from_planes(48_000, &[vec![0.5; 480], vec![0.5; 480]]);
        frame.data.truncate(1920 + 100);
        recv.push_audio(frame);

        let captured = sync.capture_audio(48_000, 2, 480);
        assert_eq!(captured.planes(), vec![vec![0.5; 480], vec![0.0; 480]]);
        assert_eq!(sync.audio_queue_depth(), 0);

        let drained = sync.capture_audio(48_000, 2, 480);
        assert_eq!(drained.samples, 480);
    }

    #[tokio::test]
    async fn underruns_are_padded_with_silence() {
        let recv = recv();
        let sync = FrameSync::with_config(&recv, exact());

        recv.push_audio(AudioFrame::from_planes(48_000, &[ramp(100)]));

        let frame = sync.capture_audio(48_000, 1, 480);
        let plane = frame.channel(0).expect("planar audio");
        assert_eq!(&plane[..100], ramp(100).as_slice());
        assert!(plane[100..].iter().all(|sample| *sample == 0.0));
        assert_eq!(sync.audio_queue_depth(), 0);
    }

    #[tokio::test]
    async fn drift_correction_stays_bounded() {
        let recv = recv();
        let sync = FrameSync::with_config(
            &recv,
            Config {
                drift_gain: 1.0,
                ..Default::default()
            },
        );

        recv.push_audio(AudioFrame::from_planes(48_000, &[vec![0.25; 48_000]]));
        for _ in 0..10 {
            let frame = sync.capture_audio(48_000, 1, 480);
            assert_eq!(frame.samples, 480);
        }

        let consumed = 48_000 - sync.audio_queue_depth();
        assert!((4800..=4800 + 4800 / 200 + 1).contains(&consumed), "{consumed}");
    }
}
