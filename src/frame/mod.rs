//! The _video_, _audio_ and _metadata_ samples exchanged between peers.
//!
//! Timecodes and timestamps are expressed in ticks of 100ns. A timecode of
//! [`SYNTHESIZE`] asks the sender to generate one, and a timestamp of
//! [`UNDEFINED`] means the receive time is unavailable.

use std::time::Duration;

mod video;
pub use video::{FieldMode, VideoFormat, VideoFrame};

mod audio;
pub use audio::{AudioFormat, AudioFrame};

mod metadata;
pub use metadata::MetadataFrame;

mod packet;
pub use packet::CompressedPacket;

/// Timecode sentinel asking for the timecode to be synthesized on send.
pub const SYNTHESIZE: i64 = i64::MAX;

/// Timestamp sentinel for frames whose receive time is unavailable.
pub const UNDEFINED: i64 = i64::MAX;

/// The count of timecode ticks in a second.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// A frame rate, as a rational `num / den` frames per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Whether the rate describes an actual cadence.
    pub fn is_valid(&self) -> bool {
        self.num != 0 && self.den != 0
    }

    /// Nominal duration of one frame in timecode ticks, rounded to the nearest tick.
    pub fn duration_ticks(&self) -> i64 {
        if !self.is_valid() {
            return 0;
        }

        let num = self.num as i64;

        (TICKS_PER_SECOND * self.den as i64 + num / 2) / num
    }

    /// Nominal duration of one frame.
    pub fn duration(&self) -> Duration {
        if !self.is_valid() {
            return Duration::ZERO;
        }

        Duration::from_nanos(1_000_000_000 * self.den as u64 / self.num as u64)
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::new(30000, 1001)
    }
}

/// Duration of `samples` at `sample_rate`, in timecode ticks.
pub fn samples_to_ticks(samples: usize, sample_rate: u32) -> i64 {
    if sample_rate == 0 {
        return 0;
    }

    (samples as i128 * TICKS_PER_SECOND as i128 / sample_rate as i128) as i64
}

/// The count of samples at `sample_rate` spanning `ticks`, truncated.
pub fn ticks_to_samples(ticks: i64, sample_rate: u32) -> i64 {
    (ticks as i128 * sample_rate as i128 / TICKS_PER_SECOND as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ntsc_frame_duration() {
        let rate = FrameRate::new(30000, 1001);

        assert_eq!(rate.duration_ticks(), 333_667);
        assert_eq!(rate.duration(), Duration::from_nanos(33_366_666));
    }

    #[test]
    fn invalid_rates_have_no_duration() {
        assert_eq!(FrameRate::new(0, 1).duration_ticks(), 0);
        assert_eq!(FrameRate::new(25, 0).duration(), Duration::ZERO);
    }

    #[test]
    fn sample_conversions() {
        assert_eq!(samples_to_ticks(48_000, 48_000), TICKS_PER_SECOND);
        assert_eq!(samples_to_ticks(1, 48_000), 208);
        assert_eq!(ticks_to_samples(TICKS_PER_SECOND / 2, 48_000), 24_000);
    }
}
