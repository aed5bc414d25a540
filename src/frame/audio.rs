use binrw::{BinRead, BinWrite};
use strum::AsRefStr;

use super::{samples_to_ticks, SYNTHESIZE, UNDEFINED};
use crate::{alloc::Ticket, Error, Result};

/// The sample layout of an [`AudioFrame`], as a _FourCC_.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, BinRead, BinWrite)]
#[strum(serialize_all = "UPPERCASE")]
pub enum AudioFormat {
    /// Planar 32 bits float, one plane of `stride` bytes per channel.
    #[default]
    #[brw(magic = b"FLTP")]
    FLTP,

    /// Opus, compressed.
    #[brw(magic = b"OPUS")]
    OPUS,

    /// AAC, compressed.
    #[brw(magic = b"MP4A")]
    MP4A,
}

impl AudioFormat {
    pub fn is_compressed(&self) -> bool {
        !matches!(self, Self::FLTP)
    }
}

/// An audio frame, along with its timing and format.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u32,

    /// The count of samples in each channel.
    pub samples: u32,
    pub format: AudioFormat,

    /// Timecode in 100ns ticks, or [`SYNTHESIZE`].
    pub timecode: i64,

    /// Receive time in 100ns ticks since the UNIX epoch, or [`UNDEFINED`].
    pub timestamp: i64,

    /// Byte stride between channel planes, or total byte size of compressed data.
    pub stride: u32,
    pub data: Vec<u8>,

    /// Per-frame XML metadata.
    pub metadata: Option<String>,

    pub(crate) ticket: Option<Ticket>,
}

impl AudioFrame {
    /// Create a planar frame from one slice of samples per channel.
    ///
    /// All channels are expected to hold the same count of samples, shorter ones are zero-padded.
    pub fn from_planes<P: AsRef<[f32]>>(sample_rate: u32, planes: &[P]) -> Self {
        let samples = planes
            .iter()
            .map(|plane| plane.as_ref().len())
            .max()
            .unwrap_or_default();

        let mut frame = Self::silence(sample_rate, planes.len() as u32, samples as u32);
        for (idx, plane) in planes.iter().enumerate() {
            frame.write_channel(idx, plane.as_ref());
        }

        frame
    }

    /// Create a planar frame of silence.
    pub fn silence(sample_rate: u32, channels: u32, samples: u32) -> Self {
        let stride = samples * 4;

        Self {
            sample_rate,
            channels,
            samples,
            format: AudioFormat::FLTP,
            timecode: SYNTHESIZE,
            timestamp: UNDEFINED,
            stride,
            data: vec![0; stride as usize * channels as usize],
            metadata: None,
            ticket: None,
        }
    }

    /// Duration of the frame, in timecode ticks.
    pub fn duration_ticks(&self) -> i64 {
        samples_to_ticks(self.samples as usize, self.sample_rate)
    }

    /// Decode the samples of channel `idx`, for planar frames.
    pub fn channel(&self, idx: usize) -> Option<Vec<f32>> {
        if self.format.is_compressed() || idx >= self.channels as usize {
            return None;
        }

        let start = idx * self.stride as usize;
        let plane = self.data.get(start..start + self.samples as usize * 4)?;

        Some(
            plane
                .chunks_exact(4)
                .map(|sample| f32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]))
                .collect(),
        )
    }

    /// Decode all the channels, for planar frames.
    pub fn planes(&self) -> Vec<Vec<f32>> {
        (0..self.channels as usize)
            .filter_map(|idx| self.channel(idx))
            .collect()
    }

    pub(crate) fn write_channel(&mut self, idx: usize, samples: &[f32]) {
        let start = idx * self.stride as usize;
        let count = samples.len().min(self.samples as usize);

        if let Some(plane) = self.data.get_mut(start..start + count * 4) {
            for (bytes, sample) in plane.chunks_exact_mut(4).zip(samples) {
                bytes.copy_from_slice(&sample.to_le_bytes());
            }
        }
    }

    /// Ensure the buffer is large enough for the declared format.
    pub fn validate(&self) -> Result {
        if self.sample_rate == 0 && self.channels != 0 {
            return Err(Error::InvalidFrame(format!(
                "{} channels of audio without a sample rate",
                self.channels
            )));
        }

        if self.format.is_compressed() {
            if self.data.len() < self.stride as usize {
                return Err(Error::InvalidFrame(format!(
                    "compressed audio announces {} bytes, got {}",
                    self.stride,
                    self.data.len()
                )));
            }

            return Ok(());
        }

        let plane = self.samples as usize * 4;
        let required = match self.channels as usize {
            0 => 0,
            channels => self.stride as usize * (channels - 1) + plane,
        };

        if (self.stride as usize) < plane || self.data.len() < required {
            return Err(Error::InvalidFrame(format!(
                "{} channels of {} samples need {required} bytes at stride {}, got {}",
                self.channels,
                self.samples,
                self.stride,
                self.data.len()
            )));
        }

        Ok(())
    }
}

impl Default for AudioFrame {
    fn default() -> Self {
        Self::silence(0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planes_are_laid_out_by_stride() {
        let frame = AudioFrame::from_planes(48_000, &[vec![0.5, -0.5], vec![0.25, 1.0]]);

        assert_eq!((frame.channels, frame.samples, frame.stride), (2, 2, 8));
        assert_eq!(frame.data.len(), 16);
        assert_eq!(frame.channel(1), Some(vec![0.25, 1.0]));
        assert_eq!(frame.channel(2), None);
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn short_planes_are_zero_padded() {
        let frame = AudioFrame::from_planes(48_000, &[vec![1.0, 1.0, 1.0], vec![1.0]]);

        assert_eq!(frame.planes(), vec![vec![1.0; 3], vec![1.0, 0.0, 0.0]]);
    }

    #[test]
    fn duration_follows_the_sample_rate() {
        let frame = AudioFrame::silence(48_000, 2, 1600);

        assert_eq!(frame.duration_ticks(), 333_333);
    }

    #[test]
    fn truncated_audio_is_invalid() {
        let mut frame = AudioFrame::silence(48_000, 2, 16);
        frame.data.pop();

        assert!(frame.validate().is_err());
    }

    #[test]
    fn audio_needs_a_sample_rate() {
        assert!(AudioFrame::silence(0, 2, 16).validate().is_err());
        assert!(AudioFrame::default().validate().is_ok());
    }
}
