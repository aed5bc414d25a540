use std::collections::VecDeque;

use super::Config;
use crate::{
    alloc::Allocator,
    clock,
    frame::{samples_to_ticks, AudioFrame, SYNTHESIZE},
};

const DEFAULT_SAMPLE_RATE: u32 = 48_000;
const DEFAULT_CHANNELS: u32 = 2;

/// Buffering and dynamic resampling of the audio frames of a receiver.
#[derive(Debug)]
pub(super) struct Audio {
    planes: Vec<VecDeque<f32>>,
    sample_rate: u32,

    /// Timecode of the first buffered sample.
    timecode: i64,

    /// Fractional read position in the buffered samples.
    position: f64,

    /// Relative correction of the resampling ratio.
    drift: f64,
}

impl Default for Audio {
    fn default() -> Self {
        Self {
            planes: Vec::new(),
            sample_rate: 0,
            timecode: SYNTHESIZE,
            position: 0.0,
            drift: 0.0,
        }
    }
}

/// Append the samples of `frame` to `planes`, channels the frame lacks are filled with silence.
pub(crate) fn extend(planes: &mut [VecDeque<f32>], frame: &AudioFrame) {
    for (idx, plane) in planes.iter_mut().enumerate() {
        match frame.channel(idx) {
            Some(samples) => plane.extend(samples),
            None => plane.extend(std::iter::repeat(0.0).take(frame.samples as usize)),
        }
    }
}

fn interpolate(plane: &VecDeque<f32>, position: f64) -> f32 {
    let idx = position.floor() as usize;
    let frac = (position - idx as f64) as f32;

    match (plane.get(idx), plane.get(idx + 1)) {
        (Some(a), Some(b)) => a + (b - a) * frac,
        (Some(a), None) => *a,
        _ => 0.0,
    }
}

impl Audio {
    pub fn feed(&mut self, frames: impl Iterator<Item = AudioFrame>, allocator: &dyn Allocator) {
        for frame in frames {
            if frame.format.is_compressed() {
                tracing::warn!(
                    "Discarding `{}` audio, only planar samples can be synchronized",
                    frame.format.as_ref()
                );

                allocator.free(frame.data);
                continue;
            }

            if frame.sample_rate != self.sample_rate || frame.channels as usize != self.planes.len()
            {
                tracing::debug!(
                    "Incoming audio changed to {} channels at {}Hz",
                    frame.channels,
                    frame.sample_rate
                );

                *self = Self {
                    planes: vec![VecDeque::new(); frame.channels as usize],
                    sample_rate: frame.sample_rate,
                    ..Default::default()
                };
            }

            if self.depth() == 0 {
                self.timecode = frame.timecode;
            }

            extend(&mut self.planes, &frame);

            allocator.free(frame.data);
        }
    }

    /// The count of samples buffered in each channel.
    pub fn depth(&self) -> usize {
        self.planes.first().map_or(0, VecDeque::len)
    }

    /// An empty frame describing the incoming format.
    pub fn format(&self) -> AudioFrame {
        AudioFrame::silence(self.sample_rate, self.planes.len() as u32, 0)
    }

    fn correct(&mut self, config: &Config) {
        let target = config.audio_latency.as_secs_f64() * self.sample_rate as f64;
        if target <= 0.0 {
            self.drift = 0.0;

            return;
        }

        let error = (self.depth() as f64 - target) / target;
        self.drift = (self.drift + error * config.drift_gain)
            .clamp(-config.max_drift, config.max_drift);
    }

    pub fn capture(
        &mut self,
        sample_rate: u32,
        channels: u32,
        samples: u32,
        config: &Config,
    ) -> AudioFrame {
        let sample_rate = match (sample_rate, self.sample_rate) {
            (0, 0) => DEFAULT_SAMPLE_RATE,
            (0, detected) => detected,
            (requested, _) => requested,
        };
        let channels = match (channels, self.planes.len()) {
            (0, 0) => DEFAULT_CHANNELS,
            (0, detected) => detected as u32,
            (requested, _) => requested,
        };

        if self.sample_rate == 0 || self.planes.is_empty() {
            return AudioFrame::silence(sample_rate, channels, samples);
        }

        self.correct(config);
        let ratio = self.sample_rate as f64 / sample_rate as f64 * (1.0 + self.drift);

        let planes = (0..channels as usize)
            .map(|channel| {
                // Mono is spread on every channel, missing channels are silent.
                let source = match self.planes.len() {
                    1 => self.planes.first(),
                    _ => self.planes.get(channel),
                };

                match source {
                    Some(plane) => (0..samples as usize)
                        .map(|idx| interpolate(plane, self.position + idx as f64 * ratio))
                        .collect(),
                    None => vec![0.0; samples as usize],
                }
            })
            .collect::<Vec<Vec<f32>>>();

        let end = self.position + samples as f64 * ratio;
        let depth = self.depth();
        let consumed = (end.floor() as usize).min(depth);

        if end.floor() as usize > depth {
            tracing::trace!(
                "Audio underrun, padding {} samples with silence",
                end.floor() as usize - depth
            );

            self.position = 0.0;
        } else {
            self.position = end - consumed as f64;
        }

        for plane in &mut self.planes {
            plane.drain(..consumed.min(plane.len()));
        }

        let timecode = self.timecode;
        self.timecode = self
            .timecode
            .saturating_add(samples_to_ticks(consumed, self.sample_rate));

        let mut frame = if planes.is_empty() {
            AudioFrame::silence(sample_rate, 0, samples)
        } else {
            AudioFrame::from_planes(sample_rate, &planes)
        };
        frame.timecode = timecode;
        frame.timestamp = clock::now_ticks();

        frame
    }
}
