use std::{collections::VecDeque, time::Duration};

use itertools::Itertools;
use tokio::time::Instant;

use super::Config;
use crate::{
    alloc::Allocator,
    clock,
    frame::{FieldMode, VideoFrame},
};

#[derive(Debug)]
struct Buffered {
    frame: VideoFrame,
    arrival: Instant,
}

/// Time-base correction of the video frames of a receiver.
#[derive(Debug, Default)]
pub(super) struct Video {
    buffer: VecDeque<Buffered>,
    current: Option<VideoFrame>,
    clock: Option<Instant>,
}

fn distance(a: Instant, b: Instant) -> Duration {
    a.max(b) - a.min(b)
}

impl Video {
    pub fn feed(
        &mut self,
        frames: impl Iterator<Item = VideoFrame>,
        depth: usize,
        allocator: &dyn Allocator,
    ) {
        for frame in frames {
            self.buffer.push_back(Buffered {
                arrival: clock::arrival(frame.timestamp),
                frame,
            });
        }

        while self.buffer.len() > depth.max(1) {
            if let Some(stale) = self.buffer.pop_front() {
                allocator.free(stale.frame.data);
            }
        }
    }

    fn period(&self) -> Option<Duration> {
        self.buffer
            .back()
            .map(|buffered| &buffered.frame)
            .or(self.current.as_ref())
            .map(|frame| frame.frame_rate.duration())
            .filter(|period| !period.is_zero())
    }

    /// Advance the virtual clock to `now`, keeping the nominal cadence while the caller stays within the hysteresis.
    fn advance(&mut self, now: Instant, period: Duration, hysteresis: f64) -> Instant {
        let clock = match self.clock {
            Some(clock) if distance(clock + period, now) <= period.mul_f64(hysteresis) => {
                clock + period
            }
            _ => now,
        };

        self.clock = Some(clock);
        clock
    }

    pub fn capture(
        &mut self,
        now: Instant,
        field: FieldMode,
        config: &Config,
        allocator: &dyn Allocator,
    ) -> VideoFrame {
        let chosen = match self.period() {
            Some(period) => {
                let clock = self.advance(now, period, config.hysteresis);

                // The most recent of the frames closest to the virtual clock.
                self.buffer
                    .iter()
                    .rev()
                    .position_min_by_key(|buffered| distance(buffered.arrival, clock))
                    .map(|idx| self.buffer.len() - 1 - idx)
            }
            // Without a cadence to follow, the newest frame is the best match.
            None => self.buffer.len().checked_sub(1),
        };

        if let Some(idx) = chosen {
            for stale in self.buffer.drain(..idx) {
                tracing::trace!("Dropping a video frame to catch up with the caller");

                allocator.free(stale.frame.data);
            }

            if let Some(previous) = self
                .buffer
                .pop_front()
                .and_then(|chosen| self.current.replace(chosen.frame))
            {
                allocator.free(previous.data);
            }
        }

        match &self.current {
            Some(frame) => extract(frame, field),
            None => VideoFrame::default(),
        }
    }
}

/// Extract the lines of the requested `field` from a full packed frame, other frames are left intact.
fn extract(frame: &VideoFrame, field: FieldMode) -> VideoFrame {
    let first = match field {
        FieldMode::Field0 => 0,
        FieldMode::Field1 => 1,
        FieldMode::Progressive | FieldMode::Interleaved => return frame.clone(),
    };

    let stride = frame.stride as usize;
    if stride == 0
        || !frame.format.is_packed()
        || !matches!(frame.field, FieldMode::Progressive | FieldMode::Interleaved)
    {
        return frame.clone();
    }

    let data = frame
        .data
        .chunks_exact(stride)
        .take(frame.height as usize)
        .skip(first)
        .step_by(2)
        .flatten()
        .copied()
        .collect::<Vec<_>>();

    VideoFrame {
        height: (data.len() / stride) as u32,
        field,
        data,
        metadata: frame.metadata.clone(),
        ticket: None,
        ..*frame
    }
}
