//! Resolution of frame timecodes, and pacing of frame submission.
//!
//! A timecode is either explicit, or [`SYNTHESIZE`]. Synthesized timecodes of a
//! stream continue the progression of its last timecode, explicit or not, and
//! the first synthesized timecode of a stream is aligned on the timeline shared
//! by all the streams of a sender, or on the wall-clock if nothing was sent yet.

use std::time::Duration;

use tokio::time::Instant;

use crate::frame::{
    samples_to_ticks, AudioFrame, FrameRate, MetadataFrame, VideoFrame, SYNTHESIZE,
    TICKS_PER_SECOND, UNDEFINED,
};

/// The current wall-clock time, in ticks of 100ns since the UNIX epoch.
pub fn now_ticks() -> i64 {
    chrono::Utc::now().timestamp_micros() * 10
}

/// The instant a frame received at the wall-clock `timestamp` arrived, or now if it is undefined.
pub(crate) fn arrival(timestamp: i64) -> Instant {
    let now = Instant::now();

    match timestamp {
        UNDEFINED => now,
        timestamp => {
            let age = Duration::from_nanos((now_ticks() - timestamp).max(0) as u64 * 100);

            now.checked_sub(age).unwrap_or(now)
        }
    }
}

fn duration_to_ticks(duration: Duration) -> i64 {
    (duration.as_nanos() / 100) as i64
}

/// The unit a stream progresses by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Frames(FrameRate),
    Samples(u32),
}

impl Unit {
    fn ticks(&self, count: i64) -> i64 {
        match self {
            Self::Frames(rate) => count * rate.duration_ticks(),
            Self::Samples(rate) => samples_to_ticks(count as usize, *rate),
        }
    }

    /// The count of units spanning `ticks`, rounded to the nearest.
    fn count(&self, ticks: i64) -> i64 {
        match self {
            Self::Frames(rate) => match rate.duration_ticks() {
                0 => 0,
                duration => (ticks + duration / 2) / duration,
            },
            Self::Samples(rate) => {
                let rate = *rate as i128;

                ((ticks as i128 * rate + TICKS_PER_SECOND as i128 / 2) / TICKS_PER_SECOND as i128)
                    as i64
            }
        }
    }
}

/// The progression of one stream, as an `origin` plus a count of elapsed units.
#[derive(Debug, Clone, Copy)]
struct Track {
    origin: i64,
    elapsed: i64,
    unit: Unit,
}

impl Track {
    fn next(&self) -> i64 {
        self.origin + self.unit.ticks(self.elapsed)
    }
}

/// The last frame sent on a stream, as its timecode and duration at an instant.
#[derive(Debug, Clone, Copy)]
struct Sent {
    timecode: i64,
    duration: i64,
    at: Instant,
}

/// The shared timeline of a sender's streams.
#[derive(Debug, Default)]
pub struct Timecodes {
    anchor: Option<(i64, Instant)>,

    video: Option<Track>,
    audio: Option<Track>,

    last_video: Option<Sent>,
    last_audio: Option<Sent>,
}

impl Timecodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// The timecode to send `frame` with.
    pub fn video(&mut self, frame: &VideoFrame) -> i64 {
        self.video_at(frame, Instant::now(), now_ticks())
    }

    /// The timecode to send `frame` with.
    pub fn audio(&mut self, frame: &AudioFrame) -> i64 {
        self.audio_at(frame, Instant::now(), now_ticks())
    }

    /// The timecode to send `frame` with.
    pub fn metadata(&mut self, frame: &MetadataFrame) -> i64 {
        self.metadata_at(frame, Instant::now(), now_ticks())
    }

    pub(crate) fn video_at(&mut self, frame: &VideoFrame, now: Instant, wall: i64) -> i64 {
        let unit = Unit::Frames(frame.frame_rate);
        let timecode = Self::resolve(
            &mut self.anchor,
            &mut self.video,
            unit,
            frame.timecode,
            1,
            now,
            wall,
        );

        self.last_video = Some(Sent {
            timecode,
            duration: frame.frame_rate.duration_ticks(),
            at: now,
        });

        timecode
    }

    pub(crate) fn audio_at(&mut self, frame: &AudioFrame, now: Instant, wall: i64) -> i64 {
        let unit = Unit::Samples(frame.sample_rate);
        let timecode = Self::resolve(
            &mut self.anchor,
            &mut self.audio,
            unit,
            frame.timecode,
            frame.samples as i64,
            now,
            wall,
        );

        self.last_audio = Some(Sent {
            timecode,
            duration: frame.duration_ticks(),
            at: now,
        });

        timecode
    }

    pub(crate) fn metadata_at(&mut self, frame: &MetadataFrame, now: Instant, wall: i64) -> i64 {
        if frame.timecode != SYNTHESIZE {
            return frame.timecode;
        }

        let nearest = [self.last_video, self.last_audio]
            .into_iter()
            .flatten()
            .filter(|sent| duration_to_ticks(now.duration_since(sent.at)) <= sent.duration)
            .min_by_key(|sent| now.duration_since(sent.at));

        match (nearest, self.anchor) {
            (Some(sent), _) => sent.timecode,
            (None, Some((timecode, at))) => timecode + duration_to_ticks(now.duration_since(at)),
            (None, None) => wall,
        }
    }

    fn resolve(
        anchor: &mut Option<(i64, Instant)>,
        track: &mut Option<Track>,
        unit: Unit,
        requested: i64,
        length: i64,
        now: Instant,
        wall: i64,
    ) -> i64 {
        let timecode = match (requested, *track) {
            // A change of rate restarts the progression where it was.
            (SYNTHESIZE, Some(previous)) if previous.unit == unit => previous.next(),
            (SYNTHESIZE, Some(previous)) => {
                let timecode = previous.next();
                *anchor = Some((timecode, now));

                timecode
            }
            (SYNTHESIZE, None) => match *anchor {
                Some((origin, at)) => {
                    let elapsed = duration_to_ticks(now.duration_since(at));

                    origin + unit.ticks(unit.count(elapsed))
                }
                None => {
                    *anchor = Some((wall, now));

                    wall
                }
            },
            (explicit, _) => {
                *anchor = Some((explicit, now));

                explicit
            }
        };

        *track = match *track {
            Some(track) if requested == SYNTHESIZE && track.unit == unit => Some(Track {
                elapsed: track.elapsed + length,
                ..track
            }),
            _ => Some(Track {
                origin: timecode,
                elapsed: length,
                unit,
            }),
        };

        timecode
    }
}

/// Paces a sequence of calls to a fixed period.
///
/// The `k`-th call to [`Pacer::tick`] completes `k` periods after the first one started,
/// unless the caller falls behind by more than a period, which restarts the cadence.
#[derive(Debug, Default)]
pub struct Pacer {
    deadline: Option<Instant>,
}

impl Pacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the end of the current period.
    pub async fn tick(&mut self, period: Duration) {
        let now = Instant::now();
        let deadline = match self.deadline {
            Some(deadline) if deadline + period > now => deadline + period,
            _ => now + period,
        };

        self.deadline = Some(deadline);
        tokio::time::sleep_until(deadline).await;
    }

    /// Wait for the next boundary of a grid of `period`s phased on `phase`.
    ///
    /// Two ticks are at least half a period apart, so that a jittery phase never yields a double tick.
    pub async fn tick_on(&mut self, period: Duration, phase: Instant) {
        let now = Instant::now();
        let floor = self
            .deadline
            .map_or(now, |deadline| (deadline + period / 2).max(now));

        let deadline = if phase > floor || period.is_zero() {
            phase.max(floor)
        } else {
            let periods = floor.duration_since(phase).as_nanos() / period.as_nanos() + 1;

            phase + Duration::from_nanos((periods * period.as_nanos()) as u64)
        };

        self.deadline = Some(deadline);
        tokio::time::sleep_until(deadline).await;
    }

    /// Forget the cadence, the next tick starts a new one.
    pub fn reset(&mut self) {
        self.deadline = None;
    }
}
