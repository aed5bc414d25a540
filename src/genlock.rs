//! Phase-locking of a local frame cadence on an external reference source.
//!
//! A [`Genlock`] receives the reference source at the lowest bandwidth and
//! records the arrival of its video frames. While the reference produces a
//! signal, waits complete on the boundaries of a grid phased on the last
//! reference frame, otherwise they fall back to the local clock.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{runtime::Handle, task::JoinHandle, time::Instant};

use crate::{
    clock::{self, Pacer},
    frame::{AudioFrame, FieldMode, VideoFrame},
    recv::{self, Bandwidth, Recv, State},
    Result, Source,
};

/// Configuration for the [`Genlock`] structure.
#[derive(Debug, Clone)]
pub struct Config {
    /// Receiver name to identify as to the reference source.
    pub name: Option<String>,

    /// Delay without reference frames after which the reference is deemed inactive.
    pub signal_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: None,
            signal_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Reference {
    arrival: Instant,
    period: Duration,
}

fn video_period(frame: &VideoFrame) -> Duration {
    let period = frame.frame_rate.duration();

    match frame.field {
        FieldMode::Field0 | FieldMode::Field1 => period / 2,
        FieldMode::Progressive | FieldMode::Interleaved => period,
    }
}

fn audio_period(frame: &AudioFrame) -> Duration {
    match frame.sample_rate {
        0 => Duration::ZERO,
        rate => Duration::from_nanos(frame.samples as u64 * 1_000_000_000 / rate as u64),
    }
}

/// A timing reference for local frame submission.
#[derive(Debug)]
pub struct Genlock {
    recv: Arc<Recv>,
    reference: Arc<Mutex<Option<Reference>>>,
    signal_timeout: Duration,
    task: JoinHandle<()>,

    video: tokio::sync::Mutex<Pacer>,
    audio: tokio::sync::Mutex<Pacer>,
}

impl Genlock {
    /// Create a genlock on `source`, or on the local clock alone when `None`.
    ///
    /// This must be called from within a `tokio` runtime.
    pub fn new(source: Option<Source>, config: Config) -> Result<Self> {
        let runtime = Handle::try_current()?;
        let recv = Arc::new(Recv::new(recv::Config {
            name: config.name,
            bandwidth: Bandwidth::Lowest,
            video_queue: 1,
            audio_queue: 0,
            metadata_queue: 1,
            ..Default::default()
        })?);
        recv.connect(source);

        let reference = Arc::default();
        let task = runtime.spawn(Self::track(Arc::clone(&recv), Arc::clone(&reference)));

        Ok(Self {
            recv,
            reference,
            signal_timeout: config.signal_timeout,
            task,
            video: Default::default(),
            audio: Default::default(),
        })
    }

    async fn track(recv: Arc<Recv>, reference: Arc<Mutex<Option<Reference>>>) {
        while let Some(frame) = recv.capture_video(crate::FOREVER).await {
            {
                let mut reference = crate::lock(&reference);

                // Frames still queued from a previous source are stale.
                if recv.state() == State::Connected {
                    *reference = Some(Reference {
                        arrival: clock::arrival(frame.timestamp),
                        period: video_period(&frame),
                    });
                }
            }

            if let Err(err) = recv.free_video(frame) {
                tracing::warn!("Unable to release a reference frame: {err}");
            }
        }

        tracing::debug!("Stopped tracking the reference source");
    }

    /// Switch to the reference `source`, or to the local clock alone when `None`.
    pub fn connect(&self, source: Option<Source>) {
        let mut reference = crate::lock(&self.reference);

        self.recv.connect(source);
        *reference = None;
    }

    /// The reference, if it is currently producing a signal.
    fn reference(&self) -> Option<Reference> {
        crate::lock(&self.reference).filter(|reference| {
            reference.arrival.elapsed() <= self.signal_timeout.max(reference.period * 2)
        })
    }

    /// Whether the reference source is currently producing a signal.
    pub fn is_active(&self) -> bool {
        self.reference().is_some()
    }

    async fn wait(pacer: &mut Pacer, period: Duration, reference: Option<Reference>) -> bool {
        match reference {
            Some(reference) => {
                pacer.tick_on(period, reference.arrival).await;

                true
            }
            None => {
                pacer.tick(period).await;

                false
            }
        }
    }

    /// Wait for the next boundary of a video frame shaped like `hint`.
    ///
    /// Only the frame rate and field mode of `hint` are used. Returns whether the wait
    /// followed the reference source rather than the local clock.
    pub async fn wait_video(&self, hint: &VideoFrame) -> bool {
        let mut pacer = self.video.lock().await;

        Self::wait(&mut pacer, video_period(hint), self.reference()).await
    }

    /// Wait for the next boundary of an audio frame shaped like `hint`.
    ///
    /// Only the sample rate and sample count of `hint` are used. Returns whether the wait
    /// followed the reference source rather than the local clock.
    pub async fn wait_audio(&self, hint: &AudioFrame) -> bool {
        let mut pacer = self.audio.lock().await;

        Self::wait(&mut pacer, audio_period(hint), self.reference()).await
    }
}

impl Drop for Genlock {
    fn drop(&mut self) {
        self.task.abort();
    }
}
