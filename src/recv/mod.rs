//! The receiving side of a connection to a [`Source`].

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::{runtime::Handle, task::JoinHandle};

use crate::{
    alloc::{Allocator, Ledger, Pool},
    clock,
    frame::{AudioFrame, MetadataFrame, VideoFrame},
    io::{
        frame::{
            text::{self, Metadata, Tally},
            Frame,
        },
        Stream,
    },
    queue::Queue,
    Error, Result, Source,
};

mod config;
pub use config::{Bandwidth, Config};

mod peer;
pub use peer::Peer;

mod control;

/// The state of the connection of a [`Recv`] to its source.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum State {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// The outcome of a [`Recv::capture`].
#[derive(Debug)]
pub enum Capture {
    /// Nothing arrived in the allotted time.
    None,

    Video(VideoFrame),
    Audio(AudioFrame),
    Metadata(MetadataFrame),

    /// The connection to the source was lost.
    Error,

    /// The capabilities of the source changed since the last notification.
    StatusChange,
}

/// Frame counts, per stream type.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub video: u64,
    pub audio: u64,
    pub metadata: u64,
}

/// The frame counters of a [`Recv`], see [`Recv::performance`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Performance {
    /// Frames received from the source.
    pub total: Counts,

    /// Frames evicted from a full queue before being captured.
    pub dropped: Counts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Error,
    StatusChange,
}

#[derive(Debug, Default)]
struct Control {
    generation: u64,
    state: State,
    source: Option<Source>,
    peer: Option<Peer>,
    link: Option<flume::Sender<Vec<u8>>>,

    tally: Tally,
    connection_metadata: Vec<MetadataFrame>,

    ptz: bool,
    recording: bool,
    web_control: Option<String>,
    failover: Option<Source>,
}

#[derive(Debug)]
struct Shared {
    config: Config,
    allocator: Arc<dyn Allocator>,
    ledger: Ledger,

    video: Queue<VideoFrame>,
    audio: Queue<AudioFrame>,
    metadata: Queue<MetadataFrame>,

    events: flume::Receiver<Event>,
    notify: flume::Sender<Event>,
    status_pending: AtomicBool,

    control: Mutex<Control>,
}

impl Shared {
    /// Run `f` on the control state, unless a newer connection superseded `generation`.
    fn current<R>(&self, generation: u64, f: impl FnOnce(&mut Control) -> R) -> Option<R> {
        let mut control = crate::lock(&self.control);

        (control.generation == generation).then(|| f(&mut control))
    }

    fn transmit(&self, packet: Result<Vec<u8>>) -> bool {
        let packet = match packet {
            Ok(packet) => packet,
            Err(err) => {
                tracing::error!("Unable to serialize a message for the source: {err}");

                return false;
            }
        };

        match &crate::lock(&self.control).link {
            Some(link) => link.send(packet).is_ok(),
            None => false,
        }
    }

    fn status_changed(&self) {
        if !self.status_pending.swap(true, Ordering::AcqRel) {
            let _ = self.notify.send(Event::StatusChange);
        }
    }

    async fn run(self: Arc<Self>, mut source: Source, generation: u64) {
        loop {
            let result = self.session(&source, generation).await;

            let Some(was_connected) = self.current(generation, |control| {
                let was_connected = control.state == State::Connected;

                control.state = State::Disconnected;
                control.link = None;
                control.peer = None;

                was_connected
            }) else {
                break;
            };

            match result {
                Ok(()) => tracing::debug!("Disconnected from network source `{source}`"),
                Err(err) => tracing::warn!("Lost connection to network source `{source}`: {err}"),
            }

            if was_connected {
                let _ = self.notify.send(Event::Error);
            }

            if let Some(Some(failover)) =
                self.current(generation, |control| control.failover.take())
            {
                tracing::info!(
                    "Switching from network source `{source}` to its failover `{failover}`"
                );

                source = failover;
            }

            tokio::time::sleep(self.config.reconnect_interval).await;
        }
    }

    async fn session(&self, source: &Source, generation: u64) -> Result {
        self.current(generation, |control| {
            control.state = State::Connecting;
            control.source = Some(source.clone());
            control.ptz = false;
            control.recording = false;
            control.web_control = None;
        });

        let mut stream = Stream::connect(&source.addresses).await?;
        let peer = Peer::handshake(&mut stream, &self.config).await?;

        tracing::info!(
            "Connected to network source `{source}` at `{}`",
            stream.peer_addr()
        );

        let (mut reader, mut writer) = stream.into_split();
        let (link, outgoing) = flume::unbounded();

        // Replay the tally and connection metadata before anything else can be sent.
        let replayed = self.current(generation, |control| -> Result {
            link.send(Metadata::Tally(control.tally).to_packet()?)
                .map_err(|_| Error::Disconnected)?;
            for frame in &control.connection_metadata {
                link.send(text::encode(frame)?)
                    .map_err(|_| Error::Disconnected)?;
            }

            control.state = State::Connected;
            control.peer = Some(peer);
            control.link = Some(link);

            Ok(())
        });

        match replayed {
            Some(result) => result?,
            None => return Ok(()),
        }

        let writing = async {
            while let Ok(packet) = outgoing.recv_async().await {
                writer.send_raw(&packet).await?;
            }

            Ok::<_, Error>(())
        };

        let reading = async {
            loop {
                match reader.recv().await {
                    Ok(frame) => self.dispatch(frame),
                    Err(err @ (Error::Frame(_) | Error::UnknownFrameKind(_))) => {
                        tracing::warn!("Discarding an undecodable frame from `{source}`: {err}");
                    }
                    Err(err) => break Err::<(), _>(err),
                }
            }
        };

        tokio::select! {
            result = writing => result,
            result = reading => result,
        }
    }

    fn dispatch(&self, frame: Frame) {
        let timestamp = clock::now_ticks();

        match frame {
            Frame::Video(block) => {
                let frame = block.into_frame(&*self.allocator, timestamp);
                if let Err(err) = frame.validate() {
                    tracing::warn!("Discarding a malformed video frame: {err}");

                    self.video.reject();
                    self.allocator.free(frame.data);

                    return;
                }

                for evicted in self.video.push(frame) {
                    tracing::debug!("A video frame was dropped, the queue is full");

                    self.allocator.free(evicted.data);
                }
            }
            Frame::Audio(block) => {
                let frame = block.into_frame(&*self.allocator, timestamp);
                if let Err(err) = frame.validate() {
                    tracing::warn!("Discarding a malformed audio frame: {err}");

                    self.audio.reject();
                    self.allocator.free(frame.data);

                    return;
                }

                for evicted in self.audio.push(frame) {
                    tracing::debug!("An audio frame was dropped, the queue is full");

                    self.allocator.free(evicted.data);
                }
            }
            Frame::Text(block) => match Metadata::from_block(&block) {
                Ok(metadata) => self.control(metadata, block.to_frame()),
                Err(_) => {
                    self.metadata.push(block.to_frame());
                }
            },
        }
    }

    fn control(&self, metadata: Metadata, frame: MetadataFrame) {
        let mut control = crate::lock(&self.control);

        let changed = match metadata {
            Metadata::Ptz(capability) => {
                std::mem::replace(&mut control.ptz, capability.enabled) != capability.enabled
            }
            Metadata::Recording(capability) => {
                std::mem::replace(&mut control.recording, capability.enabled)
                    != capability.enabled
            }
            Metadata::WebControl(text::WebControl { url }) => {
                control.web_control.replace(url.clone()).as_ref() != Some(&url)
            }
            Metadata::Failover(failover) => {
                control.failover = (!failover.name.is_empty())
                    .then(|| Source::new(failover.name.clone(), failover.addresses()));

                return;
            }
            Metadata::TallyEcho(tally) => {
                tracing::trace!("The source acknowledged our tally: {tally:?}");

                return;
            }
            other => {
                tracing::debug!("Ignoring control message from the source: {other:?}");

                return;
            }
        };
        drop(control);

        if changed {
            self.status_changed();
        }

        self.metadata.push(frame);
    }
}

/// A connection to a [`Source`], receiving its _video_, _audio_ and _metadata_ frames.
///
/// Each stream type has its own delivery queue, so they may be captured from
/// independent tasks. Captured frames must be given back to the matching `free_*` method.
#[derive(Debug)]
pub struct Recv {
    shared: Arc<Shared>,
    runtime: Handle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Recv {
    /// Create a disconnected receiver, this must be called from within a `tokio` runtime.
    pub fn new(config: Config) -> Result<Self> {
        let runtime = Handle::try_current()?;
        let (notify, events) = flume::unbounded();

        let allocator = config
            .allocator
            .clone()
            .unwrap_or_else(|| Arc::new(Pool::default()));

        let shared = Shared {
            allocator,
            ledger: Ledger::new(),
            video: Queue::new(config.video_queue),
            audio: Queue::new(config.audio_queue),
            metadata: Queue::new(config.metadata_queue),
            events,
            notify,
            status_pending: AtomicBool::new(false),
            control: Default::default(),
            config,
        };

        Ok(Self {
            shared: Arc::new(shared),
            runtime,
            task: Default::default(),
        })
    }

    /// Create a receiver connecting to `source`.
    pub fn with_source(source: Source, config: Config) -> Result<Self> {
        let recv = Self::new(config)?;
        recv.connect(Some(source));

        Ok(recv)
    }

    /// Switch to `source`, or disconnect when `None`.
    pub fn connect(&self, source: Option<Source>) {
        let mut task = crate::lock(&self.task);
        if let Some(task) = task.take() {
            task.abort();
        }

        let generation = {
            let mut control = crate::lock(&self.shared.control);

            control.generation += 1;
            control.state = State::Disconnected;
            control.source = source.clone();
            control.peer = None;
            control.link = None;
            control.failover = None;

            control.generation
        };

        if let Some(source) = source {
            tracing::debug!("Connecting to network source `{source}`");

            *task = Some(
                self.runtime
                    .spawn(Arc::clone(&self.shared).run(source, generation)),
            );
        }
    }

    pub fn state(&self) -> State {
        crate::lock(&self.shared.control).state
    }

    /// The source this receiver is connected, or connecting to.
    pub fn source(&self) -> Option<Source> {
        crate::lock(&self.shared.control).source.clone()
    }

    /// The parameters of the source, when connected.
    pub fn peer(&self) -> Option<Peer> {
        crate::lock(&self.shared.control).peer.clone()
    }

    /// Wait for up to `timeout` for a frame of one of the requested types, or a change of state.
    pub async fn capture(
        &self,
        video: bool,
        audio: bool,
        metadata: bool,
        timeout: Duration,
    ) -> Capture {
        let shared = &*self.shared;

        let wait = async {
            tokio::select! {
                biased;

                Ok(event) = shared.events.recv_async() => match event {
                    Event::Error => Capture::Error,
                    Event::StatusChange => {
                        shared.status_pending.store(false, Ordering::Release);

                        Capture::StatusChange
                    }
                },
                Ok(frame) = shared.video.receiver().recv_async(), if video => {
                    Capture::Video(self.hand_out_video(frame))
                }
                Ok(frame) = shared.audio.receiver().recv_async(), if audio => {
                    Capture::Audio(self.hand_out_audio(frame))
                }
                Ok(frame) = shared.metadata.receiver().recv_async(), if metadata => {
                    Capture::Metadata(self.hand_out_metadata(frame))
                }
                else => Capture::None,
            }
        };

        crate::timeout(timeout, wait).await.unwrap_or(Capture::None)
    }

    /// Wait for up to `timeout` for a video frame.
    pub async fn capture_video(&self, timeout: Duration) -> Option<VideoFrame> {
        let frame = crate::timeout(timeout, self.shared.video.receiver().recv_async()).await?;

        frame.ok().map(|frame| self.hand_out_video(frame))
    }

    /// Wait for up to `timeout` for an audio frame.
    pub async fn capture_audio(&self, timeout: Duration) -> Option<AudioFrame> {
        let frame = crate::timeout(timeout, self.shared.audio.receiver().recv_async()).await?;

        frame.ok().map(|frame| self.hand_out_audio(frame))
    }

    /// Wait for up to `timeout` for a metadata frame.
    pub async fn capture_metadata(&self, timeout: Duration) -> Option<MetadataFrame> {
        let frame =
            crate::timeout(timeout, self.shared.metadata.receiver().recv_async()).await?;

        frame.ok().map(|frame| self.hand_out_metadata(frame))
    }

    fn hand_out_video(&self, mut frame: VideoFrame) -> VideoFrame {
        frame.ticket = Some(self.shared.ledger.issue());

        frame
    }

    fn hand_out_audio(&self, mut frame: AudioFrame) -> AudioFrame {
        frame.ticket = Some(self.shared.ledger.issue());

        frame
    }

    fn hand_out_metadata(&self, mut frame: MetadataFrame) -> MetadataFrame {
        frame.ticket = Some(self.shared.ledger.issue());

        frame
    }

    /// Give back a frame obtained from this receiver.
    pub fn free_video(&self, frame: VideoFrame) -> Result {
        self.shared.ledger.redeem(frame.ticket)?;
        self.shared.allocator.free(frame.data);

        Ok(())
    }

    /// Give back a frame obtained from this receiver.
    pub fn free_audio(&self, frame: AudioFrame) -> Result {
        self.shared.ledger.redeem(frame.ticket)?;
        self.shared.allocator.free(frame.data);

        Ok(())
    }

    /// Give back a frame obtained from this receiver.
    pub fn free_metadata(&self, frame: MetadataFrame) -> Result {
        self.shared.ledger.redeem(frame.ticket)
    }

    /// Send a metadata frame to the source, returns `false` if not connected.
    pub fn send_metadata(&self, frame: &MetadataFrame) -> bool {
        self.shared.transmit(text::encode(frame))
    }

    /// Set the tally to report to the source, returns `false` if not connected.
    ///
    /// The tally is remembered and reported again on every reconnection.
    pub fn set_tally(&self, tally: Tally) -> bool {
        crate::lock(&self.shared.control).tally = tally;

        self.shared
            .transmit(Metadata::Tally(tally).to_packet())
    }

    /// Queue metadata to be sent to the source on every connection,
    /// and send it right away if currently connected.
    pub fn add_connection_metadata(&self, frame: MetadataFrame) {
        let mut control = crate::lock(&self.shared.control);

        if let (Some(link), Ok(packet)) = (&control.link, text::encode(&frame)) {
            let _ = link.send(packet);
        }
        control.connection_metadata.push(frame);
    }

    pub fn clear_connection_metadata(&self) {
        crate::lock(&self.shared.control)
            .connection_metadata
            .clear();
    }

    /// Whether the source announced support for PTZ commands.
    pub fn ptz_supported(&self) -> bool {
        crate::lock(&self.shared.control).ptz
    }

    /// Whether the source announced support for recording commands.
    pub fn recording_supported(&self) -> bool {
        crate::lock(&self.shared.control).recording
    }

    /// The URL of the web control page of the source, if any.
    pub fn web_control(&self) -> Option<String> {
        crate::lock(&self.shared.control).web_control.clone()
    }

    /// The failover source designated by the source, if any.
    pub fn failover(&self) -> Option<Source> {
        crate::lock(&self.shared.control).failover.clone()
    }

    pub fn performance(&self) -> Performance {
        let shared = &self.shared;

        Performance {
            total: Counts {
                video: shared.video.received(),
                audio: shared.audio.received(),
                metadata: shared.metadata.received(),
            },
            dropped: Counts {
                video: shared.video.dropped(),
                audio: shared.audio.dropped(),
                metadata: shared.metadata.dropped(),
            },
        }
    }

    /// The count of frames currently waiting to be captured.
    pub fn queue(&self) -> Counts {
        let shared = &self.shared;

        Counts {
            video: shared.video.len() as u64,
            audio: shared.audio.len() as u64,
            metadata: shared.metadata.len() as u64,
        }
    }

    pub(crate) fn video_frames(&self) -> &flume::Receiver<VideoFrame> {
        self.shared.video.receiver()
    }

    pub(crate) fn audio_frames(&self) -> &flume::Receiver<AudioFrame> {
        self.shared.audio.receiver()
    }

    pub(crate) fn allocator(&self) -> &dyn Allocator {
        &*self.shared.allocator
    }

    #[cfg(test)]
    pub(crate) fn push_video(&self, frame: VideoFrame) {
        self.shared.video.push(frame);
    }

    #[cfg(test)]
    pub(crate) fn push_audio(&self, frame: AudioFrame) {
        self.shared.audio.push(frame);
    }
}

impl Drop for Recv {
    fn drop(&mut self) {
        if let Some(task) = crate::lock(&self.task).take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameRate, VideoFormat};

    fn recv() -> Recv {
        Recv::new(Config {
            video_queue: 2,
            ..Default::default()
        })
        .expect("created within a runtime")
    }

    #[test]
    fn creation_requires_a_runtime() {
        assert!(matches!(
            Recv::new(Default::default()),
            Err(Error::Runtime(_))
        ));
    }

    #[tokio::test]
    async fn disconnected_receivers_refuse_control() {
        let recv = recv();

        assert_eq!(recv.state(), State::Disconnected);
        assert!(!recv.send_metadata(&MetadataFrame::new("<hello/>")));
        assert!(!recv.set_tally(Tally {
            on_program: true,
            on_preview: false
        }));
        assert!(!recv.ptz_zoom(0.5));
        assert!(matches!(
            recv.capture(true, true, true, Duration::ZERO).await,
            Capture::None
        ));
    }

    #[tokio::test]
    async fn overruns_are_counted() {
        let recv = recv();
        let frame = VideoFrame::new(2, 2, VideoFormat::BGRA, FrameRate::default());

        for _ in 0..3 {
            recv.shared
                .dispatch(Frame::Video(crate::io::frame::video::Block::from_frame(&frame)));
        }

        let performance = recv.performance();
        assert_eq!(performance.total.video, 3);
        assert_eq!(performance.dropped.video, 1);
        assert_eq!(recv.queue().video, 2);
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped() {
        let recv = recv();

        let mut audio = AudioFrame::silence(48_000, 2, 480);
        audio.data.truncate(1920 + 100);
        recv.shared
            .dispatch(Frame::Audio(crate::io::frame::audio::Block::from_frame(&audio)));

        let video = VideoFrame::new(2, 2, VideoFormat::BGRA, FrameRate::new(0, 0));
        recv.shared
            .dispatch(Frame::Video(crate::io::frame::video::Block::from_frame(&video)));

        let performance = recv.performance();
        assert_eq!(performance.total, Counts { video: 1, audio: 1, metadata: 0 });
        assert_eq!(performance.dropped, Counts { video: 1, audio: 1, metadata: 0 });
        assert_eq!(recv.queue(), Counts::default());
    }

    #[tokio::test]
    async fn captured_frames_are_freed_once() {
        let recv = recv();
        let frame = VideoFrame::new(2, 2, VideoFormat::BGRA, FrameRate::default());
        recv.shared
            .dispatch(Frame::Video(crate::io::frame::video::Block::from_frame(&frame)));

        let Capture::Video(captured) = recv.capture(true, false, false, Duration::ZERO).await
        else {
            panic!("expected a video frame");
        };
        assert_ne!(captured.timestamp, crate::frame::UNDEFINED);

        let copy = captured.clone();
        assert!(recv.free_video(captured).is_ok());
        assert!(matches!(recv.free_video(copy), Err(Error::NotCaptured)));
        assert!(matches!(
            recv.free_video(frame),
            Err(Error::NotCaptured)
        ));
    }

    #[tokio::test]
    async fn capabilities_raise_a_single_status_change() {
        let recv = recv();
        let ptz = Metadata::Ptz(text::Capability { enabled: true });

        for _ in 0..2 {
            recv.shared
                .dispatch(ptz.to_frame().expect("serializable capability"));
        }
        recv.shared.dispatch(
            Metadata::WebControl(text::WebControl {
                url: "http://camera.local/".into(),
            })
            .to_frame()
            .expect("serializable capability"),
        );

        assert!(matches!(
            recv.capture(false, false, false, Duration::ZERO).await,
            Capture::StatusChange
        ));
        assert!(matches!(
            recv.capture(false, false, false, Duration::ZERO).await,
            Capture::None
        ));

        assert!(recv.ptz_supported());
        assert!(!recv.recording_supported());
        assert_eq!(recv.web_control().as_deref(), Some("http://camera.local/"));

        // Capability announcements are also delivered as metadata.
        assert_eq!(recv.queue().metadata, 3);
    }

    #[tokio::test]
    async fn user_metadata_is_queued() {
        let recv = recv();
        let frame = MetadataFrame::new("<scoreboard home=\"3\"/>");

        recv.shared.dispatch(Frame::Text(
            crate::io::frame::text::Block::from_frame(&frame),
        ));

        let captured = recv
            .capture_metadata(Duration::ZERO)
            .await
            .expect("queued metadata");
        assert_eq!(captured.data, frame.data);
        assert!(recv.free_metadata(captured).is_ok());
    }
}
