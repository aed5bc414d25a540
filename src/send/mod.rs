//! The sending side, publishing frames to every connected receiver.

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::{
    net::{TcpListener, TcpStream},
    runtime::Handle,
    sync::watch,
    task::JoinHandle,
};

use crate::{
    alloc::Ledger,
    clock::{Pacer, Timecodes},
    discovery::{self, Discovery},
    frame::{AudioFrame, MetadataFrame, VideoFrame},
    io::{
        frame::{
            audio,
            text::{self, Metadata, Tally},
            video, Frame, FrameKind,
        },
        Reader, Stream, Writer,
    },
    queue::Queue,
    Error, Result, Source,
};

mod config;
pub use config::Config;

mod peer;
pub use peer::Peer;

type Packet = Arc<Vec<u8>>;

/// A receiver connected to the sender, and the queue of packets to write to it.
#[derive(Debug)]
struct Link {
    id: u64,
    peer: Peer,
    tx: flume::Sender<Packet>,
}

impl Link {
    fn wants(&self, kind: FrameKind) -> bool {
        match kind {
            FrameKind::Video => self.peer.streams.video,
            FrameKind::Audio => self.peer.streams.audio,
            FrameKind::Text => self.peer.streams.text,
        }
    }
}

#[derive(Debug, Default)]
struct Control {
    links: Vec<Link>,
    tasks: Vec<JoinHandle<()>>,

    tally: Tally,
    connection_metadata: Vec<MetadataFrame>,
    failover: Option<Source>,
}

impl Control {
    fn tally(&self) -> Tally {
        self.links
            .iter()
            .fold(self.tally, |tally, link| tally | link.peer.tally)
    }

    /// Queue `packet` to every receiver without waiting, for control messages.
    fn announce(&self, packet: Result<Vec<u8>>) {
        let packet = match packet {
            Ok(packet) => Arc::new(packet),
            Err(err) => {
                tracing::error!("Unable to serialize a message for the receivers: {err}");

                return;
            }
        };

        for link in &self.links {
            if link.tx.try_send(Arc::clone(&packet)).is_err() {
                tracing::warn!(
                    "Unable to queue a control message for `{}`",
                    link.peer.identify.name
                );
            }
        }
    }
}

#[derive(Debug)]
struct Shared {
    name: String,
    clock_video: bool,
    clock_audio: bool,
    queue: usize,
    handshake_timeout: Duration,

    ledger: Ledger,
    metadata: Queue<MetadataFrame>,
    connections: watch::Sender<usize>,
    tally: watch::Sender<Tally>,
    ids: AtomicU64,

    timecodes: Mutex<Timecodes>,
    video_pacer: tokio::sync::Mutex<Pacer>,
    audio_pacer: tokio::sync::Mutex<Pacer>,

    control: Mutex<Control>,
}

fn failover(source: Option<&Source>) -> Metadata {
    Metadata::Failover(text::Failover {
        name: source.map(|source| source.name.clone()).unwrap_or_default(),
        addrs: source
            .map(|source| {
                source
                    .addresses
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default(),
    })
}

/// A listener on every address, IPv6 and IPv4 alike, as the announcement advertises both.
///
/// Hosts without IPv6 fall back to IPv4 alone.
fn bind() -> Result<std::net::TcpListener> {
    match std::net::TcpListener::bind((Ipv6Addr::UNSPECIFIED, 0)) {
        Ok(listener) => Ok(listener),
        Err(err) => {
            tracing::debug!("IPv6 is unavailable, listening on IPv4 only: {err}");

            Ok(std::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))?)
        }
    }
}

impl Shared {
    fn refresh_tally(&self) {
        let tally = crate::lock(&self.control).tally();

        self.tally.send_if_modified(|current| {
            let modified = *current != tally;
            *current = tally;

            modified
        });
    }

    fn with_link<R>(&self, id: u64, f: impl FnOnce(&mut Link) -> R) -> Option<R> {
        crate::lock(&self.control)
            .links
            .iter_mut()
            .find(|link| link.id == id)
            .map(f)
    }

    /// Queue `packet` to every receiver that enabled the `kind` stream, waiting for room if needed.
    async fn broadcast(&self, kind: FrameKind, packet: Vec<u8>) {
        let packet = Arc::new(packet);
        let links = crate::lock(&self.control)
            .links
            .iter()
            .filter(|link| link.wants(kind))
            .map(|link| link.tx.clone())
            .collect::<Vec<_>>();

        futures::future::join_all(links.iter().map(|tx| tx.send_async(Arc::clone(&packet)))).await;
    }

    async fn transmit_video(&self, frame: &VideoFrame) -> Result {
        frame.validate()?;

        let timecode = crate::lock(&self.timecodes).video(frame);
        self.broadcast(FrameKind::Video, video::encode_at(frame, timecode)?)
            .await;

        if self.clock_video && frame.frame_rate.is_valid() {
            self.video_pacer
                .lock()
                .await
                .tick(frame.frame_rate.duration())
                .await;
        }

        Ok(())
    }

    async fn transmit_audio(&self, frame: &AudioFrame) -> Result {
        frame.validate()?;

        let timecode = crate::lock(&self.timecodes).audio(frame);
        self.broadcast(FrameKind::Audio, audio::encode_at(frame, timecode)?)
            .await;

        if self.clock_audio && frame.sample_rate != 0 && frame.samples != 0 {
            let duration = Duration::from_nanos(
                frame.samples as u64 * 1_000_000_000 / frame.sample_rate as u64,
            );

            self.audio_pacer.lock().await.tick(duration).await;
        }

        Ok(())
    }

    async fn listen(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    tracing::debug!("Accepted a connection from `{addr}`");

                    let task = tokio::spawn(Arc::clone(&self).serve(stream));

                    let mut control = crate::lock(&self.control);
                    control.tasks.retain(|task| !task.is_finished());
                    control.tasks.push(task);
                }
                Err(err) => tracing::error!("Error while accepting connection: {err}"),
            }
        }
    }

    async fn serve(self: Arc<Self>, stream: TcpStream) {
        if let Err(err) = self.session(stream).await {
            tracing::warn!("Connection with a receiver ended: {err}");
        }
    }

    async fn session(&self, stream: TcpStream) -> Result {
        let mut stream = Stream::try_from(stream)?;
        let addr = stream.peer_addr();
        let peer = Peer::handshake(&mut stream, &self.name, self.handshake_timeout).await?;

        tracing::info!(
            "New peer `{}` connected from `{addr}`",
            peer.identify.name
        );

        let (mut reader, mut writer) = stream.into_split();
        let (tx, rx) = flume::bounded(self.queue.max(1));
        let id = self.ids.fetch_add(1, Ordering::Relaxed);

        let replay = {
            let mut control = crate::lock(&self.control);

            let mut replay = control
                .connection_metadata
                .iter()
                .map(text::encode)
                .collect::<Result<Vec<_>>>()?;
            if let Some(source) = &control.failover {
                replay.push(failover(Some(source)).to_packet()?);
            }

            control.links.push(Link { id, peer, tx });

            replay
        };
        self.connections.send_modify(|count| *count += 1);
        self.refresh_tally();

        let result = self
            .exchange(id, &mut reader, &mut writer, rx, replay)
            .await;

        crate::lock(&self.control)
            .links
            .retain(|link| link.id != id);
        self.connections
            .send_modify(|count| *count = count.saturating_sub(1));
        self.refresh_tally();

        tracing::info!("Peer at `{addr}` disconnected");

        result
    }

    async fn exchange(
        &self,
        id: u64,
        reader: &mut Reader,
        writer: &mut Writer,
        rx: flume::Receiver<Packet>,
        replay: Vec<Vec<u8>>,
    ) -> Result {
        let writing = async {
            for packet in replay {
                writer.send_raw(&packet).await?;
            }

            while let Ok(packet) = rx.recv_async().await {
                writer.send_raw(&packet).await?;
            }

            Ok::<_, Error>(())
        };

        let reading = async {
            loop {
                match reader.recv().await {
                    Ok(Frame::Text(block)) => self.inbound(id, &block),
                    Ok(_) => tracing::trace!("Ignoring a media frame sent by a receiver"),
                    Err(err @ (Error::Frame(_) | Error::UnknownFrameKind(_))) => {
                        tracing::warn!("Discarding an undecodable frame from a receiver: {err}");
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

    fn inbound(&self, id: u64, block: &text::Block) {
        match Metadata::from_block(block) {
            Ok(Metadata::Tally(tally)) => {
                let echo = self.with_link(id, |link| {
                    link.peer.tally = tally;

                    link.tx.clone()
                });
                self.refresh_tally();

                if let (Some(echo), Ok(packet)) = (echo, Metadata::TallyEcho(tally).to_packet()) {
                    let _ = echo.try_send(Arc::new(packet));
                }
            }
            Ok(Metadata::Video(value)) => {
                self.with_link(id, |link| {
                    link.peer.quality = value.quality;
                    link.peer.color = value.color;
                });
            }
            Ok(Metadata::EnabledStreams(streams)) => {
                self.with_link(id, |link| link.peer.streams = streams);
            }
            Ok(other) => tracing::debug!("Ignoring control message from a receiver: {other:?}"),
            Err(_) => {
                for evicted in self.metadata.push(block.to_frame()) {
                    tracing::debug!("Dropped inbound metadata, the queue is full: {evicted:?}");
                }
            }
        }
    }
}

/// A _video_, _audio_ and _metadata_ source, that can send data to multiple receivers.
#[derive(Debug)]
pub struct Sender {
    shared: Arc<Shared>,
    source: Source,
    discovery: Arc<dyn Discovery>,

    tally: tokio::sync::Mutex<watch::Receiver<Tally>>,
    pending: Mutex<Option<JoinHandle<VideoFrame>>>,

    runtime: Handle,
    listener: JoinHandle<()>,
}

impl Sender {
    /// Create a sender announced with multicast DNS.
    pub fn new(config: Config<'_>) -> Result<Self> {
        Self::with_discovery(config, Arc::new(discovery::Mdns::new()?))
    }

    /// Create a sender announced with the provided [`Discovery`] transport,
    /// this must be called from within a `tokio` runtime.
    pub fn with_discovery(config: Config<'_>, discovery: Arc<dyn Discovery>) -> Result<Self> {
        let runtime = Handle::try_current()?;

        let listener = bind()?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        let listener = {
            let _guard = runtime.enter();

            TcpListener::from_std(listener)?
        };

        let groups = config.groups.unwrap_or(discovery::DEFAULT_GROUPS);
        let name = discovery.announce(config.name, groups, port)?;

        let (connections, _) = watch::channel(0);
        let (tally, tally_rx) = watch::channel(Tally::default());

        let shared = Arc::new(Shared {
            name: config.name.into(),
            clock_video: config.clock_video,
            clock_audio: config.clock_audio,
            queue: config.queue,
            handshake_timeout: config.handshake_timeout,
            ledger: Ledger::new(),
            metadata: Queue::new(config.metadata_queue),
            connections,
            tally,
            ids: Default::default(),
            timecodes: Default::default(),
            video_pacer: Default::default(),
            audio_pacer: Default::default(),
            control: Default::default(),
        });

        let listener = runtime.spawn(Arc::clone(&shared).listen(listener));

        Ok(Self {
            shared,
            source: Source::new(name, [SocketAddr::from((Ipv4Addr::LOCALHOST, port))]),
            discovery,
            tally: tokio::sync::Mutex::new(tally_rx),
            pending: Default::default(),
            runtime,
            listener,
        })
    }

    /// The source this sender is announced as, reachable from this machine.
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// The receivers currently connected.
    pub fn peers(&self) -> Vec<Peer> {
        crate::lock(&self.shared.control)
            .links
            .iter()
            .map(|link| link.peer.clone())
            .collect()
    }

    /// Send a video frame to every connected receiver.
    ///
    /// When video clocking is enabled, this waits for the duration of a frame at its frame rate.
    /// A frame pending from [`Sender::send_video_async`] is released first.
    pub async fn send_video(&self, frame: &VideoFrame) -> Result {
        self.flush_video().await;

        self.shared.transmit_video(frame).await
    }

    /// Send a video frame in the background, and return the frame of the previous call once it is sent.
    pub async fn send_video_async(&self, frame: VideoFrame) -> Result<Option<VideoFrame>> {
        frame.validate()?;

        let previous = self.flush_video().await;

        let shared = Arc::clone(&self.shared);
        let task = self.runtime.spawn(async move {
            if let Err(err) = shared.transmit_video(&frame).await {
                tracing::error!("Unable to send a video frame: {err}");
            }

            frame
        });
        *crate::lock(&self.pending) = Some(task);

        Ok(previous)
    }

    /// Wait for the frame pending from [`Sender::send_video_async`] to be sent, and return it.
    pub async fn flush_video(&self) -> Option<VideoFrame> {
        let task = crate::lock(&self.pending).take()?;

        match task.await {
            Ok(frame) => Some(frame),
            Err(err) => {
                tracing::error!("Fatal error in the `Sender::send_video_async` task: {err}");

                None
            }
        }
    }

    /// Send an audio frame to every connected receiver.
    ///
    /// When audio clocking is enabled, this waits for the duration of the frame.
    pub async fn send_audio(&self, frame: &AudioFrame) -> Result {
        self.shared.transmit_audio(frame).await
    }

    /// Send a metadata frame to every connected receiver.
    pub async fn send_metadata(&self, frame: &MetadataFrame) -> Result {
        let timecode = crate::lock(&self.shared.timecodes).metadata(frame);

        self.shared
            .broadcast(FrameKind::Text, text::encode_at(frame, timecode)?)
            .await;

        Ok(())
    }

    /// Wait for up to `timeout` for metadata sent by a receiver.
    pub async fn capture(&self, timeout: Duration) -> Option<MetadataFrame> {
        let frame = crate::timeout(timeout, self.shared.metadata.receiver().recv_async())
            .await?
            .ok()?;

        Some(MetadataFrame {
            ticket: Some(self.shared.ledger.issue()),
            ..frame
        })
    }

    /// Give back a frame obtained from [`Sender::capture`].
    pub fn free_metadata(&self, frame: MetadataFrame) -> Result {
        self.shared.ledger.redeem(frame.ticket)
    }

    /// The tally of the sender, and whether it changed since the last call.
    ///
    /// If it did not change yet, this waits for up to `timeout` for a change.
    pub async fn get_tally(&self, timeout: Duration) -> (Tally, bool) {
        let mut tally = self.tally.lock().await;

        let changed = match tally.has_changed() {
            Ok(true) => true,
            _ => crate::timeout(timeout, tally.changed())
                .await
                .is_some_and(|changed| changed.is_ok()),
        };

        let current = *tally.borrow_and_update();

        (current, changed)
    }

    /// The count of connected receivers, waiting for up to `timeout` for one if there are none.
    pub async fn get_no_connections(&self, timeout: Duration) -> usize {
        let mut connections = self.shared.connections.subscribe();

        let _ = crate::timeout(timeout, connections.wait_for(|count| *count > 0)).await;

        let count = *connections.borrow();
        count
    }

    /// Set the tally of the sender itself, combined with the tallies of the receivers.
    pub fn set_tally(&self, tally: Tally) {
        crate::lock(&self.shared.control).tally = tally;

        self.shared.refresh_tally();
    }

    /// Designate the source receivers should switch to when this one disappears, or clear it with `None`.
    pub fn set_failover(&self, source: Option<&Source>) {
        let mut control = crate::lock(&self.shared.control);

        control.failover = source.cloned();
        control.announce(failover(source).to_packet());
    }

    /// Queue metadata to be sent to every receiver on connection,
    /// and send it right away to the already connected ones.
    pub fn add_connection_metadata(&self, frame: MetadataFrame) {
        let mut control = crate::lock(&self.shared.control);

        control.announce(text::encode(&frame));
        control.connection_metadata.push(frame);
    }

    pub fn clear_connection_metadata(&self) {
        crate::lock(&self.shared.control)
            .connection_metadata
            .clear();
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        self.listener.abort();

        if let Some(task) = crate::lock(&self.pending).take() {
            task.abort();
        }

        for task in crate::lock(&self.shared.control).tasks.drain(..) {
            task.abort();
        }

        if let Err(err) = self.discovery.withdraw(&self.source.name) {
            tracing::error!(
                "Error while withdrawing the announcement of `{}`: {err}",
                self.source
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        discovery::Loopback,
        frame::{FrameRate, VideoFormat},
    };
    use tokio::time::Instant;

    fn sender(clock_video: bool) -> Sender {
        Sender::with_discovery(
            Config {
                name: "test",
                clock_video,
                ..Default::default()
            },
            Arc::new(Loopback::new()),
        )
        .expect("created within a runtime")
    }

    fn frame() -> VideoFrame {
        VideoFrame::new(16, 16, VideoFormat::UYVY, FrameRate::new(30000, 1001))
    }

    #[test]
    fn listeners_accept_ipv4_connections() {
        let listener = bind().expect("a listening socket");
        let port = listener.local_addr().expect("a bound socket").port();

        assert!(std::net::TcpStream::connect((Ipv4Addr::LOCALHOST, port)).is_ok());
    }

    #[tokio::test]
    async fn no_connections_without_receivers() {
        let sender = sender(false);

        assert_eq!(sender.get_no_connections(Duration::ZERO).await, 0);
        assert!(sender.peers().is_empty());
        assert_eq!(sender.source().subname(), Some("test"));
    }

    #[tokio::test(start_paused = true)]
    async fn clocked_video_keeps_the_frame_rate() {
        let sender = sender(true);
        let frame = frame();

        let start = Instant::now();
        for _ in 0..90 {
            sender.send_video(&frame).await.expect("sent frame");
        }

        let expected = frame.frame_rate.duration() * 90;
        let elapsed = start.elapsed();
        assert!(elapsed >= expected, "{elapsed:?}");
        assert!(elapsed < expected + Duration::from_millis(5), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn unclocked_video_is_not_paced() {
        let sender = sender(false);
        let frame = frame();

        let start = Instant::now();
        for _ in 0..90 {
            sender.send_video(&frame).await.expect("sent frame");
        }

        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test]
    async fn asynchronous_sends_release_the_previous_frame() {
        let sender = sender(false);

        let first = sender
            .send_video_async(frame())
            .await
            .expect("valid frame");
        assert!(first.is_none());

        let mut second = frame();
        second.width = 8;
        second.stride = VideoFormat::UYVY.stride(8);
        let released = sender.send_video_async(second).await.expect("valid frame");
        assert_eq!(released.map(|frame| frame.width), Some(16));

        assert_eq!(sender.flush_video().await.map(|frame| frame.width), Some(8));
        assert!(sender.flush_video().await.is_none());
    }

    #[tokio::test]
    async fn invalid_frames_are_refused() {
        let sender = sender(false);
        let mut frame = frame();
        frame.data.truncate(3);

        assert!(matches!(
            sender.send_video(&frame).await,
            Err(Error::InvalidFrame(_))
        ));
    }

    #[tokio::test]
    async fn local_tally_is_reported_once() {
        let sender = sender(false);
        let tally = Tally {
            on_program: true,
            on_preview: false,
        };

        sender.set_tally(tally);
        assert_eq!(sender.get_tally(Duration::ZERO).await, (tally, true));
        assert_eq!(sender.get_tally(Duration::ZERO).await, (tally, false));
    }

    #[tokio::test]
    async fn dropping_withdraws_the_announcement() {
        let loopback = Loopback::new();
        let events = loopback.subscribe(&["public"], &[]).expect("subscribed");

        let sender = Sender::with_discovery(Default::default(), Arc::new(loopback.clone()))
            .expect("created within a runtime");
        let name = sender.source().name.clone();
        drop(sender);

        let events = events.try_iter().collect::<Vec<_>>();
        assert_eq!(events.last(), Some(&discovery::Event::Removed(name)));
    }
}
