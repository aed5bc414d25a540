use std::time::Duration;

use crate::{
    io::{
        frame::{
            text::{self, Metadata},
            Frame,
        },
        Stream,
    },
    Error, Result,
};

#[cfg(doc)]
use super::Sender;

/// A receiver connected to a [`Sender`], as it presented itself.
#[derive(Debug, Clone)]
pub struct Peer {
    pub version: text::Version,
    pub identify: text::Identify,

    /// Streams the receiver asked for, nothing is sent on the others.
    pub streams: text::EnabledStreams,

    pub quality: text::VideoQuality,
    pub color: Option<text::ColorFormat>,

    /// Last tally reported by the receiver.
    pub tally: text::Tally,
}

/// What a receiver told us so far during the handshake.
#[derive(Default)]
struct Partial {
    version: Option<text::Version>,
    identify: Option<text::Identify>,
    streams: Option<text::EnabledStreams>,
    video: Option<text::Video>,
    tally: text::Tally,
}

impl Partial {
    fn record(&mut self, message: Metadata) {
        match message {
            Metadata::Version(version) => self.version = Some(version),
            Metadata::Identify(identify) => self.identify = Some(identify),
            Metadata::EnabledStreams(streams) => self.streams = Some(streams),
            Metadata::Video(video) => self.video = Some(video),
            Metadata::Tally(tally) => self.tally = tally,
            other => tracing::trace!("Ignoring {other:?} before the end of the handshake"),
        }
    }

    fn complete(&self) -> Option<Peer> {
        Some(Peer {
            version: self.version.clone()?,
            identify: self.identify.clone()?,
            streams: self.streams.clone()?,
            quality: self.video.as_ref().map(|video| video.quality).unwrap_or_default(),
            color: self.video.as_ref().and_then(|video| video.color),
            tally: self.tally,
        })
    }
}

impl Peer {
    async fn exchange(stream: &mut Stream, name: &str) -> Result<Self> {
        for greeting in [Frame::version()?, Frame::identify(name)?] {
            stream.send(&greeting).await?;
        }

        let mut partial = Partial::default();
        loop {
            if let Some(message) = stream.metadata().await? {
                partial.record(message);
            }

            if let Some(peer) = partial.complete() {
                tracing::debug!("Receiver `{}` joined: {peer:?}", stream.peer_addr());

                break Ok(peer);
            }
        }
    }

    /// Greet the receiver and wait for it to present itself, for up to `timeout`.
    pub(super) async fn handshake(
        stream: &mut Stream,
        name: &str,
        timeout: Duration,
    ) -> Result<Self> {
        crate::timeout(timeout, Self::exchange(stream, name))
            .await
            .ok_or(Error::Handshake)?
    }
}
