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

use super::Config;

#[cfg(doc)]
use super::Recv;

/// The sender a [`Recv`] is connected to, as it presented itself.
#[derive(Debug, Clone)]
pub struct Peer {
    pub version: text::Version,
    pub identify: text::Identify,
}

/// The messages opening a connection from `config`, ending with our stream preferences.
fn greetings(config: &Config) -> Result<[Frame; 4]> {
    Ok([
        Frame::version()?,
        Frame::identify(config.name.as_deref().unwrap_or("receiver"))?,
        Frame::video_meta(config.quality(), config.color)?,
        Frame::enabled_streams(config.wants_video(), config.wants_audio())?,
    ])
}

impl Peer {
    async fn exchange(stream: &mut Stream, config: &Config) -> Result<Self> {
        for greeting in greetings(config)? {
            stream.send(&greeting).await?;
        }

        let (mut version, mut identify) = (None, None);
        while version.is_none() || identify.is_none() {
            match stream.metadata().await? {
                Some(Metadata::Version(value)) => version = Some(value),
                Some(Metadata::Identify(value)) => identify = Some(value),
                _ => (),
            }
        }

        let peer = Self {
            version: version.ok_or(Error::Handshake)?,
            identify: identify.ok_or(Error::Handshake)?,
        };
        tracing::debug!("Joined sender `{}`: {peer:?}", stream.peer_addr());

        Ok(peer)
    }

    /// Greet the sender and wait for it to present itself, for up to the configured timeout.
    pub(super) async fn handshake(stream: &mut Stream, config: &Config) -> Result<Self> {
        crate::timeout(config.handshake_timeout, Self::exchange(stream, config))
            .await
            .ok_or(Error::Handshake)?
    }
}
