use std::time::Duration;

#[cfg(doc)]
use super::Sender;

/// Configuration for the [`Sender`] structure.
#[derive(Debug, Clone)]
pub struct Config<'s> {
    /// Sender name to advertise over the network.
    pub name: &'s str,

    /// Sender groups to advertise over the network, defaults to `public`.
    pub groups: Option<&'s [&'s str]>,

    /// Whether video submission is paced to the frame rate of the frames.
    pub clock_video: bool,

    /// Whether audio submission is paced to the duration of the frames.
    pub clock_audio: bool,

    /// Count of packets retained per receiver before submission waits for it.
    pub queue: usize,

    /// Count of inbound metadata frames retained until the oldest is dropped.
    pub metadata_queue: usize,

    /// Time allotted to receivers to complete the handshake.
    pub handshake_timeout: Duration,
}

impl Default for Config<'_> {
    fn default() -> Self {
        Self {
            name: "sender",
            groups: None,
            clock_video: true,
            clock_audio: true,
            queue: 8,
            metadata_queue: 32,
            handshake_timeout: Duration::from_secs(3),
        }
    }
}
