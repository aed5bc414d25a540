use thiserror::Error;

/// The error types that can occur when manipulating this crate.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Mdns(#[from] mdns_sd::Error),

    #[error(transparent)]
    Frame(#[from] binrw::Error),

    #[error(transparent)]
    Xml(#[from] quick_xml::DeError),

    #[error(transparent)]
    ClosedChannel(#[from] flume::RecvError),

    /// The instance was created outside of a `tokio` runtime.
    #[error(transparent)]
    Runtime(#[from] tokio::runtime::TryCurrentError),

    /// The peer is not, or no longer, connected.
    #[error("The peer is disconnected")]
    Disconnected,

    /// The peer did not complete the handshake in the allotted time.
    #[error("The peer did not complete the handshake in time")]
    Handshake,

    /// A buffer was returned to an instance that did not hand it out,
    /// or was returned more than once.
    #[error("The buffer was not captured from this instance, or was already freed")]
    NotCaptured,

    /// The frame does not describe a coherent buffer.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// The packet announced an unknown frame kind.
    #[error("Unknown frame kind `{0}`")]
    UnknownFrameKind(u16),

    /// The packet announced a size larger than what we accept.
    #[error("Packet of {0} bytes exceeds the maximum packet size")]
    Oversized(usize),
}

/// A handy [`std::result::Result`] type alias bounding the [`enum@Error`] struct as `E`.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;
