use std::net::SocketAddr;

use tokio::{
    io::{AsyncWriteExt, BufReader, BufWriter},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};

use super::{
    frame::{text::Metadata, Frame},
    Packet,
};
use crate::Result;

/// A connection to a peer, speaking in [`Frame`]s.
#[derive(Debug)]
pub struct Stream {
    reader: Reader,
    writer: Writer,
}

impl Stream {
    pub async fn connect(addrs: &[SocketAddr]) -> Result<Self> {
        Ok(TcpStream::connect(addrs).await?.try_into()?)
    }

    pub async fn recv(&mut self) -> Result<Frame> {
        self.reader.recv().await
    }

    pub async fn send(&mut self, frame: &Frame) -> Result {
        self.writer.send(frame).await
    }

    /// Retrieve the next message and convert it to [`Metadata`] if possible, discarding otherwise.
    pub async fn metadata(&mut self) -> Result<Option<Metadata>> {
        match self.recv().await? {
            Frame::Text(block) => Ok(Metadata::from_block(&block).ok()),
            _ => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.reader.peer
    }

    /// Separate the stream in halves, to be driven from independent tasks.
    pub fn into_split(self) -> (Reader, Writer) {
        (self.reader, self.writer)
    }
}

impl std::convert::TryFrom<TcpStream> for Stream {
    type Error = std::io::Error;

    fn try_from(stream: TcpStream) -> Result<Self, Self::Error> {
        stream.set_nodelay(true)?;

        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            reader: Reader {
                inner: BufReader::new(reader),
                peer,
            },
            writer: Writer {
                inner: BufWriter::new(writer),
                peer,
            },
        })
    }
}

/// The receiving half of a [`Stream`].
#[derive(Debug)]
pub struct Reader {
    inner: BufReader<OwnedReadHalf>,
    peer: SocketAddr,
}

impl Reader {
    pub async fn recv(&mut self) -> Result<Frame> {
        let frame = Packet::read(&mut self.inner).await?.into_frame()?;

        tracing::trace!("Receiving frame from `{}`: {frame:?}", self.peer);

        Ok(frame)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

/// The sending half of a [`Stream`].
#[derive(Debug)]
pub struct Writer {
    inner: BufWriter<OwnedWriteHalf>,
    peer: SocketAddr,
}

impl Writer {
    pub async fn send(&mut self, frame: &Frame) -> Result {
        tracing::trace!("Sending frame to `{}`: {frame:?}", self.peer);

        Packet::from_frame(frame)?.write(&mut self.inner).await?;

        Ok(self.inner.flush().await?)
    }

    /// Send an already encoded [`Packet`], see [`Packet::encode`].
    pub async fn send_raw(&mut self, packet: &[u8]) -> Result {
        self.inner.write_all(packet).await?;

        Ok(self.inner.flush().await?)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}
