//! Framed duplex link: one JSON frame per line over TCP, optionally
//! wrapped in mutual TLS.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;

use thiserror::Error;

use crate::protocol::{ClientRequest, ServerFrame};

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("link closed by peer")]
    Closed,
    #[error("invalid member address: {0}")]
    BadAddress(String),
}

trait Io: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

/// Reading half of a link.
pub struct LinkReader {
    reader: BufReader<ReadHalf<Box<dyn Io>>>,
}

impl LinkReader {
    /// Await the next frame from the cluster.
    ///
    /// # Errors
    /// `Closed` on clean EOF, `Io`/`Codec` otherwise.
    pub async fn recv(&mut self) -> Result<ServerFrame, TransportError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(TransportError::Closed);
            }
            let frame = line.trim();
            if frame.is_empty() {
                continue;
            }
            return Ok(serde_json::from_str(frame)?);
        }
    }
}

/// Writing half of a link.
pub struct LinkWriter {
    writer: WriteHalf<Box<dyn Io>>,
}

impl LinkWriter {
    /// Send one frame.
    ///
    /// # Errors
    /// Returns error if serialization or the write fails.
    pub async fn send(&mut self, request: &ClientRequest) -> Result<(), TransportError> {
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// A live duplex link to one cluster member.
pub struct Link {
    reader: LinkReader,
    writer: LinkWriter,
}

impl Link {
    /// Open a link to `addr` (`host:port`), performing the TLS handshake
    /// when a connector is supplied.
    ///
    /// # Errors
    /// Returns error if the connect or handshake fails.
    pub async fn open(addr: &str, tls: Option<&TlsConnector>) -> Result<Self, TransportError> {
        let tcp = TcpStream::connect(addr).await?;
        let stream: Box<dyn Io> = match tls {
            Some(connector) => {
                let host = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
                let server_name = ServerName::try_from(host.to_owned())
                    .map_err(|_| TransportError::BadAddress(addr.to_owned()))?;
                Box::new(connector.connect(server_name, tcp).await?)
            }
            None => Box::new(tcp),
        };
        tracing::debug!(addr, secured = tls.is_some(), "link opened");
        let (read, write) = tokio::io::split(stream);
        Ok(Self {
            reader: LinkReader {
                reader: BufReader::new(read),
            },
            writer: LinkWriter { writer: write },
        })
    }

    /// Split into independently owned halves.
    #[must_use]
    pub fn split(self) -> (LinkReader, LinkWriter) {
        (self.reader, self.writer)
    }

    /// Send one frame.
    ///
    /// # Errors
    /// See [`LinkWriter::send`].
    pub async fn send(&mut self, request: &ClientRequest) -> Result<(), TransportError> {
        self.writer.send(request).await
    }

    /// Await the next frame.
    ///
    /// # Errors
    /// See [`LinkReader::recv`].
    pub async fn recv(&mut self) -> Result<ServerFrame, TransportError> {
        self.reader.recv().await
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn frames_cross_a_plain_link() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();

            let line = lines.next_line().await.unwrap().unwrap();
            let request: ClientRequest = serde_json::from_str(&line).unwrap();
            assert!(matches!(request, ClientRequest::Ping));

            write.write_all(b"{\"type\":\"pong\"}\n").await.unwrap();
        });

        let mut link = Link::open(&addr, None).await.unwrap();
        link.send(&ClientRequest::Ping).await.unwrap();
        assert!(matches!(link.recv().await.unwrap(), ServerFrame::Pong));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn peer_close_surfaces_as_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut link = Link::open(&addr, None).await.unwrap();
        assert!(matches!(
            link.recv().await,
            Err(TransportError::Closed)
        ));

        server.await.unwrap();
    }
}
