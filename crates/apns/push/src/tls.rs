//! TLS connections to the gateway.

use std::time::Duration;

use apns_core::Endpoint;
use apns_crypto::Identity;
use color_eyre::eyre::WrapErr as _;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;

use crate::{Connection, ConnectionProvider};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens certificate-authenticated TLS connections.
pub struct TlsProvider {
    connector: TlsConnector,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl TlsProvider {
    /// Create a provider presenting `identity` to the gateway.
    pub fn new(identity: &Identity) -> color_eyre::eyre::Result<Self> {
        Ok(Self {
            connector: TlsConnector::from(identity.client_config()?),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    /// Bound on TCP connect; the TLS handshake is not included.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound on a single blocking read once data is known to be arriving.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Open a connection to the feedback service of `endpoint`.
    pub async fn open_feedback(
        &self,
        endpoint: Endpoint,
    ) -> color_eyre::eyre::Result<TlsConnection> {
        self.connect(endpoint.feedback()).await
    }

    async fn connect(
        &self,
        (host, port): (&'static str, u16),
    ) -> color_eyre::eyre::Result<TlsConnection> {
        let tcp = tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| color_eyre::eyre::eyre!("timed out connecting to {}:{}", host, port))?
            .wrap_err_with(|| format!("failed to connect to {}:{}", host, port))?;
        tcp.set_nodelay(true).wrap_err("failed to set TCP_NODELAY")?;

        let server_name = ServerName::try_from(host).wrap_err("invalid server name")?;
        let stream = self
            .connector
            .connect(server_name, tcp)
            .await
            .wrap_err_with(|| format!("TLS handshake with {} failed", host))?;

        tracing::debug!(host, port, "TLS connection established");

        Ok(TlsConnection::new(stream, self.read_timeout))
    }
}

impl ConnectionProvider for TlsProvider {
    type Connection = TlsConnection;

    async fn open(&self, endpoint: Endpoint) -> color_eyre::eyre::Result<TlsConnection> {
        self.connect(endpoint.gateway()).await
    }
}

/// A TLS stream with a small look-ahead buffer, so a readiness check can
/// consume bytes without losing them.
pub struct TlsConnection<S = TlsStream<TcpStream>> {
    stream: S,
    lookahead: Vec<u8>,
    eof: bool,
    read_timeout: Duration,
}

impl<S> TlsConnection<S> {
    /// Wrap an established stream. `read_timeout` bounds each read in
    /// [`Connection::read_exact`].
    pub fn new(stream: S, read_timeout: Duration) -> Self {
        Self {
            stream,
            lookahead: Vec::new(),
            eof: false,
            read_timeout,
        }
    }
}

impl<S> Connection for TlsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes).await
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush().await
    }

    async fn readable(&mut self, timeout: Duration) -> std::io::Result<bool> {
        if !self.lookahead.is_empty() || self.eof {
            return Ok(true);
        }

        // `timeout` polls the read once before checking the deadline, so a
        // zero timeout still picks up data that already arrived.
        let mut buf = [0u8; 64];
        match tokio::time::timeout(timeout, self.stream.read(&mut buf)).await {
            Err(_) => Ok(false),
            Ok(Ok(0)) => {
                self.eof = true;
                Ok(true)
            }
            Ok(Ok(n)) => {
                self.lookahead.extend_from_slice(&buf[..n]);
                Ok(true)
            }
            Ok(Err(e)) => Err(e),
        }
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let buffered = self.lookahead.len().min(buf.len());
        buf[..buffered].copy_from_slice(&self.lookahead[..buffered]);
        self.lookahead.drain(..buffered);

        let mut filled = buffered;
        while filled < buf.len() && !self.eof {
            let read = self.stream.read(&mut buf[filled..]);
            match tokio::time::timeout(self.read_timeout, read).await {
                Err(_) => break,
                Ok(Ok(0)) => self.eof = true,
                Ok(Ok(n)) => filled += n,
                Ok(Err(e)) => return Err(e),
            }
        }

        Ok(filled)
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!(error = %e, "TLS shutdown failed");
        }
    }
}
