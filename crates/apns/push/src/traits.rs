//! Connection traits.

use std::time::Duration;

use apns_core::Endpoint;

/// Duplex byte stream to a gateway.
#[trait_variant::make(Send)]
pub trait Connection: Send {
    /// Write all of `bytes`.
    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Flush buffered writes to the peer.
    async fn flush(&mut self) -> std::io::Result<()>;

    /// Wait up to `timeout` for readable data or end of stream.
    ///
    /// A zero timeout checks once without waiting.
    async fn readable(&mut self, timeout: Duration) -> std::io::Result<bool>;

    /// Fill `buf`, returning how many bytes were read. Fewer than `buf.len()`
    /// means the stream ended first.
    async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Shut the connection down.
    async fn close(&mut self);
}

/// Opens authenticated gateway connections.
#[trait_variant::make(Send)]
pub trait ConnectionProvider: Send + Sync {
    type Connection: Connection;

    /// Open a connection to the notification gateway of `endpoint`.
    async fn open(&self, endpoint: Endpoint) -> color_eyre::eyre::Result<Self::Connection>;
}
