//! Opening byte streams to the car controller.
//!
//! Finding the physical device is not this crate's job. A [Connector] names its
//! candidate endpoints and opens a duplex stream to one of them on request; the link
//! runs the handshake on top and moves on to the next candidate if it fails.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::LinkSettings;

/// Anything the link can read lines from and write frames to.
pub trait LinkStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> LinkStream for T {}

/// Boxed stream handed from a [Connector] to the link.
pub type BoxedStream = Box<dyn LinkStream>;

/// Source of streams to the car controller.
pub trait Connector: Send + 'static {
    /// Endpoints to try for the next connection attempt, in preference order.
    fn candidates(&mut self) -> Vec<String>;

    /// Opens a stream to one endpoint returned by [Connector::candidates].
    fn open<'a>(&'a mut self, endpoint: &'a str) -> BoxFuture<'a, io::Result<BoxedStream>>;
}

/// Connects over TCP to a list of candidate endpoints (a serial-to-TCP bridge in deployment).
pub struct TcpConnector {
    endpoints: Vec<String>,
    connect_timeout: Duration,
}

impl TcpConnector {
    /// ## Parameters
    /// `endpoints`: `host:port` candidates, tried in order
    /// `settings`: The TCP connect is bounded by [LinkSettings::handshake_timeout]
    pub fn new(endpoints: Vec<String>, settings: &LinkSettings) -> Self {
        Self { endpoints, connect_timeout: settings.handshake_timeout() }
    }

    #[allow(missing_docs)]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Connector for TcpConnector {
    fn candidates(&mut self) -> Vec<String> {
        self.endpoints.clone()
    }

    fn open<'a>(&'a mut self, endpoint: &'a str) -> BoxFuture<'a, io::Result<BoxedStream>> {
        Box::pin(async move {
            let stream = timeout(self.connect_timeout, TcpStream::connect(endpoint))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

/// Connector over ready-made streams, one per connection attempt.
///
/// Plugs in streams opened elsewhere, e.g. `tokio::io::duplex` ends in tests.
pub struct QueuedConnector {
    queue: VecDeque<(String, Option<BoxedStream>)>,
}

impl QueuedConnector {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self { queue: VecDeque::new() }
    }

    /// Queues one stream as the next connection attempt.
    pub fn push(&mut self, name: impl Into<String>, stream: impl LinkStream + 'static) {
        self.queue.push_back((name.into(), Some(Box::new(stream))));
    }

    /// Queues an attempt whose endpoint refuses the connection.
    pub fn push_unreachable(&mut self, name: impl Into<String>) {
        self.queue.push_back((name.into(), None));
    }
}

impl Default for QueuedConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for QueuedConnector {
    fn candidates(&mut self) -> Vec<String> {
        self.queue.front().map(|(name, _)| vec![name.clone()]).unwrap_or_default()
    }

    fn open<'a>(&'a mut self, endpoint: &'a str) -> BoxFuture<'a, io::Result<BoxedStream>> {
        let next = self.queue.pop_front();
        Box::pin(async move {
            match next {
                Some((_, Some(stream))) => Ok(stream),
                _ => Err(io::Error::new(io::ErrorKind::ConnectionRefused, format!("{} refused", endpoint))),
            }
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_connector_uses_configured_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let settings = LinkSettings { handshake_timeout_ms: 250, ..LinkSettings::default() };
        let mut connector = TcpConnector::new(vec![addr.clone()], &settings);
        assert_eq!(connector.connect_timeout(), Duration::from_millis(250));
        assert_eq!(connector.candidates(), vec![addr.clone()]);

        assert!(connector.open(&addr).await.is_ok());
        let (_peer, _) = listener.accept().await.unwrap();
    }

    #[tokio::test]
    async fn queued_connector_refuses_unreachable_entries() {
        let mut connector = QueuedConnector::new();
        connector.push_unreachable("gone");
        assert_eq!(connector.candidates(), vec!["gone".to_string()]);
        let err = connector.open("gone").await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        assert!(connector.candidates().is_empty());
    }
}
