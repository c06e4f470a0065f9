//! Frame transport over a TCP stream, used to talk to device emulators.
//!
//! The socket is split into a writer task and a reader task joined to the
//! session by channels, which keeps [`Transport::receive`] cancel-safe.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::fmt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use super::{ConnectionId, DeviceInfo, Transport};
use crate::codec::FrameCodec;
use crate::error::{MpError, Result};
use crate::frame::Frame;

/// Frames buffered in each direction.
const CHANNEL_DEPTH: usize = 64;

/// Address of an emulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    host: String,
    port: u16,
}

impl StreamTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Parse `host:port`.
    pub fn parse(addr: &str) -> Result<Self> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| MpError::Other(format!("missing port in {addr:?}")))?;
        let port = port
            .parse()
            .map_err(|_| MpError::Other(format!("bad port in {addr:?}")))?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

struct OpenStream {
    tx: mpsc::Sender<Frame>,
    rx: mpsc::Receiver<Frame>,
    tasks: [JoinHandle<()>; 2],
}

impl OpenStream {
    fn new(stream: TcpStream) -> Self {
        let (mut net_writer, mut net_reader) = Framed::new(stream, FrameCodec).split();

        // Session -> Network
        let (user_tx, mut network_rx) = mpsc::channel::<Frame>(CHANNEL_DEPTH);

        // Network -> Session
        let (network_tx, user_rx) = mpsc::channel(CHANNEL_DEPTH);

        let writer = tokio::spawn(async move {
            while let Some(frame) = network_rx.recv().await {
                if let Err(e) = net_writer.send(frame).await {
                    warn!("stream write error: {e}");
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(result) = net_reader.next().await {
                match result {
                    Ok(frame) => {
                        if network_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("stream read error: {e}");
                        break;
                    }
                }
            }
        });

        Self {
            tx: user_tx,
            rx: user_rx,
            tasks: [writer, reader],
        }
    }
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// A [`Transport`] that reaches a single emulated device over TCP.
pub struct StreamTransport {
    target: StreamTarget,
    open: Option<OpenStream>,
    next_id: u64,
}

impl StreamTransport {
    pub fn new(target: StreamTarget) -> Self {
        Self {
            target,
            open: None,
            next_id: 1,
        }
    }

    pub fn target(&self) -> &StreamTarget {
        &self.target
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn enumerate(&mut self) -> Result<Vec<DeviceInfo>> {
        let mut device = DeviceInfo::new(self.target.to_string());
        device.product = Some("emulator".into());
        Ok(vec![device])
    }

    async fn connect(&mut self, device: &DeviceInfo) -> Result<ConnectionId> {
        self.open = None;
        let stream = TcpStream::connect(device.path.as_str())
            .await
            .map_err(|e| MpError::TransportFailure(format!("connect {}: {e}", device.path)))?;
        stream.set_nodelay(true)?;
        self.open = Some(OpenStream::new(stream));

        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        debug!("stream connection {id} to {}", device.path);
        Ok(id)
    }

    async fn disconnect(&mut self) {
        if self.open.take().is_some() {
            debug!("stream to {} closed", self.target);
        }
    }

    async fn send(&mut self, frame: &Frame) -> Result<()> {
        let open = self
            .open
            .as_ref()
            .ok_or_else(|| MpError::TransportFailure("not connected".into()))?;
        open.tx
            .send(*frame)
            .await
            .map_err(|_| MpError::TransportFailure("stream writer stopped".into()))
    }

    async fn receive(&mut self) -> Result<Frame> {
        let open = self
            .open
            .as_mut()
            .ok_or_else(|| MpError::TransportFailure("not connected".into()))?;
        open.rx
            .recv()
            .await
            .ok_or_else(|| MpError::TransportFailure("stream closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_target() {
        let target = StreamTarget::parse("127.0.0.1:7777").unwrap();
        assert_eq!(target.host(), "127.0.0.1");
        assert_eq!(target.port(), 7777);
        assert_eq!(target.to_string(), "127.0.0.1:7777");
    }

    #[test]
    fn parse_target_rejects_missing_port() {
        assert!(StreamTarget::parse("localhost").is_err());
        assert!(StreamTarget::parse("localhost:http").is_err());
    }

    #[tokio::test]
    async fn send_without_connection_fails() {
        let mut transport = StreamTransport::new(StreamTarget::new("127.0.0.1", 1));
        assert!(!transport.is_open());
        let err = transport
            .send(&Frame::command(crate::Command::Version))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn enumerate_reports_target() {
        let mut transport = StreamTransport::new(StreamTarget::new("localhost", 4242));
        let devices = transport.enumerate().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].path, "localhost:4242");
    }
}
