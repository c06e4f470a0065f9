//! Browser native-messaging bridge.
//!
//! The browser talks to the host over stdin/stdout. Every message is a JSON
//! object preceded by its length as a 4-byte little-endian integer. Inbound
//! messages carry the requester id next to the request fields:
//!
//! ```text
//! {"requester":"tab-7","type":"fetchFields","url":"https://a.io","keys":["login"]}
//! ```
//!
//! and every event is sent back the same way, tagged with the requester it
//! belongs to.

use std::collections::HashSet;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use mp_core::{ClientEvent, ClientRequest, MpError, RequesterId, Result, SessionHandle};

/// Largest message the browser may send to a native host.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// A request as it arrives from the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inbound {
    pub requester: RequesterId,
    #[serde(flatten)]
    pub request: ClientRequest,
}

/// An event on its way to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outbound {
    pub requester: RequesterId,
    #[serde(flatten)]
    pub event: ClientEvent,
}

/// Native-messaging framing: 4-byte little-endian length prefix.
pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .little_endian()
        .length_field_length(4)
        .max_frame_length(MAX_MESSAGE_SIZE)
        .new_codec()
}

/// Relay messages between the browser and the session until `input` ends.
pub async fn run<R, W>(handle: SessionHandle, input: R, output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut reader = FramedRead::new(input, codec());
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Outbound>();
    let writer = tokio::spawn(write_loop(FramedWrite::new(output, codec()), out_rx));

    let mut known: HashSet<RequesterId> = HashSet::new();
    while let Some(message) = reader.next().await {
        let message = message?;
        let inbound: Inbound = match serde_json::from_slice(&message) {
            Ok(m) => m,
            Err(e) => {
                warn!("dropping malformed message ({} bytes): {e}", message.len());
                continue;
            }
        };

        if known.insert(inbound.requester.clone()) {
            let events = handle.register(inbound.requester.clone()).await?;
            tokio::spawn(forward(inbound.requester.clone(), events, out_tx.clone()));
            debug!("new requester {}", inbound.requester);
        }
        handle.submit(inbound.requester, inbound.request).await?;
    }

    info!("browser closed the pipe");
    for requester in known {
        let _ = handle.unregister(requester).await;
    }
    drop(out_tx);
    writer
        .await
        .map_err(|e| MpError::Other(format!("bridge writer: {e}")))?
}

/// Tag one requester's events and hand them to the writer.
async fn forward(
    requester: RequesterId,
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
    out: mpsc::UnboundedSender<Outbound>,
) {
    while let Some(event) = events.recv().await {
        let outbound = Outbound {
            requester: requester.clone(),
            event,
        };
        if out.send(outbound).is_err() {
            break;
        }
    }
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, LengthDelimitedCodec>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        let body = serde_json::to_vec(&outbound)?;
        sink.send(bytes::Bytes::from(body)).await?;
    }
    Ok(())
}
