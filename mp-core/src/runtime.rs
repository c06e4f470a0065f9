//! Async driver that runs a [`Session`] against a [`Transport`].
//!
//! One task owns both. It waits on client operations, the keepalive tick,
//! the session's next deadline and (while connected) the next frame from the
//! device, feeds whichever comes first into the session and then performs
//! the resulting actions in order. Clients talk to it through a cloneable
//! [`SessionHandle`].

use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::bulk::{ExportKind, ImportTarget, Maintenance, TransferOutcome};
use crate::client::{ClientEvent, ClientRequest, RequesterId};
use crate::config::SessionConfig;
use crate::error::{MpError, Result};
use crate::protocol::FlashGeometry;
use crate::sink::ExportSink;
use crate::state::{Action, Session};
use crate::transport::Transport;

/// Depth of the operation channel between handles and the runtime.
const OP_CHANNEL_DEPTH: usize = 64;

/// Sleep target used when no deadline is armed.
const IDLE_WAKE: Duration = Duration::from_secs(3600);

/// How often [`SessionHandle::wait_ready`] polls the session.
const READY_POLL: Duration = Duration::from_millis(100);

/// Session time as seen by the runtime. Follows tokio's clock so paused-time
/// tests stay deterministic.
fn now() -> std::time::Instant {
    time::Instant::now().into_std()
}

// ── Reports ──────────────────────────────────────────────────────

/// Snapshot of the session for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: String,
    pub connected: bool,
    pub device: Option<String>,
    pub version: Option<String>,
    pub geometry: Option<FlashGeometry>,
    pub pending_requests: usize,
    pub transfer: Option<String>,
}

impl SessionStatus {
    /// Connected and identified by a VERSION reply.
    pub fn is_ready(&self) -> bool {
        self.connected && self.version.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub kind: ExportKind,
    /// Bytes written to the sink.
    pub size: usize,
    /// Bytes that came from the device.
    pub received: usize,
    /// blake3 of the written dump, hex.
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub target: ImportTarget,
    pub bytes: usize,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotReport {
    pub slot: u8,
    pub bytes: usize,
    pub digest: String,
}

fn digest(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

// ── Handle ───────────────────────────────────────────────────────

enum TransferStart {
    Export(ExportKind),
    Import(ImportTarget, Bytes),
    Upload(Bytes),
    Maintenance(Maintenance),
}

enum Op {
    Register {
        requester: RequesterId,
        events: mpsc::UnboundedSender<ClientEvent>,
    },
    Unregister(RequesterId),
    Submit {
        requester: RequesterId,
        request: ClientRequest,
    },
    Transfer {
        start: TransferStart,
        reply: oneshot::Sender<Result<TransferOutcome>>,
    },
    Status(oneshot::Sender<SessionStatus>),
    Shutdown,
}

/// Cloneable access to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    ops: mpsc::Sender<Op>,
}

impl std::fmt::Debug for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::Register { requester, .. } => write!(f, "Register({requester})"),
            Op::Unregister(r) => write!(f, "Unregister({r})"),
            Op::Submit { requester, .. } => write!(f, "Submit({requester})"),
            Op::Transfer { .. } => write!(f, "Transfer"),
            Op::Status(_) => write!(f, "Status"),
            Op::Shutdown => write!(f, "Shutdown"),
        }
    }
}

impl SessionHandle {
    /// Open the event channel for `requester`. Events for a requester with
    /// no open channel are dropped.
    pub async fn register(
        &self,
        requester: RequesterId,
    ) -> Result<mpsc::UnboundedReceiver<ClientEvent>> {
        let (events, rx) = mpsc::unbounded_channel();
        self.ops.send(Op::Register { requester, events }).await?;
        Ok(rx)
    }

    pub async fn unregister(&self, requester: RequesterId) -> Result<()> {
        self.ops.send(Op::Unregister(requester)).await?;
        Ok(())
    }

    /// Hand a request to the session. Answers arrive on the requester's
    /// event channel.
    pub async fn submit(&self, requester: RequesterId, request: ClientRequest) -> Result<()> {
        self.ops.send(Op::Submit { requester, request }).await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        let (reply, rx) = oneshot::channel();
        self.ops.send(Op::Status(reply)).await?;
        Ok(rx.await?)
    }

    /// Wait until the device is connected and identified.
    pub async fn wait_ready(&self, limit: Duration) -> Result<SessionStatus> {
        let poll = async {
            loop {
                let status = self.status().await?;
                if status.is_ready() {
                    return Ok::<_, MpError>(status);
                }
                time::sleep(READY_POLL).await;
            }
        };
        time::timeout(limit, poll)
            .await
            .map_err(|_| MpError::NoDevice)?
    }

    /// Dump flash or EEPROM into `sink`.
    pub async fn export<S>(&self, kind: ExportKind, sink: &mut S) -> Result<ExportReport>
    where
        S: ExportSink + ?Sized,
    {
        match self.transfer(TransferStart::Export(kind)).await? {
            TransferOutcome::Exported {
                kind,
                data,
                received,
            } => {
                sink.write_dump(&data).await?;
                Ok(ExportReport {
                    kind,
                    size: data.len(),
                    received,
                    digest: digest(&data),
                })
            }
            other => Err(MpError::Other(format!("export ended with {other:?}"))),
        }
    }

    pub async fn import(&self, target: ImportTarget, data: Bytes) -> Result<ImportReport> {
        let hash = digest(&data);
        match self
            .transfer(TransferStart::Import(target, data))
            .await?
        {
            TransferOutcome::Imported { target, bytes } => Ok(ImportReport {
                target,
                bytes,
                digest: hash,
            }),
            other => Err(MpError::Other(format!("import ended with {other:?}"))),
        }
    }

    /// Store `data` in a new device slot.
    pub async fn upload_slot(&self, data: Bytes) -> Result<SlotReport> {
        let hash = digest(&data);
        match self.transfer(TransferStart::Upload(data)).await? {
            TransferOutcome::SlotWritten { slot, bytes } => Ok(SlotReport {
                slot,
                bytes,
                digest: hash,
            }),
            other => Err(MpError::Other(format!("upload ended with {other:?}"))),
        }
    }

    pub async fn maintenance(&self, op: Maintenance) -> Result<()> {
        self.transfer(TransferStart::Maintenance(op)).await.map(|_| ())
    }

    /// Stop the runtime. Pending clients are told `Disconnected`.
    pub async fn shutdown(&self) -> Result<()> {
        self.ops.send(Op::Shutdown).await?;
        Ok(())
    }

    async fn transfer(&self, start: TransferStart) -> Result<TransferOutcome> {
        let (reply, rx) = oneshot::channel();
        self.ops.send(Op::Transfer { start, reply }).await?;
        rx.await?
    }
}

// ── Runtime ──────────────────────────────────────────────────────

pub struct Runtime<T> {
    session: Session,
    transport: T,
    ops: mpsc::Receiver<Op>,
    clients: HashMap<RequesterId, mpsc::UnboundedSender<ClientEvent>>,
    transfer_waiter: Option<oneshot::Sender<Result<TransferOutcome>>>,
}

/// Start a runtime task for `transport`.
pub fn spawn<T>(transport: T, config: SessionConfig) -> (SessionHandle, JoinHandle<()>)
where
    T: Transport + 'static,
{
    let (runtime, handle) = Runtime::new(transport, config);
    (handle, tokio::spawn(runtime.run()))
}

impl<T: Transport> Runtime<T> {
    pub fn new(transport: T, config: SessionConfig) -> (Self, SessionHandle) {
        let (tx, rx) = mpsc::channel(OP_CHANNEL_DEPTH);
        let runtime = Self {
            session: Session::new(config),
            transport,
            ops: rx,
            clients: HashMap::new(),
            transfer_waiter: None,
        };
        (runtime, SessionHandle { ops: tx })
    }

    pub async fn run(mut self) {
        let mut keepalive = time::interval(self.session.config().keepalive_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("session runtime started");

        loop {
            self.perform_actions().await;

            let connected = self.session.is_connected();
            let deadline = self.session.next_deadline().map(time::Instant::from_std);
            let wake = deadline.unwrap_or_else(|| time::Instant::now() + IDLE_WAKE);

            tokio::select! {
                op = self.ops.recv() => match op {
                    Some(Op::Shutdown) | None => break,
                    Some(op) => self.handle_op(op),
                },
                _ = keepalive.tick() => self.session.on_keepalive(now()),
                _ = time::sleep_until(wake), if deadline.is_some() => {
                    self.session.on_timeout(now())
                }
                frame = self.transport.receive(), if connected => match frame {
                    Ok(frame) => self.session.on_frame(frame, now()),
                    Err(e) => self.session.on_transport_failure(&e, now()),
                },
            }
        }

        self.session.reset();
        self.perform_actions().await;
        self.transport.disconnect().await;
        info!("session runtime stopped");
    }

    fn handle_op(&mut self, op: Op) {
        match op {
            Op::Register { requester, events } => {
                debug!("client {requester} registered");
                self.clients.insert(requester, events);
            }
            Op::Unregister(requester) => {
                self.clients.remove(&requester);
            }
            Op::Submit { requester, request } => self.session.submit(requester, request, now()),
            Op::Transfer { start, reply } => {
                let now = now();
                let started = match start {
                    TransferStart::Export(kind) => self.session.start_export(kind, now),
                    TransferStart::Import(target, data) => {
                        self.session.start_import(target, data, now)
                    }
                    TransferStart::Upload(data) => self.session.start_slot_upload(data, now),
                    TransferStart::Maintenance(op) => self.session.start_maintenance(op, now),
                };
                match started {
                    Ok(()) => self.transfer_waiter = Some(reply),
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Op::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Op::Shutdown => {}
        }
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            phase: self.session.phase().to_string(),
            connected: self.session.is_connected(),
            device: self.session.device().map(|d| d.to_string()),
            version: self.session.version().map(String::from),
            geometry: self.session.geometry(),
            pending_requests: self.session.pending_requests(),
            transfer: self.session.transfer().map(|t| t.to_string()),
        }
    }

    /// Carry out queued session actions until none are left. Results of
    /// I/O are fed back into the session, which may queue more.
    async fn perform_actions(&mut self) {
        while let Some(action) = self.session.poll_action() {
            match action {
                Action::Discover => match self.transport.enumerate().await {
                    Ok(devices) => self.session.on_devices(devices, now()),
                    Err(e) => {
                        warn!("device enumeration failed: {e}");
                        self.session.on_devices(Vec::new(), now());
                    }
                },
                Action::Connect(device) => match self.transport.connect(&device).await {
                    Ok(id) => self.session.on_connected(id, now()),
                    Err(e) => self.session.on_connect_failed(&e, now()),
                },
                Action::Disconnect => self.transport.disconnect().await,
                Action::Send(frame) => {
                    if let Err(e) = self.transport.send(&frame).await {
                        self.session.on_transport_failure(&e, now());
                    }
                }
                Action::Notify { requester, event } => self.deliver(requester, event),
                Action::Transfer(result) => match self.transfer_waiter.take() {
                    Some(waiter) => {
                        let _ = waiter.send(result);
                    }
                    None => debug!("transfer ended with nobody waiting"),
                },
            }
        }
    }

    fn deliver(&mut self, requester: RequesterId, event: ClientEvent) {
        let gone = match self.clients.get(&requester) {
            Some(events) => events.send(event).is_err(),
            None => {
                debug!("no listener for {requester}, event dropped");
                false
            }
        };
        if gone {
            debug!("client {requester} went away");
            self.clients.remove(&requester);
        }
    }
}
