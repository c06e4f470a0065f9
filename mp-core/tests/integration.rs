//! Integration tests: the runtime driving a session against an emulated
//! device, in-memory and over a real TCP connection on localhost.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};
use tokio_util::codec::Framed;

use mp_core::protocol::string;
use mp_core::{
    ClientEvent, ClientRequest, Command, ConnectionId, DeviceInfo, ExportKind, FieldKey, Frame,
    FrameCodec, ImportTarget, Maintenance, MpError, RequesterId, SessionConfig, SessionHandle,
    StreamTarget, StreamTransport, Transport,
};

// ── Emulated device ──────────────────────────────────────────────

const FLASH_EXPORT_SIZE: usize = 103_488;

#[derive(Default, Clone)]
struct Credentials {
    login: Option<String>,
    password: Option<String>,
}

/// Just enough of the firmware to answer every command the session sends.
struct Emulator {
    plugged: bool,
    card: bool,
    muted: HashSet<u8>,
    contexts: HashMap<String, Credentials>,
    selected: Option<String>,
    eeprom: Vec<u8>,
    flash: Vec<u8>,
    export_offset: usize,
    imported: Vec<u8>,
    slots: Vec<Vec<u8>>,
    log: Vec<Frame>,
}

impl Emulator {
    fn new() -> Self {
        let mut contexts = HashMap::new();
        contexts.insert(
            "example.com".to_string(),
            Credentials {
                login: Some("alice".into()),
                password: Some("hunter2".into()),
            },
        );
        contexts.insert(
            "other.net".to_string(),
            Credentials {
                login: Some("bob".into()),
                password: Some("swordfish".into()),
            },
        );
        Self {
            plugged: true,
            card: true,
            muted: HashSet::new(),
            contexts,
            selected: None,
            eeprom: (0..1024).map(|i| (i % 251) as u8).collect(),
            flash: (0..FLASH_EXPORT_SIZE).map(|i| (i % 241) as u8).collect(),
            export_offset: 0,
            imported: Vec::new(),
            slots: Vec::new(),
            log: Vec::new(),
        }
    }

    fn respond(&mut self, frame: &Frame) -> Option<Frame> {
        self.log.push(*frame);
        if self.muted.contains(&frame.code()) {
            return None;
        }
        let command = frame.command_id().ok()?;
        let payload = frame.payload();
        let reply = |status: u8| Frame::encode(command, Some(&[status])).ok();

        match command {
            Command::Version => {
                let mut body = vec![1u8];
                body.extend_from_slice(b"v1.2\0");
                Frame::encode(command, Some(&body)).ok()
            }
            Command::Context => {
                if !self.card {
                    return reply(0x03);
                }
                let name = string::decode(payload);
                if self.contexts.contains_key(&name) {
                    self.selected = Some(name);
                    reply(0x01)
                } else {
                    self.selected = None;
                    reply(0x00)
                }
            }
            Command::AddContext => {
                self.contexts.insert(string::decode(payload), Credentials::default());
                reply(0x01)
            }
            Command::GetLogin | Command::GetPassword => {
                let creds = self.selected.as_ref().and_then(|c| self.contexts.get(c));
                let value = creds.and_then(|c| match command {
                    Command::GetLogin => c.login.clone(),
                    _ => c.password.clone(),
                });
                match value {
                    Some(v) => Frame::encode(command, Some(&string::encode(&v).ok()?)).ok(),
                    None => reply(0x00),
                }
            }
            Command::SetLogin | Command::SetPassword => {
                let selected = self.selected.clone()?;
                let creds = self.contexts.get_mut(&selected)?;
                let value = Some(string::decode(payload));
                match command {
                    Command::SetLogin => creds.login = value,
                    _ => creds.password = value,
                }
                reply(0x01)
            }
            Command::ExportEepromStart | Command::ExportFlashStart => reply(0x01),
            Command::ExportEeprom | Command::ExportFlash => {
                if payload.first() == Some(&0) {
                    self.export_offset = 0;
                }
                let source = if command == Command::ExportEeprom {
                    &self.eeprom
                } else {
                    &self.flash
                };
                let end = (self.export_offset + 62).min(source.len());
                if self.export_offset >= end {
                    let done = if command == Command::ExportEeprom {
                        Command::ExportEepromEnd
                    } else {
                        Command::ExportFlashEnd
                    };
                    return Some(Frame::command(done));
                }
                let chunk = source[self.export_offset..end].to_vec();
                self.export_offset = end;
                Frame::encode(command, Some(&chunk)).ok()
            }
            Command::ImportEepromBegin | Command::ImportFlashBegin | Command::ImportMediaStart => {
                self.imported.clear();
                reply(0x01)
            }
            Command::ImportEeprom | Command::ImportFlash | Command::ImportMedia => {
                self.imported.extend_from_slice(payload);
                reply(0x01)
            }
            Command::ImportEepromEnd | Command::ImportFlashEnd | Command::ImportMediaEnd => {
                reply(0x01)
            }
            Command::AllocateSlot => {
                self.slots.push(Vec::new());
                reply(self.slots.len() as u8)
            }
            Command::WriteSlot => {
                let (&slot, data) = payload.split_first()?;
                self.slots.get_mut(slot as usize - 1)?.extend_from_slice(data);
                reply(0x01)
            }
            Command::EraseEeprom | Command::EraseFlash | Command::EraseSmartcard => reply(0x01),
            Command::ResetCard => reply(0x00),
            _ => None,
        }
    }

    /// Context names sent with CONTEXT, in order.
    fn contexts_selected(&self) -> Vec<String> {
        self.log
            .iter()
            .filter(|f| f.code() == Command::Context as u8)
            .map(|f| string::decode(f.payload()))
            .collect()
    }
}

type Device = Arc<Mutex<Emulator>>;

/// In-memory transport wired straight to an [`Emulator`].
struct FakeTransport {
    device: Device,
    replies_tx: mpsc::UnboundedSender<Frame>,
    replies_rx: mpsc::UnboundedReceiver<Frame>,
    next_id: u64,
}

impl FakeTransport {
    fn new(device: Device) -> Self {
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        Self {
            device,
            replies_tx,
            replies_rx,
            next_id: 1,
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn enumerate(&mut self) -> mp_core::Result<Vec<DeviceInfo>> {
        let plugged = self.device.lock().unwrap().plugged;
        Ok(if plugged {
            vec![DeviceInfo::new("stale"), DeviceInfo::new("fake")]
        } else {
            Vec::new()
        })
    }

    async fn connect(&mut self, device: &DeviceInfo) -> mp_core::Result<ConnectionId> {
        assert_eq!(device.path, "fake", "the last enumerated device is used");
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        Ok(id)
    }

    async fn disconnect(&mut self) {
        while self.replies_rx.try_recv().is_ok() {}
    }

    async fn send(&mut self, frame: &Frame) -> mp_core::Result<()> {
        let reply = {
            let mut device = self.device.lock().unwrap();
            if !device.plugged {
                return Err(MpError::TransportFailure("device unplugged".into()));
            }
            device.respond(frame)
        };
        if let Some(reply) = reply {
            let _ = self.replies_tx.send(reply);
        }
        Ok(())
    }

    async fn receive(&mut self) -> mp_core::Result<Frame> {
        self.replies_rx
            .recv()
            .await
            .ok_or_else(|| MpError::TransportFailure("closed".into()))
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn start() -> (SessionHandle, Device) {
    let device = Arc::new(Mutex::new(Emulator::new()));
    let (handle, _task) = mp_core::spawn(FakeTransport::new(device.clone()), SessionConfig::default());
    (handle, device)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("timeout waiting for event")
        .expect("event channel closed")
}

fn fetch(url: &str) -> ClientRequest {
    ClientRequest::FetchFields {
        url: url.into(),
        keys: vec![FieldKey::Login, FieldKey::Password],
    }
}

fn credentials(login: &str, password: &str) -> ClientEvent {
    let mut fields = BTreeMap::new();
    fields.insert(FieldKey::Login, login.to_string());
    fields.insert(FieldKey::Password, password.to_string());
    ClientEvent::Credentials { fields }
}

// ── Connection lifecycle ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_connects_and_answers_ping() {
    let (handle, _device) = start();
    let status = assert_ok!(handle.wait_ready(Duration::from_secs(5)).await);
    assert_eq!(status.version.as_deref(), Some("v1.2"));
    assert_eq!(status.geometry.map(|g| g.page_count), Some(512));

    let ext = RequesterId::new("ext");
    let mut rx = handle.register(ext.clone()).await.unwrap();
    handle.submit(ext, ClientRequest::Ping).await.unwrap();
    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::Connected {
            version: "v1.2".into()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_unplug_tells_clients_disconnected() {
    let (handle, device) = start();
    handle.wait_ready(Duration::from_secs(5)).await.unwrap();
    device.lock().unwrap().card = false;

    let (a, b) = (RequesterId::new("a"), RequesterId::new("b"));
    let mut rx_a = handle.register(a.clone()).await.unwrap();
    let mut rx_b = handle.register(b.clone()).await.unwrap();
    handle.submit(a, fetch("https://example.com")).await.unwrap();
    handle.submit(b, fetch("https://other.net")).await.unwrap();
    assert_eq!(
        next_event(&mut rx_a).await,
        ClientEvent::CardPresent { state: false }
    );

    device.lock().unwrap().plugged = false;
    // the next keepalive probe fails
    assert_eq!(next_event(&mut rx_a).await, ClientEvent::Disconnected);
    assert_eq!(next_event(&mut rx_b).await, ClientEvent::Disconnected);

    let status = handle.status().await.unwrap();
    assert!(!status.connected);
    assert_eq!(status.pending_requests, 1);
    assert!(status.version.is_none());

    // plugging back in reconnects on a later keepalive and resumes b
    device.lock().unwrap().plugged = true;
    assert_ok!(handle.wait_ready(Duration::from_secs(10)).await);
    assert_eq!(
        next_event(&mut rx_b).await,
        ClientEvent::Connected {
            version: "v1.2".into()
        }
    );
    assert_eq!(
        next_event(&mut rx_b).await,
        ClientEvent::CardPresent { state: false }
    );
}

// ── Credential exchange ──────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_fetch_credentials() {
    let (handle, device) = start();
    let ext = RequesterId::new("ext");
    let mut rx = handle.register(ext.clone()).await.unwrap();
    handle.wait_ready(Duration::from_secs(5)).await.unwrap();

    handle
        .submit(ext, fetch("https://accounts.example.com/login"))
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::CardPresent { state: true }
    );
    assert_eq!(next_event(&mut rx).await, credentials("alice", "hunter2"));

    let device = device.lock().unwrap();
    let fields: Vec<u8> = device
        .log
        .iter()
        .map(Frame::code)
        .filter(|&c| c == Command::GetLogin as u8 || c == Command::GetPassword as u8)
        .collect();
    assert_eq!(
        fields,
        vec![Command::GetPassword as u8, Command::GetLogin as u8]
    );
}

#[tokio::test(start_paused = true)]
async fn test_update_creates_missing_context() {
    let (handle, device) = start();
    let ext = RequesterId::new("ext");
    let mut rx = handle.register(ext.clone()).await.unwrap();
    handle.wait_ready(Duration::from_secs(5)).await.unwrap();

    let mut fields = BTreeMap::new();
    fields.insert(FieldKey::Login, "carol".to_string());
    fields.insert(FieldKey::Password, "pa55".to_string());
    handle
        .submit(
            ext,
            ClientRequest::UpdateFields {
                url: "https://shop.fresh.org/signup".into(),
                fields,
            },
        )
        .await
        .unwrap();

    // unknown context, then selected after creation
    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::CardPresent { state: true }
    );
    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::CardPresent { state: true }
    );
    assert_eq!(next_event(&mut rx).await, ClientEvent::UpdateComplete);

    let device = device.lock().unwrap();
    let stored = device.contexts.get("fresh.org").cloned().unwrap_or_default();
    assert_eq!(stored.login.as_deref(), Some("carol"));
    assert_eq!(stored.password.as_deref(), Some("pa55"));
}

#[tokio::test(start_paused = true)]
async fn test_fetch_unknown_context() {
    let (handle, device) = start();
    let ext = RequesterId::new("ext");
    let mut rx = handle.register(ext.clone()).await.unwrap();
    handle.wait_ready(Duration::from_secs(5)).await.unwrap();

    handle.submit(ext, fetch("https://nowhere.io")).await.unwrap();
    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::CardPresent { state: true }
    );
    assert_eq!(next_event(&mut rx).await, ClientEvent::NoCredentials);
    assert!(!device.lock().unwrap().contexts.contains_key("nowhere.io"));
}

#[tokio::test(start_paused = true)]
async fn test_queue_runs_requests_in_order() {
    let (handle, device) = start();
    let (r1, r2) = (RequesterId::new("r1"), RequesterId::new("r2"));
    let mut rx1 = handle.register(r1.clone()).await.unwrap();
    let mut rx2 = handle.register(r2.clone()).await.unwrap();
    handle.wait_ready(Duration::from_secs(5)).await.unwrap();

    handle.submit(r1, fetch("https://example.com")).await.unwrap();
    handle.submit(r2, fetch("https://www.other.net")).await.unwrap();

    next_event(&mut rx1).await;
    assert_eq!(next_event(&mut rx1).await, credentials("alice", "hunter2"));
    next_event(&mut rx2).await;
    assert_eq!(next_event(&mut rx2).await, credentials("bob", "swordfish"));

    let device = device.lock().unwrap();
    assert_eq!(device.contexts_selected(), vec!["example.com", "other.net"]);

    // r2's CONTEXT only goes out after r1's last field
    let codes: Vec<u8> = device.log.iter().map(Frame::code).collect();
    let second_context = codes
        .iter()
        .rposition(|&c| c == Command::Context as u8)
        .unwrap();
    let first_login = codes
        .iter()
        .position(|&c| c == Command::GetLogin as u8)
        .unwrap();
    assert!(first_login < second_context);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_advances_queue_without_partial_data() {
    let (handle, device) = start();
    let (r1, r2) = (RequesterId::new("r1"), RequesterId::new("r2"));
    let mut rx1 = handle.register(r1.clone()).await.unwrap();
    let mut rx2 = handle.register(r2.clone()).await.unwrap();
    handle.wait_ready(Duration::from_secs(5)).await.unwrap();

    device.lock().unwrap().card = false;
    handle.submit(r1, fetch("https://example.com")).await.unwrap();
    handle.submit(r2, fetch("https://other.net")).await.unwrap();
    assert_eq!(
        next_event(&mut rx1).await,
        ClientEvent::CardPresent { state: false }
    );
    device.lock().unwrap().card = true;

    // r1 expires after 15 s, then r2 runs
    assert_eq!(
        next_event(&mut rx2).await,
        ClientEvent::CardPresent { state: true }
    );
    assert_eq!(next_event(&mut rx2).await, credentials("bob", "swordfish"));
    assert!(rx1.try_recv().is_err(), "expired request gets nothing more");
}

// ── Bulk transfers ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_eeprom_export() {
    let (handle, device) = start();
    handle.wait_ready(Duration::from_secs(5)).await.unwrap();

    let mut dump: Vec<u8> = Vec::new();
    let report = assert_ok!(handle.export(ExportKind::Eeprom, &mut dump).await);
    let expected = device.lock().unwrap().eeprom.clone();
    assert_eq!(dump, expected);
    assert_eq!(report.size, 1024);
    assert_eq!(report.received, 1024);
    assert_eq!(report.digest, blake3::hash(&expected).to_hex().to_string());
}

#[tokio::test(start_paused = true)]
async fn test_flash_export_skips_media_partition() {
    let (handle, device) = start();
    handle.wait_ready(Duration::from_secs(5)).await.unwrap();

    let mut dump: Vec<u8> = Vec::new();
    let report = handle.export(ExportKind::Flash, &mut dump).await.unwrap();
    assert_eq!(report.size, FLASH_EXPORT_SIZE);
    assert_eq!(dump, device.lock().unwrap().flash);
}

#[tokio::test(start_paused = true)]
async fn test_import_respects_pages() {
    let (handle, device) = start();
    handle.wait_ready(Duration::from_secs(5)).await.unwrap();

    let image: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
    let report = handle
        .import(ImportTarget::Eeprom, Bytes::from(image.clone()))
        .await
        .unwrap();
    assert_eq!(report.bytes, 300);

    let device = device.lock().unwrap();
    assert_eq!(device.imported, image);
    let mut offset = 0;
    for frame in device
        .log
        .iter()
        .filter(|f| f.code() == Command::ImportEeprom as u8)
    {
        let len = frame.payload().len();
        assert_eq!(offset / 264, (offset + len - 1) / 264);
        offset += len;
    }
    assert_eq!(offset, 300);
}

#[tokio::test(start_paused = true)]
async fn test_slot_upload_and_maintenance() {
    let (handle, device) = start();
    handle.wait_ready(Duration::from_secs(5)).await.unwrap();

    let blob = Bytes::from(vec![0x5A; 150]);
    let report = handle.upload_slot(blob.clone()).await.unwrap();
    assert_eq!(report.slot, 1);
    assert_eq!(report.bytes, 150);
    assert_eq!(device.lock().unwrap().slots[0], blob.to_vec());

    assert_ok!(handle.maintenance(Maintenance::EraseEeprom).await);
    // the emulator refuses card resets
    let err = assert_err!(handle.maintenance(Maintenance::ResetCard).await);
    assert!(matches!(err, MpError::TransferAborted(_)));
}

#[tokio::test(start_paused = true)]
async fn test_reply_timeout_drops_link() {
    let (handle, device) = start();
    handle.wait_ready(Duration::from_secs(5)).await.unwrap();

    device
        .lock()
        .unwrap()
        .muted
        .insert(Command::EraseFlash as u8);
    let err = handle
        .maintenance(Maintenance::EraseFlash)
        .await
        .unwrap_err();
    assert!(matches!(err, MpError::TransferAborted(_)));
}

// ── Stream transport ─────────────────────────────────────────────

/// Serve one emulated device on an ephemeral port.
async fn emulator_listener() -> StreamTarget {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec);
        let mut device = Emulator::new();
        while let Some(Ok(frame)) = framed.next().await {
            if let Some(reply) = device.respond(&frame) {
                if framed.send(reply).await.is_err() {
                    break;
                }
            }
        }
    });
    StreamTarget::new(addr.ip().to_string(), addr.port())
}

#[tokio::test]
async fn test_stream_transport_loopback() {
    let target = emulator_listener().await;
    let (handle, _task) = mp_core::spawn(StreamTransport::new(target), SessionConfig::default());

    let ext = RequesterId::new("ext");
    let mut rx = handle.register(ext.clone()).await.unwrap();
    handle.wait_ready(Duration::from_secs(5)).await.unwrap();

    handle.submit(ext, fetch("https://example.com")).await.unwrap();
    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::CardPresent { state: true }
    );
    assert_eq!(next_event(&mut rx).await, credentials("alice", "hunter2"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stream_transport_raw_frames() {
    let target = emulator_listener().await;
    let mut transport = StreamTransport::new(target);
    let devices = transport.enumerate().await.unwrap();
    transport.connect(&devices[0]).await.unwrap();

    transport
        .send(&Frame::command(Command::Version))
        .await
        .unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), transport.receive())
        .await
        .expect("timeout")
        .unwrap();
    assert_eq!(reply.code(), Command::Version as u8);
    assert_eq!(reply.payload()[0], 1);
    assert_eq!(string::decode(&reply.payload()[1..]), "v1.2");

    transport.disconnect().await;
    assert!(transport.receive().await.is_err());
}
