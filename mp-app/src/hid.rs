//! USB HID transport built on `hidapi`.
//!
//! `hidapi` is blocking, so every open device gets its own I/O thread. The
//! thread owns the device handle, writes frames handed to it over a channel
//! and forwards every report it reads to the async side. When the transport
//! drops its end of the outgoing channel the thread closes the device.

use std::ffi::CString;
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use hidapi::HidApi;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use mp_core::{ConnectionId, DeviceInfo, FRAME_SIZE, Frame, MpError, Result, Transport};

/// How long one blocking read may wait before the thread checks for
/// outgoing frames again.
const READ_POLL_MS: i32 = 20;

struct OpenDevice {
    outgoing: std_mpsc::Sender<Frame>,
    incoming: mpsc::UnboundedReceiver<Frame>,
}

pub struct HidTransport {
    vendor_id: u16,
    product_id: u16,
    open: Option<OpenDevice>,
    next_id: u64,
}

impl HidTransport {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            open: None,
            next_id: 1,
        }
    }
}

fn hid_error(e: hidapi::HidError) -> MpError {
    MpError::TransportFailure(e.to_string())
}

/// Body of the per-device I/O thread.
fn io_loop(
    path: CString,
    ready: oneshot::Sender<Result<()>>,
    outgoing: std_mpsc::Receiver<Frame>,
    incoming: mpsc::UnboundedSender<Frame>,
) {
    let device = match HidApi::new().and_then(|api| api.open_path(&path)) {
        Ok(device) => device,
        Err(e) => {
            let _ = ready.send(Err(hid_error(e)));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    let mut report = [0u8; FRAME_SIZE + 1];
    let mut buf = [0u8; FRAME_SIZE];
    loop {
        loop {
            match outgoing.try_recv() {
                Ok(frame) => {
                    // report id 0 goes first
                    report[1..].copy_from_slice(frame.as_bytes());
                    if let Err(e) = device.write(&report) {
                        warn!("HID write failed: {e}");
                        return;
                    }
                }
                Err(std_mpsc::TryRecvError::Empty) => break,
                Err(std_mpsc::TryRecvError::Disconnected) => return,
            }
        }

        match device.read_timeout(&mut buf, READ_POLL_MS) {
            Ok(0) => {}
            Ok(n) => match Frame::from_report(&buf[..n]) {
                Ok(frame) => {
                    if incoming.send(frame).is_err() {
                        return;
                    }
                }
                Err(e) => debug!("dropping HID report: {e}"),
            },
            Err(e) => {
                warn!("HID read failed: {e}");
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for HidTransport {
    async fn enumerate(&mut self) -> Result<Vec<DeviceInfo>> {
        let (vendor_id, product_id) = (self.vendor_id, self.product_id);
        tokio::task::spawn_blocking(move || {
            let api = HidApi::new().map_err(hid_error)?;
            Ok(api
                .device_list()
                .filter(|d| d.vendor_id() == vendor_id && d.product_id() == product_id)
                .map(|d| DeviceInfo {
                    path: d.path().to_string_lossy().into_owned(),
                    vendor_id,
                    product_id,
                    product: d.product_string().map(String::from),
                })
                .collect())
        })
        .await
        .map_err(|e| MpError::Other(format!("enumeration task: {e}")))?
    }

    async fn connect(&mut self, device: &DeviceInfo) -> Result<ConnectionId> {
        self.open = None;
        let path = CString::new(device.path.as_str())
            .map_err(|_| MpError::TransportFailure("device path contains NUL".into()))?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let (out_tx, out_rx) = std_mpsc::channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        thread::Builder::new()
            .name("mp-hid".into())
            .spawn(move || io_loop(path, ready_tx, out_rx, in_tx))?;
        ready_rx.await??;

        self.open = Some(OpenDevice {
            outgoing: out_tx,
            incoming: in_rx,
        });
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        info!("opened HID device {device} as connection {id}");
        Ok(id)
    }

    async fn disconnect(&mut self) {
        if self.open.take().is_some() {
            // the I/O thread notices the closed channel within one poll
            tokio::time::sleep(Duration::from_millis(READ_POLL_MS as u64)).await;
            debug!("HID device closed");
        }
    }

    async fn send(&mut self, frame: &Frame) -> Result<()> {
        let open = self
            .open
            .as_ref()
            .ok_or_else(|| MpError::TransportFailure("not connected".into()))?;
        open.outgoing
            .send(*frame)
            .map_err(|_| MpError::TransportFailure("HID thread stopped".into()))
    }

    async fn receive(&mut self) -> Result<Frame> {
        let open = self
            .open
            .as_mut()
            .ok_or_else(|| MpError::TransportFailure("not connected".into()))?;
        open.incoming
            .recv()
            .await
            .ok_or_else(|| MpError::TransportFailure("HID device gone".into()))
    }
}
