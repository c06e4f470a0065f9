//! The session engine.
//!
//! `Session` owns every piece of protocol state: the connection phase, the
//! link discipline, the request queue and the running bulk transfer. It does
//! no I/O. Each entry point takes the current time and queues [`Action`]s
//! that the runtime drains with [`Session::poll_action`] and performs against
//! a transport.

use std::collections::{BTreeSet, VecDeque};
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::auth::AuthRequest;
use crate::bulk::{Transfer, TransferOutcome};
use crate::client::{ClientEvent, RequesterId};
use crate::config::SessionConfig;
use crate::error::{MpError, Result};
use crate::frame::Frame;
use crate::message::Command;
use crate::protocol::{FlashGeometry, string};
use crate::queue::RequestQueue;
use crate::state::link::{Link, Outgoing, Owner};
use crate::state::phase::SessionPhase;
use crate::transport::{ConnectionId, DeviceInfo};

/// Work the runtime must carry out on behalf of the session.
#[derive(Debug)]
pub enum Action {
    /// Enumerate devices, then call [`Session::on_devices`].
    Discover,
    /// Open the device, then call [`Session::on_connected`] or
    /// [`Session::on_connect_failed`].
    Connect(DeviceInfo),
    /// Close the transport connection.
    Disconnect,
    /// Write a frame. A failure goes to [`Session::on_transport_failure`].
    Send(Frame),
    /// Deliver an event to a client.
    Notify {
        requester: RequesterId,
        event: ClientEvent,
    },
    /// A bulk transfer or maintenance command ended.
    Transfer(Result<TransferOutcome>),
}

#[derive(Debug)]
pub struct Session {
    pub(crate) config: SessionConfig,
    pub(crate) phase: SessionPhase,
    pub(crate) connection: Option<ConnectionId>,
    pub(crate) device: Option<DeviceInfo>,
    pub(crate) pending_on_connect: Option<Outgoing>,
    pub(crate) link: Link,
    pub(crate) version: Option<String>,
    pub(crate) chip_id: Option<u8>,
    pub(crate) geometry: Option<FlashGeometry>,
    pub(crate) context: Option<String>,
    pub(crate) context_good: bool,
    pub(crate) queue: RequestQueue,
    pub(crate) transfer: Option<Transfer>,
    pub(crate) last_client: Option<RequesterId>,
    pub(crate) next_request_id: u64,
    actions: VecDeque<Action>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            phase: SessionPhase::default(),
            connection: None,
            device: None,
            pending_on_connect: None,
            link: Link::new(),
            version: None,
            chip_id: None,
            geometry: None,
            context: None,
            context_good: false,
            queue: RequestQueue::new(),
            transfer: None,
            last_client: None,
            next_request_id: 1,
            actions: VecDeque::new(),
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase.is_connected()
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    pub fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    /// Firmware version, known once the device answered a VERSION probe.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn geometry(&self) -> Option<FlashGeometry> {
        self.geometry
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn context_good(&self) -> bool {
        self.context_good
    }

    pub fn active_request(&self) -> Option<&AuthRequest> {
        self.queue.active()
    }

    /// Active plus waiting authentication requests.
    pub fn pending_requests(&self) -> usize {
        self.queue.len()
    }

    pub fn transfer(&self) -> Option<&Transfer> {
        self.transfer.as_ref()
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn has_pending_on_connect(&self) -> bool {
        self.pending_on_connect.is_some()
    }

    /// Next piece of work for the runtime.
    pub fn poll_action(&mut self) -> Option<Action> {
        self.actions.pop_front()
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Start looking for a device unless a connection is already underway.
    pub fn connect(&mut self, _now: Instant) {
        if self.phase.begin_discovery().is_ok() {
            debug!("looking for device");
            self.actions.push_back(Action::Discover);
        }
    }

    /// Enumeration result. The last candidate wins.
    pub fn on_devices(&mut self, devices: Vec<DeviceInfo>, _now: Instant) {
        if self.phase != SessionPhase::Discovering {
            debug!("ignoring enumeration while {}", self.phase);
            return;
        }
        let count = devices.len();
        let Some(device) = devices.into_iter().last() else {
            trace!("no device found");
            self.phase.force_idle();
            return;
        };
        if let Err(e) = self.phase.begin_connect() {
            warn!("{e}");
            return;
        }
        debug!("found {count} device(s), connecting to {device}");
        self.device = Some(device.clone());
        self.actions.push_back(Action::Connect(device));
    }

    pub fn on_connected(&mut self, id: ConnectionId, now: Instant) {
        if let Err(e) = self.phase.complete_connect(now) {
            warn!("{e}; dropping connection {id}");
            self.actions.push_back(Action::Disconnect);
            return;
        }
        info!("connected to device {id}");
        self.connection = Some(id);
        match self.pending_on_connect.take() {
            Some(out) => self.submit_frame(out, now),
            None => self.probe(now),
        }
    }

    pub fn on_connect_failed(&mut self, err: &MpError, _now: Instant) {
        warn!("failed to connect to device: {err}");
        self.phase.force_idle();
        self.device = None;
    }

    /// Periodic tick: reconnect while idle, probe while connected and quiet.
    pub fn on_keepalive(&mut self, now: Instant) {
        match self.phase {
            SessionPhase::Idle => self.connect(now),
            SessionPhase::Connected { .. } if self.link.is_idle() && self.transfer.is_none() => {
                self.probe(now)
            }
            _ => {}
        }
    }

    pub fn on_transport_failure(&mut self, err: &MpError, _now: Instant) {
        if self.phase.is_connected() {
            warn!("device link lost: {err}");
        } else {
            debug!("transport failure while {}: {err}", self.phase);
        }
        self.reset();
    }

    /// Drop the connection and everything that depended on it.
    ///
    /// The active request is dropped and its client, plus the last client
    /// seen, are told `Disconnected` once each. Waiting requests stay queued
    /// and start once the device answers VERSION again. Calling this twice
    /// is the same as calling it once.
    pub fn reset(&mut self) {
        let was_live = self.connection.is_some() || !self.phase.is_idle();

        if self.connection.take().is_some() {
            self.actions.push_back(Action::Disconnect);
        }
        self.actions.retain(|a| !matches!(a, Action::Send(_)));
        self.phase.force_idle();
        self.device = None;
        self.link.clear();
        self.pending_on_connect = None;
        self.version = None;
        self.chip_id = None;
        self.geometry = None;
        self.context = None;
        self.context_good = false;

        if let Some(transfer) = self.transfer.take() {
            self.actions.push_back(Action::Transfer(Err(MpError::TransferAborted(format!(
                "{transfer} interrupted: device disconnected"
            )))));
        }

        let mut told = BTreeSet::new();
        if let Some(request) = self.queue.finish_active() {
            debug!(request = request.id, "dropping request for {}", request.context);
            told.insert(request.requester.clone());
            self.notify(&request.requester, ClientEvent::Disconnected);
        }
        if self.queue.waiting() > 0 {
            debug!("{} request(s) wait for the device", self.queue.waiting());
        }
        if was_live {
            if let Some(client) = self.last_client.clone() {
                if told.insert(client.clone()) {
                    self.notify(&client, ClientEvent::Disconnected);
                }
            }
        }
    }

    // ── Timers ───────────────────────────────────────────────────

    /// Earliest instant at which [`Session::on_timeout`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let reply = self
            .link
            .in_flight()
            .map(|f| f.deadline(self.config.reply_timeout));
        let request = self.queue.active().and_then(AuthRequest::deadline);
        match (reply, request) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn on_timeout(&mut self, now: Instant) {
        if let Some(in_flight) = self.link.in_flight() {
            if now >= in_flight.deadline(self.config.reply_timeout) {
                let err = MpError::ReplyTimeout {
                    command: in_flight.command,
                    waited: now.saturating_duration_since(in_flight.sent_at),
                };
                self.on_transport_failure(&err, now);
                return;
            }
        }
        if self.queue.active().is_some_and(|r| r.is_expired(now)) {
            self.expire_active(now);
        }
    }

    // ── Inbound frames ───────────────────────────────────────────

    pub fn on_frame(&mut self, frame: Frame, now: Instant) {
        let command = match frame.command_id() {
            Ok(Command::Debug) => {
                debug!(target: "mp_core::device", "{}", string::decode(frame.payload()));
                return;
            }
            Ok(command) => command,
            Err(_) => {
                warn!("unknown command {:#04x} from device, ignored", frame.code());
                return;
            }
        };

        let (answered, next) = self.link.on_reply(now);
        if let Some(next) = next {
            self.actions.push_back(Action::Send(next));
        }

        if let Some(sent) = &answered {
            if sent.command != command {
                debug!("got {command} while waiting for {}", sent.command);
            }
        }
        if command.is_bulk() {
            trace!("recv {command} len {}", frame.len_byte());
        } else {
            debug!("recv {command} status {:#04x}", frame.status());
        }

        let owner = answered.map(|f| f.owner);
        match command {
            Command::Ping => debug!("ping answered"),
            Command::Version => self.on_version(&frame, now),
            Command::Context
            | Command::AddContext
            | Command::GetLogin
            | Command::GetPassword
            | Command::SetLogin
            | Command::SetPassword => self.on_auth_reply(command, &frame, owner, now),
            _ => self.on_transfer_reply(command, &frame, now),
        }
    }

    fn on_version(&mut self, frame: &Frame, now: Instant) {
        let Some((&chip, rest)) = frame.payload().split_first() else {
            warn!("empty VERSION reply");
            return;
        };
        if self.version.is_some() {
            return;
        }
        let version = string::decode(rest);
        match FlashGeometry::for_chip(chip) {
            Ok(geometry) => self.geometry = Some(geometry),
            Err(e) => warn!("{e}; flash transfers use defaults"),
        }
        info!("device firmware {version}, flash chip {chip}");
        self.chip_id = Some(chip);
        self.version = Some(version.clone());
        if let Some(client) = self.last_client.clone() {
            self.notify(&client, ClientEvent::Connected { version });
        }
        // requests left waiting by a reset
        self.activate_next(now);
    }

    // ── Outbound frames ──────────────────────────────────────────

    /// Queue `command` for the device.
    ///
    /// While disconnected the frame is parked as the single
    /// send-on-connect frame and discovery starts.
    pub(crate) fn send(
        &mut self,
        command: Command,
        payload: Option<&[u8]>,
        owner: Owner,
        now: Instant,
    ) -> Result<()> {
        let frame = Frame::encode(command, payload)?;
        self.submit_frame(
            Outgoing {
                command,
                frame,
                owner,
            },
            now,
        );
        Ok(())
    }

    fn submit_frame(&mut self, out: Outgoing, now: Instant) {
        if !self.phase.is_connected() {
            if let Some(old) = self.pending_on_connect.replace(out) {
                debug!("replacing pending {} with {}", old.command, out.command);
            }
            self.connect(now);
            return;
        }
        if out.command.is_bulk() {
            trace!("send {}", out.command);
        } else if out.command != Command::Version {
            debug!("send {}", out.command);
        }
        if let Some(frame) = self.link.submit(out, now) {
            self.actions.push_back(Action::Send(frame));
        }
    }

    fn probe(&mut self, now: Instant) {
        self.submit_frame(
            Outgoing {
                command: Command::Version,
                frame: Frame::command(Command::Version),
                owner: Owner::Session,
            },
            now,
        );
    }

    pub(crate) fn notify(&mut self, requester: &RequesterId, event: ClientEvent) {
        self.actions.push_back(Action::Notify {
            requester: requester.clone(),
            event,
        });
    }

    pub(crate) fn push_action(&mut self, action: Action) {
        self.actions.push_back(action);
    }
}
