//! Context selection and credential field exchange.
//!
//! One request is active at a time. Activation always selects the request's
//! context with CONTEXT; a good context leads into one GET or SET per field,
//! issued from the previous field's reply:
//!
//! ```text
//!  CONTEXT ─ok─► field 1 ─► field 2 ─► … ─► Credentials / UpdateComplete
//!     │ no card: CardPresent(false), wait for the deadline
//!     └ unknown: ADD_CONTEXT (updates only, once) ─ok─► CONTEXT
//!                otherwise NoCredentials
//! ```

mod request;

pub use request::{AuthKind, AuthRequest, AuthStep};

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::client::{ClientEvent, ClientRequest, RequesterId};
use crate::error::MpError;
use crate::frame::Frame;
use crate::message::{Command, STATUS_NO_CARD, STATUS_OK};
use crate::protocol::string;
use crate::state::{Owner, Session};

impl Session {
    /// Accept a client request.
    ///
    /// Pings are answered on the spot. Field requests join the queue and
    /// start right away when nothing else holds the device.
    pub fn submit(&mut self, requester: RequesterId, request: ClientRequest, now: Instant) {
        self.last_client = Some(requester.clone());

        let id = self.next_request_id;
        let built = match request {
            ClientRequest::Ping => {
                self.answer_ping(&requester);
                return;
            }
            ClientRequest::FetchFields { url, keys } => {
                AuthRequest::fetch(id, requester.clone(), &url, keys, now)
            }
            ClientRequest::UpdateFields { url, fields } => {
                AuthRequest::update(id, requester.clone(), &url, &fields, now)
            }
        };

        match built {
            Ok(request) => {
                self.next_request_id += 1;
                debug!(
                    request = id,
                    "{:?} {} for {requester} ({} queued)",
                    request.kind,
                    request.context,
                    self.queue.len()
                );
                if self.context.as_deref() != Some(request.context.as_str()) {
                    debug!("context {:?} -> {}", self.context, request.context);
                    self.context = Some(request.context.clone());
                }
                self.queue.push(request);
                self.activate_next(now);
            }
            Err(e) => {
                warn!("refusing request from {requester}: {e}");
                self.notify(&requester, ClientEvent::NoCredentials);
            }
        }
    }

    fn answer_ping(&mut self, requester: &RequesterId) {
        let event = match &self.version {
            Some(version) => ClientEvent::Connected {
                version: version.clone(),
            },
            None => ClientEvent::Disconnected,
        };
        self.notify(requester, event);
    }

    /// Start the next queued request if the device is free.
    pub(crate) fn activate_next(&mut self, now: Instant) {
        if self.transfer.is_some() {
            return;
        }
        let timeout = self.config.auth_timeout;
        let Some(request) = self.queue.promote() else {
            return;
        };
        request.activate(now, timeout);
        let id = request.id;
        let payload = request.context_payload().to_vec();
        self.context_good = false;
        if let Err(e) = self.send(Command::Context, Some(&payload), Owner::Request(id), now) {
            self.fail_active(e, now);
        }
    }

    pub(crate) fn on_auth_reply(
        &mut self,
        command: Command,
        frame: &Frame,
        owner: Option<Owner>,
        now: Instant,
    ) {
        let Some(active) = self.queue.active() else {
            debug!("{command} reply with no active request");
            return;
        };
        if owner != Some(Owner::Request(active.id)) || !active.expects(command) {
            debug!(request = active.id, "stale {command} reply ignored");
            return;
        }

        match command {
            Command::Context => self.on_context_reply(frame.status(), now),
            Command::AddContext => self.on_add_context_reply(frame.status(), now),
            Command::GetLogin | Command::GetPassword => self.on_field_value(frame, now),
            _ => self.finish_field_push(frame.status() == STATUS_OK, now),
        }
    }

    fn on_context_reply(&mut self, status: u8, now: Instant) {
        let Some(active) = self.queue.active_mut() else {
            return;
        };
        let requester = active.requester.clone();
        let context = active.context.clone();

        match status {
            STATUS_OK => {
                info!("context {context} selected");
                self.context_good = true;
                self.notify(&requester, ClientEvent::CardPresent { state: true });
                self.advance_fields(now);
            }
            STATUS_NO_CARD => {
                info!("no card inserted, context {context} not selected");
                active.step = AuthStep::NoCard;
                self.context_good = false;
                self.notify(&requester, ClientEvent::CardPresent { state: false });
            }
            _ => {
                let create = active.take_create();
                let id = active.id;
                let payload = active.context_payload().to_vec();
                if create {
                    active.step = AuthStep::AddingContext;
                }
                self.context_good = false;
                self.notify(&requester, ClientEvent::CardPresent { state: true });
                if create {
                    info!("unknown context {context}, creating it");
                    if let Err(e) =
                        self.send(Command::AddContext, Some(&payload), Owner::Request(id), now)
                    {
                        self.fail_active(e, now);
                    }
                } else {
                    info!("unknown context {context}");
                    self.notify(&requester, ClientEvent::NoCredentials);
                    self.finish_active(now);
                }
            }
        }
    }

    fn on_add_context_reply(&mut self, status: u8, now: Instant) {
        let Some(active) = self.queue.active_mut() else {
            return;
        };
        let requester = active.requester.clone();
        let context = active.context.clone();

        if status != STATUS_OK {
            warn!("device refused to create context {context}");
            self.notify(&requester, ClientEvent::NoCredentials);
            self.finish_active(now);
            return;
        }

        active.step = AuthStep::SettingContext;
        let id = active.id;
        let payload = active.context_payload().to_vec();
        info!("created context {context}");
        if let Err(e) = self.send(Command::Context, Some(&payload), Owner::Request(id), now) {
            self.fail_active(e, now);
        }
    }

    fn on_field_value(&mut self, frame: &Frame, now: Instant) {
        let Some(active) = self.queue.active_mut() else {
            return;
        };
        let Some(key) = active.current_key() else {
            return;
        };
        let (len, _, payload) = frame.decode();
        if len > 1 {
            let value = string::decode(payload);
            debug!("got {key} = {:?}", key.redact(&value));
            active.record_value(key, value);
            self.advance_fields(now);
        } else {
            let requester = active.requester.clone();
            info!("device has no {key} for {}", active.context);
            self.notify(&requester, ClientEvent::NoCredentials);
            self.finish_active(now);
        }
    }

    /// Record the outcome of a SET_LOGIN or SET_PASSWORD and move on.
    fn finish_field_push(&mut self, ok: bool, now: Instant) {
        let Some(active) = self.queue.active_mut() else {
            return;
        };
        let Some(key) = active.current_key() else {
            return;
        };
        if ok {
            debug!("stored {key} for {}", active.context);
        } else {
            warn!("device refused {key} for {}", active.context);
        }
        active.record_push(key, ok);
        self.advance_fields(now);
    }

    /// Send the exchange for the next field, or finish the request when all
    /// fields are done.
    fn advance_fields(&mut self, now: Instant) {
        let Some(active) = self.queue.active_mut() else {
            return;
        };
        let id = active.id;
        let requester = active.requester.clone();

        let next = loop {
            match active.next_key() {
                None => break None,
                Some(key) => match active.kind {
                    AuthKind::Fetch => break Some((key.get_command(), None)),
                    AuthKind::Update => match active.input(key) {
                        Some(value) => break Some((key.set_command(), Some(value.to_vec()))),
                        None => active.record_push(key, false),
                    },
                },
            }
        };

        match next {
            Some((command, payload)) => {
                if let Err(e) = self.send(command, payload.as_deref(), Owner::Request(id), now) {
                    self.fail_active(e, now);
                }
            }
            None => {
                let event = match active.kind {
                    AuthKind::Fetch => ClientEvent::Credentials {
                        fields: active.take_results(),
                    },
                    AuthKind::Update => ClientEvent::UpdateComplete,
                };
                info!(request = id, "{} done for {requester}", active.context);
                self.notify(&requester, event);
                self.finish_active(now);
            }
        }
    }

    /// Terminate the active request and start the next one.
    pub(crate) fn finish_active(&mut self, now: Instant) {
        if let Some(done) = self.queue.finish_active() {
            debug!(request = done.id, "finished after {:?}", done.age(now));
        }
        self.activate_next(now);
    }

    /// The active request ran out of time: drop it without an answer.
    pub(crate) fn expire_active(&mut self, now: Instant) {
        if let Some(active) = self.queue.active() {
            warn!(
                request = active.id,
                "request for {} from {} timed out in {:?}",
                active.context,
                active.requester,
                active.step
            );
        }
        self.finish_active(now);
    }

    fn fail_active(&mut self, err: MpError, now: Instant) {
        if let Some(active) = self.queue.active() {
            let requester = active.requester.clone();
            warn!(request = active.id, "request failed: {err}");
            self.notify(&requester, ClientEvent::NoCredentials);
        }
        self.finish_active(now);
    }
}
