//! A single credential exchange, from submission to termination.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::client::RequesterId;
use crate::error::{MpError, Result};
use crate::frame::MAX_PAYLOAD_SIZE;
use crate::message::Command;
use crate::protocol::{FieldKey, context_from_url, processing_order, string};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    /// Read field values from the device.
    Fetch,
    /// Write field values to the device, creating the context if needed.
    Update,
}

/// Where an active request is in its exchange with the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStep {
    /// Waiting in the queue.
    Queued,
    /// CONTEXT sent.
    SettingContext,
    /// ADD_CONTEXT sent.
    AddingContext,
    /// GET or SET sent for this field.
    Field(FieldKey),
    /// The device reported no smartcard; nothing is in flight.
    NoCard,
}

pub struct AuthRequest {
    pub id: u64,
    pub kind: AuthKind,
    pub requester: RequesterId,
    pub context: String,
    pub step: AuthStep,
    pub created_at: Instant,
    context_payload: Vec<u8>,
    keys: Vec<FieldKey>,
    cursor: usize,
    inputs: BTreeMap<FieldKey, Vec<u8>>,
    results: BTreeMap<FieldKey, String>,
    pushed: Vec<(FieldKey, bool)>,
    may_create: bool,
    deadline: Option<Instant>,
}

// Field values stay out of Debug output.
impl fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRequest")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("requester", &self.requester)
            .field("context", &self.context)
            .field("step", &self.step)
            .field("keys", &self.keys)
            .field("cursor", &self.cursor)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl AuthRequest {
    /// A request reading `keys` for the site at `url`.
    pub fn fetch(
        id: u64,
        requester: RequesterId,
        url: &str,
        keys: Vec<FieldKey>,
        now: Instant,
    ) -> Result<Self> {
        let mut req = Self::new(id, AuthKind::Fetch, requester, url, now)?;
        req.keys = processing_order(keys);
        Ok(req)
    }

    /// A request storing `fields` for the site at `url`.
    ///
    /// Values are encoded up front so an unrepresentable value is refused
    /// before anything reaches the device.
    pub fn update(
        id: u64,
        requester: RequesterId,
        url: &str,
        fields: &BTreeMap<FieldKey, String>,
        now: Instant,
    ) -> Result<Self> {
        let mut req = Self::new(id, AuthKind::Update, requester, url, now)?;
        for (&key, value) in fields {
            req.inputs.insert(key, checked_string(value)?);
        }
        req.keys = processing_order(fields.keys().copied());
        req.may_create = true;
        Ok(req)
    }

    fn new(
        id: u64,
        kind: AuthKind,
        requester: RequesterId,
        url: &str,
        now: Instant,
    ) -> Result<Self> {
        let context = context_from_url(url).ok_or_else(|| MpError::NoContext(url.to_string()))?;
        let context_payload = checked_string(&context)?;
        Ok(Self {
            id,
            kind,
            requester,
            context,
            step: AuthStep::Queued,
            created_at: now,
            context_payload,
            keys: Vec::new(),
            cursor: 0,
            inputs: BTreeMap::new(),
            results: BTreeMap::new(),
            pushed: Vec::new(),
            may_create: false,
            deadline: None,
        })
    }

    /// The context as sent with CONTEXT and ADD_CONTEXT.
    pub fn context_payload(&self) -> &[u8] {
        &self.context_payload
    }

    /// Field keys in exchange order.
    pub fn keys(&self) -> &[FieldKey] {
        &self.keys
    }

    /// Start the deadline and move to the context step.
    pub fn activate(&mut self, now: Instant, timeout: Duration) {
        self.deadline = Some(now + timeout);
        self.step = AuthStep::SettingContext;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// Whether a reply to `command` belongs to the current step.
    pub fn expects(&self, command: Command) -> bool {
        match self.step {
            AuthStep::SettingContext => command == Command::Context,
            AuthStep::AddingContext => command == Command::AddContext,
            AuthStep::Field(key) => match self.kind {
                AuthKind::Fetch => command == key.get_command(),
                AuthKind::Update => command == key.set_command(),
            },
            AuthStep::Queued | AuthStep::NoCard => false,
        }
    }

    /// The field currently being exchanged.
    pub fn current_key(&self) -> Option<FieldKey> {
        match self.step {
            AuthStep::Field(key) => Some(key),
            _ => None,
        }
    }

    /// Move the cursor to the next key.
    pub fn next_key(&mut self) -> Option<FieldKey> {
        let key = self.keys.get(self.cursor).copied()?;
        self.cursor += 1;
        self.step = AuthStep::Field(key);
        Some(key)
    }

    /// Encoded value to store for `key`.
    pub fn input(&self, key: FieldKey) -> Option<&[u8]> {
        self.inputs.get(&key).map(Vec::as_slice)
    }

    pub fn record_value(&mut self, key: FieldKey, value: String) {
        self.results.insert(key, value);
    }

    pub fn record_push(&mut self, key: FieldKey, ok: bool) {
        self.pushed.push((key, ok));
    }

    /// Per-field outcome of the pushes so far.
    pub fn pushed(&self) -> &[(FieldKey, bool)] {
        &self.pushed
    }

    pub fn take_results(&mut self) -> BTreeMap<FieldKey, String> {
        std::mem::take(&mut self.results)
    }

    /// Consume the single allowance to create the context.
    pub fn take_create(&mut self) -> bool {
        std::mem::replace(&mut self.may_create, false)
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

/// Encode a device string and check that it fits in one frame.
fn checked_string(s: &str) -> Result<Vec<u8>> {
    let bytes = string::encode(s)?;
    if bytes.len() > MAX_PAYLOAD_SIZE {
        return Err(MpError::PayloadTooLarge {
            size: bytes.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requester() -> RequesterId {
        RequesterId::new("ext")
    }

    #[test]
    fn fetch_orders_keys_once() {
        let req = AuthRequest::fetch(
            1,
            requester(),
            "https://login.example.com/",
            vec![FieldKey::Login, FieldKey::Password, FieldKey::Login],
            Instant::now(),
        )
        .unwrap();
        assert_eq!(req.keys(), [FieldKey::Password, FieldKey::Login]);
        assert_eq!(req.context, "example.com");
        assert_eq!(req.context_payload(), b"example.com\0");
        assert_eq!(req.step, AuthStep::Queued);
    }

    #[test]
    fn debug_hides_values() {
        let mut fields = BTreeMap::new();
        fields.insert(FieldKey::Password, "s3cret-pw".to_string());
        let req =
            AuthRequest::update(3, requester(), "https://a.io", &fields, Instant::now()).unwrap();
        let text = format!("{req:?}");
        assert!(text.contains("a.io"));
        assert!(!text.contains("s3cret"));
    }

    #[test]
    fn update_encodes_values() {
        let mut fields = BTreeMap::new();
        fields.insert(FieldKey::Login, "bob".to_string());
        let mut req =
            AuthRequest::update(2, requester(), "https://a.io", &fields, Instant::now()).unwrap();
        assert_eq!(req.input(FieldKey::Login), Some(&b"bob\0"[..]));
        assert!(req.take_create());
        assert!(!req.take_create());
    }

    #[test]
    fn rejects_bad_urls_and_values() {
        let now = Instant::now();
        assert!(matches!(
            AuthRequest::fetch(1, requester(), "about:blank", vec![], now),
            Err(MpError::NoContext(_))
        ));

        let mut fields = BTreeMap::new();
        fields.insert(FieldKey::Password, "x".repeat(80));
        assert!(matches!(
            AuthRequest::update(1, requester(), "https://a.io", &fields, now),
            Err(MpError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn fetch_never_creates() {
        let mut req =
            AuthRequest::fetch(1, requester(), "https://a.io", vec![], Instant::now()).unwrap();
        assert!(!req.take_create());
    }

    #[test]
    fn steps_gate_expected_replies() {
        let now = Instant::now();
        let mut req = AuthRequest::fetch(
            1,
            requester(),
            "https://a.io",
            vec![FieldKey::Login],
            now,
        )
        .unwrap();
        assert!(!req.expects(Command::Context));

        req.activate(now, Duration::from_secs(15));
        assert!(req.expects(Command::Context));
        assert!(!req.expects(Command::GetLogin));
        assert_eq!(req.deadline(), Some(now + Duration::from_secs(15)));

        assert_eq!(req.next_key(), Some(FieldKey::Login));
        assert!(req.expects(Command::GetLogin));
        assert!(!req.expects(Command::SetLogin));
        assert_eq!(req.next_key(), None);
    }

    #[test]
    fn expiry() {
        let now = Instant::now();
        let mut req =
            AuthRequest::fetch(1, requester(), "https://a.io", vec![], now).unwrap();
        assert!(!req.is_expired(now + Duration::from_secs(60)));
        req.activate(now, Duration::from_secs(15));
        assert!(!req.is_expired(now + Duration::from_secs(14)));
        assert!(req.is_expired(now + Duration::from_secs(15)));
    }
}
