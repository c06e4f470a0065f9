//! Messages exchanged with the clients of the session (browser extension,
//! CLI). These are JSON objects tagged by `type`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::FieldKey;

/// Opaque identity of whoever submitted a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequesterId(String);

impl RequesterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequesterId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ── Inbound ──────────────────────────────────────────────────────

/// A request from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientRequest {
    /// Ask for the current connection state.
    Ping,
    /// Read credentials for the site at `url`.
    FetchFields { url: String, keys: Vec<FieldKey> },
    /// Store credentials for the site at `url`.
    UpdateFields {
        url: String,
        fields: BTreeMap<FieldKey, String>,
    },
}

impl ClientRequest {
    pub fn url(&self) -> Option<&str> {
        match self {
            ClientRequest::Ping => None,
            ClientRequest::FetchFields { url, .. } | ClientRequest::UpdateFields { url, .. } => {
                Some(url)
            }
        }
    }
}

// ── Outbound ─────────────────────────────────────────────────────

/// A notification delivered to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    /// The device is connected and identified.
    Connected { version: String },
    /// The device is gone; any request in progress was dropped.
    Disconnected,
    /// Whether a smartcard is inserted.
    CardPresent { state: bool },
    /// The requested credential values.
    Credentials { fields: BTreeMap<FieldKey, String> },
    /// All requested fields were written.
    UpdateComplete,
    /// The device has no credentials for the site, or refused to create them.
    NoCredentials,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fetch_request() {
        let json = r#"{"type":"fetchFields","url":"https://example.com","keys":["login","password"]}"#;
        let req: ClientRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            req,
            ClientRequest::FetchFields {
                url: "https://example.com".into(),
                keys: vec![FieldKey::Login, FieldKey::Password],
            }
        );
        assert_eq!(req.url(), Some("https://example.com"));
    }

    #[test]
    fn parses_update_request() {
        let json = r#"{"type":"updateFields","url":"https://a.io","fields":{"login":"bob","password":"pw"}}"#;
        let req: ClientRequest = serde_json::from_str(json).unwrap();
        let ClientRequest::UpdateFields { fields, .. } = req else {
            panic!("wrong variant");
        };
        assert_eq!(fields[&FieldKey::Login], "bob");
        assert_eq!(fields[&FieldKey::Password], "pw");
    }

    #[test]
    fn ping_has_no_url() {
        let req: ClientRequest = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(req, ClientRequest::Ping);
        assert!(req.url().is_none());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_string(&ClientEvent::CardPresent { state: false }).unwrap();
        assert_eq!(json, r#"{"type":"cardPresent","state":false}"#);

        let json = serde_json::to_string(&ClientEvent::NoCredentials).unwrap();
        assert_eq!(json, r#"{"type":"noCredentials"}"#);

        let mut fields = BTreeMap::new();
        fields.insert(FieldKey::Login, "alice".to_string());
        let json = serde_json::to_string(&ClientEvent::Credentials { fields }).unwrap();
        assert_eq!(json, r#"{"type":"credentials","fields":{"login":"alice"}}"#);
    }
}
