//! Credential fields and their device commands.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::message::Command;

/// A credential field the device stores per context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKey {
    Login,
    Password,
}

impl FieldKey {
    /// Command that reads this field from the current context.
    pub fn get_command(self) -> Command {
        match self {
            FieldKey::Login => Command::GetLogin,
            FieldKey::Password => Command::GetPassword,
        }
    }

    /// Command that stores this field in the current context.
    pub fn set_command(self) -> Command {
        match self {
            FieldKey::Login => Command::SetLogin,
            FieldKey::Password => Command::SetPassword,
        }
    }

    /// Position in the exchange order. Login always goes last.
    fn rank(self) -> u8 {
        match self {
            FieldKey::Password => 0,
            FieldKey::Login => 1,
        }
    }

    /// Whether values of this field must be masked in logs.
    pub fn is_secret(self) -> bool {
        matches!(self, FieldKey::Password)
    }

    /// Render `value` for logging.
    pub fn redact(self, value: &str) -> String {
        if self.is_secret() {
            "*".repeat(value.chars().count())
        } else {
            value.to_string()
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKey::Login => write!(f, "login"),
            FieldKey::Password => write!(f, "password"),
        }
    }
}

/// The order in which `keys` are exchanged with the device.
///
/// Duplicates are dropped; Password keys come before Login keys.
pub fn processing_order<I>(keys: I) -> Vec<FieldKey>
where
    I: IntoIterator<Item = FieldKey>,
{
    let mut order: Vec<FieldKey> = Vec::new();
    for key in keys {
        if !order.contains(&key) {
            order.push(key);
        }
    }
    order.sort_by_key(|k| k.rank());
    order
}
