//! Device protocol helpers shared by the session engine.
//!
//! Each sub-module covers one piece of the wire contract: single-byte
//! strings, the credential field map, URL → context derivation and the flash
//! geometry table.

pub mod context;
pub mod field;
pub mod flash;
pub mod string;

pub use context::context_from_url;
pub use field::{FieldKey, processing_order};
pub use flash::{DEFAULT_PAGE_SIZE, EEPROM_SIZE, FlashGeometry, MEDIA_START_PAGE};
