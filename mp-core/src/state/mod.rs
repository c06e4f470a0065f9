pub mod link;
pub mod phase;
pub mod session;

pub use link::{InFlight, Link, Outgoing, Owner};
pub use phase::SessionPhase;
pub use session::{Action, Session};
