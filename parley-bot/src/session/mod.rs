//! Per-user conversation sessions.

pub mod store;
pub mod types;

pub use store::{Clock, ManualClock, SessionHandle, SessionStore, SystemClock};
pub use types::{ModelChoice, Persona, Role, Turn, UserSession};
