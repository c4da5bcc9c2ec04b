//! Per-user, per-session conversation history.
//!
//! - `registry`: in-memory user → session → transcript map
//! - `store`: JSON snapshot file
//! - `manager`: shared handle combining both, plus per-session turn locks

pub mod manager;
pub mod registry;
pub mod store;
pub mod types;

pub use manager::SessionManager;
pub use registry::{SessionRegistry, UserEntry};
pub use store::HistoryStore;
pub use types::{Histories, PendingFlow, Role, SessionError, Transcript, Turn};
