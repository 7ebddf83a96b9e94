// src/session/mod.rs
// Session lifecycle: types and the SQLite-backed state machine.

pub mod store;
pub mod types;

pub use store::SqliteSessionStore;
pub use types::{ParticipantRole, Session, SessionKind, SessionStatus};
