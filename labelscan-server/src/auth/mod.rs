//! Password accounts and cookie sessions.
//!
//! Accounts live in the database; sessions live in memory and are flushed to a
//! JSON file now and then, so a restart doesn't log everyone out.

pub mod password;
pub mod route;
pub mod session;

pub use session::{SessionID, Sessions, UserSession};
