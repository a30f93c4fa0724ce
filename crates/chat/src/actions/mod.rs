//! Chat actions module
//!
//! Drives chat commands against the backend: login, polling, sends,
//! edits, deletes, reactions, forwards and uploads.

mod handler;

pub use handler::ActionHandler;
