//! Session and selection management
//!
//! Holds the signed-in identity and the active conversation. Every change of
//! selection (and every logout) starts a new scope; work issued under an
//! older scope is ignored when it completes.

mod manager;

pub use manager::{Scope, Session};
