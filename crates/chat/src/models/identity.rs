//! Signed-in user identity

use serde::{Deserialize, Serialize};

/// The signed-in user
///
/// Immutable for the session: set at login, cleared at logout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub is_admin: bool,
}

impl Identity {
    pub fn new(username: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            display_name: display_name.into(),
            is_admin: false,
        }
    }
}
