//! User entity — owner of agents and LLM calls.

use serde::{Deserialize, Serialize};

/// Id of the implicit user in single-user deployments.
pub const SINGLE_USER_ID: &str = "single-user";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl User {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            enabled: true,
        }
    }

    /// The sole user of a single-user deployment.
    pub fn single() -> Self {
        Self::new(SINGLE_USER_ID, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_is_enabled() {
        let user = User::new("u1", "u1@example.com");
        assert!(user.enabled);
        assert_eq!(user.id, "u1");
    }

    #[test]
    fn single_user_id_is_stable() {
        assert_eq!(User::single().id, SINGLE_USER_ID);
    }
}
