//! Roles and permissions.
//!
//! A permission is an opaque capability token compared verbatim
//! (e.g. `attack.run`, `audit.read`); wildcard patterns are out of scope.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Named bundle of permission strings. Role names are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub description: String,
    pub permissions: HashSet<String>,
}

impl Role {
    #[must_use]
    pub fn new(name: impl Into<String>, permissions: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            permissions: permissions.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn grants(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}
