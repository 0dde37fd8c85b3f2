//! Credential values and the modes that select which fields matter.

use std::collections::HashMap;

/// One credential tuple to try against a target. Immutable once built; the
/// dictionary creates these and probes only read them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Auth {
    /// Account name, where the protocol has one.
    pub username: Option<String>,
    /// Password, token, or community string.
    pub password: Option<String>,
    /// Protocol-specific parameters: `sid` for Oracle, `domain` for SMB/RDP.
    pub extra: HashMap<String, String>,
}

impl Auth {
    /// An empty credential, for protocols probed without authentication.
    pub fn none() -> Self {
        Self::default()
    }

    /// A password-only credential (Redis legacy auth, SNMP community).
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            username: None,
            password: Some(password.into()),
            extra: HashMap::new(),
        }
    }

    /// A username/password credential.
    pub fn user_pass(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            extra: HashMap::new(),
        }
    }

    /// Adds a protocol-specific parameter.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub(crate) fn username_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.username.as_deref().unwrap_or(default)
    }

    pub(crate) fn password_or_empty(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }

    pub(crate) fn extra(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }
}

/// Which fields of an [`Auth`] a cracker consults, and therefore how the
/// dictionary is expanded for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMode {
    /// Unauthenticated probe; the credential is empty.
    None,
    /// Password or token only (Redis legacy auth, SNMP community strings).
    OnlyPass,
    /// Username and password both required.
    UserPass,
}
