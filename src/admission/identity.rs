//! Caller classification and identity key generation.

use std::fmt;

const USER_PREFIX: &str = "user_";
const IP_PREFIX: &str = "ip_";

/// Who is making a request, as far as admission is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// A caller resolved to a user id by an upstream authentication layer
    Authenticated { user_id: String },
    /// A caller known only by its remote address
    Anonymous { remote_addr: String },
}

impl Caller {
    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Caller::Authenticated {
            user_id: user_id.into(),
        }
    }

    pub fn anonymous(remote_addr: impl Into<String>) -> Self {
        Caller::Anonymous {
            remote_addr: remote_addr.into(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Caller::Authenticated { .. })
    }

    /// Derive the counter key for this caller.
    pub fn identity_key(&self) -> IdentityKey {
        match self {
            Caller::Authenticated { user_id } => IdentityKey::user(user_id),
            Caller::Anonymous { remote_addr } => IdentityKey::ip(remote_addr),
        }
    }
}

/// A key that uniquely identifies a rate-limited caller.
///
/// User ids and remote addresses live in disjoint namespaces (`user_` and
/// `ip_`), so a user id can never share a counter with an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn user(user_id: &str) -> Self {
        Self(format!("{}{}", USER_PREFIX, user_id))
    }

    pub fn ip(remote_addr: &str) -> Self {
        Self(format!("{}{}", IP_PREFIX, remote_addr))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
