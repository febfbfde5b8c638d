//! Admission policies per caller class.

use std::time::Duration;

use crate::error::{GatekeeperError, Result};

use super::identity::Caller;

/// Default request limit for authenticated callers.
pub const AUTHENTICATED_LIMIT: u32 = 50;
/// Default window for authenticated callers (one day).
pub const AUTHENTICATED_WINDOW: Duration = Duration::from_secs(86_400);
/// Default request limit for anonymous callers.
pub const ANONYMOUS_LIMIT: u32 = 10;
/// Default window for anonymous callers (one hour).
pub const ANONYMOUS_WINDOW: Duration = Duration::from_secs(3_600);

/// A validated `limit` per `window` admission policy.
///
/// Both values are guaranteed to be non-zero, so a policy that exists can
/// always be applied without further checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    limit: u32,
    window_ms: u64,
}

impl Policy {
    /// Create a policy, rejecting a zero limit or a zero-length window.
    pub fn new(limit: u32, window: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(GatekeeperError::Config(
                "policy limit must be greater than zero".to_string(),
            ));
        }

        let window_ms = u64::try_from(window.as_millis()).map_err(|_| {
            GatekeeperError::Config(format!("policy window {:?} is too large", window))
        })?;
        if window_ms == 0 {
            return Err(GatekeeperError::Config(
                "policy window must be at least one millisecond".to_string(),
            ));
        }

        Ok(Self { limit, window_ms })
    }

    /// 50 requests per day.
    pub fn authenticated_default() -> Self {
        Self {
            limit: AUTHENTICATED_LIMIT,
            window_ms: AUTHENTICATED_WINDOW.as_millis() as u64,
        }
    }

    /// 10 requests per hour.
    pub fn anonymous_default() -> Self {
        Self {
            limit: ANONYMOUS_LIMIT,
            window_ms: ANONYMOUS_WINDOW.as_millis() as u64,
        }
    }

    /// Maximum admitted requests per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Window length as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// The pair of policies applied by caller class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policies {
    pub authenticated: Policy,
    pub anonymous: Policy,
}

impl Policies {
    pub fn new(authenticated: Policy, anonymous: Policy) -> Self {
        Self {
            authenticated,
            anonymous,
        }
    }

    /// Select the policy that applies to `caller`.
    pub fn for_caller(&self, caller: &Caller) -> Policy {
        match caller {
            Caller::Authenticated { .. } => self.authenticated,
            Caller::Anonymous { .. } => self.anonymous,
        }
    }
}

impl Default for Policies {
    fn default() -> Self {
        Self::new(Policy::authenticated_default(), Policy::anonymous_default())
    }
}
