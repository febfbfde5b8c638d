//! Request admission: identities, policies, and the fixed-window tracker.

mod clock;
mod identity;
mod policy;
mod sweeper;
mod tracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use identity::{Caller, IdentityKey};
pub use policy::{
    Policies, Policy, ANONYMOUS_LIMIT, ANONYMOUS_WINDOW, AUTHENTICATED_LIMIT, AUTHENTICATED_WINDOW,
};
pub use sweeper::{
    start_sweep_loop, SweepHandle, SweepSettings, DEFAULT_STALE_THRESHOLD, DEFAULT_SWEEP_INTERVAL,
};
pub use tracker::{AdmissionResult, RequestAdmissionTracker, TrackerEntry};
