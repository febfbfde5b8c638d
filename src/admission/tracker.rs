//! Per-identity fixed-window request tracker.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::identity::IdentityKey;
use super::policy::Policy;

/// Counter state for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerEntry {
    /// Requests admitted in the current window
    pub count: u32,
    /// When the current window started (epoch milliseconds)
    pub window_start_ms: u64,
}

impl TrackerEntry {
    fn fresh(now_ms: u64) -> Self {
        Self {
            count: 0,
            window_start_ms: now_ms,
        }
    }

    /// A window is over only once `now` is strictly past its full length.
    fn is_expired(&self, policy: &Policy, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.window_start_ms) > policy.window_ms()
    }

    fn reset_at_ms(&self, policy: &Policy) -> u64 {
        self.window_start_ms.saturating_add(policy.window_ms())
    }
}

/// The outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionResult {
    /// Whether the request may proceed
    pub admitted: bool,
    /// The limit of the policy that was applied
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// When the current window ends (epoch milliseconds)
    pub reset_at_ms: u64,
}

impl AdmissionResult {
    /// Whole seconds until the window resets, rounded up and never negative.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_at_ms.saturating_sub(now_ms).div_ceil(1000)
    }
}

/// Tracks request counts per identity and decides admission.
///
/// Windows are fixed and anchored at the first request of each identity. A
/// caller can therefore get up to twice its limit through in a short span
/// around a window boundary.
///
/// All operations take one lock for a single synchronous read-modify-write,
/// so the tracker can be shared across tasks and threads behind an `Arc`.
pub struct RequestAdmissionTracker {
    entries: Mutex<HashMap<IdentityKey, TrackerEntry>>,
}

impl RequestAdmissionTracker {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether a request from `key` is admitted under `policy`, and
    /// count it if so.
    pub fn check_and_consume(
        &self,
        key: &IdentityKey,
        policy: Policy,
        now_ms: u64,
    ) -> AdmissionResult {
        trace!(key = %key, limit = policy.limit(), "Checking admission");

        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| TrackerEntry::fresh(now_ms));

        if entry.is_expired(&policy, now_ms) {
            debug!(
                key = %key,
                previous_count = entry.count,
                "Starting new admission window"
            );
            *entry = TrackerEntry::fresh(now_ms);
        }

        let reset_at_ms = entry.reset_at_ms(&policy);

        if entry.count >= policy.limit() {
            debug!(
                key = %key,
                count = entry.count,
                limit = policy.limit(),
                reset_at_ms,
                "Admission rejected"
            );
            return AdmissionResult {
                admitted: false,
                limit: policy.limit(),
                remaining: 0,
                reset_at_ms,
            };
        }

        entry.count += 1;

        AdmissionResult {
            admitted: true,
            limit: policy.limit(),
            remaining: policy.limit() - entry.count,
            reset_at_ms,
        }
    }

    /// Report what the next request from `key` would see without counting
    /// anything.
    pub fn peek(&self, key: &IdentityKey, policy: Policy, now_ms: u64) -> AdmissionResult {
        let entries = self.entries.lock();
        let current = entries
            .get(key)
            .filter(|entry| !entry.is_expired(&policy, now_ms))
            .copied()
            .unwrap_or_else(|| TrackerEntry::fresh(now_ms));

        AdmissionResult {
            admitted: current.count < policy.limit(),
            limit: policy.limit(),
            remaining: policy.limit().saturating_sub(current.count),
            reset_at_ms: current.reset_at_ms(&policy),
        }
    }

    /// Remove every entry whose window started more than
    /// `stale_threshold_ms` before `now_ms`. Returns how many were removed.
    pub fn sweep_stale(&self, now_ms: u64, stale_threshold_ms: u64) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();

        entries.retain(|_, entry| {
            now_ms.saturating_sub(entry.window_start_ms) <= stale_threshold_ms
        });

        let removed = before - entries.len();
        if removed > 0 {
            info!(
                removed,
                remaining = entries.len(),
                "Swept stale admission entries"
            );
        }
        removed
    }

    /// Get the stored entry for a key, if any.
    pub fn entry(&self, key: &IdentityKey) -> Option<TrackerEntry> {
        self.entries.lock().get(key).copied()
    }

    /// Get the number of tracked identities.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Forget every identity.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for RequestAdmissionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn policy(limit: u32, window_ms: u64) -> Policy {
        Policy::new(limit, Duration::from_millis(window_ms)).unwrap()
    }

    #[test]
    fn test_tracker_creation() {
        let tracker = RequestAdmissionTracker::new();
        assert!(tracker.is_empty());
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn test_first_request_creates_entry() {
        let tracker = RequestAdmissionTracker::new();
        let key = IdentityKey::user("1");

        let result = tracker.check_and_consume(&key, policy(5, 1000), 10);

        assert!(result.admitted);
        assert_eq!(result.remaining, 4);
        assert_eq!(result.reset_at_ms, 1010);
        assert_eq!(
            tracker.entry(&key),
            Some(TrackerEntry {
                count: 1,
                window_start_ms: 10
            })
        );
    }

    #[test]
    fn test_limit_admitted_then_rejected() {
        let tracker = RequestAdmissionTracker::new();
        let key = IdentityKey::ip("10.0.0.1");
        let policy = policy(5, 60_000);

        for i in 0..5 {
            let result = tracker.check_and_consume(&key, policy, i * 10);
            assert!(result.admitted, "Request {} should be admitted", i + 1);
        }

        let result = tracker.check_and_consume(&key, policy, 100);
        assert!(!result.admitted);
        assert_eq!(result.remaining, 0);
        assert_eq!(result.reset_at_ms, 60_000);
    }

    #[test]
    fn test_rejection_does_not_increment() {
        let tracker = RequestAdmissionTracker::new();
        let key = IdentityKey::ip("10.0.0.1");
        let policy = policy(2, 1000);

        for t in 0..5 {
            tracker.check_and_consume(&key, policy, t);
        }

        assert_eq!(tracker.entry(&key).map(|e| e.count), Some(2));
    }

    #[test]
    fn test_window_reset_after_expiry() {
        let tracker = RequestAdmissionTracker::new();
        let key = IdentityKey::user("7");
        let policy = policy(3, 1000);

        for t in [0, 1, 2] {
            assert!(tracker.check_and_consume(&key, policy, t).admitted);
        }
        assert!(!tracker.check_and_consume(&key, policy, 3).admitted);

        let result = tracker.check_and_consume(&key, policy, 1001);
        assert!(result.admitted);
        assert_eq!(result.remaining, 2);
        assert_eq!(result.reset_at_ms, 2001);
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let tracker = RequestAdmissionTracker::new();
        let key = IdentityKey::ip("1.1.1.1");
        let policy = policy(2, 1000);

        tracker.check_and_consume(&key, policy, 0);
        tracker.check_and_consume(&key, policy, 0);

        // One millisecond before the end
        assert!(!tracker.check_and_consume(&key, policy, 999).admitted);
        // Exactly at the end the old window still applies
        assert!(!tracker.check_and_consume(&key, policy, 1000).admitted);
        // Strictly past the end starts a new window
        let result = tracker.check_and_consume(&key, policy, 1001);
        assert!(result.admitted);
        assert_eq!(
            tracker.entry(&key),
            Some(TrackerEntry {
                count: 1,
                window_start_ms: 1001
            })
        );
    }

    #[test]
    fn test_documented_scenario() {
        let tracker = RequestAdmissionTracker::new();
        let key = IdentityKey::ip("1.2.3.4");
        let policy = policy(3, 1000);

        let remaining: Vec<u32> = [0, 100, 200]
            .into_iter()
            .map(|t| {
                let result = tracker.check_and_consume(&key, policy, t);
                assert!(result.admitted);
                result.remaining
            })
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        let rejected = tracker.check_and_consume(&key, policy, 300);
        assert!(!rejected.admitted);
        assert_eq!(rejected.reset_at_ms, 1000);

        let renewed = tracker.check_and_consume(&key, policy, 1001);
        assert!(renewed.admitted);
        assert_eq!(renewed.remaining, 2);
    }

    #[test]
    fn test_identities_are_isolated() {
        let tracker = RequestAdmissionTracker::new();
        let exhausted = IdentityKey::ip("1.2.3.4");
        let other = IdentityKey::ip("5.6.7.8");
        let policy = policy(1, 1000);

        assert!(tracker.check_and_consume(&exhausted, policy, 0).admitted);
        assert!(!tracker.check_and_consume(&exhausted, policy, 1).admitted);

        let result = tracker.check_and_consume(&other, policy, 2);
        assert!(result.admitted);
        assert_eq!(result.remaining, 0);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_user_and_ip_keys_do_not_share_counters() {
        let tracker = RequestAdmissionTracker::new();
        let policy = policy(1, 1000);

        assert!(tracker
            .check_and_consume(&IdentityKey::user("9"), policy, 0)
            .admitted);
        assert!(tracker
            .check_and_consume(&IdentityKey::ip("9"), policy, 0)
            .admitted);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let tracker = RequestAdmissionTracker::new();
        let key = IdentityKey::user("peek");
        let policy = policy(3, 1000);

        let untouched = tracker.peek(&key, policy, 50);
        assert!(untouched.admitted);
        assert_eq!(untouched.remaining, 3);
        assert_eq!(untouched.reset_at_ms, 1050);
        assert!(tracker.is_empty());

        tracker.check_and_consume(&key, policy, 100);
        let snapshot = tracker.peek(&key, policy, 200);
        assert_eq!(snapshot.remaining, 2);
        assert_eq!(snapshot.reset_at_ms, 1100);
        assert_eq!(tracker.entry(&key).map(|e| e.count), Some(1));
    }

    #[test]
    fn test_peek_reports_expired_window_as_full() {
        let tracker = RequestAdmissionTracker::new();
        let key = IdentityKey::user("peek");
        let policy = policy(1, 1000);

        tracker.check_and_consume(&key, policy, 0);
        assert!(!tracker.peek(&key, policy, 500).admitted);

        let later = tracker.peek(&key, policy, 2000);
        assert!(later.admitted);
        assert_eq!(later.remaining, 1);
        // The stale entry is left for the sweep
        assert_eq!(tracker.entry(&key).map(|e| e.window_start_ms), Some(0));
    }

    #[test]
    fn test_sweep_removes_only_stale_entries() {
        let tracker = RequestAdmissionTracker::new();
        let policy = policy(10, 1000);

        tracker.check_and_consume(&IdentityKey::ip("old-1"), policy, 0);
        tracker.check_and_consume(&IdentityKey::ip("old-2"), policy, 100);
        tracker.check_and_consume(&IdentityKey::ip("edge"), policy, 500);
        tracker.check_and_consume(&IdentityKey::ip("fresh"), policy, 900);

        // Threshold 1000 at t=1500: started before t=500 is stale
        let removed = tracker.sweep_stale(1500, 1000);

        assert_eq!(removed, 2);
        assert_eq!(tracker.len(), 2);
        assert!(tracker.entry(&IdentityKey::ip("old-1")).is_none());
        assert!(tracker.entry(&IdentityKey::ip("edge")).is_some());
        assert!(tracker.entry(&IdentityKey::ip("fresh")).is_some());
    }

    #[test]
    fn test_sweep_at_window_length_keeps_exhausted_window() {
        let tracker = RequestAdmissionTracker::new();
        let policy = Policy::new(1, Duration::from_secs(172_800)).unwrap();
        let key = IdentityKey::user("long-window");

        assert!(tracker.check_and_consume(&key, policy, 0).admitted);
        assert!(!tracker.check_and_consume(&key, policy, 1_000).admitted);

        // A threshold no shorter than the window never drops an open window
        assert_eq!(tracker.sweep_stale(86_400_001, policy.window_ms()), 0);
        assert!(!tracker.check_and_consume(&key, policy, 86_400_001).admitted);
    }

    #[test]
    fn test_sweep_on_empty_tracker() {
        let tracker = RequestAdmissionTracker::new();
        assert_eq!(tracker.sweep_stale(u64::MAX, 0), 0);
    }

    #[test]
    fn test_clear() {
        let tracker = RequestAdmissionTracker::new();
        tracker.check_and_consume(&IdentityKey::user("1"), policy(1, 1), 0);
        assert_eq!(tracker.len(), 1);

        tracker.clear();
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let result = AdmissionResult {
            admitted: false,
            limit: 1,
            remaining: 0,
            reset_at_ms: 10_000,
        };

        assert_eq!(result.retry_after_secs(0), 10);
        assert_eq!(result.retry_after_secs(8_999), 2);
        assert_eq!(result.retry_after_secs(9_001), 1);
        assert_eq!(result.retry_after_secs(10_000), 0);
        assert_eq!(result.retry_after_secs(12_000), 0);
    }

    #[test]
    fn test_concurrent_callers_never_exceed_limit() {
        let tracker = RequestAdmissionTracker::new();
        let key = IdentityKey::user("shared");
        let policy = policy(100, 60_000);
        let admitted = AtomicU32::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        if tracker.check_and_consume(&key, policy, 1).admitted {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 100);
        assert_eq!(tracker.entry(&key).map(|e| e.count), Some(100));
    }
}
