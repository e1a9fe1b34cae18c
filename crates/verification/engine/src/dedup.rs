//! Suppression of retried decisions
//!
//! Callers deliver decisions at least once. A retry of the same
//! `(request, actor, decision)` inside the window gets the first result
//! back instead of a second history entry.
//!
//! Without an expected level a retry cannot be told apart from a fresh
//! decision at a later level the same actor may also decide; the workflow
//! refuses that case with `StaleLevel` rather than guessing.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use verification_types::{Actor, Decision, RequestId, VerificationRequest};

/// Default retry window
pub const DEFAULT_DEDUP_WINDOW_SECS: u64 = 300;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct LedgerKey {
    request_id: RequestId,
    actor: Actor,
    decision: Decision,
}

/// A decision already applied inside the window
#[derive(Clone, Debug, PartialEq)]
pub struct PriorDecision {
    /// The level the decision was applied at
    pub level_index: usize,
    /// The request as it stood right after
    pub result: VerificationRequest,
}

#[derive(Clone, Debug)]
struct LedgerEntry {
    recorded_at: DateTime<Utc>,
    prior: PriorDecision,
}

#[derive(Debug)]
pub struct DecisionLedger {
    window: chrono::Duration,
    entries: DashMap<LedgerKey, LedgerEntry>,
}

impl Default for DecisionLedger {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECS))
    }
}

impl DecisionLedger {
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            window: chrono::Duration::from_std(window)
                .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_DEDUP_WINDOW_SECS as i64)),
            entries: DashMap::new(),
        }
    }

    /// The stored decision for an identical call still inside the window.
    ///
    /// An `expected_level` naming a different level than the stored one is
    /// a new decision, not a retry.
    pub fn lookup(
        &self,
        request_id: &RequestId,
        actor: &Actor,
        decision: Decision,
        expected_level: Option<usize>,
        now: DateTime<Utc>,
    ) -> Option<PriorDecision> {
        let key = LedgerKey {
            request_id: request_id.clone(),
            actor: actor.clone(),
            decision,
        };
        let entry = self.entries.get(&key)?.value().clone();

        if now - entry.recorded_at > self.window {
            self.entries.remove(&key);
            return None;
        }
        if expected_level.is_some_and(|level| level != entry.prior.level_index) {
            return None;
        }
        Some(entry.prior)
    }

    pub fn record(
        &self,
        request_id: &RequestId,
        actor: &Actor,
        decision: Decision,
        level_index: usize,
        result: &VerificationRequest,
        now: DateTime<Utc>,
    ) {
        self.entries.insert(
            LedgerKey {
                request_id: request_id.clone(),
                actor: actor.clone(),
                decision,
            },
            LedgerEntry {
                recorded_at: now,
                prior: PriorDecision {
                    level_index,
                    result: result.clone(),
                },
            },
        );
    }

    /// Forget entries older than the window. Returns how many were dropped.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now - entry.recorded_at <= self.window);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use verification_types::{DocumentRef, PolicyId, Role, VersionRef};

    fn request(now: DateTime<Utc>) -> VerificationRequest {
        VerificationRequest::pending(
            DocumentRef::new("emp-1", "contract"),
            VersionRef::new(PolicyId::new("pol"), 1),
            now + Duration::hours(24),
            "clerk",
            now,
        )
    }

    #[test]
    fn test_retry_inside_window_hits() {
        let ledger = DecisionLedger::default();
        let now = Utc::now();
        let req = request(now);
        let admin = Actor::new("admin-1", Role::Admin);

        ledger.record(req.id(), &admin, Decision::Approve, 0, &req, now);

        let hit = ledger
            .lookup(req.id(), &admin, Decision::Approve, None, now + Duration::seconds(30))
            .unwrap();
        assert_eq!(hit.level_index, 0);
        assert_eq!(hit.result, req);

        assert!(ledger
            .lookup(req.id(), &admin, Decision::Reject, None, now)
            .is_none());
        let other = Actor::new("admin-2", Role::Admin);
        assert!(ledger.lookup(req.id(), &other, Decision::Approve, None, now).is_none());
    }

    #[test]
    fn test_expected_level_distinguishes_new_decision() {
        let ledger = DecisionLedger::default();
        let now = Utc::now();
        let req = request(now);
        let admin = Actor::new("admin-1", Role::Admin);
        ledger.record(req.id(), &admin, Decision::Approve, 0, &req, now);

        assert!(ledger
            .lookup(req.id(), &admin, Decision::Approve, Some(0), now)
            .is_some());
        assert!(ledger
            .lookup(req.id(), &admin, Decision::Approve, Some(1), now)
            .is_none());
    }

    #[test]
    fn test_window_expiry() {
        let ledger = DecisionLedger::new(std::time::Duration::from_secs(60));
        let now = Utc::now();
        let req = request(now);
        let admin = Actor::new("admin-1", Role::Admin);
        ledger.record(req.id(), &admin, Decision::Approve, 0, &req, now);

        assert!(ledger
            .lookup(req.id(), &admin, Decision::Approve, None, now + Duration::seconds(61))
            .is_none());
        assert!(ledger.is_empty());

        ledger.record(req.id(), &admin, Decision::Approve, 0, &req, now);
        assert_eq!(ledger.purge_expired(now + Duration::seconds(30)), 0);
        assert_eq!(ledger.purge_expired(now + Duration::minutes(2)), 1);
    }
}
