//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use std::sync::Arc;
use verification_engine::{
    BroadcastEscalationSink, InMemoryStorage, ManualClock, SubmitCommand, VerificationService,
};
use verification_types::{
    DocumentRef, EntityType, LevelSpec, Policy, PolicyDraft, PolicyVersion, Role, VerificationMode,
};

pub const BRANCH: &str = "br-north";

pub struct Harness {
    pub service: VerificationService,
    pub storage: Arc<InMemoryStorage>,
    pub clock: Arc<ManualClock>,
    pub escalations: BroadcastEscalationSink,
}

impl Harness {
    pub fn new() -> Self {
        let storage = Arc::new(InMemoryStorage::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let escalations = BroadcastEscalationSink::new(64);
        let service = VerificationService::builder(storage.clone())
            .clock(clock.clone())
            .sink(Arc::new(escalations.clone()))
            .build();
        Self {
            service,
            storage,
            clock,
            escalations,
        }
    }

    /// Save and activate a policy in one go
    pub async fn activate(&self, draft: PolicyDraft) -> (Policy, PolicyVersion) {
        let policy = self
            .service
            .policies()
            .save_draft(draft, "admin-1")
            .await
            .expect("save draft");
        let version = self
            .service
            .policies()
            .activate(&policy.id, "admin-1")
            .await
            .expect("activate");
        (policy, version)
    }
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_767_225_600, 0).expect("valid timestamp")
}

pub fn draft(document: &str, mode: VerificationMode, levels: Vec<LevelSpec>) -> PolicyDraft {
    PolicyDraft::new(BRANCH, EntityType::Student, document, mode).with_levels(levels)
}

/// Admin (24h, may reject) then Compliance Officer (48h, may not reject)
pub fn two_level_levels() -> Vec<LevelSpec> {
    vec![
        LevelSpec::new(Role::Admin, 24, true),
        LevelSpec::new(Role::ComplianceOfficer, 48, false),
    ]
}

pub fn submit(document: &str, owner: &str) -> SubmitCommand {
    SubmitCommand::new(
        DocumentRef::new(owner, document.to_lowercase().replace(' ', "-")),
        BRANCH,
        EntityType::Student,
        document,
    )
    .submitted_by("clerk-1")
}
