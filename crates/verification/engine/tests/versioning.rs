//! Policy version immutability and request binding

mod common;

use common::*;
use verification_engine::DecisionCommand;
use verification_types::{
    Actor, Decision, LevelSpec, RequestState, Role, VerificationMode, VersionRef,
};

#[tokio::test]
async fn test_reactivation_after_unlock_creates_distinct_versions() {
    let h = Harness::new();
    let policies = h.service.policies();
    let (policy, v1) = h
        .activate(draft("Transcript", VerificationMode::Multi, two_level_levels()))
        .await;

    policies
        .unlock(&policy.id, "admin-1", "re-issue without changes")
        .await
        .unwrap();
    let v2 = policies.activate(&policy.id, "admin-1").await.unwrap();

    assert_eq!(v1.version_id(), 1);
    assert_eq!(v2.version_id(), 2);
    assert_eq!(v1.levels(), v2.levels());

    let stored_v1 = policies
        .get_version(&VersionRef::new(policy.id.clone(), 1))
        .await
        .unwrap();
    let stored_v2 = policies
        .get_version(&VersionRef::new(policy.id.clone(), 2))
        .await
        .unwrap();
    assert_eq!(stored_v1.unlock_reason(), Some("re-issue without changes"));
    assert!(stored_v1.superseded_at().is_some());
    assert!(stored_v2.superseded_at().is_none());
}

#[tokio::test]
async fn test_in_flight_request_keeps_its_version() {
    let h = Harness::new();
    let policies = h.service.policies();
    let workflow = h.service.workflow();
    let (policy, v1) = h
        .activate(draft("Transcript", VerificationMode::Multi, two_level_levels()))
        .await;

    let in_flight = workflow.submit(submit("Transcript", "student-1")).await.unwrap();
    assert_eq!(in_flight.policy_version_id(), &v1.reference());

    // Swap the second level for a Registrar and drop the reject right
    policies
        .unlock(&policy.id, "admin-1", "registrar signs off now")
        .await
        .unwrap();
    let edit = draft(
        "Transcript",
        VerificationMode::Multi,
        vec![
            LevelSpec::new(Role::Admin, 24, false),
            LevelSpec::new(Role::Registrar, 12, false),
            LevelSpec::new(Role::Principal, 72, true),
        ],
    )
    .with_id(policy.id.clone());
    policies.save_draft(edit, "admin-1").await.unwrap();
    let v2 = policies.activate(&policy.id, "admin-1").await.unwrap();

    let frozen_v1 = policies.get_version(&v1.reference()).await.unwrap();
    assert_eq!(frozen_v1.levels(), two_level_levels().as_slice());

    // The old request still runs under v1 rules: Admin may reject there
    let admin = Actor::new("admin-1", Role::Admin);
    let after = workflow
        .decide(in_flight.id(), DecisionCommand::new(admin.clone(), Decision::Approve))
        .await
        .unwrap();
    let done = workflow
        .decide(
            after.id(),
            DecisionCommand::new(Actor::new("co-1", Role::ComplianceOfficer), Decision::Approve),
        )
        .await
        .unwrap();
    assert_eq!(done.state(), RequestState::Approved);
    assert_eq!(done.policy_version_id(), &v1.reference());

    // New submissions bind to v2
    let fresh = workflow.submit(submit("Transcript", "student-2")).await.unwrap();
    assert_eq!(fresh.policy_version_id(), &v2.reference());
    assert_eq!(
        fresh.current_deadline(),
        Some(start_time() + chrono::Duration::hours(24))
    );
}

#[tokio::test]
async fn test_unlocked_policy_still_serves_last_active_version() {
    let h = Harness::new();
    let (policy, v1) = h
        .activate(draft(
            "Birth Certificate",
            VerificationMode::Manual,
            vec![LevelSpec::new(Role::Admin, 24, true)],
        ))
        .await;
    h.service
        .policies()
        .unlock(&policy.id, "admin-1", "edit in progress")
        .await
        .unwrap();

    let request = h
        .service
        .workflow()
        .submit(submit("Birth Certificate", "student-9"))
        .await
        .unwrap();
    assert_eq!(request.policy_version_id(), &v1.reference());
}
