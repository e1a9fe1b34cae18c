//! Policy editing and version lookup handlers

use super::default_actor;
use crate::api::rest::extract::{ApiJson, ApiQuery, OptionalApiJson};
use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use verification_types::{
    EntityType, Policy, PolicyDraft, PolicyId, PolicyKey, PolicyVersion, VersionRef,
};

/// Save draft request: the policy fields plus who is saving
#[derive(Debug, Deserialize)]
pub struct SavePolicyRequest {
    #[serde(flatten)]
    pub draft: PolicyDraft,
    #[serde(default = "default_actor")]
    pub actor: String,
}

/// Activate request
#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    #[serde(default = "default_actor")]
    pub actor: String,
}

/// Unlock request
#[derive(Debug, Deserialize)]
pub struct UnlockRequest {
    #[serde(default = "default_actor")]
    pub actor: String,
    #[serde(default)]
    pub reason: String,
}

/// List policies query params
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPoliciesQuery {
    pub branch_id: Option<String>,
    pub entity_type: Option<String>,
}

/// Active version query params
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveVersionQuery {
    pub branch_id: String,
    pub entity_type: String,
    pub document_name: String,
}

/// List policies, optionally narrowed to a branch and entity type
pub async fn list_policies(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListPoliciesQuery>,
) -> ApiResult<Json<Vec<Policy>>> {
    let entity_type = query
        .entity_type
        .as_deref()
        .map(str::parse::<EntityType>)
        .transpose()?;

    let policies = state
        .service
        .policies()
        .list_policies(query.branch_id.as_deref(), entity_type)
        .await?;
    Ok(Json(policies))
}

/// Create or replace a draft
pub async fn save_policy(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SavePolicyRequest>,
) -> ApiResult<Json<Policy>> {
    let policy = state
        .service
        .policies()
        .save_draft(request.draft, &request.actor)
        .await?;
    Ok(Json(policy))
}

/// Get a policy by ID
pub async fn get_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Policy>> {
    let policy = state.service.policies().get_policy(&PolicyId::new(id)).await?;
    Ok(Json(policy))
}

/// Freeze the draft into a new version and make it active. The body is
/// optional; without one the actor defaults.
pub async fn activate_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    OptionalApiJson(request): OptionalApiJson<ActivateRequest>,
) -> ApiResult<Json<PolicyVersion>> {
    let actor = request.map_or_else(default_actor, |r| r.actor);
    let version = state
        .service
        .policies()
        .activate(&PolicyId::new(id), &actor)
        .await?;
    Ok(Json(version))
}

/// Reopen a locked policy for editing
pub async fn unlock_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<UnlockRequest>,
) -> ApiResult<Json<Policy>> {
    let policy = state
        .service
        .policies()
        .unlock(&PolicyId::new(id), &request.actor, &request.reason)
        .await?;
    Ok(Json(policy))
}

/// Every frozen version of a policy
pub async fn list_versions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<PolicyVersion>>> {
    let versions = state
        .service
        .policies()
        .list_versions(&PolicyId::new(id))
        .await?;
    Ok(Json(versions))
}

pub async fn get_version(
    State(state): State<AppState>,
    Path((id, version_id)): Path<(String, u32)>,
) -> ApiResult<Json<PolicyVersion>> {
    let reference = VersionRef::new(PolicyId::new(id), version_id);
    let version = state.service.policies().get_version(&reference).await?;
    Ok(Json(version))
}

/// The version new submissions for a document type bind to
pub async fn get_active_version(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ActiveVersionQuery>,
) -> ApiResult<Json<PolicyVersion>> {
    let key = PolicyKey::new(
        query.branch_id,
        query.entity_type.parse::<EntityType>()?,
        query.document_name,
    );
    let version = state.service.policies().get_active_version(&key).await?;
    Ok(Json(version))
}
