//! Verification request handlers

use crate::api::rest::extract::{ApiJson, ApiQuery};
use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use verification_engine::{DecisionCommand, SubmitCommand};
use verification_types::{
    Actor, Decision, DocumentRef, RequestId, Role, VerificationRequest,
};

/// Actor as sent by clients; the role is parsed so an unknown name is
/// reported as `UnknownRole`
#[derive(Debug, Deserialize)]
pub struct ActorBody {
    pub id: String,
    pub role: String,
}

/// Decide request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecideRequest {
    pub actor: ActorBody,
    pub decision: Decision,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub expected_level: Option<usize>,
}

impl DecideRequest {
    fn into_command(self) -> ApiResult<DecisionCommand> {
        let role: Role = self.actor.role.parse()?;
        let mut command = DecisionCommand::new(Actor::new(self.actor.id, role), self.decision);
        if let Some(comment) = self.comment.filter(|c| !c.trim().is_empty()) {
            command = command.with_comment(comment);
        }
        if let Some(level) = self.expected_level {
            command = command.at_level(level);
        }
        Ok(command)
    }
}

/// List requests query params
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequestsQuery {
    /// `owner/slot`
    pub document_ref: String,
}

/// Submit a document for verification
pub async fn submit_request(
    State(state): State<AppState>,
    ApiJson(command): ApiJson<SubmitCommand>,
) -> ApiResult<Json<VerificationRequest>> {
    let request = state.service.workflow().submit(command).await?;
    Ok(Json(request))
}

/// Every request opened for one document slot
pub async fn list_requests(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListRequestsQuery>,
) -> ApiResult<Json<Vec<VerificationRequest>>> {
    let document_ref: DocumentRef = query.document_ref.parse()?;
    let requests = state
        .service
        .workflow()
        .list_for_document(&document_ref)
        .await?;
    Ok(Json(requests))
}

/// Get a request by ID
pub async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<VerificationRequest>> {
    let request = state
        .service
        .workflow()
        .get_request(&RequestId::new(id))
        .await?;
    Ok(Json(request))
}

/// Approve or reject at the current level
pub async fn decide_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<DecideRequest>,
) -> ApiResult<Json<VerificationRequest>> {
    let command = body.into_command()?;
    let request = state
        .service
        .workflow()
        .decide(&RequestId::new(id), command)
        .await?;
    Ok(Json(request))
}
