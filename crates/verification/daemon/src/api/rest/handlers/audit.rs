//! Audit trail handlers

use crate::api::rest::extract::ApiQuery;
use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{extract::State, Json};
use serde::Deserialize;
use verification_types::{AuditEntry, SubjectType};

/// Audit query params
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub subject_type: String,
    pub subject_id: String,
}

/// Entries for one policy or request, oldest first
pub async fn query_audit(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<AuditQuery>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    let subject_type: SubjectType = query.subject_type.parse()?;
    let entries = state
        .service
        .audit()
        .query(subject_type, &query.subject_id)
        .await?;
    Ok(Json(entries))
}
