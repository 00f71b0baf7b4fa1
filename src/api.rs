//! HTTP directory surface: document CRUD, collaborators, versions, revert.
//!
//! Every route requires a bearer token; authorization matches the socket
//! side (owner or collaborator to read and edit, owner alone for deletion
//! and collaborator management). Errors map the sync taxonomy onto HTTP
//! statuses with a `{"error": {"message": ...}}` body.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::auth::{AuthUser, TokenVerifier};
use crate::storage::StoredDocument;
use crate::sync::protocol::{DocumentPayload, VersionPayload};
use crate::sync::SyncError;
use crate::AppState;

/// A `SyncError` carried to an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self(err)
    }
}

impl From<crate::storage::StorageError> for ApiError {
    fn from(err: crate::storage::StorageError) -> Self {
        Self(SyncError::from(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SyncError::Auth(_) => StatusCode::UNAUTHORIZED,
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::Forbidden(_) => StatusCode::FORBIDDEN,
            SyncError::PatchFailed(_) => StatusCode::CONFLICT,
            SyncError::Persistence(_) | SyncError::Connection(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(json!({ "error": { "message": self.0.to_string() } })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Pull the bearer token out of the Authorization header and validate it.
pub fn authenticate(verifier: &TokenVerifier, headers: &HeaderMap) -> Result<AuthUser, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError(SyncError::Auth("missing bearer token".to_string())))?;
    verifier.verify(token).map_err(ApiError)
}

// ----------------------------------------------------------------------
// Request / response bodies
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentRequest {
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDocumentRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCollaboratorRequest {
    pub user_id: String,
}

/// Listing entry: the document without its content or history.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
    pub owner_id: String,
    pub collaborator_ids: Vec<String>,
    pub current_version: Option<u64>,
    pub last_modified: i64,
}

impl From<StoredDocument> for DocumentSummary {
    fn from(doc: StoredDocument) -> Self {
        Self {
            id: doc.id,
            title: doc.title,
            owner_id: doc.owner_id,
            collaborator_ids: doc.collaborator_ids,
            current_version: doc.current_version,
            last_modified: doc.last_modified,
        }
    }
}

// ----------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------

pub async fn list_documents(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Vec<DocumentSummary>> {
    let user = authenticate(&state.verifier, &headers)?;
    let docs = state.engine.storage().list_documents_for_user(&user.id)?;
    Ok(Json(docs.into_iter().map(DocumentSummary::from).collect()))
}

pub async fn create_document(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateDocumentRequest>,
) -> ApiResult<DocumentPayload> {
    let user = authenticate(&state.verifier, &headers)?;

    let doc = StoredDocument::new(uuid::Uuid::new_v4().to_string(), request.title, &user.id)
        .with_content(request.content.unwrap_or_default());
    state.engine.storage().create_document(&doc)?;

    tracing::info!("Document created: {} by {}", doc.id, user.username);
    Ok(Json(DocumentPayload::from_stored(doc, Vec::new())))
}

pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<DocumentPayload> {
    let user = authenticate(&state.verifier, &headers)?;
    let doc = state.engine.storage().require_document(&id)?;
    if !doc.can_edit(&user.id) {
        return Err(ApiError(SyncError::Forbidden(format!(
            "{} cannot access document {}",
            user.id, id
        ))));
    }
    let versions = state.engine.storage().get_versions(&id)?;
    Ok(Json(DocumentPayload::from_stored(doc, versions)))
}

pub async fn update_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<UpdateDocumentRequest>,
) -> ApiResult<DocumentPayload> {
    let user = authenticate(&state.verifier, &headers)?;
    let payload = state
        .engine
        .manual_update(&user, &id, request.title, request.content)
        .await?;
    Ok(Json(payload))
}

pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let user = authenticate(&state.verifier, &headers)?;
    state.engine.delete_document(&user, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_collaborator(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<AddCollaboratorRequest>,
) -> ApiResult<DocumentPayload> {
    let user = authenticate(&state.verifier, &headers)?;
    let mut doc = state.engine.storage().require_document(&id)?;
    if !doc.is_owner(&user.id) {
        return Err(ApiError(SyncError::Forbidden(format!(
            "only the owner may share document {}",
            id
        ))));
    }

    if request.user_id != doc.owner_id && !doc.collaborator_ids.contains(&request.user_id) {
        doc.collaborator_ids.push(request.user_id);
        state.engine.storage().put_document(&doc)?;
    }

    let versions = state.engine.storage().get_versions(&id)?;
    Ok(Json(DocumentPayload::from_stored(doc, versions)))
}

pub async fn remove_collaborator(
    State(state): State<Arc<AppState>>,
    Path((id, user_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<DocumentPayload> {
    let user = authenticate(&state.verifier, &headers)?;
    let mut doc = state.engine.storage().require_document(&id)?;
    if !doc.is_owner(&user.id) {
        return Err(ApiError(SyncError::Forbidden(format!(
            "only the owner may unshare document {}",
            id
        ))));
    }

    doc.collaborator_ids.retain(|c| c != &user_id);
    state.engine.storage().put_document(&doc)?;

    let versions = state.engine.storage().get_versions(&id)?;
    Ok(Json(DocumentPayload::from_stored(doc, versions)))
}

pub async fn get_versions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Vec<VersionPayload>> {
    let user = authenticate(&state.verifier, &headers)?;
    let doc = state.engine.storage().require_document(&id)?;
    if !doc.can_edit(&user.id) {
        return Err(ApiError(SyncError::Forbidden(format!(
            "{} cannot access document {}",
            user.id, id
        ))));
    }
    let versions = state.engine.storage().get_versions(&id)?;
    Ok(Json(
        versions.into_iter().map(VersionPayload::from).collect(),
    ))
}

pub async fn revert_document(
    State(state): State<Arc<AppState>>,
    Path((id, version_index)): Path<(String, u64)>,
    headers: HeaderMap,
) -> ApiResult<DocumentPayload> {
    let user = authenticate(&state.verifier, &headers)?;
    let payload = state.engine.revert(&user, &id, version_index).await?;
    Ok(Json(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (SyncError::Auth("x".into()), StatusCode::UNAUTHORIZED),
            (SyncError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (SyncError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (SyncError::PatchFailed("x".into()), StatusCode::CONFLICT),
            (
                SyncError::Persistence("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let response = ApiError(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_authenticate_requires_bearer_scheme() {
        let verifier =
            TokenVerifier::new("syncpad_test_secret_that_is_definitely_long_enough").unwrap();
        let mut headers = HeaderMap::new();

        assert!(authenticate(&verifier, &headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(authenticate(&verifier, &headers).is_err());

        let user = AuthUser {
            id: "u1".to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
        };
        let token = verifier.issue_token(&user, 3600).unwrap();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        assert_eq!(authenticate(&verifier, &headers).unwrap(), user);
    }

    #[test]
    fn test_summary_omits_content() {
        let doc = StoredDocument::new("d1", "Notes", "u1").with_content("secret body");
        let summary = DocumentSummary::from(doc);
        let value = serde_json::to_value(&summary).unwrap();
        assert!(value.get("content").is_none());
        assert_eq!(value["ownerId"], "u1");
    }
}
