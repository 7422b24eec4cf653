//! Document API endpoints.
//!
//! Upload, listing, download and reprocessing of documents.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::Document;
use crate::error::ServiceError;
use crate::service::QueuedDocument;

use super::AppState;

/// List documents query parameters
#[derive(Deserialize)]
pub struct ListDocumentsParams {
    pub user_id: Option<String>,
}

fn invalid_request(message: impl Into<String>) -> ServiceError {
    ServiceError::InvalidRequest {
        message: message.into(),
    }
}

/// List documents, optionally restricted to one owner
pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListDocumentsParams>,
) -> Result<Json<Vec<Document>>, ServiceError> {
    let documents = state
        .service
        .list_documents(params.user_id.as_deref())?;
    Ok(Json(documents))
}

/// Upload a new document and queue it for dispatch
pub async fn upload_document_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<QueuedDocument>, ServiceError> {
    let mut file_data: Option<(Vec<u8>, String)> = None;
    let mut user_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| invalid_request(e.body_text()))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("document").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| invalid_request(e.body_text()))?;
                file_data = Some((data.to_vec(), filename));
            }
            "user_id" => {
                user_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| invalid_request(e.body_text()))?,
                );
            }
            _ => {}
        }
    }

    let (data, filename) = file_data.ok_or_else(|| invalid_request("No file provided"))?;
    let user_id = user_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| invalid_request("No user_id provided"))?;

    let queued = state
        .service
        .upload_document(&data, &filename, &user_id)
        .await?;

    Ok(Json(queued))
}

/// Get a specific document by ID
pub async fn get_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Document>, ServiceError> {
    Ok(Json(state.service.get_document(&id)?))
}

/// Serve a document's stored file
pub async fn download_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ServiceError> {
    let (document, content) = state.service.download_document(&id).await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        document.name.replace(['"', '\\'], "_")
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime::APPLICATION_OCTET_STREAM.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        content,
    )
        .into_response())
}

/// Queue another dispatch of a document
pub async fn process_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<QueuedDocument>, ServiceError> {
    Ok(Json(state.service.process_document(&id)?))
}
