use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Unknown task: {name}")]
    UnknownTask { name: String },

    #[error("Invalid file extension: {extension:?}")]
    InvalidExtension { extension: String },

    #[error("Invalid arguments for task {task}")]
    InvalidTaskArgs {
        task: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Downstream capability failed")]
    Capability(#[from] CapabilityError),

    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error("Storage error")]
    Storage(#[from] StorageError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors raised by downstream processing capabilities
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("{capability} endpoint is not configured")]
    NotConfigured { capability: &'static str },

    #[error("{capability} request to {url} failed")]
    Request {
        capability: &'static str,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{capability} rejected the request (status {status}): {message}")]
    Rejected {
        capability: &'static str,
        status: u16,
        message: String,
    },

    #[error("No download URL issued for document {document_id}")]
    NoDownloadUrl { document_id: String },
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed")]
    Serialization(#[source] serde_json::Error),
}

/// Document file storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Stored file missing for document {document_id}")]
    FileMissing { document_id: String },

    #[error("File too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("IO error")]
    Io(#[from] std::io::Error),
}

/// API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::DocumentNotFound { .. } | ServiceError::TaskNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            ServiceError::UnknownTask { .. }
            | ServiceError::InvalidExtension { .. }
            | ServiceError::InvalidTaskArgs { .. }
            | ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Storage(StorageError::FileTooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ServiceError::Capability(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::DocumentNotFound { .. } => "document_not_found",
            ServiceError::TaskNotFound { .. } => "task_not_found",
            ServiceError::UnknownTask { .. } => "unknown_task",
            ServiceError::InvalidExtension { .. } => "invalid_extension",
            ServiceError::InvalidTaskArgs { .. } => "invalid_task_args",
            ServiceError::Capability(CapabilityError::NotConfigured { .. }) => {
                "capability_not_configured"
            }
            ServiceError::Capability(CapabilityError::Request { .. }) => "capability_request",
            ServiceError::Capability(CapabilityError::Rejected { .. }) => "capability_rejected",
            ServiceError::Capability(CapabilityError::NoDownloadUrl { .. }) => "no_download_url",
            ServiceError::Database(_) => "database_error",
            ServiceError::Storage(StorageError::FileMissing { .. }) => "file_missing",
            ServiceError::Storage(StorageError::FileTooLarge { .. }) => "file_too_large",
            ServiceError::Storage(StorageError::Io(_)) => "io_error",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %format_error_chain(&self), "Request failed");
        }

        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(self.error_code().to_string()),
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Render an error followed by each of its sources, separated by `: `.
pub fn format_error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
