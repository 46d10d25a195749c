//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Mistakes in model declarations or in how the library is driven.
/// Always a server-side problem, never caused by request data.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("model {0} not found")]
    UnknownModel(String),
    #[error("relationship {relationship} on {model} targets unknown model {target}")]
    UnknownTarget {
        model: String,
        relationship: String,
        target: String,
    },
    #[error("relationship {relationship} not found on {model}")]
    UnknownRelationship { model: String, relationship: String },
    #[error("composite primary key not supported on {0}")]
    CompositePrimaryKey(String),
    #[error("model {0} has no primary key")]
    MissingPrimaryKey(String),
    #[error("relationship {model}.{relationship} must declare back_populates")]
    MissingBackReference { model: String, relationship: String },
    #[error("relationship {model}.{relationship} back-references {target}.{back}, which does not point back")]
    AsymmetricBackReference {
        model: String,
        relationship: String,
        target: String,
        back: String,
    },
    #[error("unknown column {column} on {table}")]
    UnknownColumn { table: String, column: String },
    #[error("polymorphic variant {variant} inherits unknown or non-polymorphic base {base}")]
    InvalidInheritance { variant: String, base: String },
    #[error("Nested transaction not allowed. Use nested=True to force nesting")]
    NestedTransaction,
    #[error("upsert on {0} requires find_by columns or a full primary key")]
    UpsertKey(String),
    #[error("config load: {0}")]
    Load(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Db(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            AppError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::NotFound(_) | AppError::Db(sqlx::Error::RowNotFound) => "not_found",
            AppError::Validation(_) => "validation_error",
            AppError::Db(_) => "database_error",
            AppError::Conflict(_) => "conflict",
            AppError::BadRequest(_) => "bad_request",
            AppError::Internal(_) => "internal_error",
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}
