use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// Coarse error classes that callers branch on instead of parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connectivity,
    StoreContention,
    Decode,
    IntegrityViolation,
    NotFound,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::StoreContention => "store_contention",
            ErrorKind::Decode => "decode",
            ErrorKind::IntegrityViolation => "integrity_violation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("gallery unreachable: {0}")]
    Unreachable(String),
    #[error("gallery returned HTTP {status}")]
    HttpError { status: u16 },
    #[error("store busy: {0}")]
    StoreContention(String),
    #[error("cannot decode `{name}`: {reason}")]
    Decode { name: String, reason: String },
    #[error("task `{0}` already exists")]
    DuplicateId(String),
    #[error("{0}")]
    Integrity(String),
    #[error("{what} `{id}` not found")]
    NotFound { what: &'static str, id: String },
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error(transparent)]
    Sqlx(sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("worker failed: {0}")]
    Worker(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Unreachable(_) | PipelineError::HttpError { .. } => {
                ErrorKind::Connectivity
            }
            PipelineError::StoreContention(_) => ErrorKind::StoreContention,
            PipelineError::Decode { .. } => ErrorKind::Decode,
            PipelineError::DuplicateId(_)
            | PipelineError::Integrity(_)
            | PipelineError::Invalid(_) => ErrorKind::IntegrityViolation,
            PipelineError::NotFound { .. } => ErrorKind::NotFound,
            PipelineError::Sqlx(_)
            | PipelineError::Io(_)
            | PipelineError::Zip(_)
            | PipelineError::Json(_)
            | PipelineError::Worker(_) => ErrorKind::Internal,
        }
    }

    pub fn not_found(what: &'static str, id: impl ToString) -> Self {
        PipelineError::NotFound {
            what,
            id: id.to_string(),
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        if is_busy(&err) {
            return PipelineError::StoreContention(err.to_string());
        }
        if is_foreign_key_violation(&err) {
            return PipelineError::Integrity(format!("missing referenced row: {err}"));
        }
        PipelineError::Sqlx(err)
    }
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended codes.
pub fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let primary = db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            matches!(primary, Some(5) | Some(6))
                || db_err.message().contains("database is locked")
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("foreign key")
    )
}

/// Error type returned by HTTP handlers.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorKind::NotFound, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "kind": self.kind,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let kind = err.kind();
        let status = match &err {
            PipelineError::DuplicateId(_) => StatusCode::CONFLICT,
            PipelineError::Integrity(_) | PipelineError::Invalid(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => match kind {
                ErrorKind::Connectivity => StatusCode::BAD_GATEWAY,
                ErrorKind::StoreContention => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Decode => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::IntegrityViolation => StatusCode::CONFLICT,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };
        if kind == ErrorKind::Internal {
            tracing::error!(error = %err, "request failed");
        }
        AppError::new(status, kind, err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            PipelineError::HttpError { status: 502 }.kind(),
            ErrorKind::Connectivity
        );
        assert_eq!(
            PipelineError::DuplicateId("t1".into()).kind(),
            ErrorKind::IntegrityViolation
        );
        assert_eq!(
            PipelineError::not_found("task", "t1").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            PipelineError::Decode {
                name: "a.jpg".into(),
                reason: "truncated".into()
            }
            .kind(),
            ErrorKind::Decode
        );
    }

    #[test]
    fn duplicate_id_maps_to_conflict() {
        let app: AppError = PipelineError::DuplicateId("t1".into()).into();
        assert_eq!(app.status, StatusCode::CONFLICT);
        assert_eq!(app.kind, ErrorKind::IntegrityViolation);
    }

    #[test]
    fn missing_reference_maps_to_unprocessable() {
        let app: AppError = PipelineError::Integrity("no such album".into()).into();
        assert_eq!(app.status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
