use axum::{
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fin_queue::QueueError;
use serde_json::{json, Value};

/// Feathers-style error classes the dashboard can return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,   // 400
    NotFound,     // 404
    Timeout,      // 408
    Conflict,     // 409
    GeneralError, // 500
    Unavailable,  // 503
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Timeout => 408,
            ErrorKind::Conflict => 409,
            ErrorKind::GeneralError => 500,
            ErrorKind::Unavailable => 503,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::GeneralError => "GeneralError",
            ErrorKind::Unavailable => "Unavailable",
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad-request",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Conflict => "conflict",
            ErrorKind::GeneralError => "general-error",
            ErrorKind::Unavailable => "unavailable",
        }
    }
}

/// Error returned by dashboard handlers, rendered as
/// `{name, message, code, className}`
#[derive(Debug)]
pub struct DashboardError {
    pub kind: ErrorKind,
    pub message: String,
}

impl DashboardError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn general_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::GeneralError, msg)
    }

    pub fn queue_not_found(queue: &str) -> Self {
        QueueError::QueueNotFound(queue.to_string()).into()
    }

    pub fn code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "name": self.kind.name(),
            "message": self.message,
            "code": self.code(),
            "className": self.kind.class_name(),
        })
    }
}

impl From<QueueError> for DashboardError {
    fn from(err: QueueError) -> Self {
        let kind = match &err {
            QueueError::QueueNotFound(_) | QueueError::JobNotFound(_) => ErrorKind::NotFound,
            QueueError::JobNotFailed(_) | QueueError::JobAlreadyTerminal => ErrorKind::Conflict,
            QueueError::Timeout(_) => ErrorKind::Timeout,
            QueueError::Backend(_) | QueueError::WorkerShutdown => ErrorKind::Unavailable,
            _ => ErrorKind::GeneralError,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<QueryRejection> for DashboardError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(format!("Invalid query: {}", rejection.body_text()))
    }
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_errors_map_to_status() {
        let err: DashboardError = QueueError::QueueNotFound("nope".into()).into();
        assert_eq!(err.code(), 404);
        assert_eq!(err.to_json()["message"], "Queue nope not found");

        let err: DashboardError = QueueError::JobNotFailed("j".into()).into();
        assert_eq!(err.code(), 409);
        assert_eq!(err.to_json()["className"], "conflict");

        let err: DashboardError = QueueError::Internal("x".into()).into();
        assert_eq!(err.to_json()["name"], "GeneralError");
    }
}
