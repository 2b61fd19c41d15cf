/// API 错误响应
///
/// 把 `common::Error` 按类别映射为 HTTP 状态码，响应体为 `{ "error", "message" }`

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<common::Error> for ApiError {
    fn from(err: common::Error) -> Self {
        let message = err.to_string();
        match err {
            common::Error::InvalidArgument(_) => ApiError::BadRequest(message),
            common::Error::NotFound(_) => ApiError::NotFound(message),
            common::Error::AlreadyExists(_) | common::Error::InUse(_) => ApiError::Conflict(message),
            _ => ApiError::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("请求处理失败: {}", self);
        }

        let body = Json(ErrorResponse {
            error: status.canonical_reason().unwrap_or("Unknown").to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Error;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::InvalidArgument("x".into()), StatusCode::BAD_REQUEST),
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::AlreadyExists("x".into()), StatusCode::CONFLICT),
            (Error::InUse("x".into()), StatusCode::CONFLICT),
            (Error::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (Error::Consistency("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (Error::Database("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_message_keeps_error_text() {
        let err = ApiError::from(Error::NotFound("存储池 p1".into()));
        assert_eq!(err.to_string(), "资源未找到: 存储池 p1");
    }
}
