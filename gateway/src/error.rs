//! HTTP 错误响应
//!
//! 把 `AppError` 渲染为 RFC 7807 Problem Details

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use throttle_errors::AppError;
use tracing::{error, warn};

/// axum 边界上的错误包装
#[derive(Debug)]
pub struct ApiError {
    error: AppError,
    /// 出错的请求路径，写入 `instance`
    instance: Option<String>,
}

impl ApiError {
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }
}

impl From<AppError> for ApiError {
    fn from(error: AppError) -> Self {
        Self {
            error,
            instance: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut problem = self.error.to_problem_details();
        if let Some(instance) = self.instance {
            problem = problem.with_instance(instance);
        }
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(error = %self.error, instance = ?problem.instance, "Request failed");
        } else {
            warn!(error = %self.error, instance = ?problem.instance, "Request rejected");
        }

        let mut response = (status, Json(problem)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}
