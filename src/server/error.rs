// API 错误类型

use crate::server::handlers::ApiResponse;
use crate::uploader::{BatchError, ConfigurationError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// 请求内容错误
pub const CODE_BAD_REQUEST: i32 = 1000;
/// 上传接口未配置或配置错误
pub const CODE_NOT_CONFIGURED: i32 = 1001;
/// 批次内文件重名
pub const CODE_DUPLICATE_FILE: i32 = 1002;

/// API 错误
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Batch(#[from] BatchError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, i32) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, CODE_BAD_REQUEST),
            ApiError::Batch(BatchError::Configuration(ConfigurationError::MissingApiUrl(_))) => {
                (StatusCode::SERVICE_UNAVAILABLE, CODE_NOT_CONFIGURED)
            }
            ApiError::Batch(BatchError::Configuration(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, CODE_NOT_CONFIGURED)
            }
            ApiError::Batch(BatchError::DuplicateFileName(_)) => {
                (StatusCode::CONFLICT, CODE_DUPLICATE_FILE)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = ApiResponse::<()>::error(code, self.to_string());
        (status, Json(body)).into_response()
    }
}

/// 处理器返回类型
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;
