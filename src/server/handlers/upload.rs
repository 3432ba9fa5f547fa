// 上传API处理器

use crate::server::error::{ApiError, ApiResult};
use crate::server::handlers::ApiResponse;
use crate::server::AppState;
use crate::uploader::{guess_content_type, BatchSnapshot, FileHandle};
use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

/// 被拒绝的文件（类型不在允许列表中）
#[derive(Debug, Clone, Serialize)]
pub struct RejectedFile {
    pub file_name: String,
    pub content_type: String,
}

/// 提交批次响应
#[derive(Debug, Serialize)]
pub struct SubmitUploadsResponse {
    pub batch_id: u64,
    /// 实际进入队列的文件数
    pub total: usize,
    pub rejected: Vec<RejectedFile>,
}

/// POST /api/v1/uploads
/// 以 multipart 提交一个批次，每个带文件名的字段视为一个文件
///
/// 未携带 Content-Type 的字段按扩展名推断类型
pub async fn submit_uploads(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<SubmitUploadsResponse> {
    let mut files = Vec::new();
    let mut rejected = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("读取上传内容失败: {}", e)))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| guess_content_type(&file_name));

        if !state.config.upload.accepts(&content_type) {
            warn!("拒绝不支持的文件类型: {} ({})", file_name, content_type);
            rejected.push(RejectedFile {
                file_name,
                content_type,
            });
            continue;
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("读取文件 {} 失败: {}", file_name, e)))?;
        files.push(FileHandle::new(file_name, content_type, data));
    }

    let handle = state.scheduler.submit_batch(files)?;
    info!(
        "API: 提交上传批次成功: batch_id={}, 文件数={}, 拒绝={}",
        handle.batch_id(),
        handle.total(),
        rejected.len()
    );

    Ok(Json(ApiResponse::success(SubmitUploadsResponse {
        batch_id: handle.batch_id(),
        total: handle.total(),
        rejected,
    })))
}

/// GET /api/v1/uploads
/// 当前批次快照
pub async fn get_uploads(State(state): State<AppState>) -> ApiResult<BatchSnapshot> {
    Ok(Json(ApiResponse::success(state.scheduler.snapshot())))
}

/// GET /api/v1/uploads/progress
/// 文件名 → 进度百分比
pub async fn get_upload_progress(
    State(state): State<AppState>,
) -> ApiResult<HashMap<String, u8>> {
    Ok(Json(ApiResponse::success(state.scheduler.progress())))
}
