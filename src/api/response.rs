//! JSON 响应封装

use actix_web::HttpResponse;
use actix_web::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::errors::OctolinkError;

/// `{code, message, data?}`，成功时 `code` 为 0，失败时为 HTTP 状态码
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// 引擎错误对应的 HTTP 状态码
pub fn http_status(err: &OctolinkError) -> StatusCode {
    match err {
        OctolinkError::InvalidInput(_) | OctolinkError::DateParse(_) => StatusCode::BAD_REQUEST,
        OctolinkError::NotFound(_) => StatusCode::NOT_FOUND,
        OctolinkError::Expired(_) => StatusCode::GONE,
        OctolinkError::CapacityExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// 构建成功响应
pub fn success_response<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse {
        code: 0,
        message: "success".to_string(),
        data: Some(data),
    })
}

/// 构建错误响应
pub fn error_response(status: StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(ApiResponse::<()> {
        code: i32::from(status.as_u16()),
        message: message.into(),
        data: None,
    })
}

/// 客户端错误返回具体信息，服务端错误不回显
pub fn error_from_octolink(err: &OctolinkError) -> HttpResponse {
    let status = http_status(err);
    if err.is_client_error() {
        error_response(status, err.message())
    } else {
        error_response(status, err.error_type())
    }
}
