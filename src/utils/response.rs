use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub success: bool,
    pub code: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Value>,
}

fn with_status<T>(status: StatusCode, data: Option<T>, detail: Option<String>) -> Response
where
    T: Serialize,
{
    let body = ApiResponse {
        success: true,
        data,
        detail,
    };
    (status, Json(body)).into_response()
}

pub fn success<T>(data: T) -> Response
where
    T: Serialize,
{
    with_status(StatusCode::OK, Some(data), None)
}

pub fn created<T>(data: T, detail: impl Into<String>) -> Response
where
    T: Serialize,
{
    with_status(StatusCode::CREATED, Some(data), Some(detail.into()))
}

pub fn empty_success(detail: impl Into<String>) -> Response {
    with_status::<()>(StatusCode::OK, None, Some(detail.into()))
}

pub fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

pub fn error(
    code: &str,
    detail: impl Into<String>,
    errors: Option<Value>,
    status: StatusCode,
) -> Response {
    let body = ApiErrorResponse {
        success: false,
        code: code.to_string(),
        detail: detail.into(),
        errors,
    };

    (status, Json(body)).into_response()
}
