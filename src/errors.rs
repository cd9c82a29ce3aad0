use crate::discovery::DiscoveryError;
use crate::keys::KeyError;
use crate::persistence::RpStoreError;
use crate::store::StoreError;
use crate::uma::scope_expression::ScopeExpressionError;
use crate::uma::UmaError;
use crate::validator::ValidationError;
use axum::response::IntoResponse;
use axum::Json;
use http::StatusCode;
use serde_json::{json, Value};

/// API error response: a status code with a `detail` message, or a
/// structured body when the upstream response must be preserved
#[derive(Debug, Clone)]
pub struct ApiError {
    pub detail: String,
    pub status_code: StatusCode,
    pub body: Option<Value>,
}

impl ApiError {
    /// Create a new ApiError with a detail message and status code
    pub fn new<S: ToString>(detail: S, status_code: StatusCode) -> Self {
        Self {
            detail: detail.to_string(),
            status_code,
            body: None,
        }
    }

    /// Create new Internal Server Error (500) with a detail message
    pub fn internal<S: ToString>(detail: S) -> Self {
        Self::new(detail, StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Create new Bad Request Error (400) with a detail message
    pub fn bad_request<S: ToString>(detail: S) -> Self {
        Self::new(detail, StatusCode::BAD_REQUEST)
    }

    /// Create new Not Found (404) with a detail message
    pub fn not_found<S: ToString>(detail: S) -> Self {
        Self::new(detail, StatusCode::NOT_FOUND)
    }

    /// Create new Bad Gateway (502) with a detail message
    pub fn bad_gateway<S: ToString>(detail: S) -> Self {
        Self::new(detail, StatusCode::BAD_GATEWAY)
    }

    /// Carry a structured body instead of the `detail` wrapper
    pub fn with_body<S: ToString>(detail: S, status_code: StatusCode, body: Value) -> Self {
        Self {
            detail: detail.to_string(),
            status_code,
            body: Some(body),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status_code = self.status_code;
        let body = self.body.unwrap_or_else(|| {
            json!({
                "detail": self.detail,
            })
        });
        (status_code, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::internal(err)
    }
}

impl From<RpStoreError> for ApiError {
    fn from(err: RpStoreError) -> Self {
        match err {
            RpStoreError::NotFound(_) => Self::not_found(err),
            RpStoreError::Storage(_) => Self::internal(err),
        }
    }
}

impl From<DiscoveryError> for ApiError {
    fn from(err: DiscoveryError) -> Self {
        Self::bad_gateway(err)
    }
}

impl From<KeyError> for ApiError {
    fn from(err: KeyError) -> Self {
        Self::bad_gateway(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match err {
            // upstream and storage trouble is not the caller's fault
            ValidationError::Key(inner) => Self::from(inner),
            ValidationError::Store(inner) => Self::from(inner),
            other => Self::bad_request(other),
        }
    }
}

impl From<UmaError> for ApiError {
    fn from(err: UmaError) -> Self {
        match err {
            UmaError::Request(_) => Self::bad_gateway(err),
            UmaError::Upstream { status, ref body } => {
                // pass the AS response through with its status
                let status_code =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                let value = serde_json::from_str(body)
                    .unwrap_or_else(|_| json!({"detail": body}));
                Self::with_body(err.to_string(), status_code, value)
            }
            UmaError::NeedInfo { status, need_info } => {
                let status_code =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::FORBIDDEN);
                let value = serde_json::to_value(&need_info)
                    .unwrap_or_else(|_| json!({"detail": need_info.error}));
                Self::with_body(need_info.error.clone(), status_code, value)
            }
            UmaError::Parse(_) => Self::bad_gateway(err),
            UmaError::Discovery(inner) => Self::from(inner),
            UmaError::Store(inner) => Self::from(inner),
            UmaError::Persistence(inner) => Self::from(inner),
            UmaError::ResourceNotProtected { .. } => Self::not_found(err),
            UmaError::AlreadyProtected | UmaError::DuplicateMethod { .. } => {
                Self::new(err, StatusCode::CONFLICT)
            }
            UmaError::ScopeExpression(_) | UmaError::ClaimTokenPair => Self::bad_request(err),
            UmaError::MissingEndpoint(_) => Self::bad_gateway(err),
        }
    }
}

impl From<ScopeExpressionError> for ApiError {
    fn from(err: ScopeExpressionError) -> Self {
        Self::bad_request(err)
    }
}
