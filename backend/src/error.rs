use crate::i18n::{t, Language};
use crate::models::OrderStatus;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

pub type Result<T, E = MarketError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Carries an i18n message key.
    #[error("Validation failed: {0}")]
    Validation(&'static str),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    /// Carries an i18n message key.
    #[error("Not found: {0}")]
    NotFound(&'static str),

    #[error("Cannot {action} an order in status {from}")]
    InvalidTransition {
        from: OrderStatus,
        action: &'static str,
    },

    #[error("AI service returned an empty response")]
    UpstreamEmptyResponse,

    #[error("AI service returned a malformed response: {0}")]
    MalformedResponse(String),

    #[error("Upstream service failed: {0}")]
    Upstream(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl MarketError {
    pub fn message_key(&self) -> &'static str {
        match self {
            MarketError::Configuration(_) => "service_not_configured",
            MarketError::Validation(key) | MarketError::NotFound(key) => *key,
            MarketError::Unauthorized => "unauthorized",
            MarketError::Forbidden => "forbidden",
            MarketError::InvalidTransition { .. } => "invalid_order_transition",
            MarketError::UpstreamEmptyResponse
            | MarketError::MalformedResponse(_)
            | MarketError::Upstream(_) => "ai_unavailable",
            MarketError::Persistence(_) => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            MarketError::Validation(_) | MarketError::InvalidTransition { .. } => {
                StatusCode::BAD_REQUEST
            }
            MarketError::Unauthorized => StatusCode::UNAUTHORIZED,
            MarketError::Forbidden => StatusCode::FORBIDDEN,
            MarketError::NotFound(_) => StatusCode::NOT_FOUND,
            MarketError::Configuration(_)
            | MarketError::UpstreamEmptyResponse
            | MarketError::MalformedResponse(_)
            | MarketError::Upstream(_)
            | MarketError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

impl ResponseError for MarketError {
    fn status_code(&self) -> StatusCode {
        self.status()
    }

    fn error_response(&self) -> HttpResponse {
        ApiFailure::from_error(self, Language::En).error_response()
    }
}

/// A client-facing failure whose message is already localized.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiFailure {
    pub status: StatusCode,
    pub message: String,
}

impl ApiFailure {
    /**
     * from_error
     * 转换为对外错误：内部细节只写日志，响应里只给本地化后的通用文案。
     */
    pub fn from_error(err: &MarketError, lang: Language) -> Self {
        let status = err.status();
        if status.is_server_error() {
            log::error!("Request failed: {:?}", err);
        } else {
            log::debug!("Request rejected: {}", err);
        }
        Self {
            status,
            message: t(lang, err.message_key()),
        }
    }

    pub fn new(status: StatusCode, lang: Language, key: &str) -> Self {
        Self {
            status,
            message: t(lang, key),
        }
    }
}

impl ResponseError for ApiFailure {
    fn status_code(&self) -> StatusCode {
        self.status
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status).json(ErrorBody {
            error: self.message.clone(),
        })
    }
}

pub trait Localize<T> {
    fn localized(self, lang: Language) -> std::result::Result<T, ApiFailure>;
}

impl<T> Localize<T> for Result<T, MarketError> {
    fn localized(self, lang: Language) -> std::result::Result<T, ApiFailure> {
        self.map_err(|e| ApiFailure::from_error(&e, lang))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            MarketError::Validation("invalid_price").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(MarketError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(MarketError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            MarketError::NotFound("order_not_found").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            MarketError::Persistence(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_failure_hides_internal_detail() {
        let err = MarketError::Persistence(anyhow::anyhow!("relation \"orders\" does not exist"));
        let failure = ApiFailure::from_error(&err, Language::En);
        assert_eq!(failure.message, "An error occurred on the server");
    }

    #[test]
    fn test_failure_is_localized() {
        let failure = ApiFailure::from_error(&MarketError::NotFound("order_not_found"), Language::Zh);
        assert_eq!(failure.message, "未找到订单");
        assert_eq!(failure.status, StatusCode::NOT_FOUND);
    }
}
