use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use common::{Error, ErrorKind};

/// A `common::Error` rendered as a JSON HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidPlan(_) => StatusCode::BAD_REQUEST,
            Error::Order(e) => match e.kind {
                ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                ErrorKind::InsufficientFunds | ErrorKind::ExchangeRejected => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                ErrorKind::AuthError | ErrorKind::NetworkError => StatusCode::BAD_GATEWAY,
            },
            Error::Exchange(_) | Error::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = match &self.0 {
            Error::Order(e) => Some(e.kind),
            _ => None,
        };
        warn!(status = %status, error = %self.0, "Request failed");
        (
            status,
            Json(json!({ "error": self.0.to_string(), "kind": kind })),
        )
            .into_response()
    }
}
