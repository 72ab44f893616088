use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error as ThisError;

/// A required setting is absent or an optional one cannot be parsed.
#[derive(ThisError, Debug)]
pub enum ConfigError {
    #[error("Required environment variable {key} is not set")]
    Missing { key: &'static str },

    #[error("Environment variable {key} has an invalid value: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(ThisError, Debug)]
pub enum Error {
    /// Missing or malformed deployment setting
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// Database or model endpoint unreachable
    #[error("{message}")]
    Connection {
        message: String,
        #[source]
        source: anyhow::Error,
    },

    /// Model client cannot be bound to a deployment
    #[error("{message}")]
    Environment { message: String },

    #[error("{message}")]
    Timeout {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// The input was rejected. Surfaced to the caller as 400.
    #[error("{message}")]
    Value { message: String },

    #[error("{message}")]
    Runtime {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Unexpected error with full context chain
    #[error("An unexpected error occurred.")]
    Unexpected(#[source] anyhow::Error),
}

impl Error {
    pub fn connection(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Error::Connection {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn runtime(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Error::Runtime {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Value { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Value { message } => message.clone(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({ "detail": self.user_message() });

        match self {
            Error::Value { .. } => {
                tracing::warn!("Rejected request: {}", self);
            }
            other => {
                tracing::error!("Internal service error: {:#}", anyhow::Error::new(other));
            }
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_value_errors_are_client_errors() {
        let value = Error::Value {
            message: "Value error occurred: bad input".to_string(),
        };
        assert_eq!(value.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(value.user_message(), "Value error occurred: bad input");

        let runtime = Error::runtime("An unexpected error occurred.", anyhow::anyhow!("secret detail"));
        assert_eq!(runtime.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(runtime.user_message(), "Internal server error");

        let config = Error::from(ConfigError::Missing { key: "SQL_SERVER_NAME" });
        assert_eq!(config.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            config.to_string(),
            "Required environment variable SQL_SERVER_NAME is not set"
        );
    }

    #[test]
    fn timeouts_are_internal_errors() {
        let timeout = Error::Timeout {
            message: "Timeout error occurred.".to_string(),
            source: None,
        };
        assert_eq!(timeout.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(timeout.user_message(), "Internal server error");
        assert_eq!(
            timeout.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn logged_chain_includes_every_cause() {
        let err = Error::connection(
            "Connection error occurred.",
            anyhow::anyhow!("refused").context("dialing model endpoint"),
        );
        assert_eq!(
            format!("{:#}", anyhow::Error::new(err)),
            "Connection error occurred.: dialing model endpoint: refused"
        );
    }
}
