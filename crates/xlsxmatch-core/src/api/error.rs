use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Login rejected: {0}")]
    Auth(String),

    #[error("Session expired - please log in again")]
    SessionExpired,

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Submission failed: {0}")]
    Submission(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Maximum length for error response bodies in log messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    pub fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    /// Human readable detail from an error body.
    ///
    /// Looks for a `detail` string, a `detail` list of validation errors
    /// (`[{ "msg": ... }]`), then a `message` string.
    pub fn server_detail(body: &str) -> Option<String> {
        let value: Value = serde_json::from_str(body).ok()?;

        let detail = match value.get("detail") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Array(items)) => {
                let messages: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(Value::as_str))
                    .collect();
                (!messages.is_empty()).then(|| messages.join("; "))
            }
            _ => None,
        };

        detail
            .or_else(|| value.get("message").and_then(Value::as_str).map(str::to_string))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Message suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Auth(detail)
            | ApiError::Validation(detail)
            | ApiError::Submission(detail)
            | ApiError::Config(detail) => detail.clone(),
            ApiError::SessionExpired => "Session expired. Please log in again.".to_string(),
            ApiError::Network(e) if e.is_timeout() => {
                "Connection timed out. Please try again.".to_string()
            }
            ApiError::Network(_) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            ApiError::InvalidResponse(_) => "Unexpected response from server.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_detail_string() {
        assert_eq!(
            ApiError::server_detail(r#"{"detail": "Incorrect username or password"}"#).as_deref(),
            Some("Incorrect username or password")
        );
    }

    #[test]
    fn test_server_detail_validation_list() {
        let body = r#"{"detail": [
            {"loc": ["body", "desc_col"], "msg": "field required"},
            {"msg": "bad file"}
        ]}"#;
        assert_eq!(
            ApiError::server_detail(body).as_deref(),
            Some("field required; bad file")
        );
    }

    #[test]
    fn test_server_detail_falls_back_to_message() {
        assert_eq!(
            ApiError::server_detail(r#"{"message": "Coluna não encontrada"}"#).as_deref(),
            Some("Coluna não encontrada")
        );
        assert_eq!(
            ApiError::server_detail(r#"{"detail": 42, "message": "fallback"}"#).as_deref(),
            Some("fallback")
        );
    }

    #[test]
    fn test_server_detail_absent() {
        assert!(ApiError::server_detail("").is_none());
        assert!(ApiError::server_detail("<html>502 Bad Gateway</html>").is_none());
        assert!(ApiError::server_detail(r#"{"detail": "  "}"#).is_none());
        assert!(ApiError::server_detail(r#"{"other": 1}"#).is_none());
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(ApiError::truncate_body("short"), "short");

        let long = "é".repeat(400);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.contains("truncated, 800 total bytes"));
    }

    #[test]
    fn test_user_message_uses_detail() {
        assert_eq!(ApiError::Submission("Coluna ausente".into()).user_message(), "Coluna ausente");
        assert_eq!(
            ApiError::SessionExpired.user_message(),
            "Session expired. Please log in again."
        );
    }
}
