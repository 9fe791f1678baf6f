use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Envelope returned by every JSON endpoint.
#[derive(Debug, Serialize, Deserialize, TS)]
pub struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    /// Stable machine-readable error code, set only on failure.
    code: Option<String>,
    message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            code: None,
            message: None,
        }
    }

    pub fn error(message: &str) -> Self {
        ApiResponse {
            success: false,
            data: None,
            code: None,
            message: Some(message.to_string()),
        }
    }

    pub fn error_with_code(code: &str, message: &str) -> Self {
        ApiResponse {
            success: false,
            data: None,
            code: Some(code.to_string()),
            message: Some(message.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }
}
