//! Response envelope

use crate::Error;
use serde::Serialize;

/// `{status, code, message, data}` envelope returned to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub code: u16,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Success envelope, code 0
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            status: "success".to_string(),
            code: 0,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Error envelope carrying the error's stable code
    pub fn from_error(error: &Error) -> Self {
        Self {
            status: "error".to_string(),
            code: error.code(),
            message: error.to_string(),
            data: None,
        }
    }

    /// True for code 0
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

impl<T> From<crate::Result<T>> for ApiResponse<T> {
    fn from(result: crate::Result<T>) -> Self {
        match result {
            Ok(data) => Self::success("OK", data),
            Err(e) => Self::from_error(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::ChallengeError;

    #[test]
    fn test_success_envelope() {
        let response = ApiResponse::success("Transfer completed", 42u32);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["code"], 0);
        assert_eq!(value["data"], 42);
    }

    #[test]
    fn test_error_envelope() {
        let response: ApiResponse<()> =
            ApiResponse::from_error(&Error::Challenge(ChallengeError::InvalidOtp("c-1".into())));
        assert_eq!(response.status, "error");
        assert_eq!(response.code, 400);
        assert!(response.message.contains("c-1"));
        assert!(response.data.is_none());
        assert!(!response.is_success());
    }

    #[test]
    fn test_from_result() {
        let response: ApiResponse<u8> = Err(Error::Forbidden("not owner".into())).into();
        assert_eq!(response.code, 403);
    }
}
