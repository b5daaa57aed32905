use thiserror::Error;

/// Non-successful HTTP exchange with one of the cloud services.
///
/// Returned inside `anyhow::Error`; callers that care about the status code can
/// `err.downcast_ref::<ResponseError>()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("HTTP response code: {status_code}, response text: {response_text}")]
pub struct ResponseError {
    pub status_code: u16,
    pub response_text: String,
}

impl ResponseError {
    pub fn new(status_code: u16, response_text: impl Into<String>) -> Self {
        Self {
            status_code,
            response_text: response_text.into(),
        }
    }
}
