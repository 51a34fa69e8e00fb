use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

/// Everything that can go wrong while answering one search request.
///
/// The `Display` text is meant for logs. What the browser sees is derived from [`ErrorKind`], which carries no
/// internal detail.
#[derive(Debug, Error)]
pub enum FrontendError {
    /// The request could not be turned into a query, even after normalization.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The search server could not be reached or the connection broke mid-exchange.
    #[error("search server unavailable: {0}")]
    SearchUnavailable(String),

    /// The search server did not answer within the configured timeout.
    #[error("search server did not answer within {0:?}")]
    SearchTimeout(Duration),

    /// The search server answered, but not in the shape this frontend understands.
    #[error("search server protocol error: {0}")]
    SearchProtocol(String),

    #[error("failed to render page: {0}")]
    Render(String),
}

impl From<std::fmt::Error> for FrontendError {
    fn from(_: std::fmt::Error) -> Self {
        FrontendError::Render("formatter error".to_string())
    }
}

impl FrontendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FrontendError::InvalidInput(_) => ErrorKind::InvalidInput,
            FrontendError::SearchUnavailable(_) => ErrorKind::Unavailable,
            FrontendError::SearchTimeout(_) => ErrorKind::Timeout,
            FrontendError::SearchProtocol(_) => ErrorKind::Protocol,
            FrontendError::Render(_) => ErrorKind::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.kind().status()
    }
}

/// The user-facing side of an error: a status code and a fixed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    Unavailable,
    Timeout,
    Protocol,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Unavailable | ErrorKind::Protocol => StatusCode::BAD_GATEWAY,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "Invalid search query",
            ErrorKind::Unavailable => "Search server unavailable",
            ErrorKind::Timeout => "Search timed out",
            ErrorKind::Protocol => "Unexpected search server reply",
            ErrorKind::NotFound => "Page not found",
            ErrorKind::Internal => "Internal error",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => {
                "The search query could not be understood. Please check it and try again."
            }
            ErrorKind::Unavailable => {
                "The search server could not be reached. Please try again in a moment."
            }
            ErrorKind::Timeout => {
                "The search server took too long to answer. Please try again in a moment."
            }
            ErrorKind::Protocol => {
                "The search server sent a reply this site does not understand. Please try again later."
            }
            ErrorKind::NotFound => "The requested page does not exist.",
            ErrorKind::Internal => "Something went wrong while preparing this page.",
        }
    }
}
