use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use thiserror::Error;

/// The fixed body returned to callers when the access policy denies a request.
pub const ACCESS_DENIED_BODY: &str = "Unauthorized";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Could not initialize gateway. {0}")]
    InitializeError(String),
    #[error("Invalid gateway configuration. {0}")]
    ConfigurationError(String),
    #[error("Invalid route table. {0}")]
    RouteTableError(#[from] RouteTableError),
    #[error("An I/O error happened in the gateway. {0}")]
    IOError(#[from] std::io::Error),
    #[error("No route matches {0}")]
    NoRoute(String),
    #[error("Access denied")]
    AccessDenied,
    #[error("Could not forward the request. {0}")]
    InvalidRequest(String),
    #[error("The request body exceeds the limit of {0} bytes.")]
    PayloadTooLarge(usize),
    #[error("The upstream service is unavailable. {0}")]
    BackendUnavailable(String),
    #[error("The upstream service did not respond in time. {0}")]
    BackendTimeout(String),
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NoRoute(_) => StatusCode::NOT_FOUND,
            Self::AccessDenied => StatusCode::UNAUTHORIZED,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RouteTableError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            // Denials carry a fixed plain-text body, never the JSON envelope.
            Self::AccessDenied => HttpResponse::build(self.status_code())
                .insert_header(ContentType::plaintext())
                .body(ACCESS_DENIED_BODY),
            _ => HttpResponse::build(self.status_code())
                .insert_header(ContentType::json())
                .body(serde_json::json!({ "error": self.to_string() }).to_string()),
        }
    }
}

/// Problems found while loading the route table. Any of these aborts startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteTableError {
    #[error("The route table is empty.")]
    Empty,
    #[error("Route prefix '{0}' must start with '/'.")]
    InvalidPrefix(String),
    #[error("Route prefix '{0}' is configured more than once.")]
    DuplicatePrefix(String),
    #[error("Origin '{origin}' for prefix '{prefix}' is not a valid http(s) URL. {reason}")]
    InvalidOrigin { prefix: String, origin: String, reason: String },
    #[error("Could not parse route definition '{0}'. Expected prefix=origin[|rewrite]")]
    InvalidDefinition(String),
    #[error("Unknown rewrite rule '{0}'. Use keep, strip_prefix or replace_prefix:<path>")]
    UnknownRewrite(String),
}

/// Reasons the identity authority could not vouch for a credential. These never leave the identity resolver; they
/// are logged and the request continues as anonymous.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("The identity authority could not be reached. {0}")]
    Unreachable(String),
    #[error("The identity authority did not respond in time.")]
    Timeout,
    #[error("The identity authority rejected the credential with status {0}.")]
    Rejected(u16),
    #[error("The identity authority returned a malformed identity. {0}")]
    Malformed(String),
    #[error("The credential cannot be sent to the identity authority. {0}")]
    InvalidCredential(String),
}

impl From<reqwest::Error> for IdentityError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Unreachable(e.to_string())
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::BackendTimeout(e.to_string())
        } else if e.is_builder() {
            Self::InvalidRequest(e.to_string())
        } else {
            Self::BackendUnavailable(e.to_string())
        }
    }
}
