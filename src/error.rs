//! Error types for azcli operations.

use std::fmt;

use thiserror::Error;

/// Service error code the ARM layer returns while a new service principal is still
/// replicating through Azure AD.
pub const SERVICE_PRINCIPAL_NOT_FOUND: &str = "ServicePrincipalNotFound";

/// Structured transport error surfaced by [`crate::rest::RestClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    pub status: u16,
    /// Service error code from the response body, when the service sent one.
    pub code: Option<String>,
    pub message: String,
}

impl HttpError {
    pub fn new(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        HttpError {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn is_precondition_failed(&self) -> bool {
        self.status == 412
    }

    /// App Configuration answers writes to a locked key-value with 409.
    pub fn is_read_only(&self) -> bool {
        self.status == 409
    }

    /// Replication lag for a freshly created service principal, reported
    /// either by code or only in the message text.
    pub fn is_service_principal_not_found(&self) -> bool {
        self.code
            .as_deref()
            .is_some_and(|code| code.eq_ignore_ascii_case(SERVICE_PRINCIPAL_NOT_FOUND))
            || self.message.contains("not found in Active Directory tenant")
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "({}) {} [HTTP {}]", code, self.message, self.status),
            None => write!(f, "{} [HTTP {}]", self.message, self.status),
        }
    }
}

/// Main error type for azcli operations
#[derive(Error, Debug)]
pub enum AzCliError {
    /// Two flags that cannot be combined were both supplied
    #[error("{0}")]
    MutuallyExclusiveArgument(String),

    /// A flag requires a companion that was not supplied
    #[error("{0}")]
    RequiredArgumentMissing(String),

    /// A flag value failed validation
    #[error("{0}")]
    InvalidArgumentValue(String),

    /// The user declined a confirmation prompt
    #[error("operation cancelled")]
    DecoratorEarlyExit,

    /// A file could not be read, written or parsed
    #[error("{0}")]
    FileOperation(String),

    /// Content failed schema validation
    #[error("{0}")]
    Validation(String),

    /// Transport-level error returned by a REST endpoint
    #[error("{0}")]
    Http(HttpError),

    /// Remote error after translation into the CLI domain
    #[error("{0}")]
    AzureResponse(String),

    /// The service returned a resource in an unexpected shape
    #[error("{0}")]
    UnknownError(String),

    /// Inconsistent internal state
    #[error("internal error: {0}")]
    Internal(String),

    /// Generic command failure
    #[error("{0}")]
    Cli(String),

    /// Invalid configuration value
    #[error("invalid config '{0}': {1}")]
    Config(String, String),
}

impl AzCliError {
    pub fn http(&self) -> Option<&HttpError> {
        match self {
            AzCliError::Http(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_early_exit(&self) -> bool {
        matches!(self, AzCliError::DecoratorEarlyExit)
    }
}

impl From<HttpError> for AzCliError {
    fn from(e: HttpError) -> Self {
        AzCliError::Http(e)
    }
}

/// Translate a transport error into the error the user sees.
///
/// Argument and local errors pass through untouched.
pub fn map_azure_error(err: AzCliError) -> AzCliError {
    match err {
        AzCliError::Http(e) => match e.status {
            400 => AzCliError::InvalidArgumentValue(e.to_string()),
            401 | 403 => AzCliError::AzureResponse(format!("authorization failed: {}", e)),
            404 => AzCliError::AzureResponse(format!("resource not found: {}", e)),
            _ => AzCliError::AzureResponse(e.to_string()),
        },
        other => other,
    }
}

/// Result type alias for azcli operations
pub type Result<T> = std::result::Result<T, AzCliError>;
