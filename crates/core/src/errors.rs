use thiserror::Error;

/// Transport or API level failure talking to the model endpoint.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model call timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("unusable endpoint response: {0}")]
    InvalidResponse(String),
}

/// Every failure a model call can produce. Both variants are transient and
/// each caller owns its own fallback for them.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("circuit open for model endpoint `{endpoint}`")]
    CircuitOpen { endpoint: String },
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClassificationError {
    #[error("malformed classification: {reason}")]
    Malformed { reason: String, raw: String },
    #[error("classification unavailable: {0}")]
    Unavailable(#[from] ModelError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OrchestrationError {
    #[error("tool `{tool}` is not permitted ({reason_code})")]
    ToolNotPermitted { tool: String, reason_code: &'static str },
    #[error("request cancelled after {model_calls} model call(s)")]
    Cancelled { model_calls: u32 },
    #[error("conversation memory failure: {0}")]
    Memory(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("tenant `{0}` was not found")]
    TenantNotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("model contract violation: {0}")]
    ModelContract(String),
    #[error("policy violation: {0}")]
    Policy(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl From<ClassificationError> for ApplicationError {
    fn from(value: ClassificationError) -> Self {
        match value {
            ClassificationError::Malformed { reason, .. } => Self::ModelContract(reason),
            ClassificationError::Unavailable(error) => Self::Unavailable(error.to_string()),
        }
    }
}

impl From<OrchestrationError> for ApplicationError {
    fn from(value: OrchestrationError) -> Self {
        match value {
            OrchestrationError::ToolNotPermitted { .. } => Self::Policy(value.to_string()),
            OrchestrationError::Cancelled { .. } => Self::Unavailable(value.to_string()),
            OrchestrationError::Memory(message) => Self::Persistence(message),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("unprocessable: {message}")]
    Unprocessable { message: String, correlation_id: String },
    #[error("bad gateway: {message}")]
    BadGateway { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested tenant or resource does not exist.",
            Self::Unprocessable { .. } => {
                "The assistant attempted an action that is not allowed for this account."
            }
            Self::BadGateway { .. } => {
                "The language model returned an unusable answer. The message was not processed."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Unprocessable { correlation_id, .. }
            | Self::BadGateway { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Unprocessable { correlation_id: id, .. }
            | InterfaceError::BadGateway { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::TenantNotFound(message) => Self::NotFound { message, correlation_id },
            ApplicationError::InvalidRequest(message) => {
                Self::BadRequest { message, correlation_id }
            }
            ApplicationError::ModelContract(message) => {
                Self::BadGateway { message, correlation_id }
            }
            ApplicationError::Policy(message) => Self::Unprocessable { message, correlation_id },
            ApplicationError::Persistence(message) | ApplicationError::Unavailable(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
