use thiserror::Error;

pub type Result<T> = std::result::Result<T, OperatorError>;

#[derive(Error, Debug)]
pub enum OperatorError {
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("call did not complete within {0:?}")]
    Timeout(std::time::Duration),

    #[error("endpoint returned unexpected status {0}")]
    UnexpectedStatus(u16),

    #[error("response body exceeds limit of {limit} bytes")]
    ResponseTooLarge { limit: usize },

    #[error("status update conflict: {0}")]
    Conflict(String),

    #[error("resource store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How the controller treats a failed reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Transport,
    Conflict,
    /// The store answered but refused the request (4xx other than 404/409).
    Rejected,
    StoreUnavailable,
}

impl OperatorError {
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    pub fn resource_not_found(msg: impl Into<String>) -> Self {
        Self::ResourceNotFound(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidSpec(_) | Self::InvalidConfig(_) => ErrorClass::Validation,
            Self::Transport(_)
            | Self::Timeout(_)
            | Self::UnexpectedStatus(_)
            | Self::ResponseTooLarge { .. } => ErrorClass::Transport,
            Self::Conflict(_) => ErrorClass::Conflict,
            Self::KubeApi(kube::Error::Api(resp)) if resp.code < 500 => ErrorClass::Rejected,
            Self::ResourceNotFound(_) | Self::AlreadyExists(_) | Self::Serialization(_) => {
                ErrorClass::Rejected
            }
            Self::KubeApi(_) | Self::StoreUnavailable(_) => ErrorClass::StoreUnavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = OperatorError::invalid_spec("endpoint is empty");
        assert!(err.to_string().contains("invalid spec"));
        assert!(err.to_string().contains("endpoint is empty"));

        let err = OperatorError::conflict("default/ping");
        assert!(err.to_string().contains("conflict"));

        let err = OperatorError::ResponseTooLarge { limit: 16 };
        assert!(err.to_string().contains("16 bytes"));

        let err = OperatorError::UnexpectedStatus(503);
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(
            OperatorError::invalid_spec("x").class(),
            ErrorClass::Validation
        );
        assert_eq!(OperatorError::conflict("x").class(), ErrorClass::Conflict);
        assert_eq!(
            OperatorError::store_unavailable("x").class(),
            ErrorClass::StoreUnavailable
        );
        assert_eq!(
            OperatorError::UnexpectedStatus(500).class(),
            ErrorClass::Transport
        );
        assert_eq!(
            OperatorError::ResponseTooLarge { limit: 1 }.class(),
            ErrorClass::Transport
        );
    }

    fn api_error(code: u16) -> OperatorError {
        OperatorError::KubeApi(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {}", code),
            reason: "Test".to_string(),
            code,
        }))
    }

    #[test]
    fn test_api_rejections_are_not_outages() {
        assert_eq!(api_error(403).class(), ErrorClass::Rejected);
        assert_eq!(api_error(422).class(), ErrorClass::Rejected);
        assert_eq!(api_error(503).class(), ErrorClass::StoreUnavailable);
        assert_eq!(
            OperatorError::already_exists("default/a").class(),
            ErrorClass::Rejected
        );
    }

    #[test]
    fn test_serialization_error_from() {
        let err: OperatorError = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert!(matches!(err, OperatorError::Serialization(_)));
    }
}
