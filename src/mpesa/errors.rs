// M-Pesa error taxonomy and the envelope-to-error mapping shared by every operation.

use thiserror::Error;

use crate::mpesa::http::HttpError;

/// Coarse class of a failure, used by callers to decide what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Local precondition failed; nothing was sent.
    Validation,
    /// The HTTP layer failed (DNS, connect, timeout).
    Transport,
    /// The token endpoint refused the consumer credentials.
    Authentication,
    /// A body could not be encoded or decoded.
    Decode,
    /// The provider accepted the call but rejected the request.
    Business,
    /// The embedded certificate is unusable; a packaging defect.
    Configuration,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("certificate bundle is empty")]
    MissingCertificate,
    #[error("no {0} certificate is embedded in this build; add it under certs/ or configure one")]
    NotEmbedded(&'static str),
    #[error("read certificate {path}: {reason}")]
    Unreadable { path: String, reason: String },
    #[error("certificate is corrupt: {0}")]
    CorruptCertificate(String),
    #[error("certificate does not carry an RSA public key")]
    NonRsaKey,
    #[error("encrypt initiator password: {0}")]
    Encryption(String),
}

#[derive(Debug, Error)]
pub enum MpesaError {
    #[error("mpesa: passkey cannot be empty")]
    InvalidPasskey,
    #[error("mpesa: initiator password cannot be empty")]
    InvalidInitiatorPassword,
    #[error("mpesa: {url:?} {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("mpesa: {operation}: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: HttpError,
    },
    #[error("mpesa: auth failed with status: {status}")]
    Authentication { status: String },
    #[error("mpesa: unusable access token response (status={status:?}): {message}")]
    MalformedToken { status: Option<u16>, message: String },
    #[error("mpesa: encode {operation} request: {source}")]
    Encode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("mpesa: decode {operation} response (status={status:?}): {message}")]
    Decode {
        operation: &'static str,
        status: Option<u16>,
        message: String,
    },
    #[error("mpesa: request {request_id} failed with code {code}: {message}")]
    Rejected {
        request_id: String,
        code: String,
        message: String,
    },
    #[error("mpesa: {0}")]
    Credential(#[from] CredentialError),
}

impl MpesaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MpesaError::InvalidPasskey
            | MpesaError::InvalidInitiatorPassword
            | MpesaError::InvalidUrl { .. } => ErrorKind::Validation,
            MpesaError::Transport { .. } => ErrorKind::Transport,
            MpesaError::Authentication { .. } | MpesaError::MalformedToken { .. } => {
                ErrorKind::Authentication
            }
            MpesaError::Encode { .. } | MpesaError::Decode { .. } => ErrorKind::Decode,
            MpesaError::Rejected { .. } => ErrorKind::Business,
            MpesaError::Credential(_) => ErrorKind::Configuration,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

/// Provider-side rejection extracted from a decoded response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub request_id: String,
    pub code: String,
    pub message: String,
}

impl From<Rejection> for MpesaError {
    fn from(r: Rejection) -> Self {
        MpesaError::Rejected {
            request_id: r.request_id,
            code: r.code,
            message: r.message,
        }
    }
}

/// Success sentinel for `ResponseCode` / `ResultCode`.
pub const SUCCESS_CODE: &str = "0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(MpesaError::InvalidPasskey.kind(), ErrorKind::Validation);
        assert_eq!(
            MpesaError::Authentication { status: "400 Bad Request".into() }.kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            MpesaError::Transport { operation: "b2c", source: HttpError::Timeout }.kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            MpesaError::from(CredentialError::NonRsaKey).kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_rejection_message_is_verbatim() {
        let err = MpesaError::from(Rejection {
            request_id: "11728-2929992-1".into(),
            code: "401.002.01".into(),
            message: "Error Occurred - Invalid Access Token".into(),
        });
        assert_eq!(err.kind(), ErrorKind::Business);
        assert_eq!(
            err.to_string(),
            "mpesa: request 11728-2929992-1 failed with code 401.002.01: Error Occurred - Invalid Access Token"
        );
    }
}
