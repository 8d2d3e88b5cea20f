// Error types for the vendor pipeline and its payload codec

use thiserror::Error;

use crate::stages::Stage;

// Failures raised while encrypting, decrypting or wrapping vendor payloads
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Key material must be at least 16 bytes, got {0}")]
    InvalidKey(usize),

    #[error("Ciphertext length {0} is not a multiple of the block size")]
    InvalidBlockLength(usize),

    #[error("Invalid PKCS#7 padding")]
    InvalidPadding,

    #[error("Base64 decode error: {0}")]
    Base64(String),

    #[error("Payload serialization error: {0}")]
    Serialize(String),
}

// Pipeline failures. Every variant except `Encryption` names the stage it came from.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("[{stage}] network error: {message}")]
    Network { stage: Stage, message: String },

    #[error("[{stage}] proxy error: {message}")]
    Proxy { stage: Stage, message: String },

    #[error("[{stage}] request timed out after {after_ms}ms")]
    Timeout { stage: Stage, after_ms: u64 },

    #[error("[{stage}] vendor rejected request: {response}")]
    VendorProtocol { stage: Stage, response: String },

    #[error("[{stage}] malformed vendor response: {message}")]
    MalformedResponse { stage: Stage, message: String },

    #[error("Encryption error: {0}")]
    Encryption(#[from] CodecError),

    #[error("[{stage}] missing required session field `{field}`")]
    Validation { stage: Stage, field: &'static str },
}

impl PipelineError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Network { stage, .. }
            | PipelineError::Proxy { stage, .. }
            | PipelineError::Timeout { stage, .. }
            | PipelineError::VendorProtocol { stage, .. }
            | PipelineError::MalformedResponse { stage, .. }
            | PipelineError::Validation { stage, .. } => Some(*stage),
            PipelineError::Encryption(_) => None,
        }
    }

    /// Transport-level failures a caller may choose to retry at a higher layer.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            PipelineError::Network { .. }
                | PipelineError::Proxy { .. }
                | PipelineError::Timeout { .. }
        )
    }

    /// The raw vendor response, when the vendor answered but refused.
    pub fn vendor_response(&self) -> Option<&str> {
        match self {
            PipelineError::VendorProtocol { response, .. } => Some(response),
            _ => None,
        }
    }
}
