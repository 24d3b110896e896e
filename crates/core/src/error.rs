pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("auth failed: {message}")]
    Auth { message: String },

    #[error("upload rejected: {message}")]
    UploadRejected { message: String },

    #[error("transfer failed: {message}")]
    TransferFailed { message: String },

    #[error("api error: {message}")]
    Api { message: String },
}

impl Error {
    pub(crate) fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub(crate) fn transfer_failed(message: impl Into<String>) -> Self {
        Self::TransferFailed {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransferFailed { .. } | Self::Api { .. })
    }
}
