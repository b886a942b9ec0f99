use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Value under {key:?} is not valid UTF-8")]
    Corrupt {
        key: String,
        source: std::string::FromUtf8Error,
    },

    #[error("Invalid namespace {0:?}: must be non-empty and must not contain ':'")]
    InvalidNamespace(String),

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}
