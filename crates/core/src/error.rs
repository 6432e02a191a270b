use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("unsupported entity type: {0}")]
    UnsupportedOwnerType(String),

    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),
}
