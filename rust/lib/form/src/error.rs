use thiserror::Error;

#[derive(Error, Debug)]
pub enum FormError {
    #[error("`field_path` is missing when registering a field")]
    MissingPath,

    #[error("field must be mounted inside a provided form scope")]
    MissingContext,

    #[error("form was dropped before the field operation: {0}")]
    FormDropped(String),

    #[error("a submit is already in progress")]
    SubmitInProgress,

    #[error("validate failed: {0}")]
    Validate(#[source] anyhow::Error),

    #[error("submit failed: {0}")]
    Submit(#[source] anyhow::Error),

    #[error("reset failed: {0}")]
    Reset(#[source] anyhow::Error),
}
