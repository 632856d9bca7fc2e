use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    config::LoadError, infra::error::InfraError, object::ObjectStateError, storage::StorageError,
};

/// An error flattened into its chain of messages for reporting.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Object(#[from] ObjectStateError),
    #[error("no value stored for `{key}`")]
    NotFound { key: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::NotFound { .. } => 3,
            AppError::Validation(_) => 2,
            AppError::Object(ObjectStateError::Decode { .. } | ObjectStateError::Encode { .. }) => {
                2
            }
            AppError::Infra(_)
            | AppError::Storage(_)
            | AppError::Object(ObjectStateError::Storage(_))
            | AppError::Unexpected(_) => 1,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}

impl From<LoadError> for AppError {
    fn from(error: LoadError) -> Self {
        match error {
            LoadError::Invalid { .. } => Self::validation(error.to_string()),
            LoadError::Build(_) => {
                Self::unexpected(format!("failed to load configuration: {error}"))
            }
        }
    }
}
