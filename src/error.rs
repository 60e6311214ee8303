use thiserror::Error;

/// Errors split by where they come from. Validation failures are raised
/// before any network call; remote failures carry the backend's message
/// unchanged.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Remote(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("admin sign-in required; run `attendance-tracker auth sign-in` first")]
    NotSignedIn,
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    #[cfg(test)]
    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::Validation(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Remote(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Remote(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Remote(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
