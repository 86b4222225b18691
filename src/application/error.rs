use thiserror::Error;

use crate::domain::{PeriodError, UnknownBranchError, UnknownCategoryError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidDateRange { start: String, end: String },

    #[error("Invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Invalid month '{0}': expected YYYY-MM")]
    InvalidMonth(String),

    #[error("Unknown branch: {0}")]
    UnknownBranch(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Unknown query: {0}")]
    UnknownQuery(String),

    #[error("Invalid manual price '{0}': expected YYYY-MM=PRICE")]
    InvalidManualPrice(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Import failed at line {line}: {message}")]
    Import { line: usize, message: String },

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl From<PeriodError> for AppError {
    fn from(err: PeriodError) -> Self {
        match err {
            PeriodError::InvalidDate(s) => AppError::InvalidDate(s),
            PeriodError::InvalidMonth(s) => AppError::InvalidMonth(s),
            PeriodError::StartAfterEnd { start, end } => AppError::InvalidDateRange {
                start: start.to_string(),
                end: end.to_string(),
            },
        }
    }
}

impl From<UnknownBranchError> for AppError {
    fn from(err: UnknownBranchError) -> Self {
        AppError::UnknownBranch(err.0)
    }
}

impl From<UnknownCategoryError> for AppError {
    fn from(err: UnknownCategoryError) -> Self {
        AppError::UnknownCategory(err.0)
    }
}
