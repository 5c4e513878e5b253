use crate::extract::FetchError;
use crate::semantic::pipeline::PipelineError;
use crate::semantic::search::SearchError;
use crate::semantic::{EmbeddingError, IndexError};
use crate::templates::StoreError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("template not found")]
    NotFound,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("template store error: {0}")]
    Store(#[from] StoreError),

    #[error("content fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("embedding provider error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("io error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::InvalidDate(value) => {
                AppError::Validation(format!("invalid date '{value}': expected YYYY-MM-DD"))
            }
            SearchError::Embedding(err) => AppError::Embedding(err),
            SearchError::Index(err) => AppError::Index(err),
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Store(err) => AppError::Store(err),
            PipelineError::Index(err) => AppError::Index(err),
        }
    }
}
