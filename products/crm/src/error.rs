use platform_api::ApiError;
use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

pub type CrmResult<T> = Result<T, CrmError>;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    FailedPrecondition(String),
    #[error("database error: {0}")]
    Db(#[from] DbErr),
}

impl CrmError {
    pub fn not_found(kind: &str, id: Uuid) -> Self {
        Self::NotFound(format!("{kind} {id} not found"))
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::FailedPrecondition(msg.into())
    }
}

impl From<CrmError> for ApiError {
    fn from(value: CrmError) -> Self {
        match value {
            CrmError::NotFound(msg) => ApiError::NotFound(msg),
            CrmError::InvalidArgument(msg) => ApiError::InvalidArgument(msg),
            CrmError::FailedPrecondition(msg) => ApiError::FailedPrecondition(msg),
            CrmError::Db(err) => ApiError::internal(anyhow::Error::new(err)),
        }
    }
}
