use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found")]
    NotFound,
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("transient storage error: {0}")]
    TransientStorage(String),
    #[error("storage error: {0}")]
    StorageFatal(String),
}

impl From<sqlx::Error> for DbError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    DbError::UniqueViolation(db_err.message().to_string())
                } else if db_err.is_foreign_key_violation() {
                    DbError::StorageFatal(db_err.message().to_string())
                } else {
                    DbError::TransientStorage(db_err.message().to_string())
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => DbError::TransientStorage(e.to_string()),
            other => DbError::StorageFatal(other.to_string()),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;
