use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("database error: {message}")]
    Database { message: String, retryable: bool },

    #[error("duplicate checkout reference: {0}")]
    DuplicateReference(String),

    #[error("corrupt ledger row {reference}: {message}")]
    Corrupt { reference: String, message: String },
}

impl StoreError {
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::DuplicateReference(
                    db.constraint().unwrap_or("checkout_ledgers_reference").to_string(),
                )
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreError::Database {
                message: err.to_string(),
                retryable: true,
            },
            _ => StoreError::Database {
                message: err.to_string(),
                retryable: false,
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database { retryable: true, .. })
    }
}
