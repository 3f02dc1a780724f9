use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt record: {reason}")]
    Corrupt { reason: String },

    /// A unique or foreign key constraint refused the write
    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Workflow {0} already exists")]
    AlreadyExists(Uuid),
}

impl StoreError {
    pub fn corrupt(reason: impl Into<String>) -> Self {
        StoreError::Corrupt {
            reason: reason.into(),
        }
    }

    /// Whether repeating the same call can succeed. Every store write is a
    /// single conditional statement or one transaction, so a retry never
    /// doubles an effect.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Database(_))
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            sqlx::Error::Database(ref db) if db.is_check_violation() => {
                StoreError::corrupt(db.message().to_string())
            }
            sqlx::Error::Database(ref db)
                if db.is_unique_violation() || db.is_foreign_key_violation() =>
            {
                StoreError::Constraint(db.message().to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::corrupt(err.to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(StoreError::Unavailable("pool closed".into()).is_retryable());
        assert!(StoreError::Database("database is locked".into()).is_retryable());
        assert!(!StoreError::corrupt("state 'bogus'").is_retryable());
        assert!(!StoreError::AlreadyExists(Uuid::new_v4()).is_retryable());
        assert!(!StoreError::Constraint("UNIQUE constraint failed: approvals.id".into()).is_retryable());
    }
}
