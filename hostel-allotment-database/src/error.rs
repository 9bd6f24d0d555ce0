use diesel::result::DatabaseErrorKind;
use diesel_async::pooled_connection::deadpool;
use hostel_allotment_core::StoreError;
use thiserror::Error;

#[allow(clippy::module_name_repetitions)]
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to create database pool {0}")]
    PoolBuild(#[from] deadpool::BuildError),
    #[error("Database pool failed {0}")]
    Pool(#[from] deadpool::PoolError),
    #[error("Database query failed {0}")]
    Database(#[from] diesel::result::Error),
    #[error("Database row out of range {0}")]
    InvalidData(String),
}

impl From<DatabaseError> for StoreError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::PoolBuild(err) => Self::Unavailable(err.to_string()),
            DatabaseError::Pool(err) => Self::Unavailable(err.to_string()),
            DatabaseError::Database(diesel::result::Error::DatabaseError(
                DatabaseErrorKind::UniqueViolation,
                info,
            )) => Self::Conflict(info.message().to_owned()),
            DatabaseError::Database(err) => Self::Query(Box::new(err)),
            DatabaseError::InvalidData(message) => Self::InvalidData(message),
        }
    }
}

/// Routes any database-level failure through [`DatabaseError`] into the
/// store's error type.
pub(crate) trait IntoStoreResult<T> {
    fn into_store(self) -> Result<T, StoreError>;
}

impl<T, E: Into<DatabaseError>> IntoStoreResult<T> for Result<T, E> {
    fn into_store(self) -> Result<T, StoreError> {
        self.map_err(|err| StoreError::from(Into::<DatabaseError>::into(err)))
    }
}

#[cfg(test)]
mod tests {
    use diesel_async::pooled_connection::deadpool;
    use hostel_allotment_core::StoreError;

    use crate::error::DatabaseError;

    #[test]
    fn missing_row_is_a_query_error() {
        let err: StoreError = DatabaseError::Database(diesel::result::Error::NotFound).into();
        assert!(matches!(err, StoreError::Query(_)));
    }

    #[test]
    fn pool_errors_mean_unavailable() {
        let err: StoreError = DatabaseError::Pool(deadpool::PoolError::Closed).into();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[test]
    fn invalid_data_is_preserved() {
        let err: StoreError = DatabaseError::InvalidData("capacity -1".to_owned()).into();
        assert!(matches!(err, StoreError::InvalidData(message) if message == "capacity -1"));
    }
}
