use axum::http::header::InvalidHeaderValue;
use hostel_allotment_config::ConfigError;
use hostel_allotment_database::error::DatabaseError;
use hostel_allotment_identity::IdentityError;

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Database(#[from] DatabaseError),
    #[error("identity client setup failed: {0}")]
    Identity(#[from] IdentityError),
    #[error("client_url is not a valid origin: {0}")]
    ClientUrl(#[from] InvalidHeaderValue),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
