use hyper::StatusCode;

#[derive(thiserror::Error, Debug)]
pub enum IdentityError {
    #[error("access token rejected")]
    Rejected,
    #[error("identity provider answered {0}")]
    Upstream(StatusCode),
    #[error("identity provider did not answer in time")]
    Timeout,
    #[error("invalid identity url: {0}")]
    InvalidUrl(#[from] hyper::http::uri::InvalidUri),
    #[error("identity url has no host")]
    MissingHost,
    #[error("invalid dns name: {0}")]
    InvalidDnsName(#[from] tokio_rustls::rustls::pki_types::InvalidDnsNameError),
    #[error("invalid api key header")]
    InvalidApiKey,
    #[error("hyper {0}")]
    Hyper(#[from] hyper::Error),
    #[error("hyper http {0}")]
    HyperHttp(#[from] hyper::http::Error),
    #[error("io {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed user response: {0}")]
    Json(#[from] serde_json::Error),
}

impl IdentityError {
    /// Whether the caller presented a bad token, as opposed to the provider
    /// being unreachable or misbehaving.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected)
    }
}
