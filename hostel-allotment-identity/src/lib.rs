//! Resolves bearer tokens to users by asking the identity provider.

pub mod error;

use core::time::Duration;
use std::sync::Arc;

use async_trait::async_trait;
use hostel_allotment_config::IdentityConfig;
use hostel_allotment_core::models::UserId;
use http_body_util::BodyExt as _;
use hyper::header::{self, HeaderValue};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;

pub use crate::error::IdentityError;

const USER_PATH: &str = "/auth/v1/user";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub id: UserId,
    pub email: Option<String>,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Fails with [`IdentityError::Rejected`] if the token is not valid.
    async fn verify(&self, access_token: &str) -> Result<VerifiedIdentity, IdentityError>;
}

#[derive(Deserialize)]
struct UserResponse {
    id: UserId,
    email: Option<String>,
}

pub struct HttpIdentityVerifier {
    user_url: Uri,
    host: String,
    port: u16,
    api_key: HeaderValue,
    tls: Option<(TlsConnector, ServerName<'static>)>,
}

impl HttpIdentityVerifier {
    pub fn new(config: &IdentityConfig) -> Result<Self, IdentityError> {
        let user_url: Uri = format!("{}{USER_PATH}", config.url.trim_end_matches('/')).parse()?;
        let host = user_url.host().ok_or(IdentityError::MissingHost)?.to_owned();
        let https = user_url.scheme_str() == Some("https");
        let port = user_url.port_u16().unwrap_or(if https { 443 } else { 80 });

        let tls = if https {
            let mut root_cert_store = RootCertStore::empty();
            root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let tls_config = ClientConfig::builder()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth();
            let server_name = ServerName::try_from(host.clone())?;
            Some((TlsConnector::from(Arc::new(tls_config)), server_name))
        } else {
            None
        };

        let mut api_key =
            HeaderValue::from_str(&config.api_key).map_err(|_| IdentityError::InvalidApiKey)?;
        api_key.set_sensitive(true);

        Ok(Self {
            user_url,
            host,
            port,
            api_key,
            tls,
        })
    }

    fn request(&self, access_token: &str) -> Result<Request<String>, IdentityError> {
        let mut bearer = HeaderValue::from_str(&format!("Bearer {access_token}"))
            .map_err(|_| IdentityError::Rejected)?;
        bearer.set_sensitive(true);
        let path = self
            .user_url
            .path_and_query()
            .map_or(USER_PATH, |path| path.as_str());
        let authority = self
            .user_url
            .authority()
            .map_or(self.host.as_str(), |authority| authority.as_str());

        Ok(Request::builder()
            .method(Method::GET)
            .uri(path)
            .header(header::HOST, authority)
            .header(header::ACCEPT, "application/json")
            .header(header::AUTHORIZATION, bearer)
            .header("apikey", self.api_key.clone())
            .body(String::new())?)
    }

    async fn fetch_user(&self, access_token: &str) -> Result<(StatusCode, Vec<u8>), IdentityError> {
        let request = self.request(access_token)?;
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        match &self.tls {
            Some((connector, server_name)) => {
                let stream = connector.connect(server_name.clone(), stream).await?;
                exchange(stream, request).await
            }
            None => exchange(stream, request).await,
        }
    }
}

async fn exchange<T>(
    io: T,
    request: Request<String>,
) -> Result<(StatusCode, Vec<u8>), IdentityError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            debug!("identity provider connection failed: {err}");
        }
    });

    let response = sender.send_request(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();
    Ok((status, body.to_vec()))
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, access_token: &str) -> Result<VerifiedIdentity, IdentityError> {
        let (status, body) = tokio::time::timeout(REQUEST_TIMEOUT, self.fetch_user(access_token))
            .await
            .map_err(|_| IdentityError::Timeout)??;

        match status {
            StatusCode::OK => {
                let user: UserResponse = serde_json::from_slice(&body)?;
                Ok(VerifiedIdentity {
                    id: user.id,
                    email: user.email,
                })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(IdentityError::Rejected),
            status => Err(IdentityError::Upstream(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use hostel_allotment_config::IdentityConfig;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use crate::{HttpIdentityVerifier, IdentityError, IdentityVerifier as _};

    const USER_ID: &str = "6c1f2a9e-3b7d-4f43-9d62-0d1b6b8f8a31";

    /// Answers a single request with a canned response and hands back what it
    /// received.
    async fn serve_once(status_line: &'static str, body: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buffer = [0; 1024];
            while !received.windows(4).any(|window| window == b"\r\n\r\n") {
                let read = socket.read(&mut buffer).await.unwrap();
                if read == 0 {
                    break;
                }
                received.extend_from_slice(&buffer[..read]);
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: \
                 {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8(received).unwrap()
        });
        (url, handle)
    }

    fn verifier(url: String) -> HttpIdentityVerifier {
        HttpIdentityVerifier::new(&IdentityConfig {
            url,
            api_key: "anon-key".to_owned(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn resolves_user_from_provider() {
        let body = format!(
            r#"{{"id":"{USER_ID}","email":"asha@example.test","role":"authenticated"}}"#
        );
        let (url, server) = serve_once("200 OK", body).await;

        let identity = verifier(url).verify("token-1").await.unwrap();
        assert_eq!(identity.id.to_string(), USER_ID);
        assert_eq!(identity.email.as_deref(), Some("asha@example.test"));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /auth/v1/user HTTP/1.1\r\n"));
        assert!(request.contains("authorization: Bearer token-1\r\n"));
        assert!(request.contains("apikey: anon-key\r\n"));
    }

    #[tokio::test]
    async fn unauthorized_is_a_rejection() {
        let (url, _server) =
            serve_once("401 Unauthorized", r#"{"msg":"invalid JWT"}"#.to_owned()).await;
        let err = verifier(url).verify("expired").await.unwrap_err();
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn provider_failure_is_not_a_rejection() {
        let (url, _server) = serve_once("503 Service Unavailable", String::new()).await;
        let err = verifier(url).verify("token-1").await.unwrap_err();
        assert!(matches!(err, IdentityError::Upstream(status) if status.as_u16() == 503));
        assert!(!err.is_rejection());
    }

    #[test]
    fn url_must_have_a_host() {
        let config = |url: &str| IdentityConfig {
            url: url.to_owned(),
            api_key: "anon-key".to_owned(),
        };
        assert!(matches!(
            HttpIdentityVerifier::new(&config("not a url")),
            Err(IdentityError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpIdentityVerifier::new(&config("")),
            Err(IdentityError::MissingHost)
        ));
    }
}
