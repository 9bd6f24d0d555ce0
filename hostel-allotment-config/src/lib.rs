use core::fmt::{self, Debug};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

pub const CONFIG_FILE: &str = "hostel.toml";
pub const ENV_PREFIX: &str = "HOSTEL_";

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Elevated role, used for allotment writes and admin operations.
    pub service_url: String,
    /// Read-only role, used for end-user reads.
    pub scoped_url: String,
}

#[derive(Deserialize, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    /// Base url of the identity provider, e.g. `https://project.example.co`.
    pub url: String,
    pub api_key: String,
}

impl Debug for IdentityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,
    /// Origin allowed by CORS, where the single-page front end is served.
    #[serde(default = "default_client_url")]
    pub client_url: String,
    pub database: DatabaseConfig,
    pub identity: IdentityConfig,
}

const fn default_listen_address() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 5000))
}

fn default_client_url() -> String {
    "http://localhost:5173".to_owned()
}

#[derive(thiserror::Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(value: figment::Error) -> Self {
        Self::Figment(Box::new(value))
    }
}

impl Debug for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

pub fn get_config() -> Result<Config, ConfigError> {
    get_config_from(Path::new(CONFIG_FILE))
}

/// Environment variables override values from the file at `path`.
pub fn get_config_from(path: &Path) -> Result<Config, ConfigError> {
    Ok(figment(path).extract()?)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use figment::Jail;

    use crate::{get_config, get_config_from, CONFIG_FILE};

    #[test]
    fn reads_file_and_applies_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                [database]
                service_url = "postgres://service@localhost/hostel"
                scoped_url = "postgres://reader@localhost/hostel"

                [identity]
                url = "https://auth.example.test"
                api_key = "anon-key"
                "#,
            )?;
            let config = get_config().unwrap();
            assert_eq!(config.listen_address.port(), 5000);
            assert_eq!(config.client_url, "http://localhost:5173");
            assert_eq!(config.identity.url, "https://auth.example.test");
            assert!(!format!("{:?}", config.identity).contains("anon-key"));
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_nested_keys() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "custom.toml",
                r#"
                listen_address = "127.0.0.1:8080"

                [database]
                service_url = "postgres://service@localhost/hostel"
                scoped_url = "postgres://reader@localhost/hostel"

                [identity]
                url = "https://auth.example.test"
                api_key = "anon-key"
                "#,
            )?;
            jail.set_env("HOSTEL_DATABASE__SERVICE_URL", "postgres://override/hostel");
            let config = get_config_from(Path::new("custom.toml")).unwrap();
            assert_eq!(config.listen_address.to_string(), "127.0.0.1:8080");
            assert_eq!(config.database.service_url, "postgres://override/hostel");
            Ok(())
        });
    }

    #[test]
    fn missing_sections_are_reported() {
        Jail::expect_with(|_jail| {
            let err = get_config().unwrap_err();
            assert!(err.to_string().contains("config error"));
            Ok(())
        });
    }
}
