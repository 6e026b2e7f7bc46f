// M-Pesa (Daraja) provider module

pub mod auth;
pub mod certs;
pub mod credential;
pub mod errors;
pub mod http;
pub mod rest;
pub mod types;
pub mod webhook;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::settings::MpesaSettings;
use self::auth::{Authenticator, Clock, SystemClock};
use self::errors::{CredentialError, MpesaError};
use self::http::{HttpClient, ReqwestHttpClient};

pub use self::errors::ErrorKind;
pub use self::rest::MpesaClient;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Target deployment. Picks the base URL and the credential certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Sandbox => "sandbox",
            Environment::Production => "production",
        }
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }

    pub fn base_url(self) -> &'static str {
        match self {
            Environment::Sandbox => "https://sandbox.safaricom.co.ke",
            Environment::Production => "https://api.safaricom.co.ke",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Environment::Sandbox),
            "production" | "live" => Ok(Environment::Production),
            other => Err(format!("unknown mpesa environment {other:?}")),
        }
    }
}

/// Assembles an [`MpesaClient`]. Transport, clock and base URL default to reqwest,
/// the system clock and the environment's Daraja host.
pub struct MpesaClientBuilder {
    consumer_key: String,
    consumer_secret: String,
    environment: Environment,
    timeout: Duration,
    base_url: Option<String>,
    http: Option<Arc<dyn HttpClient>>,
    clock: Option<Arc<dyn Clock>>,
    certificate: Option<Vec<u8>>,
}

impl MpesaClientBuilder {
    pub fn new(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            environment,
            timeout: DEFAULT_TIMEOUT,
            base_url: None,
            http: None,
            clock: None,
            certificate: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the Daraja host, e.g. to point at a local mock server.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Certificate (PEM or DER) used for security credentials instead of the one
    /// embedded for the environment.
    pub fn certificate(mut self, bundle: impl Into<Vec<u8>>) -> Self {
        self.certificate = Some(bundle.into());
        self
    }

    pub fn build(self) -> Result<MpesaClient, MpesaError> {
        let http: Arc<dyn HttpClient> = match self.http {
            Some(http) => http,
            None => Arc::new(ReqwestHttpClient::with_timeout(self.timeout).map_err(|source| {
                MpesaError::Transport {
                    operation: "build_client",
                    source,
                }
            })?),
        };
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let base_url = self
            .base_url
            .unwrap_or_else(|| self.environment.base_url().to_string());

        let auth = Authenticator::new(
            Arc::clone(&http),
            Arc::clone(&clock),
            format!("{base_url}{}", rest::AUTH_PATH),
            self.consumer_key,
            self.consumer_secret,
        );

        Ok(MpesaClient {
            http,
            clock,
            environment: self.environment,
            base_url,
            auth,
            certificate: self.certificate,
        })
    }
}

impl MpesaClient {
    pub fn builder(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        environment: Environment,
    ) -> MpesaClientBuilder {
        MpesaClientBuilder::new(consumer_key, consumer_secret, environment)
    }

    // Build reqwest-backed client with the timeout, environment and certificate from cfg.
    pub fn from_settings(cfg: &MpesaSettings) -> Result<Self, MpesaError> {
        let timeout = if cfg.timeout.is_zero() { DEFAULT_TIMEOUT } else { cfg.timeout };
        let mut builder =
            Self::builder(cfg.consumer_key.clone(), cfg.consumer_secret.clone(), cfg.environment)
                .timeout(timeout);
        if !cfg.certificate_path.is_empty() {
            let bundle = std::fs::read(&cfg.certificate_path).map_err(|e| {
                CredentialError::Unreadable {
                    path: cfg.certificate_path.clone(),
                    reason: e.to_string(),
                }
            })?;
            builder = builder.certificate(bundle);
        }
        builder.build()
    }
}
