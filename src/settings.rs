use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::mpesa::Environment;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MpesaSettings {
    #[serde(default)]
    pub consumer_key: String,
    #[serde(default)]
    pub consumer_secret: String,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default = "default_mpesa_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Certificate file used for security credentials instead of the embedded one.
    #[serde(default)]
    pub certificate_path: String,
}

impl Default for MpesaSettings {
    fn default() -> Self {
        Self {
            consumer_key: String::new(),
            consumer_secret: String::new(),
            environment: Environment::Sandbox,
            timeout: default_mpesa_timeout(),
            certificate_path: String::new(),
        }
    }
}

impl MpesaSettings {
    pub fn has_credentials(&self) -> bool {
        !self.consumer_key.is_empty() && !self.consumer_secret.is_empty()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub mpesa: MpesaSettings,
    #[serde(default = "default_callback_port")]
    pub callback_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mpesa: MpesaSettings::default(),
            callback_port: default_callback_port(),
        }
    }
}

impl Config {
    /// Load from config.toml (if present) and environment variables.
    /// Environment variables override file values.
    /// Supported env keys: MPESA_CONSUMER_KEY, MPESA_CONSUMER_SECRET, MPESA_ENVIRONMENT,
    /// MPESA_TIMEOUT, MPESA_CERTIFICATE_PATH, CALLBACK_PORT
    pub fn load() -> Self {
        // 1) Start with defaults + config.toml only if it exists
        let mut fig = Figment::from(Serialized::defaults(Config::default()));
        if std::path::Path::new("config.toml").exists() {
            fig = fig.merge(Toml::file("config.toml"));
        }
        let mut cfg = extract_or_default(fig);

        // 2) Overlay environment variables explicitly
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg
    }

    pub fn from_env() -> Self {
        Self::load()
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MPESA_CONSUMER_KEY") {
            self.mpesa.consumer_key = v;
        }
        if let Some(v) = lookup("MPESA_CONSUMER_SECRET") {
            self.mpesa.consumer_secret = v;
        }
        if let Some(v) = lookup("MPESA_ENVIRONMENT") {
            match v.parse() {
                Ok(env) => self.mpesa.environment = env,
                Err(e) => tracing::warn!("ignoring MPESA_ENVIRONMENT: {}", e),
            }
        }
        if let Some(v) = lookup("MPESA_TIMEOUT") {
            self.mpesa.timeout = parse_duration_env(&v, self.mpesa.timeout);
        }
        if let Some(v) = lookup("MPESA_CERTIFICATE_PATH") {
            self.mpesa.certificate_path = v;
        }
        if let Some(v) = lookup("CALLBACK_PORT") {
            self.callback_port = v.parse().unwrap_or(self.callback_port);
        }
    }
}

fn extract_or_default(fig: Figment) -> Config {
    fig.extract().unwrap_or_else(|e| {
        tracing::warn!("invalid config.toml, using defaults: {}", e);
        Config::default()
    })
}

fn parse_duration_env(value: &str, current: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(current)
}

fn default_mpesa_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_callback_port() -> u16 {
    8080
}
