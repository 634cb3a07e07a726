use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono_tz::Tz;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    ApiKey,
    Signature,
    None,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorMode {
    OrderCode,
    TopupMarker,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryBackend {
    Memory,
    File,
    Mysql,
    Disabled,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MainConfig {
    #[serde(rename = "sepay_bind_addr", default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    #[serde(rename = "sepay_port", default = "default_port")]
    pub port: u16,
    #[serde(rename = "sepay_tls_cert_path")]
    pub tls_cert_path: Option<String>,
    #[serde(rename = "sepay_tls_key_path")]
    pub tls_key_path: Option<String>,

    #[serde(rename = "sepay_auth_mode", default = "default_auth_mode")]
    pub auth_mode: AuthMode,
    #[serde(rename = "sepay_api_key")]
    pub api_key: Option<String>,
    #[serde(rename = "sepay_signature_secret")]
    pub signature_secret: Option<String>,
    #[serde(rename = "sepay_signature_header", default = "default_signature_header")]
    pub signature_header: String,

    #[serde(rename = "sepay_default_bank", default = "default_bank")]
    pub default_bank: String,
    #[serde(rename = "sepay_extractor", default = "default_extractor")]
    pub extractor: ExtractorMode,
    #[serde(rename = "sepay_order_tags", default = "default_order_tags")]
    pub order_tags: Vec<String>,
    #[serde(rename = "sepay_topup_marker", default = "default_topup_marker")]
    pub topup_marker: String,

    #[serde(rename = "sepay_telegram_bot_token")]
    pub telegram_bot_token: Option<String>,
    #[serde(rename = "sepay_telegram_api_url", default = "default_telegram_api_url")]
    pub telegram_api_url: String,
    #[serde(rename = "sepay_telegram_chat_id")]
    pub telegram_chat_id: Option<String>,

    #[serde(rename = "sepay_history_backend", default = "default_history_backend")]
    pub history_backend: HistoryBackend,
    #[serde(rename = "sepay_history_file", default = "default_history_file")]
    pub history_file: String,
    #[serde(rename = "sepay_database_url")]
    pub database_url: Option<String>,

    #[serde(rename = "sepay_forward_url")]
    pub forward_url: Option<String>,
    #[serde(rename = "sepay_forward_secret")]
    pub forward_secret: Option<String>,
    #[serde(rename = "sepay_forward_max_attempts", default = "default_forward_max_attempts")]
    pub forward_max_attempts: u32,
    #[serde(rename = "sepay_forward_queue_size", default = "default_forward_queue_size")]
    pub forward_queue_size: usize,

    #[serde(rename = "sepay_http_timeout_secs", default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(rename = "sepay_timezone", default = "default_timezone")]
    pub timezone: String,
}

fn default_bind_addr() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    10000
}

fn default_auth_mode() -> AuthMode {
    AuthMode::ApiKey
}

fn default_signature_header() -> String {
    "x-sepay-signature".to_string()
}

fn default_bank() -> String {
    "MBBank".to_string()
}

fn default_extractor() -> ExtractorMode {
    ExtractorMode::OrderCode
}

fn default_order_tags() -> Vec<String> {
    ["DH", "ORDER", "MD", "INV", "MA DON", "MA"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_topup_marker() -> String {
    "NAPTIEN".to_string()
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_history_backend() -> HistoryBackend {
    HistoryBackend::File
}

fn default_history_file() -> String {
    "history.jsonl".to_string()
}

fn default_forward_max_attempts() -> u32 {
    3
}

fn default_forward_queue_size() -> usize {
    256
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_timezone() -> String {
    "Asia/Ho_Chi_Minh".to_string()
}

impl MainConfig {
    pub fn from_env() -> Result<Self> {
        let config = envy::from_env::<MainConfig>()?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self.auth_mode {
            AuthMode::ApiKey if self.api_key.as_deref().map_or(true, str::is_empty) => {
                bail!("SEPAY_AUTH_MODE=api_key requires SEPAY_API_KEY")
            }
            AuthMode::Signature
                if self.signature_secret.as_deref().map_or(true, str::is_empty) =>
            {
                bail!("SEPAY_AUTH_MODE=signature requires SEPAY_SIGNATURE_SECRET")
            }
            _ => {}
        }

        if self.history_backend == HistoryBackend::Mysql && self.database_url.is_none() {
            bail!("SEPAY_HISTORY_BACKEND=mysql requires SEPAY_DATABASE_URL");
        }

        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            bail!("SEPAY_TLS_CERT_PATH and SEPAY_TLS_KEY_PATH must be set together");
        }

        if self.extractor == ExtractorMode::TopupMarker && self.topup_marker.trim().is_empty() {
            bail!("SEPAY_EXTRACTOR=topup_marker requires a non-empty SEPAY_TOPUP_MARKER");
        }

        if self.forward_max_attempts == 0 {
            bail!("SEPAY_FORWARD_MAX_ATTEMPTS must be at least 1");
        }

        if self.http_timeout_secs == 0 {
            bail!("SEPAY_HTTP_TIMEOUT_SECS must be at least 1");
        }

        self.tz()?;

        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("invalid SEPAY_TIMEZONE {:?}: {e}", self.timezone))
    }

    pub fn order_tags(&self) -> Vec<String> {
        self.order_tags
            .iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect()
    }
}

#[cfg(test)]
pub(crate) fn config_from_pairs(pairs: &[(&str, &str)]) -> MainConfig {
    envy::from_iter::<_, MainConfig>(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string())),
    )
    .unwrap()
}
