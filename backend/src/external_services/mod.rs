pub mod forwarder;
pub mod sepay;
pub mod telegram;

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::config::{AuthMode, MainConfig};
use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

fn validate_signature(provided_signature: &str, secret: &str, body: &[u8]) -> bool {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");

    mac.update(body);

    let provided_signature = provided_signature.trim();
    let provided_signature = provided_signature
        .strip_prefix("sha256=")
        .unwrap_or(provided_signature);

    let Ok(decoded) = hex::decode(provided_signature) else {
        return false;
    };

    mac.verify_slice(&decoded).is_ok()
}

/**
Decides whether an inbound webhook really comes from SePay.
 */
#[derive(Debug, Clone)]
pub enum Authenticator {
    /**
    `Authorization: Apikey <secret>`, compared as an exact string.
     */
    ApiKey { expected: String },
    /**
    Hex HMAC-SHA256 of the raw body, carried in `header`.
     */
    Signature { secret: String, header: String },
    Disabled,
}

impl Authenticator {
    pub fn from_config(config: &MainConfig) -> Self {
        match config.auth_mode {
            AuthMode::ApiKey => Self::api_key(config.api_key.as_deref().unwrap_or_default()),
            AuthMode::Signature => Self::Signature {
                secret: config.signature_secret.clone().unwrap_or_default(),
                header: config.signature_header.to_lowercase(),
            },
            AuthMode::None => Self::Disabled,
        }
    }

    pub fn api_key(key: &str) -> Self {
        Self::ApiKey {
            expected: format!("Apikey {key}"),
        }
    }

    pub fn authorize(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), AuthError> {
        let result = match self {
            Authenticator::ApiKey { expected } => {
                let provided = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();

                if provided.trim() == expected {
                    Ok(())
                } else {
                    Err(AuthError::InvalidApiKey)
                }
            }

            Authenticator::Signature { secret, header } => {
                let provided = headers
                    .get(header.as_str())
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();

                if validate_signature(provided, secret, body) {
                    Ok(())
                } else {
                    Err(AuthError::InvalidSignature)
                }
            }

            Authenticator::Disabled => Ok(()),
        };

        match &result {
            Ok(()) => debug!(policy = self.policy_name(), "webhook authorized"),
            Err(reason) => warn!(
                policy = self.policy_name(),
                %reason,
                authorization_present = headers.contains_key("authorization"),
                "webhook rejected"
            ),
        }

        result
    }

    pub fn policy_name(&self) -> &'static str {
        match self {
            Authenticator::ApiKey { .. } => "api_key",
            Authenticator::Signature { .. } => "signature",
            Authenticator::Disabled => "none",
        }
    }
}
