//! Duo Auth API push client.
//!
//! Requests are signed the way the Auth API expects: an HMAC over the
//! canonical request (date, method, host, path, sorted parameters) sent as
//! HTTP Basic credentials `ikey:hex(hmac)` alongside a `Date` header.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use sha2::Sha512;
use tracing::{debug, info};

use super::{MfaError, MfaProvider, ProviderResponse};

type HmacSha512 = Hmac<Sha512>;

/// RFC 3986 unreserved characters stay literal; everything else is escaped.
const PARAM_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const AUTH_PATH: &str = "/auth/v2/auth";
const AUTH_STATUS_PATH: &str = "/auth/v2/auth_status";

/// Duo Auth API credentials and target user.
#[derive(Clone, PartialEq, Eq)]
pub struct DuoConfig {
    pub integration_key: String,
    pub secret_key: String,
    /// e.g. `api-XXXXXXXX.duosecurity.com`
    pub api_host: String,
    /// Identity that receives the pushes.
    pub mfa_user: String,
}

impl std::fmt::Debug for DuoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuoConfig")
            .field("integration_key", &self.integration_key)
            .field("secret_key", &"<redacted>")
            .field("api_host", &self.api_host)
            .field("mfa_user", &self.mfa_user)
            .finish()
    }
}

impl DuoConfig {
    /// Read `DUO_INTEGRATION_KEY`, `DUO_SECRET_KEY`, `DUO_API_HOST` and
    /// `DUO_MFA_USER`. Returns `None` unless all four are set and non-empty.
    pub fn from_env() -> Option<Self> {
        Self::from_parts(
            std::env::var("DUO_INTEGRATION_KEY").ok(),
            std::env::var("DUO_SECRET_KEY").ok(),
            std::env::var("DUO_API_HOST").ok(),
            std::env::var("DUO_MFA_USER").ok(),
        )
    }

    /// Build a config only if every part is present and non-blank.
    pub fn from_parts(
        integration_key: Option<String>,
        secret_key: Option<String>,
        api_host: Option<String>,
        mfa_user: Option<String>,
    ) -> Option<Self> {
        let present = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Some(Self {
            integration_key: present(integration_key)?,
            secret_key: present(secret_key)?,
            api_host: present(api_host)?.to_lowercase(),
            mfa_user: present(mfa_user)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    stat: String,
    response: Option<T>,
    code: Option<u32>,
    message: Option<String>,
    message_detail: Option<String>,
}

impl<T> Envelope<T> {
    fn into_response(self) -> Result<T, MfaError> {
        if self.stat == "OK" {
            if let Some(response) = self.response {
                return Ok(response);
            }
        }
        let mut message = self.message.unwrap_or_else(|| "no message".to_string());
        if let Some(detail) = self.message_detail {
            message = format!("{message} ({detail})");
        }
        Err(MfaError::Provider {
            status: self
                .code
                .map_or_else(|| self.stat.clone(), |c| format!("{} {c}", self.stat)),
            message,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    result: String,
    status_msg: Option<String>,
    txid: Option<String>,
}

/// Duo Auth API client.
pub struct DuoClient {
    config: DuoConfig,
    http_client: reqwest::Client,
}

impl DuoClient {
    /// `request_timeout` bounds each HTTP call; a synchronous push waits for
    /// the human, so it should exceed the push timeout used by the
    /// authenticator.
    pub fn new(config: DuoConfig, request_timeout: Duration) -> Result<Self, MfaError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("netgate/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn base_url(&self) -> String {
        format!("https://{}", self.config.api_host)
    }

    fn signed_headers(
        &self,
        method: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<(String, String), MfaError> {
        let date = chrono::Utc::now().to_rfc2822();
        let canonical = canonical_request(
            &date,
            method,
            &self.config.api_host,
            path,
            &canonical_params(params),
        );
        let signature = sign(&self.config.secret_key, &canonical)?;
        let credentials = format!("{}:{}", self.config.integration_key, signature);
        Ok((date, format!("Basic {}", STANDARD.encode(credentials))))
    }

    async fn auth(&self, params: Vec<(&str, String)>) -> Result<AuthResponse, MfaError> {
        let (date, authorization) = self.signed_headers("POST", AUTH_PATH, &params)?;
        let body = canonical_params(&params);
        let envelope: Envelope<AuthResponse> = self
            .http_client
            .post(format!("{}{}", self.base_url(), AUTH_PATH))
            .header("Date", date)
            .header("Authorization", authorization)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?
            .json()
            .await?;
        envelope.into_response()
    }
}

#[async_trait]
impl MfaProvider for DuoClient {
    async fn push(
        &self,
        user: &str,
        description: &str,
        correlation_id: &str,
    ) -> Result<ProviderResponse, MfaError> {
        let pushinfo = canonical_params(&[
            ("Action", description.to_string()),
            ("ID", correlation_id.to_string()),
        ]);
        let params = vec![
            ("username", user.to_string()),
            ("factor", "push".to_string()),
            ("device", "auto".to_string()),
            ("type", "Network Admin Action".to_string()),
            ("display_username", user.to_string()),
            ("pushinfo", pushinfo),
        ];

        info!(user = %user, correlation_id = %correlation_id, "sending Duo push");
        let resp = self.auth(params).await?;
        debug!(result = %resp.result, status = ?resp.status_msg, "Duo push answered");

        Ok(ProviderResponse {
            allowed: resp.result == "allow",
            transaction_id: resp.txid,
            status_message: resp.status_msg,
        })
    }

    async fn poll(&self, transaction_id: &str) -> Result<bool, MfaError> {
        let params = vec![("txid", transaction_id.to_string())];
        let (date, authorization) = self.signed_headers("GET", AUTH_STATUS_PATH, &params)?;
        let envelope: Envelope<AuthResponse> = self
            .http_client
            .get(format!(
                "{}{}?{}",
                self.base_url(),
                AUTH_STATUS_PATH,
                canonical_params(&params)
            ))
            .header("Date", date)
            .header("Authorization", authorization)
            .send()
            .await?
            .json()
            .await?;
        Ok(envelope.into_response()?.result == "allow")
    }

    fn default_user(&self) -> &str {
        &self.config.mfa_user
    }
}

/// Sorted `key=value` pairs joined by `&`, both sides RFC 3986 encoded.
fn canonical_params(params: &[(&str, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| {
            (
                utf8_percent_encode(k, PARAM_ENCODE_SET).to_string(),
                utf8_percent_encode(v, PARAM_ENCODE_SET).to_string(),
            )
        })
        .collect();
    encoded.sort();
    encoded
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn canonical_request(date: &str, method: &str, host: &str, path: &str, params: &str) -> String {
    [
        date,
        &method.to_uppercase(),
        &host.to_lowercase(),
        path,
        params,
    ]
    .join("\n")
}

fn sign(secret_key: &str, canonical: &str) -> Result<String, MfaError> {
    let mut mac = HmacSha512::new_from_slice(secret_key.as_bytes())
        .map_err(|e| MfaError::Config(format!("invalid secret key: {e}")))?;
    mac.update(canonical.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
