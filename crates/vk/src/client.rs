use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use sn_core::config::VkConfig;

use crate::error::ApiError;
use crate::rate_limit::RateLimiter;

/// Longest error body kept in [`ApiError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// VK API client bound to one account's token and optional proxy.
pub struct VkClient {
    http: Client,
    base_url: String,
    api_version: String,
    access_token: String,
    limiter: RateLimiter,
}

impl VkClient {
    pub fn new(
        access_token: impl Into<String>,
        proxy: Option<&str>,
        config: &VkConfig,
    ) -> Result<Self, ApiError> {
        let mut builder = Client::builder().timeout(config.timeout());
        if let Some(proxy) = proxy.filter(|p| !p.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| ApiError::InvalidProxy(format!("{proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let mut base_url = config.api_url.clone();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self {
            http: builder.build()?,
            base_url,
            api_version: config.api_version.clone(),
            access_token: access_token.into(),
            limiter: RateLimiter::new(config.min_interval()),
        })
    }

    /// Call `method` with flat string parameters; token and version are appended.
    pub async fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value, ApiError> {
        self.limiter.acquire().await;

        let mut form: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        form.push(("access_token", self.access_token.as_str()));
        form.push(("v", self.api_version.as_str()));

        debug!(method, "vk api call");
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, method))
            .form(&form)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: truncate(body),
            });
        }
        decode_envelope(&body)
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    response: Option<Value>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}

/// Unwrap `{response, error}`. A present `error` always fails the call.
pub fn decode_envelope(body: &str) -> Result<Value, ApiError> {
    let envelope: Envelope = serde_json::from_str(body)?;
    if let Some(err) = envelope.error {
        return Err(ApiError::Api {
            code: err.error_code,
            message: err.error_msg,
        });
    }
    envelope
        .response
        .ok_or_else(|| ApiError::Unexpected("envelope has neither response nor error".into()))
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
