use crate::errors::ProviderError;
use crate::types::{AuthScheme, Provider};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Url;
use std::env;
use std::time::Duration;

const DEFAULT_API_KEY_HEADER: &str = "x-api-key";

/// Authenticated connection to one provider, shared by every call routed
/// to it once built.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    provider: String,
    base_url: Url,
    http: reqwest::Client,
}

impl ProviderClient {
    pub fn build(provider: &Provider, timeout: Duration) -> Result<Self, String> {
        let base_url = Url::parse(provider.base_url.trim())
            .map_err(|err| format!("invalid base_url '{}': {err}", provider.base_url))?;
        let headers = auth_headers(provider)?;
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| format!("http client: {err}"))?;
        Ok(Self {
            provider: provider.name.clone(),
            base_url,
            http,
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Resolves `path` under the base URL, keeping any path prefix the base
    /// already carries (`https://host/v1` + `models` -> `https://host/v1/models`).
    pub fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|err| ProviderError::new(format!("invalid endpoint {joined}: {err}")))
    }
}

fn auth_headers(provider: &Provider) -> Result<HeaderMap, String> {
    let mut headers = HeaderMap::new();
    if provider.auth_scheme == AuthScheme::None {
        return Ok(headers);
    }
    let env_name = provider
        .api_key_env
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| format!("provider {} has no api_key_env configured", provider.name))?;
    let key = env::var(env_name)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| format!("environment variable {env_name} is not set"))?;

    let (name, value) = match provider.auth_scheme {
        AuthScheme::Bearer => {
            let name = match provider.auth_header.as_deref() {
                Some(custom) => parse_header_name(custom)?,
                None => AUTHORIZATION,
            };
            (name, format!("Bearer {key}"))
        }
        AuthScheme::ApiKey => {
            let name = parse_header_name(
                provider
                    .auth_header
                    .as_deref()
                    .unwrap_or(DEFAULT_API_KEY_HEADER),
            )?;
            (name, key)
        }
        AuthScheme::None => return Ok(headers),
    };
    let mut value =
        HeaderValue::from_str(&value).map_err(|err| format!("invalid credential value: {err}"))?;
    value.set_sensitive(true);
    headers.insert(name, value);
    Ok(headers)
}

fn parse_header_name(raw: &str) -> Result<HeaderName, String> {
    HeaderName::from_bytes(raw.trim().as_bytes())
        .map_err(|err| format!("invalid auth header '{raw}': {err}"))
}
