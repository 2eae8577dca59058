use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::{
    canonical::CanonicalMedia,
    config::{AppConfig, RateLimitPolicy},
    error::FetchError,
    upstream::{LibraryEnvelope, LibraryVersion, TikWmEnvelope, UpstreamResponse},
};

#[async_trait]
pub trait Provider: Send + Sync {
    /// Name used in logs, e.g. `library-v2` or `tikwm`
    fn name(&self) -> &str;

    /// Look up one post and narrow the provider's answer into the canonical shape
    async fn fetch(&self, url: &str) -> Result<CanonicalMedia, FetchError>;
}

/// HTTP plumbing shared by the providers: client, UA and rate-limit detection.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    user_agent: String,
    rate_limit: RateLimitPolicy,
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client, user_agent: String, rate_limit: RateLimitPolicy) -> Self {
        Self {
            http,
            user_agent,
            rate_limit,
        }
    }

    pub fn rate_limit(&self) -> &RateLimitPolicy {
        &self.rate_limit
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        debug!("GET {url}");
        let response = self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|error| FetchError::from_reqwest(&error, &self.rate_limit))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {}: {}", status.as_u16(), body.trim());
            return Err(FetchError::classify(
                Some(status.as_u16()),
                &message,
                &self.rate_limit,
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|error| FetchError::Upstream(format!("Invalid upstream JSON: {error}")))
    }
}

/// One version of the downloader library, reached over HTTP.
pub struct LibraryProvider {
    client: UpstreamClient,
    endpoint: String,
    version: LibraryVersion,
    name: String,
}

impl LibraryProvider {
    pub fn new(
        client: UpstreamClient,
        endpoint: impl Into<String>,
        version: LibraryVersion,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            version,
            name: format!("library-{}", version.as_str()),
        }
    }
}

#[async_trait]
impl Provider for LibraryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, url: &str) -> Result<CanonicalMedia, FetchError> {
        let request_url = Url::parse_with_params(
            &self.endpoint,
            &[("url", url), ("version", self.version.as_str())],
        )
        .map_err(|error| FetchError::Upstream(format!("Invalid library endpoint: {error}")))?;

        let envelope: LibraryEnvelope = self.client.get_json(request_url).await?;
        let result = match envelope.result {
            Some(result) if envelope.status == "success" && !result.is_null() => result,
            _ => {
                let message = envelope.message.unwrap_or_else(|| {
                    format!("Library version {} returned no data", self.version.as_str())
                });
                return Err(FetchError::classify(None, &message, self.client.rate_limit()));
            }
        };

        UpstreamResponse::from_library(self.version, result)
            .map(UpstreamResponse::into_canonical)
            .map_err(|error| {
                FetchError::Upstream(format!(
                    "Library version {} returned an unexpected shape: {error}",
                    self.version.as_str()
                ))
            })
    }
}

/// The TikWM public mirror.
pub struct TikWmProvider {
    client: UpstreamClient,
    endpoint: String,
}

impl TikWmProvider {
    pub fn new(client: UpstreamClient, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Provider for TikWmProvider {
    fn name(&self) -> &str {
        "tikwm"
    }

    async fn fetch(&self, url: &str) -> Result<CanonicalMedia, FetchError> {
        let request_url = Url::parse_with_params(&self.endpoint, &[("url", url)])
            .map_err(|error| FetchError::Upstream(format!("Invalid TikWM endpoint: {error}")))?;

        let envelope: TikWmEnvelope = self.client.get_json(request_url).await?;
        match envelope.data {
            Some(data) if envelope.code == 0 => {
                Ok(UpstreamResponse::TikWm(data).into_canonical())
            }
            _ => {
                let message = envelope
                    .msg
                    .unwrap_or_else(|| format!("TikWM returned code {}", envelope.code));
                Err(FetchError::classify(None, &message, self.client.rate_limit()))
            }
        }
    }
}

/// Providers in the order they are tried: library versions first, then the mirror.
pub fn build_providers(config: &AppConfig, http: reqwest::Client) -> Vec<Arc<dyn Provider>> {
    let client = UpstreamClient::new(http, config.user_agent.clone(), config.rate_limit.clone());
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

    if let Some(endpoint) = &config.library_endpoint {
        for version in &config.library_versions {
            providers.push(Arc::new(LibraryProvider::new(
                client.clone(),
                endpoint.clone(),
                *version,
            )));
        }
    }

    if let Some(endpoint) = &config.tikwm_endpoint {
        providers.push(Arc::new(TikWmProvider::new(client, endpoint.clone())));
    }

    providers
}
