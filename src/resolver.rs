use std::{sync::Arc, time::Duration};

use reqwest::header::USER_AGENT;
use tokio::time::{sleep, timeout};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::{
    canonical::CanonicalMedia,
    config::{AppConfig, RetryPolicy},
    error::FetchError,
    provider::{Provider, build_providers},
};

const SUPPORTED_HOST_MARKERS: [&str; 2] = ["tiktok.com", "douyin"];
const SHORT_LINK_MARKERS: [&str; 3] = ["/t/", "vm.tiktok.com", "vt.tiktok.com"];

/// Trims the raw input and checks it points at TikTok or Douyin.
pub fn validate_url(raw: &str) -> Result<&str, FetchError> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(FetchError::InvalidInput(
            "URL parameter is required".to_string(),
        ));
    }

    if !SUPPORTED_HOST_MARKERS
        .iter()
        .any(|marker| url.contains(marker))
    {
        return Err(FetchError::InvalidInput(
            "Invalid URL. Please provide a valid TikTok URL.".to_string(),
        ));
    }

    Ok(url)
}

pub fn is_short_link(url: &str) -> bool {
    SHORT_LINK_MARKERS.iter().any(|marker| url.contains(marker))
}

/// Turns a TikTok/Douyin URL into canonical media by walking the providers in order.
pub struct Resolver {
    http: reqwest::Client,
    providers: Vec<Arc<dyn Provider>>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    user_agent: String,
}

impl Resolver {
    pub fn new(
        http: reqwest::Client,
        providers: Vec<Arc<dyn Provider>>,
        retry: RetryPolicy,
        attempt_timeout: Duration,
        user_agent: String,
    ) -> Self {
        Self {
            http,
            providers,
            retry,
            attempt_timeout,
            user_agent,
        }
    }

    pub fn from_config(config: &AppConfig, http: reqwest::Client) -> Self {
        let providers = build_providers(config, http.clone());
        Self::new(
            http,
            providers,
            config.retry.clone(),
            config.upstream_timeout,
            config.user_agent.clone(),
        )
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|provider| provider.name()).collect()
    }

    pub async fn resolve(&self, raw_url: &str) -> Result<CanonicalMedia, FetchError> {
        let url = validate_url(raw_url)?;
        let span = info_span!("resolve", request_id = %Uuid::new_v4());

        async move {
            let url = if is_short_link(url) {
                self.resolve_short_url(url).await
            } else {
                url.to_string()
            };

            let mut last_error = None;
            for (index, provider) in self.providers.iter().enumerate() {
                if index > 0 {
                    sleep(self.retry.provider_delay).await;
                }

                info!("Trying provider {}", provider.name());
                match self.attempt_provider(provider.as_ref(), &url).await {
                    Ok(media) => {
                        info!("Provider {} succeeded", provider.name());
                        return Ok(media);
                    }
                    Err(error) => {
                        warn!("Provider {} failed: {error}", provider.name());
                        last_error = Some(error);
                    }
                }
            }

            Err(last_error.unwrap_or_else(|| {
                FetchError::Upstream("No download provider is configured".to_string())
            }))
        }
        .instrument(span)
        .await
    }

    /// Follows redirects of a short link. Any failure keeps the original URL.
    pub async fn resolve_short_url(&self, url: &str) -> String {
        debug!("Resolving short URL {url}");
        let result = self
            .http
            .head(url)
            .header(USER_AGENT, &self.user_agent)
            .timeout(self.attempt_timeout)
            .send()
            .await;

        match result {
            Ok(response) => {
                let resolved = response.url().to_string();
                debug!("Short URL resolved to {resolved}");
                resolved
            }
            Err(error) => {
                warn!("Short URL resolution failed, using original URL: {error}");
                url.to_string()
            }
        }
    }

    async fn attempt_provider(
        &self,
        provider: &dyn Provider,
        url: &str,
    ) -> Result<CanonicalMedia, FetchError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = match timeout(self.attempt_timeout, provider.fetch(url)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(FetchError::Timeout(format!(
                    "{} did not answer within {:?}",
                    provider.name(),
                    self.attempt_timeout
                ))),
            };

            match outcome {
                Ok(media) => return Ok(media),
                Err(error) if error.is_transient() && attempt < max_attempts => {
                    warn!(
                        "{} attempt {attempt}/{max_attempts} failed: {error}. Retrying in {:?}",
                        provider.name(),
                        self.retry.retry_delay
                    );
                    sleep(self.retry.retry_delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Instant,
    };

    use async_trait::async_trait;
    use axum::{Router, http::StatusCode, response::Redirect, routing::get};

    use super::*;
    use crate::{
        canonical::{Author, MediaType},
        provider::tests::spawn,
    };

    fn media(nickname: &str) -> CanonicalMedia {
        CanonicalMedia {
            media_type: MediaType::Video,
            author: Author {
                avatar: None,
                nickname: nickname.to_string(),
            },
            desc: "clip".to_string(),
            video_sd: None,
            video_hd: Some("https://x/hd.mp4".to_string()),
            video_watermark: None,
            music: None,
            images: None,
            upload_date: None,
        }
    }

    /// Replays a fixed list of outcomes, repeating the last one when exhausted.
    struct ScriptedProvider {
        name: String,
        script: Mutex<VecDeque<Result<CanonicalMedia, FetchError>>>,
        calls: AtomicUsize,
        seen_urls: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl ScriptedProvider {
        fn new(name: &str, script: Vec<Result<CanonicalMedia, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                seen_urls: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            })
        }

        fn slow(name: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                script: Mutex::new(VecDeque::from([Ok(media("slow"))])),
                calls: AtomicUsize::new(0),
                seen_urls: Mutex::new(Vec::new()),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch(&self, url: &str) -> Result<CanonicalMedia, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_urls.lock().unwrap().push(url.to_string());
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }

            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    fn retry(max_attempts: u32, retry_delay_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            retry_delay: Duration::from_millis(retry_delay_ms),
            provider_delay: Duration::from_millis(1),
        }
    }

    fn resolver(providers: Vec<Arc<dyn Provider>>, retry: RetryPolicy) -> Resolver {
        Resolver::new(
            reqwest::Client::new(),
            providers,
            retry,
            Duration::from_secs(2),
            "test-agent".to_string(),
        )
    }

    const VIDEO_URL: &str = "https://www.tiktok.com/@user/video/123";

    #[test]
    fn test_validate_url() {
        assert_eq!(
            validate_url("  https://www.tiktok.com/@u/video/1 "),
            Ok("https://www.tiktok.com/@u/video/1")
        );
        assert!(validate_url("https://v.douyin.com/abc/").is_ok());
        assert!(matches!(validate_url("   "), Err(FetchError::InvalidInput(_))));
        assert!(matches!(
            validate_url("https://www.youtube.com/watch?v=1"),
            Err(FetchError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_short_link_detection() {
        assert!(is_short_link("https://vm.tiktok.com/ZMabc/"));
        assert!(is_short_link("https://vt.tiktok.com/ZSabc/"));
        assert!(is_short_link("https://www.tiktok.com/t/ZTabc/"));
        assert!(!is_short_link(VIDEO_URL));
    }

    #[tokio::test]
    async fn test_invalid_url_skips_providers() {
        let provider = ScriptedProvider::new("p", vec![Ok(media("abc"))]);
        let resolver = resolver(vec![provider.clone()], retry(3, 1));

        let result = resolver.resolve("https://example.com/video/1").await;
        assert!(matches!(result, Err(FetchError::InvalidInput(_))));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_retries_rate_limit_until_success() {
        let provider = ScriptedProvider::new(
            "p",
            vec![
                Err(FetchError::RateLimited("HTTP 429".into())),
                Err(FetchError::RateLimited("HTTP 429".into())),
                Ok(media("abc")),
            ],
        );
        let resolver = resolver(vec![provider.clone()], retry(3, 40));

        let started = Instant::now();
        let media = resolver.resolve(VIDEO_URL).await.unwrap();
        assert_eq!(media.author.nickname, "abc");
        assert_eq!(provider.calls(), 3);
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_retries_are_capped_then_next_provider_runs() {
        let limited = ScriptedProvider::new(
            "limited",
            vec![Err(FetchError::RateLimited("HTTP 429".into()))],
        );
        let healthy = ScriptedProvider::new("healthy", vec![Ok(media("fallback"))]);
        let resolver = resolver(vec![limited.clone(), healthy.clone()], retry(2, 1));

        let media = resolver.resolve(VIDEO_URL).await.unwrap();
        assert_eq!(media.author.nickname, "fallback");
        assert_eq!(limited.calls(), 2);
        assert_eq!(healthy.calls(), 1);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let missing = ScriptedProvider::new(
            "missing",
            vec![Err(FetchError::NotFound("HTTP 404".into()))],
        );
        let resolver = resolver(vec![missing.clone()], retry(3, 1));

        let result = resolver.resolve(VIDEO_URL).await;
        assert!(matches!(result, Err(FetchError::NotFound(_))));
        assert_eq!(missing.calls(), 1);
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let first = ScriptedProvider::new("first", vec![Ok(media("first"))]);
        let second = ScriptedProvider::new("second", vec![Ok(media("second"))]);
        let resolver = resolver(vec![first, second.clone()], retry(3, 1));

        let media = resolver.resolve(VIDEO_URL).await.unwrap();
        assert_eq!(media.author.nickname, "first");
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn test_last_provider_error_is_surfaced() {
        let blocked =
            ScriptedProvider::new("blocked", vec![Err(FetchError::Blocked("HTTP 403".into()))]);
        let broken =
            ScriptedProvider::new("broken", vec![Err(FetchError::Upstream("HTTP 502".into()))]);
        let resolver = resolver(vec![blocked, broken], retry(3, 1));

        let result = resolver.resolve(VIDEO_URL).await;
        assert_eq!(result, Err(FetchError::Upstream("HTTP 502".into())));
    }

    #[tokio::test]
    async fn test_slow_provider_times_out_and_is_retried() {
        let slow = ScriptedProvider::slow("slow", Duration::from_millis(200));
        let resolver = Resolver::new(
            reqwest::Client::new(),
            vec![slow.clone()],
            retry(2, 1),
            Duration::from_millis(20),
            "test-agent".to_string(),
        );

        let result = resolver.resolve(VIDEO_URL).await;
        assert!(matches!(result, Err(FetchError::Timeout(_))));
        assert_eq!(slow.calls(), 2);
    }

    #[tokio::test]
    async fn test_without_providers() {
        let resolver = resolver(Vec::new(), retry(3, 1));
        assert!(matches!(
            resolver.resolve(VIDEO_URL).await,
            Err(FetchError::Upstream(_))
        ));
    }

    #[tokio::test]
    async fn test_short_link_is_resolved_before_providers() {
        let app = Router::new()
            .route(
                "/t/ZTabc/",
                get(|| async { Redirect::temporary("/@user/video/123") }),
            )
            .route("/@user/video/123", get(|| async { StatusCode::OK }));
        let addr = spawn(app).await;
        let short = format!("http://{addr}/t/ZTabc/?tiktok.com");

        let provider = ScriptedProvider::new("p", vec![Ok(media("abc"))]);
        let resolver = resolver(vec![provider.clone()], retry(1, 1));

        resolver.resolve(&short).await.unwrap();
        assert_eq!(
            provider.seen_urls.lock().unwrap().as_slice(),
            [format!("http://{addr}/@user/video/123")]
        );
    }

    #[tokio::test]
    async fn test_unreachable_short_link_keeps_original() {
        let resolver = resolver(Vec::new(), retry(1, 1));
        let original = "http://127.0.0.1:1/t/ZTabc/?tiktok.com";
        assert_eq!(resolver.resolve_short_url(original).await, original);
    }
}
