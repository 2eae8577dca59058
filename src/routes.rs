use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State, rejection::JsonRejection},
    http::{
        HeaderMap, HeaderValue, Method,
        header::{
            CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, REFERER, USER_AGENT,
        },
    },
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    canonical::{CanonicalMedia, CanonicalResult},
    config::{AppConfig, RateLimitPolicy},
    error::{ApiError, FetchError},
    resolver::Resolver,
};

const METADATA_CACHE_CONTROL: &str = "public, max-age=300";
const FALLBACK_FILENAME: &str = "tiktok_video";
const TIKTOK_REFERER: &str = "https://www.tiktok.com/";

#[derive(Clone)]
pub struct AppState {
    resolver: Arc<Resolver>,
    http: reqwest::Client,
    user_agent: String,
    rate_limit: RateLimitPolicy,
}

impl AppState {
    pub fn new(config: &AppConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.upstream_timeout)
            .build()
            .map_err(|error| ApiError::internal(format!("Could not build HTTP client: {error}")))?;

        Ok(Self::with_resolver(
            Resolver::from_config(config, http.clone()),
            http,
            config,
        ))
    }

    pub fn with_resolver(resolver: Resolver, http: reqwest::Client, config: &AppConfig) -> Self {
        Self {
            resolver: Arc::new(resolver),
            http,
            user_agent: config.user_agent.clone(),
            rate_limit: config.rate_limit.clone(),
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }
}

#[derive(Debug, Deserialize)]
struct LookupQuery {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActionQuery {
    action: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupBody {
    url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Info,
    Download,
    Preview,
}

impl Action {
    fn parse(value: Option<&str>) -> Result<Self, ApiError> {
        match value.map(str::trim).filter(|value| !value.is_empty()) {
            None | Some("info") => Ok(Self::Info),
            Some("download") => Ok(Self::Download),
            Some("preview") => Ok(Self::Preview),
            Some(other) => Err(ApiError::bad_request(format!(
                "Unknown action {other:?}. Use download or preview."
            ))),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .expose_headers([CONTENT_DISPOSITION]);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/tik.json", get(lookup_get).post(lookup_post))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn lookup_get(
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
) -> Result<Response, ApiError> {
    let media = lookup(&state, query.url.as_deref()).await?;
    Ok(metadata_response(media))
}

async fn lookup_post(
    State(state): State<AppState>,
    Query(query): Query<ActionQuery>,
    payload: Result<Json<LookupBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) =
        payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let action = Action::parse(query.action.as_deref())?;
    let media = lookup(&state, payload.url.as_deref()).await?;

    match action {
        Action::Info => Ok(metadata_response(media)),
        Action::Download => stream_video(&state, &media, "attachment").await,
        Action::Preview => stream_video(&state, &media, "inline").await,
    }
}

async fn lookup(state: &AppState, url: Option<&str>) -> Result<CanonicalMedia, ApiError> {
    let media = state.resolver.resolve(url.unwrap_or_default()).await?;
    if !media.is_deliverable() {
        warn!("Resolved post has no downloadable media");
        return Err(ApiError::not_deliverable());
    }

    Ok(media)
}

fn metadata_response(media: CanonicalMedia) -> Response {
    let mut response = Json(CanonicalResult::success(media)).into_response();
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static(METADATA_CACHE_CONTROL));
    response
}

async fn stream_video(
    state: &AppState,
    media: &CanonicalMedia,
    disposition: &str,
) -> Result<Response, ApiError> {
    let video_url = media
        .best_video()
        .ok_or_else(|| ApiError::not_found("This post has no video to download."))?;

    info!("Streaming video for {}", media.author.nickname);
    let upstream = state
        .http
        .get(video_url)
        .header(USER_AGENT, &state.user_agent)
        .header(REFERER, TIKTOK_REFERER)
        .send()
        .await
        .map_err(|error| ApiError::from(FetchError::from_reqwest(&error, &state.rate_limit)))?;

    let status = upstream.status();
    if !status.is_success() {
        return Err(ApiError::from(FetchError::classify(
            Some(status.as_u16()),
            &format!("Video host answered HTTP {}", status.as_u16()),
            &state.rate_limit,
        )));
    }

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    if let Some(length) = upstream.content_length() {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    }

    let filename = format!("{}.mp4", sanitize_ascii_filename(&media.author.nickname));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(disposition, &filename))
            .map_err(|_| ApiError::internal("Could not build the download header."))?,
    );

    let body = Body::from_stream(upstream.bytes_stream());
    Ok((headers, body).into_response())
}

fn build_content_disposition(disposition: &str, filename: &str) -> String {
    format!(
        "{disposition}; filename=\"{filename}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || matches!(character, '.' | '-' | '_') {
                character
            } else {
                '_'
            }
        })
        .collect();

    let compact =
        sanitized.trim_matches(|character: char| character == '_' || character == '.');
    if compact.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        compact.to_string()
    }
}
