//! Video platform REST client.
//!
//! - Basic auth with the account credentials
//! - Participant listing follows `meta.next_page_url` paging
//! - Observability (tracing spans, metrics)

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, info_span, Instrument};

use crate::error::{VideoError, VideoResult};
use crate::metrics::record_request;
use crate::provider::SessionProvider;
use crate::token::AccessTokenSigner;

const DEFAULT_BASE_URL: &str = "https://video.twilio.com";

/// Upper bound on pages followed when listing participants.
const MAX_PAGES: usize = 20;

// =============================================================================
// Configuration
// =============================================================================

/// Video API client configuration.
#[derive(Clone)]
pub struct VideoApiConfig {
    /// Account SID (basic auth user, token subject)
    pub account_sid: String,
    /// Account auth token (basic auth password)
    pub auth_token: String,
    /// API key SID (token issuer)
    pub key_sid: String,
    /// API key secret (token signing key)
    pub key_secret: String,
    /// REST base URL
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for VideoApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoApiConfig")
            .field("account_sid", &self.account_sid)
            .field("key_sid", &self.key_sid)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl VideoApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> VideoResult<Self> {
        let timeout_secs: u64 = std::env::var("TWILIO_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            account_sid: required("TWILIO_ACCOUNT_SID")?,
            auth_token: required("TWILIO_ACCOUNT_AUTH_TOKEN")?,
            key_sid: required("TWILIO_KEY_SID")?,
            key_secret: required("TWILIO_KEY_SECRET")?,
            base_url: std::env::var("TWILIO_API_BASE_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: Duration::from_secs(timeout_secs),
            connect_timeout: Duration::from_secs(5),
        })
    }
}

fn required(name: &str) -> VideoResult<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(VideoError::config_error(format!("{} not set", name))),
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ParticipantPage {
    #[serde(default)]
    participants: Vec<serde_json::Value>,
    #[serde(default)]
    meta: Option<PageMeta>,
}

#[derive(Debug, Deserialize)]
struct PageMeta {
    next_page_url: Option<String>,
}

// =============================================================================
// Client
// =============================================================================

/// Video platform REST client.
#[derive(Clone)]
pub struct VideoApiClient {
    http: Client,
    config: VideoApiConfig,
    signer: AccessTokenSigner,
}

impl VideoApiClient {
    /// Create a new client.
    pub fn new(config: VideoApiConfig) -> VideoResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("roomrec-video/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let signer = AccessTokenSigner::new(
            config.account_sid.clone(),
            config.key_sid.clone(),
            config.key_secret.clone(),
        );

        Ok(Self {
            http,
            config,
            signer,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> VideoResult<Self> {
        Self::new(VideoApiConfig::from_env()?)
    }

    fn participants_url(&self, room: &str) -> String {
        format!(
            "{}/v1/Rooms/{}/Participants",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(room)
        )
    }

    async fn fetch_page(&self, url: &str, first_page: bool) -> VideoResult<ParticipantPage> {
        let mut request = self
            .http
            .get(url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token));
        if first_page {
            request = request.query(&[("Status", "connected"), ("PageSize", "50")]);
        }

        let response = request.send().await?;
        let status = response.status();
        match status {
            StatusCode::OK => Ok(response.json().await?),
            _ => Err(Self::handle_error_response(status, url, response).await),
        }
    }

    async fn execute_request<T, F>(&self, operation: &str, room: &str, fut: F) -> VideoResult<T>
    where
        F: std::future::Future<Output = VideoResult<T>>,
    {
        let span = info_span!("video_api_request", operation = %operation, room = %room);

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, latency_ms);

        result
    }

    async fn handle_error_response(
        status: StatusCode,
        url: &str,
        response: reqwest::Response,
    ) -> VideoError {
        let body = response.text().await.unwrap_or_default();
        VideoError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
    }
}

#[async_trait]
impl SessionProvider for VideoApiClient {
    async fn connected_participants(&self, room: &str) -> VideoResult<usize> {
        self.execute_request("list_participants", room, async {
            let mut url = self.participants_url(room);
            let mut count = 0;

            for page_index in 0..MAX_PAGES {
                let page = self.fetch_page(&url, page_index == 0).await?;
                count += page.participants.len();

                match page.meta.and_then(|m| m.next_page_url) {
                    Some(next) if !next.is_empty() => url = next,
                    _ => {
                        debug!("Room {} has {} connected participants", room, count);
                        return Ok(count);
                    }
                }
            }

            Err(VideoError::invalid_response(format!(
                "participant listing for {} exceeded {} pages",
                room, MAX_PAGES
            )))
        })
        .await
    }

    fn mint_access_token(&self, identity: &str, room: &str) -> VideoResult<String> {
        debug!("Creating access token for {} in {}", identity, room);
        self.signer.sign(identity, room)
    }

    async fn disconnect_participant(&self, room: &str, identity: &str) -> VideoResult<()> {
        self.execute_request("disconnect_participant", room, async {
            let url = format!(
                "{}/{}",
                self.participants_url(room),
                urlencoding::encode(identity)
            );

            let response = self
                .http
                .post(&url)
                .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
                .form(&[("Status", "disconnected")])
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                info!("Disconnected {} from {}", identity, room);
                Ok(())
            } else {
                Err(Self::handle_error_response(status, &url, response).await)
            }
        })
        .await
    }
}
