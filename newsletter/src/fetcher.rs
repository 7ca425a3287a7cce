use crate::config::RedditCredentials;
use crate::sources::reddit_model::{CommentThing, Listing, RawSubmission, SubmissionThing};
use crate::traits::SubmissionSource;
use crate::types::{NewsletterError, Result};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

const AUTH_BASE_URL: &str = "https://www.reddit.com";
const API_BASE_URL: &str = "https://oauth.reddit.com";
/// Refresh the token this long before Reddit says it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub min_request_interval: Duration,
    /// Comments requested per submission.
    pub comment_limit: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            min_request_interval: Duration::from_secs(1),
            comment_limit: 50,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Reddit API client authenticated as a "script" application.
pub struct RedditClient {
    client: Client,
    credentials: RedditCredentials,
    config: FetchConfig,
    auth_base: String,
    api_base: String,
    token: Arc<RwLock<Option<CachedToken>>>,
    rate_limiter: Arc<RwLock<HashMap<String, Instant>>>,
}

impl RedditClient {
    pub fn new(credentials: RedditCredentials, config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&credentials.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            credentials,
            config,
            auth_base: AUTH_BASE_URL.to_string(),
            api_base: API_BASE_URL.to_string(),
            token: Arc::new(RwLock::new(None)),
            rate_limiter: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Point the client at other hosts, e.g. a local mock server.
    pub fn with_base_urls(mut self, auth_base: impl Into<String>, api_base: impl Into<String>) -> Self {
        self.auth_base = auth_base.into().trim_end_matches('/').to_string();
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    async fn access_token(&self) -> Result<String> {
        {
            let token = self.token.read().await;
            if let Some(cached) = token.as_ref() {
                if Instant::now() < cached.expires_at {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let mut token = self.token.write().await;
        if let Some(cached) = token.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        debug!("Requesting Reddit access token for {}", self.credentials.username);
        let response = self
            .client
            .post(format!("{}/api/v1/access_token", self.auth_base))
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NewsletterError::Source(format!(
                "Reddit token request failed with HTTP {}",
                status
            )));
        }

        let body: TokenResponse = response.json().await?;
        let access_token = match (body.access_token, body.error) {
            (Some(access_token), _) => access_token,
            (None, error) => {
                return Err(NewsletterError::Source(format!(
                    "Reddit rejected the credentials: {}",
                    error.unwrap_or_else(|| "no access token returned".to_string())
                )))
            }
        };

        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *token = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        info!("Obtained Reddit access token (valid {:?})", lifetime);
        Ok(access_token)
    }

    async fn invalidate_token(&self) {
        self.token.write().await.take();
    }

    fn backoff(&self) -> ExponentialBackoff<backoff::SystemClock> {
        let delay = self.config.retry_delay;
        ExponentialBackoff {
            current_interval: delay,
            initial_interval: delay,
            max_interval: delay * 32,
            multiplier: 2.0,
            max_elapsed_time: Some(delay * 60),
            ..Default::default()
        }
    }

    /// GET an API path, retrying transport failures, 429 and 5xx responses.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let mut backoff = self.backoff();

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit(&url).await;
            let token = self.access_token().await?;

            let last_error = match self.client.get(url.clone()).bearer_auth(&token).send().await {
                Ok(response) if response.status().is_success() => {
                    return Ok(response.json::<T>().await?);
                }
                Ok(response) => {
                    let status = response.status();
                    let error = NewsletterError::Source(format!("HTTP {} from {}", status, url));
                    if status == StatusCode::UNAUTHORIZED {
                        self.invalidate_token().await;
                    } else if !(status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS) {
                        return Err(error);
                    }
                    error
                }
                Err(e) => NewsletterError::Http(e),
            };

            if attempt == self.config.max_retries {
                error!(
                    "Failed to fetch {} after {} attempts: {}",
                    url,
                    self.config.max_retries + 1,
                    last_error
                );
                return Err(last_error);
            }
            match backoff.next_backoff() {
                Some(delay) => {
                    warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                    tokio::time::sleep(delay).await;
                }
                None => return Err(last_error),
            }
        }

        Err(NewsletterError::Source(format!("no attempt made for {}", url)))
    }

    async fn apply_rate_limit(&self, url: &Url) {
        let host = url.host_str().unwrap_or("").to_string();
        let min_interval = self.config.min_request_interval;

        let mut rate_limiter = self.rate_limiter.write().await;
        if let Some(last_request) = rate_limiter.get(&host) {
            let elapsed = last_request.elapsed();
            if elapsed < min_interval {
                let wait_time = min_interval - elapsed;
                debug!("Rate limiting {}: waiting {:?}", host, wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }
        rate_limiter.insert(host, Instant::now());
    }

    async fn comments(&self, submission_id: &str) -> Result<Vec<CommentThing>> {
        let mut url = Url::parse(&format!("{}/comments/{}", self.api_base, submission_id))?;
        url.query_pairs_mut()
            .append_pair("limit", &self.config.comment_limit.to_string())
            .append_pair("sort", "top")
            .append_pair("raw_json", "1");

        let (_, comments): (Listing<SubmissionThing>, Listing<CommentThing>) = self.get_json(url).await?;
        Ok(comments.data.children)
    }
}

#[async_trait]
impl SubmissionSource for RedditClient {
    fn source_name(&self) -> String {
        "Reddit API".to_string()
    }

    async fn hot(&self, community: &str, limit: usize) -> Result<Vec<RawSubmission>> {
        let mut url = Url::parse(&format!("{}/r/{}/hot", self.api_base, community))?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("raw_json", "1");

        let listing: Listing<SubmissionThing> = self.get_json(url).await?;
        let mut submissions: Vec<RawSubmission> = listing
            .data
            .children
            .into_iter()
            .map(|thing| thing.data)
            .take(limit)
            .collect();
        debug!("r/{} returned {} hot submissions", community, submissions.len());

        for submission in submissions.iter_mut() {
            match self.comments(&submission.id).await {
                Ok(comments) => submission.comments = comments,
                Err(e) => warn!(
                    submission = %submission.id,
                    "Failed to fetch comments, continuing without them: {}", e
                ),
            }
        }

        Ok(submissions)
    }
}
