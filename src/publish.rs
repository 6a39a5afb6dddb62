use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

const IDEMPOTENCY_KEY: &str = "Idempotency-Key";

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("could not build the status endpoint URL from `{base}`: {reason}")]
    Endpoint { base: Url, reason: String },

    #[error("could not send the status: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("the instance rejected the status with {status}: {payload}")]
    Rejected { status: StatusCode, payload: String },
}

#[derive(Serialize, Debug, Clone)]
struct NewStatus<'a> {
    status: &'a str,
    visibility: &'static str,
}

/// The status created by the instance.
///
/// Compatible servers do not always echo the status back, so both fields are optional.
#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishResult {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub url: Option<String>,
}

#[async_trait]
pub trait Publish: Send + Sync {
    /// Publishes `body` as a public status.
    ///
    /// `dedup_key` identifies the article; repeated calls with the same key are collapsed by the
    /// instance for a while.
    async fn publish(&self, body: &str, dedup_key: &str) -> Result<PublishResult, PublishError>;
}

pub struct MastodonPublisher {
    http_client: reqwest::Client,
    instance_url: Url,
    access_token: String,
}

impl MastodonPublisher {
    pub fn new(http_client: reqwest::Client, instance_url: Url, access_token: String) -> Self {
        Self {
            http_client,
            instance_url,
            access_token,
        }
    }

    fn endpoint(&self) -> Result<Url, PublishError> {
        // keep any path prefix the instance is hosted under.
        let mut base = self.instance_url.clone();

        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }

        base.join("api/v1/statuses")
            .map_err(|e| PublishError::Endpoint {
                base: self.instance_url.clone(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Publish for MastodonPublisher {
    #[instrument(level = "DEBUG", skip(self, body))]
    async fn publish(&self, body: &str, dedup_key: &str) -> Result<PublishResult, PublishError> {
        let endpoint = self.endpoint()?;
        debug!(%endpoint, chars = body.chars().count(), "Posting a status");

        let mut request = self
            .http_client
            .post(endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
            .json(&NewStatus {
                status: body,
                visibility: "public",
            });

        if let Ok(key) = HeaderValue::from_str(&urlencoding::encode(dedup_key)) {
            request = request.header(IDEMPOTENCY_KEY, key);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let payload = response.text().await.unwrap_or_default();

            return Err(PublishError::Rejected { status, payload });
        }

        // the status exists at this point whatever the body looks like.
        let result = match response.json::<PublishResult>().await {
            Ok(result) => result,

            Err(e) => {
                warn!("The instance accepted the status with {status} but its response could not be read: {e}");

                PublishResult::default()
            }
        };
        info!(id = ?result.id, url = ?result.url, "Published a status");

        Ok(result)
    }
}
