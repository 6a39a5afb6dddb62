use std::time::Duration;

use anyhow::{Context, Result};
use http_cache_reqwest::{Cache, HttpCache, MokaCache, MokaManager};
use reqwest::{StatusCode, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use thiserror::Error;
use tracing::{debug, info, instrument};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);
pub const TOTAL_TIMEOUT: Duration = Duration::from_secs(300);

pub fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

pub fn http_client(user_agent: &str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(READ_TIMEOUT)
        .timeout(TOTAL_TIMEOUT)
        .build()
        .context("could not create an HTTP client")
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("could not fetch `{url}`: {source:#}")]
    Transport {
        url: Url,
        source: reqwest_middleware::Error,
    },

    #[error("`{url}` responded with {status}")]
    Status { url: Url, status: StatusCode },

    #[error("could not read the response when fetching `{url}`: {source}")]
    Body { url: Url, source: reqwest::Error },
}

pub struct FeedFetcher {
    http_client: ClientWithMiddleware,
}

impl FeedFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        debug!("Using an in-memory HTTP cache");
        let http_client = ClientBuilder::new(client)
            .with(Cache(HttpCache {
                mode: Default::default(),
                manager: MokaManager::new(MokaCache::builder().max_capacity(64).build()),
                options: Default::default(),
            }))
            .build();

        Self { http_client }
    }

    #[instrument(level = "DEBUG", skip(self, url), fields(%url))]
    pub async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let response = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();

        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.clone(),
                status,
            });
        }

        let body = response.bytes().await.map_err(|source| FetchError::Body {
            url: url.clone(),
            source,
        })?;
        info!("Retrieved {} bytes", body.len());

        Ok(body.to_vec())
    }
}
