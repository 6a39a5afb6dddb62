use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::fetch::{default_user_agent, http_client, FeedFetcher};
use crate::ledger::Ledger;
use crate::pipeline::{Limits, Pipeline};
use crate::publish::MastodonPublisher;
use crate::storage::Storage;

#[derive(Clone)]
pub struct State {
    pub cfg: Arc<Config>,
    pub pipeline: Arc<Pipeline>,
}

impl State {
    pub async fn new(cfg: Config) -> Result<Self> {
        // validate everything before touching the network.
        let feed_url = cfg.feed_url().context("invalid configuration")?;
        let instance_url = cfg.instance_url().context("invalid configuration")?;
        let access_token = cfg.access_token().context("invalid configuration")?.to_owned();
        let limits = Limits {
            recency_window: std::time::Duration::from(cfg.recency_window)
                .try_into()
                .context("the recency window is too large")?,
            max_post_length: cfg.max_post_length,
        };

        let user_agent = cfg.user_agent.clone().unwrap_or_else(default_user_agent);
        let http_client = http_client(&user_agent)?;
        let storage = Arc::new(Storage::new(&cfg.db_path).await?);

        let pipeline = Arc::new(Pipeline::new(
            feed_url,
            limits,
            FeedFetcher::new(http_client.clone()),
            Ledger::new(storage),
            Arc::new(MastodonPublisher::new(
                http_client,
                instance_url,
                access_token,
            )),
        ));

        Ok(State {
            cfg: Arc::new(cfg),
            pipeline,
        })
    }
}
