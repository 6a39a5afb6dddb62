//! Remembers the last published link so that a post is not repeated on the next cycle.
//!
//! Only the single most recent link is kept. If a cycle publishes several items, the earlier
//! ones are forgotten as soon as the next one is recorded.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, trace, warn};

pub const LAST_PUBLISHED_LINK: &str = "last_published_link";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// A persistent key-value namespace.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn KvStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Reports whether `link` is the last published one.
    ///
    /// A store failure counts as "not published": a possible duplicate is preferable to silently
    /// dropping everything.
    pub async fn already_published(&self, link: &str) -> bool {
        match self.store.get(LAST_PUBLISHED_LINK).await {
            Ok(last) => {
                trace!(?last, "Read the last published link");

                last.as_deref() == Some(link)
            }

            Err(e) => {
                warn!("Could not read the last published link, assuming `{link}` is new: {e:#}");

                false
            }
        }
    }

    /// Records `link` as the last published one. Failures are logged and otherwise ignored.
    pub async fn record_published(&self, link: &str) {
        if let Err(e) = self.store.put(LAST_PUBLISHED_LINK, link).await {
            error!("Could not record `{link}` as the last published link: {e:#}");
        }
    }
}
