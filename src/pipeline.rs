//! One polling cycle: fetch, parse, and publish whatever is new.
//!
//! A failure to fetch or parse the feed aborts the cycle. Anything that goes wrong with a single
//! item only affects that item; the rest of the feed is still processed.

use std::sync::Arc;

use reqwest::Url;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, error, info, info_span, Instrument};

use crate::compose::compose;
use crate::feed::{self, FeedItem, ParseError};
use crate::fetch::{FeedFetcher, FetchError};
use crate::ledger::Ledger;
use crate::publish::{Publish, PublishError, PublishResult};
use crate::recency;

#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("could not parse the feed: {0}")]
    Parse(#[from] ParseError),
}

#[derive(Error, Debug)]
pub enum ItemError {
    #[error("the item has no link")]
    MissingLink,

    #[error("could not publish the item: {0}")]
    Publish(#[from] PublishError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Published(PublishResult),
    NotRecent,
    AlreadyPublished,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub items: usize,
    pub published: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub recency_window: Duration,
    pub max_post_length: usize,
}

pub struct Pipeline {
    feed_url: Url,
    limits: Limits,
    fetcher: FeedFetcher,
    ledger: Ledger,
    publisher: Arc<dyn Publish>,
}

impl Pipeline {
    pub fn new(
        feed_url: Url,
        limits: Limits,
        fetcher: FeedFetcher,
        ledger: Ledger,
        publisher: Arc<dyn Publish>,
    ) -> Self {
        Self {
            feed_url,
            limits,
            fetcher,
            ledger,
            publisher,
        }
    }

    /// Runs a cycle, logging instead of returning any errors.
    pub async fn run_cycle(&self) {
        let now = OffsetDateTime::now_utc();

        async {
            match self.try_cycle(now).await {
                Ok(stats) => info!(
                    "Finished the cycle: {} items, {} published, {} skipped, {} failed",
                    stats.items, stats.published, stats.skipped, stats.failed,
                ),

                Err(e) => error!("The cycle was aborted: {e:#}"),
            }
        }
        .instrument(info_span!("cycle", feed_url = %self.feed_url))
        .await
    }

    pub async fn try_cycle(&self, now: OffsetDateTime) -> Result<CycleStats, CycleError> {
        let raw = self.fetcher.fetch(&self.feed_url).await?;
        let items = feed::parse(&raw)?;

        let mut stats = CycleStats {
            items: items.len(),
            ..Default::default()
        };

        if items.is_empty() {
            info!("The feed has no items");

            return Ok(stats);
        }

        for (idx, item) in items.iter().enumerate() {
            let span = info_span!("item", idx = idx + 1, link = %item.link);

            match self.process_item(item, now).instrument(span.clone()).await {
                Ok(ItemOutcome::Published(_)) => stats.published += 1,
                Ok(ItemOutcome::NotRecent | ItemOutcome::AlreadyPublished) => stats.skipped += 1,

                Err(e) => {
                    stats.failed += 1;
                    span.in_scope(|| error!("Abandoning the item: {e:#}"));
                }
            }
        }

        Ok(stats)
    }

    async fn process_item(
        &self,
        item: &FeedItem,
        now: OffsetDateTime,
    ) -> Result<ItemOutcome, ItemError> {
        if !recency::is_eligible(item, now, self.limits.recency_window) {
            debug!(published_at = ?item.published_at, "Skipping: not recent");

            return Ok(ItemOutcome::NotRecent);
        }

        if item.link.is_empty() {
            return Err(ItemError::MissingLink);
        }

        if self.ledger.already_published(&item.link).await {
            info!("Skipping: already published");

            return Ok(ItemOutcome::AlreadyPublished);
        }

        let post = compose(item, self.limits.max_post_length);
        debug!(title = %item.title, "Publishing");
        let result = self.publisher.publish(&post.body, &item.link).await?;
        self.ledger.record_published(&item.link).await;

        Ok(ItemOutcome::Published(result))
    }
}

#[cfg(test)]
mod tests {
    use rss::{ChannelBuilder, ItemBuilder};
    use time::format_description::well_known::Rfc2822;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::fetch::{default_user_agent, http_client};
    use crate::ledger::testing::MemoryStore;
    use crate::publish::testing::RecordingPublisher;
    use crate::publish::MastodonPublisher;

    struct Harness {
        server: MockServer,
        store: Arc<MemoryStore>,
        publisher: Arc<RecordingPublisher>,
        pipeline: Pipeline,
    }

    async fn harness(store: MemoryStore, publisher: RecordingPublisher) -> Harness {
        let server = MockServer::start().await;
        let store = Arc::new(store);
        let publisher = Arc::new(publisher);
        let feed_url = Url::parse(&format!("{}/feed.xml", server.uri())).unwrap();

        let pipeline = Pipeline::new(
            feed_url,
            Limits {
                recency_window: Duration::minutes(30),
                max_post_length: 500,
            },
            FeedFetcher::new(http_client(&default_user_agent()).unwrap()),
            Ledger::new(store.clone()),
            publisher.clone(),
        );

        Harness {
            server,
            store,
            publisher,
            pipeline,
        }
    }

    fn feed(now: OffsetDateTime, items: &[(&str, Option<Duration>)]) -> String {
        let items = items
            .iter()
            .map(|&(link, age)| {
                ItemBuilder::default()
                    .link(Some(link.to_owned()))
                    .description(Some(format!("<p>About {link}</p>")))
                    .pub_date(age.map(|age| (now - age).format(&Rfc2822).unwrap()))
                    .build()
            })
            .collect::<Vec<_>>();

        ChannelBuilder::default()
            .title("Blog")
            .link("https://blog.test")
            .items(items)
            .build()
            .to_string()
    }

    async fn serve(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn publishes_only_recent_items() {
        let now = OffsetDateTime::now_utc();
        let h = harness(MemoryStore::default(), RecordingPublisher::default()).await;
        let body = feed(
            now,
            &[("A", Some(Duration::minutes(5))), ("B", Some(Duration::hours(2)))],
        );
        serve(&h.server, ResponseTemplate::new(200).set_body_string(body)).await;

        let stats = h.pipeline.try_cycle(now).await.unwrap();

        assert_eq!(h.publisher.published_keys(), ["A"]);
        assert_eq!(h.publisher.calls.lock().unwrap()[0].0, "About A\n\nA");
        assert_eq!(h.store.last_published().as_deref(), Some("A"));
        assert_eq!(
            stats,
            CycleStats {
                items: 2,
                published: 1,
                skipped: 1,
                failed: 0,
            }
        );
    }

    #[tokio::test]
    async fn fetch_failure_aborts_the_cycle() {
        let now = OffsetDateTime::now_utc();
        let h = harness(
            MemoryStore::with_last_published("L0"),
            RecordingPublisher::default(),
        )
        .await;
        serve(&h.server, ResponseTemplate::new(500)).await;

        assert!(matches!(
            h.pipeline.try_cycle(now).await,
            Err(CycleError::Fetch(FetchError::Status { .. }))
        ));

        // the top-level entry point only logs.
        h.pipeline.run_cycle().await;

        assert!(h.publisher.published_keys().is_empty());
        assert_eq!(h.store.last_published().as_deref(), Some("L0"));
    }

    #[tokio::test]
    async fn parse_failure_aborts_the_cycle() {
        let now = OffsetDateTime::now_utc();
        let h = harness(MemoryStore::default(), RecordingPublisher::default()).await;
        serve(
            &h.server,
            ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"),
        )
        .await;

        assert!(matches!(
            h.pipeline.try_cycle(now).await,
            Err(CycleError::Parse(ParseError::NoFeedRoot))
        ));
        assert!(h.publisher.published_keys().is_empty());
        assert_eq!(h.store.last_published(), None);
    }

    #[tokio::test]
    async fn empty_feed_is_a_no_op() {
        let now = OffsetDateTime::now_utc();
        let h = harness(MemoryStore::default(), RecordingPublisher::default()).await;
        serve(&h.server, ResponseTemplate::new(200).set_body_string(feed(now, &[]))).await;

        let stats = h.pipeline.try_cycle(now).await.unwrap();

        assert_eq!(stats, CycleStats::default());
        assert!(h.publisher.published_keys().is_empty());
    }

    #[tokio::test]
    async fn last_published_link_is_not_republished() {
        let now = OffsetDateTime::now_utc();
        let h = harness(
            MemoryStore::with_last_published("L1"),
            RecordingPublisher::default(),
        )
        .await;
        let body = feed(
            now,
            &[("L1", Some(Duration::minutes(1))), ("L2", Some(Duration::minutes(2)))],
        );
        serve(&h.server, ResponseTemplate::new(200).set_body_string(body)).await;

        h.pipeline.try_cycle(now).await.unwrap();

        assert_eq!(h.publisher.published_keys(), ["L2"]);
        assert_eq!(h.store.last_published().as_deref(), Some("L2"));
    }

    #[tokio::test]
    async fn second_cycle_does_not_repost() {
        let now = OffsetDateTime::now_utc();
        let h = harness(MemoryStore::default(), RecordingPublisher::default()).await;
        let body = feed(now, &[("A", Some(Duration::minutes(5)))]);
        serve(&h.server, ResponseTemplate::new(200).set_body_string(body)).await;

        h.pipeline.try_cycle(now).await.unwrap();
        h.pipeline.try_cycle(now + Duration::minutes(1)).await.unwrap();

        assert_eq!(h.publisher.published_keys(), ["A"]);
    }

    #[tokio::test]
    async fn failing_item_does_not_block_the_rest() {
        let now = OffsetDateTime::now_utc();
        let h = harness(MemoryStore::default(), RecordingPublisher::failing_for("A")).await;
        let body = feed(
            now,
            &[("A", Some(Duration::minutes(5))), ("B", Some(Duration::minutes(10)))],
        );
        serve(&h.server, ResponseTemplate::new(200).set_body_string(body)).await;

        let stats = h.pipeline.try_cycle(now).await.unwrap();

        assert_eq!(h.publisher.published_keys(), ["A", "B"]);
        assert_eq!(h.store.last_published().as_deref(), Some("B"));
        assert_eq!(stats.published, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn undated_items_are_never_published() {
        let now = OffsetDateTime::now_utc();
        let h = harness(MemoryStore::default(), RecordingPublisher::default()).await;
        serve(
            &h.server,
            ResponseTemplate::new(200).set_body_string(feed(now, &[("A", None)])),
        )
        .await;

        let stats = h.pipeline.try_cycle(now).await.unwrap();

        assert!(h.publisher.published_keys().is_empty());
        assert_eq!(stats.skipped, 1);
    }

    #[tokio::test]
    async fn ledger_read_failure_still_publishes() {
        let now = OffsetDateTime::now_utc();
        let store = MemoryStore::with_last_published("A");
        store
            .fail_reads
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let h = harness(store, RecordingPublisher::default()).await;
        let body = feed(now, &[("A", Some(Duration::minutes(5)))]);
        serve(&h.server, ResponseTemplate::new(200).set_body_string(body)).await;

        h.pipeline.try_cycle(now).await.unwrap();

        assert_eq!(h.publisher.published_keys(), ["A"]);
    }

    #[tokio::test]
    async fn item_without_a_link_is_abandoned() {
        let now = OffsetDateTime::now_utc();
        let h = harness(MemoryStore::default(), RecordingPublisher::default()).await;
        let body = feed(
            now,
            &[("", Some(Duration::minutes(5))), ("B", Some(Duration::minutes(6)))],
        );
        serve(&h.server, ResponseTemplate::new(200).set_body_string(body)).await;

        let stats = h.pipeline.try_cycle(now).await.unwrap();

        assert_eq!(h.publisher.published_keys(), ["B"]);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn accepted_status_is_recorded_even_without_a_body() {
        let now = OffsetDateTime::now_utc();
        let server = MockServer::start().await;
        serve(
            &server,
            ResponseTemplate::new(200)
                .set_body_string(feed(now, &[("A", Some(Duration::minutes(5)))])),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/statuses"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = http_client(&default_user_agent()).unwrap();
        let store = Arc::new(MemoryStore::default());
        let pipeline = Pipeline::new(
            Url::parse(&format!("{}/feed.xml", server.uri())).unwrap(),
            Limits {
                recency_window: Duration::minutes(30),
                max_post_length: 500,
            },
            FeedFetcher::new(client.clone()),
            Ledger::new(store.clone()),
            Arc::new(MastodonPublisher::new(
                client,
                Url::parse(&server.uri()).unwrap(),
                "s3cret".into(),
            )),
        );

        let stats = pipeline.try_cycle(now).await.unwrap();

        assert_eq!(stats.published, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(store.last_published().as_deref(), Some("A"));
    }
}
