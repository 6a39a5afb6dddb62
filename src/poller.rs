use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use crate::pipeline::Pipeline;

/// Runs a cycle right away and then once every `interval`.
///
/// Cycles are awaited in place, so two of them never overlap. A cancellation request is only
/// honored between cycles.
pub struct Poller {
    pipeline: Arc<Pipeline>,
    interval: Duration,
}

impl Poller {
    pub fn new(pipeline: Arc<Pipeline>, interval: Duration) -> Self {
        Self { pipeline, interval }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        async move {
            let mut next_poll = pin!(time::sleep(Duration::ZERO));

            loop {
                select! {
                    _ = cancel.cancelled() => {
                        debug!("Received a cancellation signal; exiting");
                        break;
                    }

                    _ = &mut next_poll => {}
                }

                self.pipeline.run_cycle().await;

                debug!("Scheduling the next poll in {}s", self.interval.as_secs());
                next_poll.as_mut().reset(Instant::now() + self.interval);
            }

            Ok(())
        }
        .instrument(info_span!("poller"))
        .await
    }
}
