use time::{Duration, OffsetDateTime};

use crate::feed::FeedItem;

/// An item is eligible if it was published no earlier than `window` before `now`.
///
/// Items without a valid publication date are never eligible.
pub fn is_eligible(item: &FeedItem, now: OffsetDateTime, window: Duration) -> bool {
    item.published_at
        .is_some_and(|published_at| published_at >= now - window)
}
