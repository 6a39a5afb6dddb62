use crate::feed::FeedItem;
use crate::normalize::normalize;

const ELLIPSIS: char = '…';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedPost {
    pub body: String,
}

/// Builds a post out of the item's description followed by a provenance line with its link.
///
/// The body never exceeds `max_len` characters unless the provenance line alone does: when it's
/// too long, the description gets cut short and ends with an ellipsis.
pub fn compose(item: &FeedItem, max_len: usize) -> ComposedPost {
    let text = normalize(&item.raw_description);
    let provenance = item.link.trim();

    if text.is_empty() {
        return ComposedPost {
            body: provenance.to_owned(),
        };
    }

    let separator = "\n\n";
    let reserved = separator.chars().count() + provenance.chars().count();
    let text = truncate(&text, max_len.saturating_sub(reserved));

    if text.is_empty() {
        return ComposedPost {
            body: provenance.to_owned(),
        };
    }

    ComposedPost {
        body: format!("{text}{separator}{provenance}"),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }

    if max_chars <= 1 {
        return String::new();
    }

    let mut result = text
        .chars()
        .take(max_chars - 1)
        .collect::<String>()
        .trim_end()
        .to_owned();
    result.push(ELLIPSIS);

    result
}
