//! Feed parsing by structural pattern matching.
//!
//! Real feeds are frequently not valid XML, so instead of a schema-validating parser this module
//! locates `<item>` (RSS) or `<entry>` (Atom) blocks and pulls the fields it needs out of each
//! one. Only a document without any recognizable feed root, or with an item that is never
//! closed, is rejected.

use std::str;

use html_escape::decode_html_entities;
use regex_lite::{Captures, Regex};
use thiserror::Error;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::{OffsetDateTime, UtcOffset};
use tracing::{debug, trace};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("the feed is not valid UTF-8: {0}")]
    Encoding(String),

    #[error("no <rss>, <channel> or <feed> element found")]
    NoFeedRoot,

    #[error("{kind} #{idx} is never closed")]
    UnterminatedItem { kind: &'static str, idx: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub link: String,
    pub title: String,

    /// `None` if the date was missing or could not be parsed.
    pub published_at: Option<OffsetDateTime>,

    /// Description markup as the feed author wrote it, i.e. with the XML escaping undone.
    pub raw_description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Rss,
    Atom,
}

impl Format {
    fn detect(doc: &str) -> Option<Self> {
        if regex!(r"(?i)<(?:rss|channel)[\s>]").is_match(doc) {
            Some(Self::Rss)
        } else if regex!(r"(?i)<feed[\s>]").is_match(doc) {
            Some(Self::Atom)
        } else {
            None
        }
    }

    fn item_kind(self) -> &'static str {
        match self {
            Self::Rss => "item",
            Self::Atom => "entry",
        }
    }

    fn item_openings(self) -> &'static Regex {
        match self {
            Self::Rss => regex!(r"(?i)<item[\s>]"),
            Self::Atom => regex!(r"(?i)<entry[\s>]"),
        }
    }

    fn item_blocks(self) -> &'static Regex {
        match self {
            Self::Rss => regex!(r"(?is)<item(?:\s[^>]*)?>(.*?)</item\s*>"),
            Self::Atom => regex!(r"(?is)<entry(?:\s[^>]*)?>(.*?)</entry\s*>"),
        }
    }
}

pub fn parse(raw: &[u8]) -> Result<Vec<FeedItem>, ParseError> {
    let doc = str::from_utf8(raw).map_err(|e| ParseError::Encoding(e.to_string()))?;
    let structure = blank_out_quoted(doc);
    let format = Format::detect(&structure).ok_or(ParseError::NoFeedRoot)?;
    trace!(?format, "Detected the feed format");

    let mut items = vec![];

    for (idx, block) in format.item_blocks().captures_iter(&structure).enumerate() {
        // offsets are shared with `doc`, which still has the CDATA contents.
        let body = block.get(1).map_or("", |m| &doc[m.range()]);

        let item = match format {
            Format::Rss => parse_rss_item(body),
            Format::Atom => parse_atom_entry(body),
        };

        if item.published_at.is_none() {
            debug!(link = %item.link, "Item #{} has no valid publication date", idx + 1);
        }

        items.push(item);
    }

    let opened = format.item_openings().find_iter(&structure).count();

    if opened > items.len() {
        return Err(ParseError::UnterminatedItem {
            kind: format.item_kind(),
            idx: items.len() + 1,
        });
    }

    Ok(items)
}

/// Replaces CDATA sections and comments with spaces of the same byte length, so that markup
/// quoted inside them is not mistaken for structure.
fn blank_out_quoted(doc: &str) -> String {
    regex!(r"(?s)<!\[CDATA\[.*?\]\]>|<!--.*?-->")
        .replace_all(doc, |caps: &Captures<'_>| " ".repeat(caps[0].len()))
        .into_owned()
}

fn parse_rss_item(body: &str) -> FeedItem {
    let description =
        element_text(body, "description").or_else(|| element_text(body, "content:encoded"));
    let pub_date = element_text(body, "pubDate").or_else(|| element_text(body, "dc:date"));

    FeedItem {
        link: xml_text(element_text(body, "link")),
        title: xml_text(element_text(body, "title")),
        published_at: parse_date(&xml_text(pub_date)),
        raw_description: xml_text(description),
    }
}

fn parse_atom_entry(body: &str) -> FeedItem {
    let description = element_text(body, "summary").or_else(|| element_text(body, "content"));
    let pub_date = element_text(body, "published").or_else(|| element_text(body, "updated"));

    FeedItem {
        link: xml_text(atom_link(body)),
        title: xml_text(element_text(body, "title")),
        published_at: parse_date(&xml_text(pub_date)),
        raw_description: xml_text(description),
    }
}

/// Finds the text of the first `<name>` element in `body`.
fn element_text<'b>(body: &'b str, name: &str) -> Option<&'b str> {
    let name = regex_lite::escape(name);
    // names are a fixed handful, so compiling on the fly is fine.
    let re = Regex::new(&format!(r"(?is)<{name}(?:\s[^>]*)?>(.*?)</{name}\s*>")).ok()?;

    Some(re.captures(body)?.get(1)?.as_str())
}

fn atom_link(body: &str) -> Option<&str> {
    let links = regex!(r"(?is)<link\s[^>]*>");
    let rel = regex!(r#"(?is)\srel\s*=\s*["']([^"']*)["']"#);
    let href = regex!(r#"(?is)\shref\s*=\s*["']([^"']*)["']"#);

    let mut fallback = None;

    for tag in links.find_iter(body).map(|m| m.as_str()) {
        let Some(url) = href.captures(tag).and_then(|caps| caps.get(1)) else {
            continue;
        };

        match rel.captures(tag).and_then(|caps| caps.get(1)).map(|m| m.as_str()) {
            None | Some("alternate") => return Some(url.as_str()),
            Some(_) => {
                fallback.get_or_insert(url.as_str());
            }
        }
    }

    fallback
}

/// Turns XML character data into text: CDATA sections are taken verbatim, everything else is
/// entity-decoded.
fn xml_text(text: Option<&str>) -> String {
    let cdata = regex!(r"(?s)<!\[CDATA\[(.*?)\]\]>");
    let Some(text) = text else {
        return String::new();
    };

    let mut result = String::with_capacity(text.len());
    let mut last = 0;

    for caps in cdata.captures_iter(text) {
        let (Some(section), Some(contents)) = (caps.get(0), caps.get(1)) else {
            continue;
        };

        result.push_str(&decode_html_entities(&text[last..section.start()]));
        result.push_str(contents.as_str());
        last = section.end();
    }

    result.push_str(&decode_html_entities(&text[last..]));

    result.trim().to_owned()
}

/// Parses RFC 2822 (RSS) and RFC 3339 (Atom, Dublin Core) dates into UTC.
pub fn parse_date(s: &str) -> Option<OffsetDateTime> {
    let s = s.trim();

    OffsetDateTime::parse(s, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(s, &Rfc3339))
        .map(|date| date.to_offset(UtcOffset::UTC))
        .ok()
}
