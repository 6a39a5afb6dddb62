//! Best-effort conversion of feed item descriptions into plain text.
//!
//! This is not an HTML parser. The input goes through a fixed sequence of
//! substitution passes:
//!
//! 1. character entities are decoded;
//! 2. `<p>`, `<div>` and `<br>` become line breaks;
//! 3. `<a href="url">text</a>` becomes `text (url)`;
//! 4. `<img src="url" alt="text">` becomes `[text] (url)`, or just `[text]` without a `src`;
//! 5. every other tag is dropped, keeping its text.
//!
//! Malformed markup is never an error: whatever a pass doesn't recognize is left for the next
//! one, and a stray `<` that doesn't start a tag survives as-is.

use std::borrow::Cow;

use html_escape::decode_html_entities;
use regex_lite::{Captures, Regex};

pub fn normalize(html: &str) -> String {
    let text = decode_html_entities(html);
    let text = convert_block_separators(&text);
    let text = convert_links(&text);
    let text = convert_images(&text);
    let text = strip_tags(&text);

    collapse_blank_lines(&text).trim().to_owned()
}

fn convert_block_separators(text: &str) -> String {
    let line_breaks = regex!(r"(?i)<br\s*/?\s*>");
    let blocks = regex!(r"(?i)</?(?:p|div)(?:\s[^>]*)?>");

    let text = line_breaks.replace_all(text, "\n");

    blocks.replace_all(&text, "\n\n").into_owned()
}

fn convert_links(text: &str) -> String {
    let links = regex!(
        r#"(?is)<a\s(?:[^>]*?\s)?href\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))[^>]*>(.*?)</a\s*>"#
    );

    links
        .replace_all(text, |caps: &Captures<'_>| {
            let url = quoted_value(caps, 1).unwrap_or_default().trim();
            let label = caps.get(4).map_or("", |m| m.as_str()).trim();

            if label.is_empty() || label == url {
                url.to_owned()
            } else if url.is_empty() {
                label.to_owned()
            } else {
                format!("{label} ({url})")
            }
        })
        .into_owned()
}

fn convert_images(text: &str) -> String {
    let images = regex!(r"(?is)<img(?:\s[^>]*)?>");
    let src = regex!(r#"(?is)(?:^|\s)src\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>/]+))"#);
    let alt = regex!(r#"(?is)(?:^|\s)alt\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>/]+))"#);

    images
        .replace_all(text, |caps: &Captures<'_>| {
            let tag = &caps[0];
            let label = attribute(alt, tag)
                .filter(|alt| !alt.is_empty())
                .unwrap_or("Image");

            match attribute(src, tag).filter(|url| !url.is_empty()) {
                Some(url) => format!("[{label}] ({url})"),
                None => format!("[{label}]"),
            }
        })
        .into_owned()
}

fn strip_tags(text: &str) -> Cow<'_, str> {
    let tags = regex!(r"(?s)<[A-Za-z/!?][^>]*>");

    tags.replace_all(text, "")
}

fn collapse_blank_lines(text: &str) -> String {
    let padded_newlines = regex!(r"[ \t\r]*\n[ \t\r]*");
    let blank_lines = regex!(r"\n{3,}");

    let text = padded_newlines.replace_all(text, "\n");

    blank_lines.replace_all(&text, "\n\n").into_owned()
}

/// Returns the first matched group among the three alternatives of a quoted attribute value.
fn quoted_value<'h>(caps: &Captures<'h>, first: usize) -> Option<&'h str> {
    (first..first + 3).find_map(|idx| caps.get(idx).map(|m| m.as_str()))
}

fn attribute<'h>(re: &Regex, tag: &'h str) -> Option<&'h str> {
    re.captures(tag)
        .and_then(|caps| quoted_value(&caps, 1))
        .map(str::trim)
}
