//! Tiny HTML helpers shared by the title scraper and the relay host.
//!
//! `scraper::Html` is not `Send`, so documents are parsed and dropped inside
//! these synchronous helpers and never held across an `.await`.

use scraper::{Html, Selector};

/// Returns the first non-empty `attr` value among elements matching
/// `selector`.
pub fn first_attr(html: &str, selector: &Selector, attr: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(selector)
        .filter_map(|element| element.value().attr(attr))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}
