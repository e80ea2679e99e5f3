// src/item.rs
use std::fmt;

use serde::{Deserialize, Serialize};

/// One notification candidate as handed over by a source adapter.
///
/// `published_at` stays raw text: adapters scrape loose date strings and the
/// pipeline resolves them through [`crate::normalize::parse_published_date`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub origin: String,       // e.g. "OKX_maintenance"
    pub title: String,
    pub published_at: String, // e.g. "2024-07-20", "2024年07月20日"
    pub content: String,      // body text or link
}

impl Item {
    pub fn new(
        origin: impl Into<String>,
        title: impl Into<String>,
        published_at: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            origin: origin.into(),
            title: title.into(),
            published_at: published_at.into(),
            content: content.into(),
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::from_item(self)
    }
}

/// Stable identity of an item: `origin__title__content`.
///
/// `published_at` is deliberately not part of the key, so a source that
/// re-publishes an item with a corrected date is still the same item.
/// Backslashes and underscores inside a field are escaped, which keeps the
/// `__` separator unambiguous ("a_" + "b" never collides with "a" + "_b").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn from_item(item: &Item) -> Self {
        Self::from_parts(&item.origin, &item.title, &item.content)
    }

    pub fn from_parts(origin: &str, title: &str, content: &str) -> Self {
        let mut key = String::with_capacity(origin.len() + title.len() + content.len() + 4);
        push_escaped(&mut key, origin);
        key.push_str("__");
        push_escaped(&mut key, title);
        key.push_str("__");
        push_escaped(&mut key, content);
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn push_escaped(out: &mut String, field: &str) {
    for ch in field.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '_' => out.push_str("\\_"),
            c => out.push(c),
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DedupKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
