//! Word Filtering and Link Rewriting
//!
//! Two-tier term matching: the profanity list is audit-only for message
//! content (and blocks relay when it matches a server name), the slur list
//! drops messages outright. Matches are logged for moderators, never echoed
//! back to the author.
//!
//! The embedded list ships profanity defaults only; slur entries are
//! operator-supplied (see `WordFilter::new`).

use crate::model::{HubId, ServerId, UserId};
use serde::Deserialize;
use tracing::warn;

/// Domains whose links stay embeddable even when a hub hides links.
const LINK_ALLOWLIST: [&str; 2] = ["tenor.com", "giphy.com"];

/// Placeholder substituted for hidden links.
const LINK_PLACEHOLDER: &str = "`[link hidden]`";

#[derive(Deserialize)]
struct WordLists {
    profanity: Vec<String>,
    slurs: Vec<String>,
}

/// Case-insensitive substring matcher over the two word tiers.
#[derive(Debug, Clone)]
pub struct WordFilter {
    profanity: Vec<String>,
    slurs: Vec<String>,
}

impl WordFilter {
    /// Filter over explicit lists. Terms are matched case-insensitively as
    /// substrings, mirroring how the lists are curated (lowercase stems).
    pub fn new(profanity: Vec<String>, slurs: Vec<String>) -> Self {
        Self {
            profanity: profanity.iter().map(|w| w.to_lowercase()).collect(),
            slurs: slurs.iter().map(|w| w.to_lowercase()).collect(),
        }
    }

    /// Filter seeded from the embedded default lists.
    pub fn from_embedded() -> Self {
        // The embedded JSON is shipped with the crate; a parse failure is a
        // build defect, not a runtime condition.
        let lists: WordLists = serde_json::from_str(include_str!("blocked_words.json"))
            .unwrap_or(WordLists {
                profanity: Vec::new(),
                slurs: Vec::new(),
            });
        Self::new(lists.profanity, lists.slurs)
    }

    pub fn has_profanity(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.profanity.iter().any(|w| lower.contains(w.as_str()))
    }

    pub fn has_slur(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.slurs.iter().any(|w| lower.contains(w.as_str()))
    }

    /// Audit entry for a matched message. The author gets no reply; the
    /// content is recorded for moderators.
    pub fn log_match(&self, content: &str, author: &UserId, server: &ServerId, hub: &HubId) {
        warn!(
            author = %author,
            server = %server,
            hub = %hub,
            content,
            "message content matched the word filter"
        );
    }
}

impl Default for WordFilter {
    fn default() -> Self {
        Self::from_embedded()
    }
}

/// True when the content carries a third-party invite link, per the
/// configured patterns.
pub fn contains_invite(content: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| content.contains(p.as_str()))
}

/// Replace every URL outside the media-embed allowlist with a placeholder.
/// Token-based: anything whitespace-delimited starting with http(s)://.
pub fn replace_links(content: &str) -> String {
    content
        .split(' ')
        .map(|token| {
            let is_url = token.starts_with("http://") || token.starts_with("https://");
            let allowlisted = LINK_ALLOWLIST.iter().any(|d| token.contains(d));
            if is_url && !allowlisted {
                LINK_PLACEHOLDER
            } else {
                token
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// True when the content contains a URL that `replace_links` would rewrite.
pub fn has_hideable_link(content: &str) -> bool {
    content.split(' ').any(|token| {
        (token.starts_with("http://") || token.starts_with("https://"))
            && !LINK_ALLOWLIST.iter().any(|d| token.contains(d))
    })
}
