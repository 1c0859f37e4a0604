//! Request-boundary validation (spec §6 "Feed name validation", §7 "Request —
//! client-side — 4xx — returned to caller synchronously").

use std::collections::HashSet;

use oracle_core::{Category, FeedId};

use crate::dto::FeedRef;

pub const MAX_FEEDS_PER_REQUEST: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyFeedList,
    TooManyFeeds { count: usize },
    DuplicateFeed { name: String },
    InvalidCategory { category: u8 },
    InvalidName { name: String },
}

impl ValidationError {
    pub fn message(&self) -> String {
        match self {
            ValidationError::EmptyFeedList => "request must include at least one feed".to_string(),
            ValidationError::TooManyFeeds { count } => {
                format!("request has {count} feeds, exceeding the {MAX_FEEDS_PER_REQUEST} limit")
            }
            ValidationError::DuplicateFeed { name } => format!("duplicate feed in request: {name}"),
            ValidationError::InvalidCategory { category } => {
                format!("category {category} is not one of {{1,2,3,4}}")
            }
            ValidationError::InvalidName { name } => {
                format!("feed name '{name}' is not BASE/QUOTE with 2-8 uppercase letters per side")
            }
        }
    }
}

/// Validates and normalizes a request's feed list into `(FeedId, raw category)`
/// pairs, enforcing the request-boundary rules from spec §6.
pub fn validate_feeds(feeds: &[FeedRef]) -> Result<Vec<(FeedId, u8)>, ValidationError> {
    if feeds.is_empty() {
        return Err(ValidationError::EmptyFeedList);
    }
    if feeds.len() > MAX_FEEDS_PER_REQUEST {
        return Err(ValidationError::TooManyFeeds { count: feeds.len() });
    }

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(feeds.len());
    for feed in feeds {
        let category = Category::from_code(feed.category)
            .ok_or(ValidationError::InvalidCategory { category: feed.category })?;
        let feed_id = FeedId::new(category, &feed.name)
            .map_err(|_| ValidationError::InvalidName { name: feed.name.clone() })?;
        let key = (feed.category, feed_id.name.clone());
        if !seen.insert(key) {
            return Err(ValidationError::DuplicateFeed { name: feed_id.name.clone() });
        }
        out.push((feed_id, feed.category));
    }
    Ok(out)
}
