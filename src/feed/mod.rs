//! Match-result feed: the only external dependency of reconciliation.

pub mod cache;
pub mod http;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::types::MatchResult;

pub use cache::ResultCache;
pub use http::HttpResultFeed;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request timed out")]
    Timeout,

    #[error("feed transport error: {0}")]
    Transport(String),

    #[error("feed returned HTTP {0}")]
    Status(u16),

    #[error("malformed feed response: {0}")]
    Malformed(String),
}

impl FeedError {
    /// Transport failures, rate limiting and server errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::Timeout | FeedError::Transport(_) => true,
            FeedError::Status(code) => *code == 429 || *code >= 500,
            FeedError::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FeedError::Timeout
        } else if e.is_decode() {
            FeedError::Malformed(e.to_string())
        } else if let Some(status) = e.status() {
            FeedError::Status(status.as_u16())
        } else {
            FeedError::Transport(e.to_string())
        }
    }
}

/// Source of final scores. Implementations own their retry policy; callers
/// make a single call per (date, teams) and treat `Ok(None)` as "no fixture".
#[async_trait]
pub trait ResultFeedClient: Send + Sync {
    /// Look up the fixture on `date` whose teams match the hints. The returned
    /// result may not be final; callers check [`MatchResult::is_complete`].
    async fn get_result(
        &self,
        date: NaiveDate,
        home_hint: &str,
        away_hint: &str,
    ) -> Result<Option<MatchResult>, FeedError>;
}
