//! Paginated replay of the accepted-message log.

use serde::Serialize;
use tracing::warn;

use crate::auction::types::{AcceptedMessage, MESSAGE_PREFIX};
use crate::error::ApiError;
use crate::store::{KvStore, ListOptions};

pub const DEFAULT_PAGE: usize = 10;

#[derive(Debug, Serialize)]
pub struct ReplayPage {
    /// Accepted messages, most recent first.
    pub messages: Vec<AcceptedMessage>,
    /// Cursor for the next page; absent once the log is exhausted.
    pub next: Option<String>,
}

/// Most-recent-first page of the message log. `end` is the `next` cursor
/// returned by the previous page.
pub async fn replay(
    store: &dyn KvStore,
    end: Option<String>,
    limit: Option<usize>,
) -> Result<ReplayPage, ApiError> {
    let limit = limit.unwrap_or(DEFAULT_PAGE).max(1);

    let rows = store
        .list(&ListOptions {
            prefix: MESSAGE_PREFIX.to_string(),
            reverse: true,
            limit: Some(limit),
            end,
        })
        .await?;

    // A short page means the log is exhausted; a full page may have more.
    let next = if rows.len() == limit {
        rows.last().map(|(k, _)| k.clone())
    } else {
        None
    };

    let mut messages = Vec::with_capacity(rows.len());
    for (key, value) in &rows {
        match serde_json::from_str::<AcceptedMessage>(value) {
            Ok(m) => messages.push(m),
            // poison-row resilience: skip but don't fail the page
            Err(e) => warn!(key = %key, error = %e, "skipping malformed message row"),
        }
    }

    Ok(ReplayPage { messages, next })
}
