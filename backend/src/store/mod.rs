//! Key-value persistence behind the broker.
//!
//! Responsibilities:
//! - Atomic multi-key writes and deletes (all-or-nothing).
//! - Lexicographic prefix listing with reverse order, limit and cursor.
//!
//! Non-responsibilities:
//! - Scheduling (the broker owns its own alarm).
//! - Key layout (namespaces are defined where they are written).

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteKvStore;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

/// Options for an ordered prefix scan.
///
/// `end` is an exclusive upper bound in both directions: a forward scan
/// ascends toward it, a reverse scan starts strictly below it and descends.
/// Passing the last key of a reverse page as the next page's `end` therefore
/// paginates without overlap.
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    pub prefix: String,
    /// Iterate in descending key order when set.
    pub reverse: bool,
    /// Maximum number of rows returned; `None` scans the whole prefix.
    pub limit: Option<usize>,
    /// Exclusive upper bound on returned keys.
    pub end: Option<String>,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Multi-key get. Missing keys are simply absent from the returned map,
    /// so presence is distinguishable from an empty value.
    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, String>>;

    /// Atomic multi-key put: either every entry lands or none do.
    async fn put_many(&self, entries: &[(String, String)]) -> Result<()>;

    /// Atomic multi-key delete. Deleting an absent key is a no-op.
    async fn delete_many(&self, keys: &[String]) -> Result<()>;

    /// Ordered prefix scan per [`ListOptions`].
    async fn list(&self, opts: &ListOptions) -> Result<Vec<(String, String)>>;

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.put_many(&[(key.to_string(), value.to_string())]).await
    }
}

/// Smallest string strictly greater than every string starting with
/// `prefix`, used as the half-open upper bound of a prefix range.
///
/// Returns `None` (unbounded) for the empty prefix or a prefix of all
/// 0xFF bytes. Namespaces in this system are ASCII, so the byte bump
/// always yields valid UTF-8.
pub(crate) fn prefix_successor(prefix: &str) -> Option<String> {
    let mut bytes = prefix.as_bytes().to_vec();
    while let Some(last) = bytes.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return String::from_utf8(bytes).ok();
        }
        bytes.pop();
    }
    None
}
