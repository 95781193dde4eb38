use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{prefix_successor, KvStore, ListOptions};

/// In-memory store backed by a single ordered map.
///
/// Used by the test suites and by `DATABASE_URL`-less runs. The one mutex
/// makes every multi-key operation trivially atomic.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.lock().get(key).cloned())
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        let map = self.map.lock();
        let mut out = HashMap::with_capacity(keys.len());
        for k in keys {
            if let Some(v) = map.get(k) {
                out.insert(k.clone(), v.clone());
            }
        }
        Ok(out)
    }

    async fn put_many(&self, entries: &[(String, String)]) -> Result<()> {
        let mut map = self.map.lock();
        for (k, v) in entries {
            map.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        let mut map = self.map.lock();
        for k in keys {
            map.remove(k);
        }
        Ok(())
    }

    async fn list(&self, opts: &ListOptions) -> Result<Vec<(String, String)>> {
        let map = self.map.lock();

        let lower = Bound::Included(opts.prefix.clone());
        let upper = match prefix_successor(&opts.prefix) {
            Some(s) => Bound::Excluded(s),
            None => Bound::Unbounded,
        };

        let limit = opts.limit.unwrap_or(usize::MAX);
        let below_end = |k: &String| opts.end.as_ref().map_or(true, |e| k < e);

        let mut out = Vec::new();
        if opts.reverse {
            for (k, v) in map.range((lower, upper)).rev() {
                if !below_end(k) {
                    // Still above the cursor; keep descending.
                    continue;
                }
                out.push((k.clone(), v.clone()));
                if out.len() == limit {
                    break;
                }
            }
        } else {
            for (k, v) in map.range((lower, upper)) {
                if !below_end(k) {
                    break;
                }
                out.push((k.clone(), v.clone()));
                if out.len() == limit {
                    break;
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        let entries: Vec<(String, String)> = (0..5)
            .map(|i| (format!("k:{i}"), format!("v{i}")))
            .chain(std::iter::once(("other:x".to_string(), "y".to_string())))
            .collect();
        store.put_many(&entries).await.unwrap();
        store
    }

    #[tokio::test]
    async fn get_many_omits_missing_keys() {
        let store = seeded().await;
        let got = store
            .get_many(&["k:0".into(), "k:9".into(), "k:4".into()])
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got.get("k:0").map(String::as_str), Some("v0"));
        assert!(!got.contains_key("k:9"));
    }

    #[tokio::test]
    async fn list_respects_prefix_boundary() {
        let store = seeded().await;
        let rows = store
            .list(&ListOptions {
                prefix: "k:".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|(k, _)| k.starts_with("k:")));
    }

    #[tokio::test]
    async fn forward_list_is_ascending_and_bounded_by_end() {
        let store = seeded().await;
        let rows = store
            .list(&ListOptions {
                prefix: "k:".into(),
                end: Some("k:3".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["k:0", "k:1", "k:2"]);
    }

    #[tokio::test]
    async fn reverse_list_descends_and_respects_limit() {
        let store = seeded().await;
        let rows = store
            .list(&ListOptions {
                prefix: "k:".into(),
                reverse: true,
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["k:4", "k:3"]);
    }

    #[tokio::test]
    async fn reverse_pagination_with_cursor_does_not_overlap() {
        let store = seeded().await;
        let first = store
            .list(&ListOptions {
                prefix: "k:".into(),
                reverse: true,
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        let cursor = first.last().unwrap().0.clone();

        let second = store
            .list(&ListOptions {
                prefix: "k:".into(),
                reverse: true,
                limit: Some(2),
                end: Some(cursor),
                ..Default::default()
            })
            .await
            .unwrap();
        let keys: Vec<&str> = second.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["k:2", "k:1"]);
    }

    #[tokio::test]
    async fn delete_many_tolerates_absent_keys() {
        let store = seeded().await;
        store
            .delete_many(&["k:0".into(), "does-not-exist".into()])
            .await
            .unwrap();
        assert!(store.get("k:0").await.unwrap().is_none());
        assert_eq!(store.len(), 5);
    }
}
