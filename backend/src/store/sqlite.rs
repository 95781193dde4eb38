use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};

use super::{prefix_successor, KvStore, ListOptions};

/// SQL-backed key-value store over a single `kv` table.
///
/// Uses the sqlx `Any` driver so the same code runs against SQLite in
/// development and anything else in production. Multi-key writes run in one
/// transaction, which gives the all-or-nothing guarantee the broker's
/// settlement persist relies on.
pub struct SqliteKvStore {
    pool: AnyPool,
}

impl SqliteKvStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = AnyPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
CREATE TABLE IF NOT EXISTS kv (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);
"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query(r#"SELECT value FROM kv WHERE key = ?;"#)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(r.try_get("value")?)),
            None => Ok(None),
        }
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!("SELECT key, value FROM kv WHERE key IN ({placeholders});");

        let mut query = sqlx::query(&sql);
        for k in keys {
            query = query.bind(k.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut out = HashMap::with_capacity(rows.len());
        for r in rows {
            out.insert(r.try_get("key")?, r.try_get("value")?);
        }
        Ok(out)
    }

    async fn put_many(&self, entries: &[(String, String)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (k, v) in entries {
            sqlx::query(
                r#"
INSERT INTO kv (key, value) VALUES (?, ?)
ON CONFLICT(key) DO UPDATE SET value = excluded.value;
"#,
            )
            .bind(k.as_str())
            .bind(v.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for k in keys {
            sqlx::query(r#"DELETE FROM kv WHERE key = ?;"#)
                .bind(k.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list(&self, opts: &ListOptions) -> Result<Vec<(String, String)>> {
        let mut sql = String::from("SELECT key, value FROM kv WHERE key >= ?");
        let upper = prefix_successor(&opts.prefix);
        if upper.is_some() {
            sql.push_str(" AND key < ?");
        }
        if opts.end.is_some() {
            sql.push_str(" AND key < ?");
        }
        sql.push_str(if opts.reverse {
            " ORDER BY key DESC LIMIT ?;"
        } else {
            " ORDER BY key ASC LIMIT ?;"
        });

        let mut query = sqlx::query(&sql).bind(opts.prefix.as_str());
        if let Some(u) = &upper {
            query = query.bind(u.as_str());
        }
        if let Some(e) = &opts.end {
            query = query.bind(e.as_str());
        }
        let limit = opts.limit.map(|l| l as i64).unwrap_or(i64::MAX);
        query = query.bind(limit);

        let rows = query.fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push((r.try_get("key")?, r.try_get("value")?));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Isolated in-memory DB per test. The unique name prevents test
    /// interference during parallel execution; `cache=shared` lets every
    /// connection in the pool see the same in-memory DB.
    async fn setup_store() -> SqliteKvStore {
        sqlx::any::install_default_drivers();
        let conn = format!("sqlite:file:{}?mode=memory&cache=shared", Uuid::new_v4());
        SqliteKvStore::connect(&conn).await.expect("connect sqlite")
    }

    #[tokio::test]
    async fn put_many_then_get_round_trips() {
        let store = setup_store().await;
        store
            .put_many(&[
                ("balance:abc".into(), "10".into()),
                ("name:abc".into(), "Alice".into()),
            ])
            .await
            .unwrap();

        assert_eq!(store.get("balance:abc").await.unwrap().as_deref(), Some("10"));
        assert_eq!(store.get("name:abc").await.unwrap().as_deref(), Some("Alice"));
        assert!(store.get("balance:zzz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_many_overwrites_existing_values() {
        let store = setup_store().await;
        store.put("balance:abc", "10").await.unwrap();
        store.put("balance:abc", "7").await.unwrap();
        assert_eq!(store.get("balance:abc").await.unwrap().as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn list_reverse_with_cursor_paginates() {
        let store = setup_store().await;
        let entries: Vec<(String, String)> = (0..4)
            .map(|i| (format!("message:{i:013}-aaaaa"), format!("m{i}")))
            .collect();
        store.put_many(&entries).await.unwrap();

        let first = store
            .list(&ListOptions {
                prefix: "message:".into(),
                reverse: true,
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].1, "m3");
        assert_eq!(first[1].1, "m2");

        let second = store
            .list(&ListOptions {
                prefix: "message:".into(),
                reverse: true,
                limit: Some(2),
                end: Some(first.last().unwrap().0.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second[0].1, "m1");
        assert_eq!(second[1].1, "m0");
    }

    #[tokio::test]
    async fn delete_many_clears_only_named_keys() {
        let store = setup_store().await;
        store
            .put_many(&[("a:1".into(), "x".into()), ("a:2".into(), "y".into())])
            .await
            .unwrap();
        store.delete_many(&["a:1".into()]).await.unwrap();
        assert!(store.get("a:1").await.unwrap().is_none());
        assert_eq!(store.get("a:2").await.unwrap().as_deref(), Some("y"));
    }
}
