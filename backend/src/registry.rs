//! Client registry: token issue, registration and balance lookup.
//!
//! Registration is the only writer of `name:*` keys and the only writer of
//! `balance:*` keys outside the settlement engine.

use std::sync::Arc;

use anyhow::anyhow;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::RngCore;
use serde::Serialize;
use tracing::{info, instrument};

use crate::error::ApiError;
use crate::store::KvStore;

pub const BALANCE_PREFIX: &str = "balance:";
pub const NAME_PREFIX: &str = "name:";

pub fn balance_key(token: &str) -> String {
    format!("{BALANCE_PREFIX}{token}")
}

pub fn name_key(token: &str) -> String {
    format!("{NAME_PREFIX}{token}")
}

#[derive(Debug, Serialize)]
pub struct Registration {
    pub token: String,
    pub balance: i64,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct BalanceView {
    pub balance: i64,
    pub name: String,
}

pub struct Registry {
    store: Arc<dyn KvStore>,
    start_bal: i64,
}

impl Registry {
    pub fn new(store: Arc<dyn KvStore>, start_bal: i64) -> Self {
        Self { store, start_bal }
    }

    /// Issues a fresh token and writes the client's starting balance and
    /// name in one atomic put.
    #[instrument(skip(self, name), target = "registry")]
    pub async fn register(&self, name: &str) -> Result<Registration, ApiError> {
        if name.is_empty() {
            return Err(ApiError::bad_request("Missing name"));
        }

        let token = mint_token();
        self.store
            .put_many(&[
                (balance_key(&token), self.start_bal.to_string()),
                (name_key(&token), name.to_string()),
            ])
            .await?;

        info!(token = %token, balance = self.start_bal, "registered client");

        Ok(Registration {
            token,
            balance: self.start_bal,
            name: name.to_string(),
        })
    }

    pub async fn balance(&self, token: &str) -> Result<BalanceView, ApiError> {
        let keys = [balance_key(token), name_key(token)];
        let stored = self.store.get_many(&keys).await?;

        let balance = match stored.get(&keys[0]) {
            Some(v) => parse_balance(v)?,
            None => return Err(ApiError::bad_request("Invalid token")),
        };
        let name = stored.get(&keys[1]).cloned().unwrap_or_default();

        Ok(BalanceView { balance, name })
    }
}

/// Parses a stored balance value. A row that fails to parse means the
/// namespace was corrupted by something other than this service.
pub(crate) fn parse_balance(value: &str) -> Result<i64, ApiError> {
    value
        .parse::<i64>()
        .map_err(|_| ApiError::Internal(anyhow!("corrupt balance value: {value:?}")))
}

/// 16 URL-safe characters drawn from base64 of random bytes, with `+`, `/`
/// and padding stripped. Draws again if stripping leaves fewer than 16.
pub fn mint_token() -> String {
    let mut rng = rand::thread_rng();
    let mut out = String::new();
    while out.len() < 16 {
        let mut buf = [0u8; 12];
        rng.fill_bytes(&mut buf);
        out.extend(
            STANDARD
                .encode(buf)
                .chars()
                .filter(char::is_ascii_alphanumeric),
        );
    }
    out.truncate(16);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn mk_registry() -> (Arc<MemoryStore>, Registry) {
        let store = Arc::new(MemoryStore::new());
        let registry = Registry::new(store.clone(), 10);
        (store, registry)
    }

    #[test]
    fn minted_tokens_are_16_url_safe_chars() {
        for _ in 0..50 {
            let t = mint_token();
            assert_eq!(t.len(), 16);
            assert!(t.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[tokio::test]
    async fn register_writes_balance_and_name() {
        let (store, registry) = mk_registry();
        let reg = registry.register("Alice").await.unwrap();

        assert_eq!(reg.balance, 10);
        assert_eq!(reg.name, "Alice");
        assert_eq!(
            store.get(&balance_key(&reg.token)).await.unwrap().as_deref(),
            Some("10")
        );
        assert_eq!(
            store.get(&name_key(&reg.token)).await.unwrap().as_deref(),
            Some("Alice")
        );
    }

    #[tokio::test]
    async fn register_rejects_empty_name() {
        let (_, registry) = mk_registry();
        let err = registry.register("").await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn balance_rejects_unknown_token() {
        let (_, registry) = mk_registry();
        let err = registry.balance("nope").await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn balance_returns_current_state() {
        let (_, registry) = mk_registry();
        let reg = registry.register("Bob").await.unwrap();
        let view = registry.balance(&reg.token).await.unwrap();
        assert_eq!(view.balance, 10);
        assert_eq!(view.name, "Bob");
    }
}
