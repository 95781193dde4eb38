//! Administrative surface: paginated client listing.
//!
//! The companion admin operation, the full reset, lives on the broker
//! because it has to clear in-memory round state under the same
//! serialization as settlement.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::ApiError;
use crate::registry::{name_key, parse_balance, BALANCE_PREFIX};
use crate::store::{KvStore, ListOptions};

pub const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Serialize)]
pub struct ClientEntry {
    pub balance: i64,
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
    pub returned: usize,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct ClientsPage {
    /// Token → client, in lexicographic token order.
    pub clients: BTreeMap<String, ClientEntry>,
    pub pagination: Pagination,
}

/// Lists registered clients in storage order of the `balance:` namespace.
pub async fn list_clients(
    store: &dyn KvStore,
    page: usize,
    page_size: usize,
) -> Result<ClientsPage, ApiError> {
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    let skip = page.saturating_mul(page_size);

    // One extra row past the window tells us whether another page exists.
    let rows = store
        .list(&ListOptions {
            prefix: BALANCE_PREFIX.to_string(),
            limit: Some(skip.saturating_add(page_size).saturating_add(1)),
            ..Default::default()
        })
        .await?;

    let has_more = rows.len() > skip.saturating_add(page_size);
    let window: Vec<(String, String)> =
        rows.into_iter().skip(skip).take(page_size).collect();

    let name_keys: Vec<String> = window
        .iter()
        .map(|(k, _)| name_key(k.trim_start_matches(BALANCE_PREFIX)))
        .collect();
    let names = store.get_many(&name_keys).await?;

    let mut clients = BTreeMap::new();
    for (key, value) in &window {
        let token = key.trim_start_matches(BALANCE_PREFIX).to_string();
        clients.insert(
            token.clone(),
            ClientEntry {
                balance: parse_balance(value)?,
                name: names.get(&name_key(&token)).cloned().unwrap_or_default(),
            },
        );
    }

    let returned = clients.len();
    Ok(ClientsPage {
        clients,
        pagination: Pagination {
            page,
            page_size,
            returned,
            has_more,
        },
    })
}
