use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const MESSAGE_PREFIX: &str = "message:";

/// A bid admitted to the current batch.
#[derive(Clone, Debug)]
pub struct Bid {
    pub token: String,
    pub message: String,
    pub amount: i64,
    /// Monotonic admission index within the batch; total order of admissions.
    pub seq: u64,
}

/// Durable record of a round's winning message.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedMessage {
    pub message: String,
    pub bidder_token: String,
    pub bidder_name: String,
    /// ISO-8601 UTC settlement time.
    pub timestamp: String,
}

/// Aggregates reported to every bidder of a settled round.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoundStats {
    /// Clearing price actually paid by the winner.
    pub win_bid: i64,
    /// Sum of the deduplicated bids.
    pub sum_bid: i64,
    /// Number of unique bidders.
    pub n_bids: usize,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BidStatus {
    Accepted,
    Rejected,
}

/// Per-token view of a settled round, resolved into every parked request.
/// Duplicate admissions from one token each receive the same reply.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundReply {
    pub message: String,
    pub balance: i64,
    pub name: String,
    pub status: BidStatus,
    pub stats: RoundStats,
}

/// Result of one settled round, queried per token when resolving the
/// batch's parked requests.
#[derive(Clone, Debug)]
pub struct RoundOutcome {
    pub winner_token: String,
    pub winner_message: String,
    pub stats: RoundStats,
    /// Post-settlement balances for every unique bidder.
    pub balances: HashMap<String, i64>,
    pub names: HashMap<String, String>,
}

impl RoundOutcome {
    pub fn reply_for(&self, token: &str) -> RoundReply {
        RoundReply {
            message: self.winner_message.clone(),
            balance: self.balances.get(token).copied().unwrap_or(0),
            name: self.names.get(token).cloned().unwrap_or_default(),
            status: if token == self.winner_token {
                BidStatus::Accepted
            } else {
                BidStatus::Rejected
            },
            stats: self.stats.clone(),
        }
    }
}

/// Storage key for an accepted message. The millisecond timestamp is
/// zero-padded to 13 digits so lexicographic order stays chronological
/// across the epoch-length boundary; the random suffix disambiguates
/// settlements within one millisecond.
pub fn message_key(ts_ms: u64) -> String {
    format!("{MESSAGE_PREFIX}{ts_ms:013}-{}", rand_suffix())
}

fn rand_suffix() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..5)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}
