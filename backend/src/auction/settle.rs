//! Settlement math: per-token dedup, ranking and second-price pricing.
//!
//! Pure functions over an admitted batch. The broker owns when these run;
//! this module owns what a round is worth.

use std::collections::HashMap;

use super::types::Bid;

/// Pricing of a deduplicated, ranked batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pricing {
    /// Second-highest unique bid, or 0 for a lone bidder.
    pub clearing: i64,
    /// Sum of all unique bids.
    pub sum: i64,
    /// Number of unique bidders.
    pub n_bidders: usize,
}

/// Collapses a batch to at most one bid per token.
///
/// A later admission replaces the kept one only when its amount is
/// strictly higher, so equal amounts keep the earlier admission.
pub fn dedup_by_token(batch: &[Bid]) -> Vec<Bid> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut out: Vec<Bid> = Vec::new();

    for bid in batch {
        match index.get(bid.token.as_str()) {
            Some(&i) => {
                if bid.amount > out[i].amount {
                    out[i] = bid.clone();
                }
            }
            None => {
                index.insert(&bid.token, out.len());
                out.push(bid.clone());
            }
        }
    }

    out
}

/// Orders unique bids descending by amount; equal amounts rank the earlier
/// admission first.
pub fn rank(mut unique: Vec<Bid>) -> Vec<Bid> {
    unique.sort_by(|a, b| b.amount.cmp(&a.amount).then(a.seq.cmp(&b.seq)));
    unique
}

pub fn price(ranked: &[Bid]) -> Pricing {
    let clearing = if ranked.len() >= 2 { ranked[1].amount } else { 0 };
    Pricing {
        clearing,
        sum: ranked.iter().map(|b| b.amount).sum(),
        n_bidders: ranked.len(),
    }
}

/// Winner pays the clearing price, floored at zero: a bid that can no
/// longer be fully paid caps the loss at the remaining balance.
pub fn charge_winner(balance: i64, clearing: i64) -> i64 {
    (balance - clearing).max(0)
}

/// Losers accumulate the per-round reward, clamped to the cap.
pub fn reward_loser(balance: i64, accumulate: i64, cap: i64) -> i64 {
    (balance + accumulate).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_bid(token: &str, amount: i64, seq: u64) -> Bid {
        Bid {
            token: token.to_string(),
            message: format!("msg-{token}-{seq}"),
            amount,
            seq,
        }
    }

    #[test]
    fn dedup_keeps_highest_bid_per_token() {
        let batch = vec![
            mk_bid("a", 2, 0),
            mk_bid("a", 4, 1),
            mk_bid("a", 3, 2),
            mk_bid("b", 5, 3),
        ];

        let unique = dedup_by_token(&batch);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].amount, 4);
        assert_eq!(unique[0].message, "msg-a-1");
        assert_eq!(unique[1].amount, 5);
    }

    #[test]
    fn dedup_on_equal_amounts_keeps_the_earlier_admission() {
        let batch = vec![mk_bid("a", 4, 0), mk_bid("a", 4, 1)];
        let unique = dedup_by_token(&batch);
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].seq, 0);
        assert_eq!(unique[0].message, "msg-a-0");
    }

    #[test]
    fn rank_is_descending_with_earlier_admission_winning_ties() {
        let ranked = rank(vec![
            mk_bid("late", 7, 5),
            mk_bid("early", 7, 1),
            mk_bid("top", 9, 8),
        ]);

        let order: Vec<&str> = ranked.iter().map(|b| b.token.as_str()).collect();
        assert_eq!(order, vec!["top", "early", "late"]);
    }

    #[test]
    fn lone_bidder_pays_nothing() {
        let ranked = rank(vec![mk_bid("a", 3, 0)]);
        assert_eq!(
            price(&ranked),
            Pricing {
                clearing: 0,
                sum: 3,
                n_bidders: 1
            }
        );
    }

    #[test]
    fn clearing_is_the_second_highest_bid() {
        let ranked = rank(vec![mk_bid("a", 5, 0), mk_bid("b", 7, 1), mk_bid("c", 2, 2)]);
        assert_eq!(
            price(&ranked),
            Pricing {
                clearing: 5,
                sum: 14,
                n_bidders: 3
            }
        );
    }

    #[test]
    fn winner_charge_clamps_at_zero() {
        assert_eq!(charge_winner(10, 4), 6);
        assert_eq!(charge_winner(3, 9), 0);
        assert_eq!(charge_winner(0, 1), 0);
    }

    #[test]
    fn loser_reward_clamps_at_the_cap() {
        assert_eq!(reward_loser(10, 2, 100), 12);
        assert_eq!(reward_loser(99, 2, 100), 100);
        assert_eq!(reward_loser(10, 0, 100), 10);
    }
}
