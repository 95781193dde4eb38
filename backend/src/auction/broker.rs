//! Round scheduler and settlement engine.
//!
//! Responsibilities:
//! - Admit validated bids into the current batch and park their responders.
//! - Arm a one-shot alarm at the first admission of a batch.
//! - Settle on the size threshold or on alarm expiry, exactly once per batch.
//! - Apply second-price settlement atomically and fan the outcome out to
//!   every parked responder.
//!
//! Non-responsibilities:
//! - Request shape and syntactic validation (api layer).
//! - Client registration (registry).
//!
//! All round state lives inside a single mailbox task, so admission,
//! settlement, alarm firing and admin reset are mutually exclusive by
//! construction. The alarm is a spawned sleep that posts back into the
//! mailbox; a round epoch makes a stale firing a no-op, and threshold
//! settlement aborts the sleep outright.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::auction::settle;
use crate::auction::types::{
    message_key, AcceptedMessage, Bid, RoundOutcome, RoundReply, RoundStats, MESSAGE_PREFIX,
};
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::logger::warn_if_slow;
use crate::registry::{balance_key, name_key, parse_balance, BALANCE_PREFIX, NAME_PREFIX};
use crate::store::{KvStore, ListOptions};
use crate::time::now_ms;

const MAILBOX_CAPACITY: usize = 256;

enum Mail {
    Submit {
        token: String,
        message: String,
        amount: i64,
        resp: oneshot::Sender<Result<RoundReply, ApiError>>,
    },
    AlarmFired {
        epoch: u64,
    },
    Reset {
        resp: oneshot::Sender<Result<(), ApiError>>,
    },
}

#[derive(Debug)]
enum SettleCause {
    Threshold,
    Timeout,
}

/// Handle to the broker actor. Cloneable; every operation is a mail sent to
/// the single mailbox task that owns all round state.
#[derive(Clone)]
pub struct Broker {
    tx: mpsc::Sender<Mail>,
}

impl Broker {
    pub fn spawn(store: Arc<dyn KvStore>, cfg: &AppConfig) -> Broker {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);

        let actor = BrokerActor {
            store,
            threshold: cfg.batch_threshold.max(1),
            timeout: Duration::from_millis(cfg.batch_timeout_ms),
            accumulate_bal: cfg.accumulate_bal,
            max_bal: cfg.max_bal,
            mail: tx.clone(),
            batch: Vec::new(),
            parked: Vec::new(),
            alarm: None,
            epoch: 0,
            next_seq: 0,
        };
        tokio::spawn(actor.run(rx));

        Broker { tx }
    }

    /// Submits a bid. Resolves with the round outcome once the batch that
    /// admitted it settles, or immediately with a validation error.
    pub async fn submit(
        &self,
        token: String,
        message: String,
        amount: i64,
    ) -> Result<RoundReply, ApiError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(Mail::Submit {
                token,
                message,
                amount,
                resp: resp_tx,
            })
            .await
            .map_err(|_| ApiError::internal("broker unavailable"))?;

        resp_rx
            .await
            .map_err(|_| ApiError::internal("broker dropped request"))?
    }

    /// Clears every persisted namespace and all in-memory round state.
    /// Requests parked at that moment are resolved with an internal error.
    pub async fn reset(&self) -> Result<(), ApiError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(Mail::Reset { resp: resp_tx })
            .await
            .map_err(|_| ApiError::internal("broker unavailable"))?;

        resp_rx
            .await
            .map_err(|_| ApiError::internal("broker dropped request"))?
    }
}

struct Parked {
    token: String,
    resp: oneshot::Sender<Result<RoundReply, ApiError>>,
}

struct BrokerActor {
    store: Arc<dyn KvStore>,
    threshold: usize,
    timeout: Duration,
    accumulate_bal: i64,
    max_bal: i64,

    /// Sender half of our own mailbox, handed to alarm tasks.
    mail: mpsc::Sender<Mail>,

    batch: Vec<Bid>,
    parked: Vec<Parked>,
    alarm: Option<JoinHandle<()>>,
    /// Bumped at every settlement and reset; alarms carry the epoch they
    /// were armed under so a late firing cannot touch a newer batch.
    epoch: u64,
    next_seq: u64,
}

impl BrokerActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Mail>) {
        while let Some(mail) = rx.recv().await {
            match mail {
                Mail::Submit {
                    token,
                    message,
                    amount,
                    resp,
                } => self.on_submit(token, message, amount, resp).await,
                Mail::AlarmFired { epoch } => self.on_alarm(epoch).await,
                Mail::Reset { resp } => {
                    let out = self.on_reset().await;
                    let _ = resp.send(out);
                }
            }
        }
    }

    async fn on_submit(
        &mut self,
        token: String,
        message: String,
        amount: i64,
        resp: oneshot::Sender<Result<RoundReply, ApiError>>,
    ) {
        if let Err(e) = self.check_balance(&token, amount).await {
            let _ = resp.send(Err(e));
            return;
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let first = self.batch.is_empty();
        self.batch.push(Bid {
            token: token.clone(),
            message,
            amount,
            seq,
        });
        self.parked.push(Parked { token, resp });

        if first {
            self.arm_alarm();
        }

        debug!(batch = self.batch.len(), seq, "bid admitted");

        if self.batch.len() >= self.threshold {
            self.settle(SettleCause::Threshold).await;
        }
    }

    /// Advisory balance check at admission time. The settlement engine is
    /// authoritative; a later bid from the same token may change what is
    /// actually charged.
    async fn check_balance(&self, token: &str, amount: i64) -> Result<(), ApiError> {
        let balance = match self.store.get(&balance_key(token)).await? {
            Some(v) => parse_balance(&v)?,
            None => return Err(ApiError::bad_request("Invalid token")),
        };
        if amount > balance {
            return Err(ApiError::bad_request("Insufficient balance"));
        }
        Ok(())
    }

    async fn on_alarm(&mut self, epoch: u64) {
        if epoch != self.epoch || self.batch.is_empty() {
            // A settlement beat the alarm to this batch. Benign.
            debug!(epoch, current = self.epoch, "stale alarm ignored");
            return;
        }
        self.settle(SettleCause::Timeout).await;
    }

    /// Armed only at the first admission of a batch; later admissions never
    /// extend the deadline.
    fn arm_alarm(&mut self) {
        debug_assert!(self.alarm.is_none(), "arming over a live alarm");

        let mail = self.mail.clone();
        let epoch = self.epoch;
        let timeout = self.timeout;
        self.alarm = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = mail.send(Mail::AlarmFired { epoch }).await;
        }));

        debug!(timeout_ms = timeout.as_millis() as u64, "alarm armed");
    }

    fn cancel_alarm(&mut self) {
        if let Some(handle) = self.alarm.take() {
            handle.abort();
        }
    }

    /// Settles the current batch exactly once and resolves every parked
    /// responder. Round state is drained up front, so a storage failure
    /// still leaves the broker clean for the next round.
    #[instrument(skip(self), target = "broker", fields(batch = self.batch.len()))]
    async fn settle(&mut self, cause: SettleCause) {
        self.cancel_alarm();

        let round_id = Uuid::new_v4();
        let batch = std::mem::take(&mut self.batch);
        let parked = std::mem::take(&mut self.parked);
        self.epoch += 1;

        match self.run_settlement(round_id, &batch).await {
            Ok(outcome) => {
                info!(
                    round_id = %round_id,
                    cause = ?cause,
                    n_bids = outcome.stats.n_bids,
                    clearing = outcome.stats.win_bid,
                    responders = parked.len(),
                    "round settled"
                );
                for p in parked {
                    let _ = p.resp.send(Ok(outcome.reply_for(&p.token)));
                }
            }
            Err(e) => {
                warn!(round_id = %round_id, error = ?e, "settlement failed; aborting round");
                for p in parked {
                    let _ = p.resp.send(Err(ApiError::internal("settlement failed")));
                }
            }
        }
    }

    async fn run_settlement(
        &self,
        round_id: Uuid,
        batch: &[Bid],
    ) -> anyhow::Result<RoundOutcome> {
        let unique = settle::rank(settle::dedup_by_token(batch));
        let Some(winner) = unique.first() else {
            anyhow::bail!("settlement of an empty batch");
        };

        let mut keys = Vec::with_capacity(unique.len() * 2);
        for b in &unique {
            keys.push(balance_key(&b.token));
            keys.push(name_key(&b.token));
        }
        let stored = self.store.get_many(&keys).await?;

        let pricing = settle::price(&unique);

        let mut balances = HashMap::with_capacity(unique.len());
        let mut names = HashMap::with_capacity(unique.len());
        let mut updates: Vec<(String, String)> = Vec::with_capacity(unique.len() + 1);

        for (i, b) in unique.iter().enumerate() {
            let before = stored
                .get(&balance_key(&b.token))
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0);
            let after = if i == 0 {
                settle::charge_winner(before, pricing.clearing)
            } else {
                settle::reward_loser(before, self.accumulate_bal, self.max_bal)
            };

            balances.insert(b.token.clone(), after);
            updates.push((balance_key(&b.token), after.to_string()));

            if let Some(n) = stored.get(&name_key(&b.token)) {
                names.insert(b.token.clone(), n.clone());
            }
        }

        let accepted = AcceptedMessage {
            message: winner.message.clone(),
            bidder_token: winner.token.clone(),
            bidder_name: names.get(&winner.token).cloned().unwrap_or_default(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        updates.push((message_key(now_ms()), serde_json::to_string(&accepted)?));

        warn_if_slow(
            "settlement_persist",
            Duration::from_millis(100),
            self.store.put_many(&updates),
        )
        .await?;

        debug!(round_id = %round_id, winner = %winner.token, "round persisted");

        Ok(RoundOutcome {
            winner_token: winner.token.clone(),
            winner_message: winner.message.clone(),
            stats: RoundStats {
                win_bid: pricing.clearing,
                sum_bid: pricing.sum,
                n_bids: pricing.n_bidders,
            },
            balances,
            names,
        })
    }

    /// Defines a new epoch: disarms the alarm, resolves any parked requests
    /// with an internal error, and empties every persisted namespace.
    #[instrument(skip(self), target = "broker")]
    async fn on_reset(&mut self) -> Result<(), ApiError> {
        self.cancel_alarm();
        self.epoch += 1;
        self.batch.clear();
        self.next_seq = 0;

        let dropped = self.parked.len();
        for p in self.parked.drain(..) {
            let _ = p.resp.send(Err(ApiError::internal("broker reset")));
        }

        for prefix in [BALANCE_PREFIX, NAME_PREFIX, MESSAGE_PREFIX] {
            let rows = self
                .store
                .list(&ListOptions {
                    prefix: prefix.to_string(),
                    ..Default::default()
                })
                .await?;
            let keys: Vec<String> = rows.into_iter().map(|(k, _)| k).collect();
            if !keys.is_empty() {
                self.store.delete_many(&keys).await?;
            }
        }

        info!(dropped, "broker reset; all namespaces cleared");
        Ok(())
    }
}
