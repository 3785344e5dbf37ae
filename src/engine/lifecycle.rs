//! Round state machine.
//!
//! Owns the idle → active → closed lifecycle and its side effects:
//! zeroing the bid ladder at start, winner settlement at close, and the
//! abandon-without-winner reset. Every transition is one ledger
//! transaction.

use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::config::AuctionConfig;
use crate::engine::cooldown::Clock;
use crate::engine::ranking;
use crate::store::Ledger;
use crate::types::{AuctionError, Round, RoundResult, RoundStatus};

pub struct RoundMachine {
    ledger: Ledger,
    cfg: AuctionConfig,
    clock: Arc<dyn Clock>,
}

impl RoundMachine {
    pub fn new(ledger: Ledger, cfg: AuctionConfig, clock: Arc<dyn Clock>) -> Self {
        Self { ledger, cfg, clock }
    }

    /// Start a new round.
    ///
    /// Rejects with `Conflict` while another round is active. Zeroes
    /// every team's current bid so nothing leaks from a prior round.
    /// A missing or zero duration falls back to the configured default;
    /// range-checking larger values is the caller's job.
    pub async fn start(
        &self,
        item_label: &str,
        duration_secs: Option<u64>,
    ) -> Result<Round, AuctionError> {
        if let Some(existing) = self.ledger.active_round().await? {
            return Err(AuctionError::Conflict(format!(
                "round #{} is already active",
                existing.id
            )));
        }

        let duration = duration_secs
            .filter(|d| *d > 0)
            .unwrap_or(self.cfg.default_round_secs);
        let now = self.clock.now_ms();
        let end_time = now + duration as i64 * 1_000;

        let mut tx = self.ledger.begin().await?;
        let round_id = Ledger::insert_round_tx(&mut tx, item_label, now, end_time).await?;
        Ledger::clear_current_bids_tx(&mut tx).await?;
        Ledger::log_event_tx(
            &mut tx,
            "round_start",
            json!({
                "roundId": round_id,
                "itemLabel": item_label,
                "durationSeconds": duration,
            }),
            now,
        )
        .await?;
        tx.commit().await?;

        info!(round_id, item_label, duration_secs = duration, "Round started");

        Ok(Round {
            id: round_id,
            item_label: item_label.to_string(),
            start_time: now,
            end_time,
            status: RoundStatus::Active,
        })
    }

    /// Close the active round and settle the winner.
    ///
    /// Admin-triggered early close is a first-class transition: the
    /// stored deadline is frozen to the actual close time. The winning
    /// team's wallet is debited by the winning amount, floored at zero
    /// so a mid-round wallet edit can never drive it negative.
    pub async fn close(&self) -> Result<RoundResult, AuctionError> {
        let round = self
            .ledger
            .active_round()
            .await?
            .ok_or(AuctionError::NoActiveRound)?;
        let now = self.clock.now_ms();

        let bids = self.ledger.round_bids(round.id).await?;
        let result = ranking::compute_winners(&bids);

        let mut tx = self.ledger.begin().await?;
        Ledger::set_round_closed_tx(&mut tx, round.id, now).await?;

        if let Some(winner) = &result.winner {
            if let Some(team) = Ledger::team_by_id_tx(&mut tx, &winner.team_id).await? {
                let settled = (team.wallet - winner.amount).max(0);
                Ledger::set_wallet_tx(&mut tx, &team.id, settled).await?;
            }
        }

        Ledger::log_event_tx(
            &mut tx,
            "round_close",
            json!({ "roundId": round.id, "winners": result }),
            now,
        )
        .await?;
        tx.commit().await?;

        info!(
            round_id = round.id,
            winner = result.winner.as_ref().map(|w| w.team_name.as_str()),
            amount = result.winner.as_ref().map(|w| w.amount),
            "Round closed"
        );

        Ok(result)
    }

    /// Abandon any active round without declaring a winner.
    ///
    /// Idempotent. Clears the bid ladder and flips active rounds back to
    /// idle; wallets and historical bids/events are untouched.
    pub async fn reset(&self) -> Result<(), AuctionError> {
        let now = self.clock.now_ms();

        let mut tx = self.ledger.begin().await?;
        Ledger::clear_current_bids_tx(&mut tx).await?;
        Ledger::idle_active_rounds_tx(&mut tx).await?;
        Ledger::log_event_tx(&mut tx, "round_reset", json!({}), now).await?;
        tx.commit().await?;

        info!("Round reset");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
