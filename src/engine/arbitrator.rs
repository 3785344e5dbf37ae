//! Bid arbitrator.
//!
//! Validates and commits a single team's bid attempt. The ladder read
//! and the writes share one transaction, so concurrent attempts for the
//! same team are linearized by the ledger: the second attempt's rung is
//! computed from the first attempt's committed state, never a stale
//! read. Acceptance is gated on round status alone — the stored
//! deadline is advisory for the countdown display.

use serde_json::json;
use tracing::{debug, info};

use crate::config::AuctionConfig;
use crate::engine::cooldown::CooldownGate;
use crate::store::Ledger;
use crate::types::{AuctionError, Team};

pub struct BidArbitrator {
    ledger: Ledger,
    gate: CooldownGate,
    cfg: AuctionConfig,
}

impl BidArbitrator {
    pub fn new(ledger: Ledger, gate: CooldownGate, cfg: AuctionConfig) -> Self {
        Self { ledger, gate, cfg }
    }

    pub fn gate(&self) -> &CooldownGate {
        &self.gate
    }

    /// Attempt the next ladder rung for the team behind `token`.
    ///
    /// Validation order, first failure wins: session, active round,
    /// lock, cooldown, then — inside the transaction, against a fresh
    /// team row — ceiling and wallet. Returns the post-bid team row.
    /// A rejection leaves durable state and the cooldown gate exactly
    /// as they were.
    pub async fn attempt_bid(&self, token: &str) -> Result<Team, AuctionError> {
        let team = self
            .ledger
            .team_by_token(token)
            .await?
            .ok_or(AuctionError::UnknownSession)?;
        let round = self
            .ledger
            .active_round()
            .await?
            .ok_or(AuctionError::NoActiveRound)?;
        if team.locked {
            return Err(AuctionError::TeamLocked);
        }
        self.gate.check(&team.id)?;

        let now = self.gate.now_ms();
        let mut tx = self.ledger.begin().await?;

        // Re-fetch inside the transaction — an admin wallet edit or a
        // racing attempt may have moved the row since validation.
        let fresh = Ledger::team_by_id_tx(&mut tx, &team.id)
            .await?
            .ok_or(AuctionError::UnknownSession)?;
        if fresh.locked {
            return Err(AuctionError::TeamLocked);
        }

        let next_bid = if fresh.current_bid == 0 {
            self.cfg.start_bid
        } else {
            fresh.current_bid + self.cfg.increment
        };

        if next_bid > self.cfg.max_bid {
            debug!(team = %fresh.name, next_bid, "Bid rejected: ceiling");
            return Err(AuctionError::BidCeiling {
                next_bid,
                max_bid: self.cfg.max_bid,
            });
        }
        if next_bid > fresh.wallet {
            debug!(team = %fresh.name, next_bid, wallet = fresh.wallet, "Bid rejected: wallet");
            return Err(AuctionError::InsufficientFunds {
                needed: next_bid,
                available: fresh.wallet,
            });
        }

        Ledger::set_team_bid_tx(&mut tx, &fresh.id, next_bid, Some(now)).await?;
        Ledger::insert_bid_tx(&mut tx, round.id, &fresh.id, next_bid, now).await?;
        Ledger::log_event_tx(
            &mut tx,
            "bid",
            json!({
                "roundId": round.id,
                "teamId": fresh.id,
                "name": fresh.name,
                "amount": next_bid,
            }),
            now,
        )
        .await?;
        tx.commit().await?;

        // Only a committed bid advances the cooldown window.
        self.gate.stamp(&fresh.id, now);

        info!(team = %fresh.name, amount = next_bid, round_id = round.id, "Bid accepted");

        self.ledger
            .team_by_id(&fresh.id)
            .await?
            .ok_or(AuctionError::UnknownSession)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cooldown::{Clock, ManualClock};
    use crate::engine::lifecycle::RoundMachine;
    use std::sync::Arc;

    struct Fixture {
        arbitrator: BidArbitrator,
        machine: RoundMachine,
        ledger: Ledger,
        clock: ManualClock,
    }

    async fn fixture() -> Fixture {
        let ledger = Ledger::open_in_memory().await.unwrap();
        let clock = ManualClock::at(1_000);
        let cfg = AuctionConfig::default();
        let gate = CooldownGate::new(cfg.cooldown_ms, Arc::new(clock.clone()));
        Fixture {
            arbitrator: BidArbitrator::new(ledger.clone(), gate, cfg.clone()),
            machine: RoundMachine::new(ledger.clone(), cfg, Arc::new(clock.clone())),
            ledger,
            clock,
        }
    }

    async fn add_team(ledger: &Ledger, id: &str, name: &str, wallet: i64) {
        ledger
            .insert_team(&Team {
                id: id.to_string(),
                name: name.to_string(),
                wallet,
                current_bid: 0,
                last_bid_time: None,
                locked: false,
                token: format!("token-{id}"),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let f = fixture().await;
        let err = f.arbitrator.attempt_bid("nope").await.unwrap_err();
        assert!(matches!(err, AuctionError::UnknownSession));
    }

    #[tokio::test]
    async fn test_no_active_round() {
        let f = fixture().await;
        add_team(&f.ledger, "a", "Alpha", 12_000).await;
        let err = f.arbitrator.attempt_bid("token-a").await.unwrap_err();
        assert!(matches!(err, AuctionError::NoActiveRound));
    }

    #[tokio::test]
    async fn test_locked_team_rejected() {
        let f = fixture().await;
        add_team(&f.ledger, "a", "Alpha", 12_000).await;
        f.machine.start("x", Some(90)).await.unwrap();
        f.ledger.set_locked("a", true).await.unwrap();
        let err = f.arbitrator.attempt_bid("token-a").await.unwrap_err();
        assert!(matches!(err, AuctionError::TeamLocked));
    }

    #[tokio::test]
    async fn test_ladder_progression() {
        let f = fixture().await;
        add_team(&f.ledger, "a", "Alpha", 12_000).await;
        f.machine.start("x", Some(90)).await.unwrap();

        let team = f.arbitrator.attempt_bid("token-a").await.unwrap();
        assert_eq!(team.current_bid, 400); // first rung

        f.clock.advance(300);
        let team = f.arbitrator.attempt_bid("token-a").await.unwrap();
        assert_eq!(team.current_bid, 600);

        f.clock.advance(300);
        let team = f.arbitrator.attempt_bid("token-a").await.unwrap();
        assert_eq!(team.current_bid, 800);

        // Every accepted rung is on the ladder, gapless, in order.
        let round = f.ledger.round_by_id(1).await.unwrap().unwrap();
        let bids = f.ledger.team_bids("a", round.id).await.unwrap();
        let amounts: Vec<i64> = bids.iter().map(|b| b.amount).collect();
        assert_eq!(amounts, vec![400, 600, 800]);
    }

    #[tokio::test]
    async fn test_cooldown_rejects_rapid_taps() {
        let f = fixture().await;
        add_team(&f.ledger, "a", "Alpha", 12_000).await;
        f.machine.start("x", Some(90)).await.unwrap();

        f.arbitrator.attempt_bid("token-a").await.unwrap();
        f.clock.advance(100);
        let err = f.arbitrator.attempt_bid("token-a").await.unwrap_err();
        assert!(matches!(err, AuctionError::Cooldown { .. }));

        // The rejection left the ladder untouched.
        let team = f.ledger.team_by_id("a").await.unwrap().unwrap();
        assert_eq!(team.current_bid, 400);
    }

    #[tokio::test]
    async fn test_ceiling_rejection() {
        let f = fixture().await;
        add_team(&f.ledger, "a", "Alpha", 12_000).await;
        f.machine.start("x", Some(90)).await.unwrap();

        // Climb to the 2000 ceiling: 400, 600, ..., 2000 is 9 rungs.
        for _ in 0..9 {
            f.arbitrator.attempt_bid("token-a").await.unwrap();
            f.clock.advance(300);
        }
        let team = f.ledger.team_by_id("a").await.unwrap().unwrap();
        assert_eq!(team.current_bid, 2_000);

        let err = f.arbitrator.attempt_bid("token-a").await.unwrap_err();
        assert!(matches!(err, AuctionError::BidCeiling { next_bid: 2_200, .. }));
    }

    #[tokio::test]
    async fn test_wallet_rejection_leaves_bid_unchanged() {
        let f = fixture().await;
        // wallet 500: first rung 400 is fine, next rung 600 is not.
        add_team(&f.ledger, "a", "Alpha", 500).await;
        f.machine.start("x", Some(90)).await.unwrap();

        let team = f.arbitrator.attempt_bid("token-a").await.unwrap();
        assert_eq!(team.current_bid, 400);

        f.clock.advance(300);
        let err = f.arbitrator.attempt_bid("token-a").await.unwrap_err();
        assert!(matches!(
            err,
            AuctionError::InsufficientFunds { needed: 600, available: 500 }
        ));
        let team = f.ledger.team_by_id("a").await.unwrap().unwrap();
        assert_eq!(team.current_bid, 400);
    }

    #[tokio::test]
    async fn test_shrunken_wallet_blocks_next_rung_only() {
        let f = fixture().await;
        add_team(&f.ledger, "a", "Alpha", 12_000).await;
        f.machine.start("x", Some(90)).await.unwrap();
        f.arbitrator.attempt_bid("token-a").await.unwrap();

        // Admin shrinks the wallet below the committed bid.
        f.ledger.set_wallet("a", 100).await.unwrap();

        let team = f.ledger.team_by_id("a").await.unwrap().unwrap();
        assert_eq!(team.current_bid, 400); // committed bid stands

        f.clock.advance(300);
        let err = f.arbitrator.attempt_bid("token-a").await.unwrap_err();
        assert!(matches!(err, AuctionError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn test_bid_accepted_after_advertised_deadline() {
        let f = fixture().await;
        add_team(&f.ledger, "a", "Alpha", 12_000).await;
        f.machine.start("x", Some(1)).await.unwrap();

        // Deadline long gone, round never closed — still accepted.
        f.clock.advance(60_000);
        let team = f.arbitrator.attempt_bid("token-a").await.unwrap();
        assert_eq!(team.current_bid, 400);
    }

    #[tokio::test]
    async fn test_sequential_attempts_never_share_a_rung() {
        let f = fixture().await;
        add_team(&f.ledger, "a", "Alpha", 12_000).await;
        f.machine.start("x", Some(90)).await.unwrap();

        // Back-to-back accepted attempts: each observes the previous
        // commit, so the recorded amounts are strictly increasing.
        let mut amounts = Vec::new();
        for _ in 0..5 {
            amounts.push(f.arbitrator.attempt_bid("token-a").await.unwrap().current_bid);
            f.clock.advance(300);
        }
        assert_eq!(amounts, vec![400, 600, 800, 1_000, 1_200]);
    }

    #[tokio::test]
    async fn test_rejection_leaves_cooldown_untouched() {
        let f = fixture().await;
        add_team(&f.ledger, "a", "Alpha", 12_000).await;
        // No round active: rejected before the gate is ever stamped.
        assert!(f.arbitrator.attempt_bid("token-a").await.is_err());
        f.machine.start("x", Some(90)).await.unwrap();
        // Immediately accepted — the earlier rejection started no window.
        assert!(f.arbitrator.attempt_bid("token-a").await.is_ok());
    }

    #[tokio::test]
    async fn test_cooldown_uses_clock_not_storage() {
        let f = fixture().await;
        add_team(&f.ledger, "a", "Alpha", 12_000).await;
        f.machine.start("x", Some(90)).await.unwrap();
        f.arbitrator.attempt_bid("token-a").await.unwrap();

        // Wipe the durable timestamp; the process-local gate still holds.
        let mut tx = f.ledger.begin().await.unwrap();
        Ledger::set_team_bid_tx(&mut tx, "a", 400, None).await.unwrap();
        tx.commit().await.unwrap();

        let err = f.arbitrator.attempt_bid("token-a").await.unwrap_err();
        assert!(matches!(err, AuctionError::Cooldown { .. }));
    }

    #[test]
    fn test_system_clock_monotonic_enough() {
        let clock = crate::engine::cooldown::SystemClock;
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
