//! Core engine — round lifecycle, bid arbitration, ranking, cooldown,
//! and the `Auction` facade exposing every operation the transport
//! layer calls.

pub mod arbitrator;
pub mod cooldown;
pub mod lifecycle;
pub mod ranking;

use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::AuctionConfig;
use crate::session::SessionRegistry;
use crate::store::Ledger;
use crate::types::{
    AdminView, AuctionError, AuditEvent, DisplayView, RoundResult, Team, TeamView,
};
use crate::view::Projector;
use arbitrator::BidArbitrator;
use cooldown::{Clock, CooldownGate};
use lifecycle::RoundMachine;

/// The bidding engine facade. One instance per process, shared behind
/// an `Arc` by every connection handler.
pub struct Auction {
    ledger: Ledger,
    cfg: AuctionConfig,
    machine: RoundMachine,
    arbitrator: BidArbitrator,
    registry: SessionRegistry,
    projector: Projector,
    clock: Arc<dyn Clock>,
}

impl Auction {
    pub fn new(ledger: Ledger, cfg: AuctionConfig, clock: Arc<dyn Clock>) -> Self {
        let gate = CooldownGate::new(cfg.cooldown_ms, clock.clone());
        Self {
            machine: RoundMachine::new(ledger.clone(), cfg.clone(), clock.clone()),
            arbitrator: BidArbitrator::new(ledger.clone(), gate, cfg.clone()),
            registry: SessionRegistry::new(),
            projector: Projector::new(ledger.clone()),
            ledger,
            cfg,
            clock,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    async fn broadcast(&self, winners: Option<&RoundResult>) -> Result<(), AuctionError> {
        self.projector.broadcast_all(&self.registry, winners).await
    }

    // -- Team operations ---------------------------------------------------

    /// Join the auction, or rejoin an existing seat.
    ///
    /// A token that still resolves returns the same session unchanged,
    /// so a page reload never loses a seat. Otherwise the trimmed name
    /// must be non-empty and unique (case-insensitive).
    pub async fn join(
        &self,
        name: &str,
        token: Option<&str>,
    ) -> Result<(String, TeamView), AuctionError> {
        if let Some(token) = token {
            if let Some(existing) = self.ledger.team_by_token(token).await? {
                let view = self.projector.team_view(&existing.id).await?;
                return Ok((existing.token, view));
            }
        }

        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(AuctionError::Conflict("team name is required".into()));
        }
        if self.ledger.team_by_name(trimmed).await?.is_some() {
            return Err(AuctionError::NameTaken(trimmed.to_string()));
        }

        let team = Team {
            id: Uuid::new_v4().to_string(),
            name: trimmed.to_string(),
            wallet: self.cfg.start_wallet,
            current_bid: 0,
            last_bid_time: None,
            locked: false,
            token: Uuid::new_v4().to_string(),
        };
        self.ledger.insert_team(&team).await?;
        self.ledger
            .log_event(
                "team_join",
                json!({ "teamId": team.id, "name": team.name }),
                self.clock.now_ms(),
            )
            .await?;

        info!(team = %team.name, "Team joined");
        self.broadcast(None).await?;

        let view = self.projector.team_view(&team.id).await?;
        Ok((team.token, view))
    }

    /// Resolve a session token for reconnect. A stale token is an
    /// `UnknownSession` the transport reports softly — the client
    /// treats it as "create a new team".
    pub async fn reconnect(&self, token: &str) -> Result<Team, AuctionError> {
        self.ledger
            .team_by_token(token)
            .await?
            .ok_or(AuctionError::UnknownSession)
    }

    /// Attempt the next bid for the team behind `token`.
    pub async fn attempt_bid(&self, token: &str) -> Result<TeamView, AuctionError> {
        let team = self.arbitrator.attempt_bid(token).await?;
        self.broadcast(None).await?;
        self.projector.team_view(&team.id).await
    }

    // -- Admin operations --------------------------------------------------

    pub async fn admin_start(
        &self,
        item_label: &str,
        duration_secs: Option<u64>,
    ) -> Result<(), AuctionError> {
        self.machine.start(item_label, duration_secs).await?;
        self.broadcast(None).await
    }

    pub async fn admin_close(&self) -> Result<RoundResult, AuctionError> {
        let result = self.machine.close().await?;
        self.broadcast(Some(&result)).await?;
        Ok(result)
    }

    pub async fn admin_reset(&self) -> Result<(), AuctionError> {
        self.machine.reset().await?;
        self.broadcast(None).await
    }

    /// Set a team's wallet. Floored at zero; an already-committed bid
    /// above the new balance stands, the wallet check catches the next
    /// attempt instead.
    pub async fn admin_set_wallet(&self, team_id: &str, amount: i64) -> Result<(), AuctionError> {
        self.require_team(team_id).await?;
        let wallet = amount.max(0);
        self.ledger.set_wallet(team_id, wallet).await?;
        self.ledger
            .log_event(
                "wallet_edit",
                json!({ "teamId": team_id, "wallet": wallet }),
                self.clock.now_ms(),
            )
            .await?;
        self.broadcast(None).await
    }

    pub async fn admin_set_locked(&self, team_id: &str, locked: bool) -> Result<(), AuctionError> {
        self.require_team(team_id).await?;
        self.ledger.set_locked(team_id, locked).await?;
        self.ledger
            .log_event(
                "team_lock",
                json!({ "teamId": team_id, "locked": locked }),
                self.clock.now_ms(),
            )
            .await?;
        self.broadcast(None).await
    }

    /// Undo a team's most recent bid of the active round — the exact
    /// inverse of placing it. The team rolls back to its prior rung, or
    /// to zero if that was its first.
    pub async fn admin_cancel_last_bid(&self, team_id: &str) -> Result<(), AuctionError> {
        let round = self
            .ledger
            .active_round()
            .await?
            .ok_or(AuctionError::NoActiveRound)?;
        let now = self.clock.now_ms();

        let mut tx = self.ledger.begin().await?;
        let last = Ledger::last_bid_tx(&mut tx, team_id, round.id)
            .await?
            .ok_or(AuctionError::NoBid)?;
        Ledger::delete_bid_tx(&mut tx, last.id).await?;

        let prior = Ledger::last_bid_tx(&mut tx, team_id, round.id).await?;
        let (amount, timestamp) = prior
            .map(|b| (b.amount, Some(b.timestamp)))
            .unwrap_or((0, None));
        Ledger::set_team_bid_tx(&mut tx, team_id, amount, timestamp).await?;
        Ledger::log_event_tx(
            &mut tx,
            "cancel_last_bid",
            json!({ "teamId": team_id, "cancelledAmount": last.amount }),
            now,
        )
        .await?;
        tx.commit().await?;

        info!(team_id, amount = last.amount, "Last bid cancelled");
        self.broadcast(None).await
    }

    /// Remove a team and its bids. Its session token goes stale and its
    /// subscribers see the stream end.
    pub async fn admin_remove_team(&self, team_id: &str) -> Result<(), AuctionError> {
        self.require_team(team_id).await?;
        let now = self.clock.now_ms();

        let mut tx = self.ledger.begin().await?;
        Ledger::delete_team_tx(&mut tx, team_id).await?;
        Ledger::log_event_tx(&mut tx, "team_remove", json!({ "teamId": team_id }), now).await?;
        tx.commit().await?;

        self.registry.remove_team(team_id);
        self.arbitrator.gate().forget(team_id);

        info!(team_id, "Team removed");
        self.broadcast(None).await
    }

    pub async fn admin_reset_all_wallets(&self) -> Result<(), AuctionError> {
        self.ledger.set_all_wallets(self.cfg.start_wallet).await?;
        self.ledger
            .log_event(
                "wallets_reset",
                json!({ "wallet": self.cfg.start_wallet }),
                self.clock.now_ms(),
            )
            .await?;
        self.broadcast(None).await
    }

    // -- Read-only surfaces ------------------------------------------------

    pub async fn admin_view(&self) -> Result<AdminView, AuctionError> {
        self.projector.admin_view(None).await
    }

    pub async fn display_view(&self) -> Result<DisplayView, AuctionError> {
        self.projector.display_view().await
    }

    /// The full append-only audit log, oldest first.
    pub async fn export_audit_log(&self) -> Result<Vec<AuditEvent>, AuctionError> {
        self.ledger.events().await
    }

    async fn require_team(&self, team_id: &str) -> Result<Team, AuctionError> {
        self.ledger
            .team_by_id(team_id)
            .await?
            .ok_or_else(|| AuctionError::NotFound(format!("team {team_id}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cooldown::ManualClock;

    async fn auction() -> (Auction, ManualClock) {
        let ledger = Ledger::open_in_memory().await.unwrap();
        let clock = ManualClock::at(1_000);
        let auction = Auction::new(ledger, AuctionConfig::default(), Arc::new(clock.clone()));
        (auction, clock)
    }

    #[tokio::test]
    async fn test_join_creates_team() {
        let (auction, _) = auction().await;
        let (token, view) = auction.join("Heisenbugs", None).await.unwrap();
        assert!(!token.is_empty());
        assert_eq!(view.wallet, 12_000);
        assert_eq!(view.current_bid, 0);
        assert!(!view.round_active);
    }

    #[tokio::test]
    async fn test_join_rejects_blank_and_duplicate_names() {
        let (auction, _) = auction().await;
        assert!(matches!(
            auction.join("   ", None).await.unwrap_err(),
            AuctionError::Conflict(_)
        ));

        auction.join("Heisenbugs", None).await.unwrap();
        assert!(matches!(
            auction.join("  heisenbugs  ", None).await.unwrap_err(),
            AuctionError::NameTaken(_)
        ));
    }

    #[tokio::test]
    async fn test_join_with_token_is_idempotent() {
        let (auction, _) = auction().await;
        let (token, _) = auction.join("Heisenbugs", None).await.unwrap();
        // Rejoin with a different requested name: the existing seat wins.
        let (token2, view) = auction.join("Whatever", Some(&token)).await.unwrap();
        assert_eq!(token, token2);
        assert_eq!(view.wallet, 12_000);
    }

    #[tokio::test]
    async fn test_reconnect_stale_token() {
        let (auction, _) = auction().await;
        let err = auction.reconnect("stale").await.unwrap_err();
        assert!(matches!(err, AuctionError::UnknownSession));
    }

    #[tokio::test]
    async fn test_full_bid_flow_updates_views() {
        let (auction, _) = auction().await;
        let (token, _) = auction.join("Heisenbugs", None).await.unwrap();
        auction.admin_start("Login race", Some(90)).await.unwrap();

        let view = auction.attempt_bid(&token).await.unwrap();
        assert_eq!(view.current_bid, 400);
        assert_eq!(view.highest_bid, 400);
        assert_eq!(view.rank, Some(1));
        assert_eq!(view.wallet, 12_000); // debited at close, not at bid

        let display = auction.display_view().await.unwrap();
        assert_eq!(display.highest_bid, 400);
    }

    #[tokio::test]
    async fn test_close_broadcasts_winners_to_admin() {
        let (auction, clock) = auction().await;
        let (token_a, _) = auction.join("Alpha", None).await.unwrap();
        let (token_b, _) = auction.join("Beta", None).await.unwrap();
        auction.admin_start("x", Some(90)).await.unwrap();

        auction.attempt_bid(&token_a).await.unwrap();
        clock.advance(300);
        auction.attempt_bid(&token_b).await.unwrap();
        clock.advance(300);
        auction.attempt_bid(&token_a).await.unwrap();

        let mut admin_rx = auction.registry().subscribe_admin();
        let result = auction.admin_close().await.unwrap();
        assert_eq!(result.winner.as_ref().unwrap().team_name, "Alpha");
        assert_eq!(result.winner.as_ref().unwrap().amount, 600);

        let pushed = admin_rx.recv().await.unwrap();
        assert_eq!(pushed.winner.unwrap().team_name, "Alpha");
        assert!(!pushed.round_active);

        // Winner settled: 12000 - 600.
        let admin = auction.admin_view().await.unwrap();
        let alpha = admin.teams.iter().find(|t| t.name == "Alpha").unwrap();
        assert_eq!(alpha.wallet, 11_400);
        // Post-close reads carry no winners.
        assert!(admin.winner.is_none());
    }

    #[tokio::test]
    async fn test_cancel_last_bid_is_exact_inverse() {
        let (auction, clock) = auction().await;
        let (token, _) = auction.join("Alpha", None).await.unwrap();
        auction.admin_start("x", Some(90)).await.unwrap();

        auction.attempt_bid(&token).await.unwrap();
        clock.advance(300);
        auction.attempt_bid(&token).await.unwrap();

        let team = auction.reconnect(&token).await.unwrap();
        assert_eq!(team.current_bid, 600);

        auction.admin_cancel_last_bid(&team.id).await.unwrap();
        let rolled_back = auction.reconnect(&token).await.unwrap();
        assert_eq!(rolled_back.current_bid, 400);
        // The prior bid's timestamp is restored, not the cancelled one's.
        assert_eq!(rolled_back.last_bid_time, Some(1_000));

        // Cancelling the only remaining bid rolls back to zero.
        auction.admin_cancel_last_bid(&team.id).await.unwrap();
        let cleared = auction.reconnect(&token).await.unwrap();
        assert_eq!(cleared.current_bid, 0);
        assert!(cleared.last_bid_time.is_none());

        // Nothing left to cancel.
        let err = auction.admin_cancel_last_bid(&team.id).await.unwrap_err();
        assert!(matches!(err, AuctionError::NoBid));
    }

    #[tokio::test]
    async fn test_cancel_requires_active_round() {
        let (auction, _) = auction().await;
        let (token, _) = auction.join("Alpha", None).await.unwrap();
        let team = auction.reconnect(&token).await.unwrap();
        let err = auction.admin_cancel_last_bid(&team.id).await.unwrap_err();
        assert!(matches!(err, AuctionError::NoActiveRound));
    }

    #[tokio::test]
    async fn test_remove_team_invalidates_session() {
        let (auction, _) = auction().await;
        let (token, _) = auction.join("Alpha", None).await.unwrap();
        let team = auction.reconnect(&token).await.unwrap();

        auction.admin_remove_team(&team.id).await.unwrap();
        assert!(matches!(
            auction.reconnect(&token).await.unwrap_err(),
            AuctionError::UnknownSession
        ));
        // After removal, the name is free again.
        auction.join("Alpha", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_unknown_team() {
        let (auction, _) = auction().await;
        let err = auction.admin_remove_team("ghost").await.unwrap_err();
        assert!(matches!(err, AuctionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_set_wallet_floors_at_zero() {
        let (auction, _) = auction().await;
        let (token, _) = auction.join("Alpha", None).await.unwrap();
        let team = auction.reconnect(&token).await.unwrap();

        auction.admin_set_wallet(&team.id, -500).await.unwrap();
        let view = auction.projector().team_view(&team.id).await.unwrap();
        assert_eq!(view.wallet, 0);
    }

    #[tokio::test]
    async fn test_reset_all_wallets() {
        let (auction, _) = auction().await;
        let (token_a, _) = auction.join("Alpha", None).await.unwrap();
        auction.join("Beta", None).await.unwrap();
        let team_a = auction.reconnect(&token_a).await.unwrap();

        auction.admin_set_wallet(&team_a.id, 3).await.unwrap();
        auction.admin_reset_all_wallets().await.unwrap();

        let admin = auction.admin_view().await.unwrap();
        assert!(admin.teams.iter().all(|t| t.wallet == 12_000));
    }

    #[tokio::test]
    async fn test_audit_log_records_actions_in_order() {
        let (auction, _) = auction().await;
        let (token, _) = auction.join("Alpha", None).await.unwrap();
        auction.admin_start("x", Some(90)).await.unwrap();
        auction.attempt_bid(&token).await.unwrap();
        auction.admin_close().await.unwrap();

        let log = auction.export_audit_log().await.unwrap();
        let kinds: Vec<&str> = log.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["team_join", "round_start", "bid", "round_close"]);
        assert_eq!(log[2].payload_json()["amount"], 400);
    }

    #[tokio::test]
    async fn test_lock_unlock_gate_bids() {
        let (auction, clock) = auction().await;
        let (token, _) = auction.join("Alpha", None).await.unwrap();
        let team = auction.reconnect(&token).await.unwrap();
        auction.admin_start("x", Some(90)).await.unwrap();

        auction.admin_set_locked(&team.id, true).await.unwrap();
        assert!(matches!(
            auction.attempt_bid(&token).await.unwrap_err(),
            AuctionError::TeamLocked
        ));

        auction.admin_set_locked(&team.id, false).await.unwrap();
        clock.advance(300);
        assert!(auction.attempt_bid(&token).await.is_ok());
    }
}
