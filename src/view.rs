//! View projector.
//!
//! Builds the three audience snapshots — team, admin, display — fresh
//! from ledger state on every broadcast-triggering mutation. No caching
//! or diffing: audiences are small, recompute-and-push is simpler and
//! always consistent with what was just committed.

use crate::engine::ranking;
use crate::session::SessionRegistry;
use crate::store::Ledger;
use crate::types::{
    AdminView, AuctionError, DisplayTeam, DisplayView, RankedTeam, Round, RoundResult, TeamView,
};

#[derive(Clone)]
pub struct Projector {
    ledger: Ledger,
}

/// One consistent read of everything the views derive from.
struct Snapshot {
    round: Option<Round>,
    teams: Vec<RankedTeam>,
    highest_bid: i64,
}

impl Snapshot {
    fn ends_at(&self) -> Option<i64> {
        self.round.as_ref().map(|r| r.end_time)
    }

    fn item_label(&self) -> String {
        self.round
            .as_ref()
            .map(|r| r.item_label.clone())
            .unwrap_or_default()
    }

    fn round_active(&self) -> bool {
        self.round.is_some()
    }
}

impl Projector {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    async fn snapshot(&self) -> Result<Snapshot, AuctionError> {
        let round = self.ledger.active_round().await?;
        let mut teams: Vec<RankedTeam> = self
            .ledger
            .teams_by_standing()
            .await?
            .into_iter()
            .map(RankedTeam::from_team)
            .collect();
        ranking::assign_ranks(&mut teams);
        let highest_bid = ranking::highest_bid(&teams);
        Ok(Snapshot { round, teams, highest_bid })
    }

    /// The scoped view for one team.
    pub async fn team_view(&self, team_id: &str) -> Result<TeamView, AuctionError> {
        let snapshot = self.snapshot().await?;
        let team = snapshot
            .teams
            .iter()
            .find(|t| t.id == team_id)
            .ok_or(AuctionError::UnknownSession)?;
        Ok(TeamView {
            wallet: team.wallet,
            current_bid: team.current_bid,
            highest_bid: snapshot.highest_bid,
            rank: team.rank,
            round_active: snapshot.round_active(),
            locked: team.locked,
            ends_at: snapshot.ends_at(),
        })
    }

    /// The admin console view. `winners` is populated only on the
    /// broadcast immediately following a close.
    pub async fn admin_view(
        &self,
        winners: Option<&RoundResult>,
    ) -> Result<AdminView, AuctionError> {
        let snapshot = self.snapshot().await?;
        Ok(AdminView {
            round_active: snapshot.round_active(),
            item_label: snapshot.item_label(),
            ends_at: snapshot.ends_at(),
            teams: snapshot.teams,
            winner: winners.and_then(|w| w.winner.clone()),
            second_highest: winners.and_then(|w| w.second_highest.clone()),
            fastest_bidder: winners.and_then(|w| w.fastest_bidder.clone()),
        })
    }

    /// The public display view — ranked roster without wallets.
    pub async fn display_view(&self) -> Result<DisplayView, AuctionError> {
        let snapshot = self.snapshot().await?;
        Ok(DisplayView {
            item_label: snapshot.item_label(),
            round_active: snapshot.round_active(),
            ends_at: snapshot.ends_at(),
            highest_bid: snapshot.highest_bid,
            teams: snapshot
                .teams
                .into_iter()
                .map(|t| DisplayTeam {
                    id: t.id,
                    name: t.name,
                    current_bid: t.current_bid,
                    rank: t.rank,
                })
                .collect(),
        })
    }

    /// Push all three audience views to every subscriber. Per-team
    /// views go only to that team's channel.
    pub async fn broadcast_all(
        &self,
        registry: &SessionRegistry,
        winners: Option<&RoundResult>,
    ) -> Result<(), AuctionError> {
        let snapshot = self.snapshot().await?;

        registry.push_admin(AdminView {
            round_active: snapshot.round_active(),
            item_label: snapshot.item_label(),
            ends_at: snapshot.ends_at(),
            teams: snapshot.teams.clone(),
            winner: winners.and_then(|w| w.winner.clone()),
            second_highest: winners.and_then(|w| w.second_highest.clone()),
            fastest_bidder: winners.and_then(|w| w.fastest_bidder.clone()),
        });

        registry.push_display(DisplayView {
            item_label: snapshot.item_label(),
            round_active: snapshot.round_active(),
            ends_at: snapshot.ends_at(),
            highest_bid: snapshot.highest_bid,
            teams: snapshot
                .teams
                .iter()
                .map(|t| DisplayTeam {
                    id: t.id.clone(),
                    name: t.name.clone(),
                    current_bid: t.current_bid,
                    rank: t.rank,
                })
                .collect(),
        });

        for team in &snapshot.teams {
            registry.push_team(
                &team.id,
                TeamView {
                    wallet: team.wallet,
                    current_bid: team.current_bid,
                    highest_bid: snapshot.highest_bid,
                    rank: team.rank,
                    round_active: snapshot.round_active(),
                    locked: team.locked,
                    ends_at: snapshot.ends_at(),
                },
            );
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
