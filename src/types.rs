//! Shared types for the GAVEL engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that store, engine, and server
//! modules can depend on them without circular references.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Round
// ---------------------------------------------------------------------------

/// Lifecycle status of a bidding round.
///
/// Transitions: idle → active → closed. A reset forces an active round
/// back to idle; closed is terminal for that round id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum RoundStatus {
    Idle,
    Active,
    Closed,
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Idle => write!(f, "idle"),
            RoundStatus::Active => write!(f, "active"),
            RoundStatus::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for RoundStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(RoundStatus::Idle),
            "active" => Ok(RoundStatus::Active),
            "closed" => Ok(RoundStatus::Closed),
            _ => Err(anyhow::anyhow!("Unknown round status: {s}")),
        }
    }
}

/// A bidding round. Exactly one round may be `active` at a time.
///
/// `end_time` is a wall-clock deadline stored once at start. It is
/// advisory — bid acceptance is gated on `status` alone, and the admin's
/// explicit close is what actually stops bidding.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Round {
    pub id: i64,
    pub item_label: String,
    /// Unix millis.
    pub start_time: i64,
    /// Unix millis. Deadline while active, frozen to the close time after.
    pub end_time: i64,
    pub status: RoundStatus,
}

impl Round {
    pub fn is_active(&self) -> bool {
        self.status == RoundStatus::Active
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "round #{} [{}] {:?}", self.id, self.status, self.item_label)
    }
}

// ---------------------------------------------------------------------------
// Team
// ---------------------------------------------------------------------------

/// A participating team, as persisted in the ledger.
///
/// `current_bid` is always a rung on the per-round ladder
/// (0, start_bid, start_bid + increment, …) and is zeroed at round
/// start/reset. `token` is the opaque session token, stable across
/// reconnects.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Team {
    pub id: String,
    pub name: String,
    /// Non-negative integer currency units.
    pub wallet: i64,
    pub current_bid: i64,
    /// Unix millis of the last accepted bid, if any this round.
    pub last_bid_time: Option<i64>,
    pub locked: bool,
    pub token: String,
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (wallet={} bid={}{})",
            self.name,
            self.wallet,
            self.current_bid,
            if self.locked { " LOCKED" } else { "" },
        )
    }
}

// ---------------------------------------------------------------------------
// Bids
// ---------------------------------------------------------------------------

/// A single accepted bid, append-only within a round except for
/// single-step cancellation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Bid {
    pub id: i64,
    pub round_id: i64,
    pub team_id: String,
    pub amount: i64,
    /// Unix millis.
    pub timestamp: i64,
}

/// A bid joined with its team's display name, as used by winner
/// resolution and result payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BidRef {
    pub team_id: String,
    pub team_name: String,
    pub amount: i64,
    pub timestamp: i64,
}

impl fmt::Display for BidRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {} (t={})", self.team_name, self.amount, self.timestamp)
    }
}

/// Outcome of a closed round, derived from its full bid history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    pub winner: Option<BidRef>,
    /// First bid strictly below the winning amount; when the top amounts
    /// are all tied, the second bid row.
    pub second_highest: Option<BidRef>,
    /// The earliest bid of the round, independent of amount.
    pub fastest_bidder: Option<BidRef>,
}

impl RoundResult {
    pub fn is_empty(&self) -> bool {
        self.winner.is_none()
    }
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

/// Append-only audit record of a state-changing action.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEvent {
    pub id: i64,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String,
    /// JSON payload as stored.
    pub payload: String,
    /// Unix millis.
    pub timestamp: i64,
}

impl AuditEvent {
    /// Parse the stored payload. Malformed payloads decode as `Null`
    /// rather than failing the export.
    pub fn payload_json(&self) -> serde_json::Value {
        serde_json::from_str(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Audience views
// ---------------------------------------------------------------------------

/// A team row with its computed standing.
///
/// Rank is 1-based and shared across ties; teams that have not bid
/// this round carry no rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedTeam {
    pub id: String,
    pub name: String,
    pub wallet: i64,
    pub current_bid: i64,
    pub last_bid_time: Option<i64>,
    pub locked: bool,
    pub rank: Option<u32>,
}

impl RankedTeam {
    pub fn from_team(team: Team) -> Self {
        Self {
            id: team.id,
            name: team.name,
            wallet: team.wallet,
            current_bid: team.current_bid,
            last_bid_time: team.last_bid_time,
            locked: team.locked,
            rank: None,
        }
    }
}

/// What a single team sees. Scoped — never carries another team's wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamView {
    pub wallet: i64,
    pub current_bid: i64,
    /// Max over all teams' current bids.
    pub highest_bid: i64,
    pub rank: Option<u32>,
    pub round_active: bool,
    pub locked: bool,
    /// Deadline in unix millis, only while a round is active.
    pub ends_at: Option<i64>,
}

/// What the admin console sees. Winner fields are populated only on
/// the broadcast immediately following a close.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminView {
    pub round_active: bool,
    pub item_label: String,
    pub ends_at: Option<i64>,
    pub teams: Vec<RankedTeam>,
    pub winner: Option<BidRef>,
    pub second_highest: Option<BidRef>,
    pub fastest_bidder: Option<BidRef>,
}

/// A roster entry on the public display. No wallets here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayTeam {
    pub id: String,
    pub name: String,
    pub current_bid: i64,
    pub rank: Option<u32>,
}

/// What the public display sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayView {
    pub item_label: String,
    pub round_active: bool,
    pub ends_at: Option<i64>,
    pub teams: Vec<DisplayTeam>,
    pub highest_bid: i64,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for GAVEL.
///
/// All business-rule rejections are expected and recoverable; the
/// transaction is rolled back or never started. `Storage` is
/// fatal-per-request.
#[derive(Debug, thiserror::Error)]
pub enum AuctionError {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No bid to cancel for this team")]
    NoBid,

    #[error("Round is not active")]
    NoActiveRound,

    #[error("Unknown team session")]
    UnknownSession,

    #[error("Your team is locked")]
    TeamLocked,

    #[error("Slow down! Cooldown in effect ({remaining_ms}ms left)")]
    Cooldown { remaining_ms: i64 },

    #[error("Max bid reached: next bid {next_bid} exceeds ceiling {max_bid}")]
    BidCeiling { next_bid: i64, max_bid: i64 },

    #[error("Insufficient wallet: need {needed}, have {available}")]
    InsufficientFunds { needed: i64, available: i64 },

    #[error("Team name already taken: {0}")]
    NameTaken(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl AuctionError {
    /// Stable machine-readable code for wire payloads.
    pub fn code(&self) -> &'static str {
        match self {
            AuctionError::Conflict(_) => "conflict",
            AuctionError::NotFound(_) => "not_found",
            AuctionError::NoBid => "no_bid",
            AuctionError::NoActiveRound => "no_active_round",
            AuctionError::UnknownSession => "unknown_session",
            AuctionError::TeamLocked => "team_locked",
            AuctionError::Cooldown { .. } => "cooldown",
            AuctionError::BidCeiling { .. } => "bid_ceiling",
            AuctionError::InsufficientFunds { .. } => "insufficient_funds",
            AuctionError::NameTaken(_) => "name_taken",
            AuctionError::Storage(_) => "storage",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
