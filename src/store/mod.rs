//! Ledger store — SQLite persistence for teams, rounds, bids, and the
//! audit log.
//!
//! All multi-statement mutations run inside one `sqlx` transaction
//! obtained from [`Ledger::begin`]; the `*_tx` associated functions
//! operate on that transaction's connection so validating reads and
//! writes share the same isolation scope. Single-statement writes go
//! through the pool directly.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::info;

use crate::types::{AuctionError, AuditEvent, Bid, BidRef, Round, Team};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS teams (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE,
    wallet INTEGER NOT NULL,
    current_bid INTEGER NOT NULL DEFAULT 0,
    last_bid_time INTEGER,
    locked INTEGER NOT NULL DEFAULT 0,
    token TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS rounds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_label TEXT NOT NULL DEFAULT '',
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'idle'
);

CREATE TABLE IF NOT EXISTS bids (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    round_id INTEGER NOT NULL REFERENCES rounds(id),
    team_id TEXT NOT NULL REFERENCES teams(id),
    amount INTEGER NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    payload TEXT,
    timestamp INTEGER NOT NULL
);
"#;

/// Handle to the SQLite ledger. Cheap to clone.
#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open (creating if missing) the ledger database at `path`.
    pub async fn open(path: &str) -> Result<Self, AuctionError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(AuctionError::Storage)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        info!(path, "Ledger opened");
        Ok(Self { pool })
    }

    /// Open a private in-memory ledger (tests).
    ///
    /// A single connection keeps every statement on the same in-memory
    /// database.
    pub async fn open_in_memory() -> Result<Self, AuctionError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(AuctionError::Storage)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Begin a transaction. The sole serialization point for mutations.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, AuctionError> {
        Ok(self.pool.begin().await?)
    }

    // -- Team reads --------------------------------------------------------

    pub async fn team_by_token(&self, token: &str) -> Result<Option<Team>, AuctionError> {
        Ok(sqlx::query_as::<_, Team>("SELECT * FROM teams WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn team_by_id(&self, id: &str) -> Result<Option<Team>, AuctionError> {
        Ok(sqlx::query_as::<_, Team>("SELECT * FROM teams WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Case-insensitive name lookup (the `name` column collates NOCASE).
    pub async fn team_by_name(&self, name: &str) -> Result<Option<Team>, AuctionError> {
        Ok(sqlx::query_as::<_, Team>("SELECT * FROM teams WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// All teams in standing order: current bid descending, earlier
    /// accepted bid first among ties.
    pub async fn teams_by_standing(&self) -> Result<Vec<Team>, AuctionError> {
        Ok(sqlx::query_as::<_, Team>(
            "SELECT * FROM teams ORDER BY current_bid DESC, last_bid_time ASC",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    // -- Team writes -------------------------------------------------------

    pub async fn insert_team(&self, team: &Team) -> Result<(), AuctionError> {
        let result = sqlx::query(
            "INSERT INTO teams (id, name, wallet, current_bid, last_bid_time, locked, token)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&team.id)
        .bind(&team.name)
        .bind(team.wallet)
        .bind(team.current_bid)
        .bind(team.last_bid_time)
        .bind(team.locked)
        .bind(&team.token)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            // Unique-constraint race on the name column surfaces as a
            // business rejection, not a storage failure.
            Err(sqlx::Error::Database(db)) if db.message().contains("UNIQUE") => {
                Err(AuctionError::NameTaken(team.name.clone()))
            }
            Err(e) => Err(AuctionError::Storage(e)),
        }
    }

    pub async fn set_wallet(&self, team_id: &str, wallet: i64) -> Result<(), AuctionError> {
        sqlx::query("UPDATE teams SET wallet = ? WHERE id = ?")
            .bind(wallet)
            .bind(team_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_locked(&self, team_id: &str, locked: bool) -> Result<(), AuctionError> {
        sqlx::query("UPDATE teams SET locked = ? WHERE id = ?")
            .bind(locked)
            .bind(team_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_all_wallets(&self, wallet: i64) -> Result<(), AuctionError> {
        sqlx::query("UPDATE teams SET wallet = ?")
            .bind(wallet)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- Rounds ------------------------------------------------------------

    /// The currently active round, if any.
    pub async fn active_round(&self) -> Result<Option<Round>, AuctionError> {
        Ok(sqlx::query_as::<_, Round>(
            "SELECT * FROM rounds WHERE status = 'active' ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn round_by_id(&self, id: i64) -> Result<Option<Round>, AuctionError> {
        Ok(sqlx::query_as::<_, Round>("SELECT * FROM rounds WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    // -- Bids --------------------------------------------------------------

    /// Full bid history of a round joined with team names, ordered by
    /// amount descending then timestamp ascending — the winner-resolution
    /// order.
    pub async fn round_bids(&self, round_id: i64) -> Result<Vec<BidRef>, AuctionError> {
        Ok(sqlx::query_as::<_, BidRef>(
            "SELECT b.team_id, t.name AS team_name, b.amount, b.timestamp
             FROM bids b JOIN teams t ON t.id = b.team_id
             WHERE b.round_id = ?
             ORDER BY b.amount DESC, b.timestamp ASC",
        )
        .bind(round_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// A team's bids within a round, ladder order.
    pub async fn team_bids(&self, team_id: &str, round_id: i64) -> Result<Vec<Bid>, AuctionError> {
        Ok(sqlx::query_as::<_, Bid>(
            "SELECT * FROM bids WHERE team_id = ? AND round_id = ? ORDER BY id ASC",
        )
        .bind(team_id)
        .bind(round_id)
        .fetch_all(&self.pool)
        .await?)
    }

    // -- Audit log ---------------------------------------------------------

    pub async fn log_event(
        &self,
        kind: &str,
        payload: serde_json::Value,
        timestamp: i64,
    ) -> Result<(), AuctionError> {
        sqlx::query("INSERT INTO events (type, payload, timestamp) VALUES (?, ?, ?)")
            .bind(kind)
            .bind(payload.to_string())
            .bind(timestamp)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The full audit log, oldest first.
    pub async fn events(&self) -> Result<Vec<AuditEvent>, AuctionError> {
        Ok(sqlx::query_as::<_, AuditEvent>(
            "SELECT id, type, payload, timestamp FROM events ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    // -- Transaction-scoped helpers ---------------------------------------
    //
    // These take the transaction's connection so validating reads observe
    // exactly the state the write will act on.

    pub async fn team_by_id_tx(
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<Option<Team>, AuctionError> {
        Ok(sqlx::query_as::<_, Team>("SELECT * FROM teams WHERE id = ?")
            .bind(id)
            .fetch_optional(conn)
            .await?)
    }

    pub async fn set_team_bid_tx(
        conn: &mut SqliteConnection,
        team_id: &str,
        amount: i64,
        timestamp: Option<i64>,
    ) -> Result<(), AuctionError> {
        sqlx::query("UPDATE teams SET current_bid = ?, last_bid_time = ? WHERE id = ?")
            .bind(amount)
            .bind(timestamp)
            .bind(team_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn set_wallet_tx(
        conn: &mut SqliteConnection,
        team_id: &str,
        wallet: i64,
    ) -> Result<(), AuctionError> {
        sqlx::query("UPDATE teams SET wallet = ? WHERE id = ?")
            .bind(wallet)
            .bind(team_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn insert_bid_tx(
        conn: &mut SqliteConnection,
        round_id: i64,
        team_id: &str,
        amount: i64,
        timestamp: i64,
    ) -> Result<(), AuctionError> {
        sqlx::query("INSERT INTO bids (round_id, team_id, amount, timestamp) VALUES (?, ?, ?, ?)")
            .bind(round_id)
            .bind(team_id)
            .bind(amount)
            .bind(timestamp)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// A team's most recent bid in a round (the cancellation target).
    pub async fn last_bid_tx(
        conn: &mut SqliteConnection,
        team_id: &str,
        round_id: i64,
    ) -> Result<Option<Bid>, AuctionError> {
        Ok(sqlx::query_as::<_, Bid>(
            "SELECT * FROM bids WHERE team_id = ? AND round_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(team_id)
        .bind(round_id)
        .fetch_optional(conn)
        .await?)
    }

    pub async fn delete_bid_tx(
        conn: &mut SqliteConnection,
        bid_id: i64,
    ) -> Result<(), AuctionError> {
        sqlx::query("DELETE FROM bids WHERE id = ?")
            .bind(bid_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn insert_round_tx(
        conn: &mut SqliteConnection,
        item_label: &str,
        start_time: i64,
        end_time: i64,
    ) -> Result<i64, AuctionError> {
        let result = sqlx::query(
            "INSERT INTO rounds (item_label, start_time, end_time, status) VALUES (?, ?, ?, 'active')",
        )
        .bind(item_label)
        .bind(start_time)
        .bind(end_time)
        .execute(conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn set_round_closed_tx(
        conn: &mut SqliteConnection,
        round_id: i64,
        end_time: i64,
    ) -> Result<(), AuctionError> {
        sqlx::query("UPDATE rounds SET status = 'closed', end_time = ? WHERE id = ?")
            .bind(end_time)
            .bind(round_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Force any active round back to idle.
    pub async fn idle_active_rounds_tx(conn: &mut SqliteConnection) -> Result<(), AuctionError> {
        sqlx::query("UPDATE rounds SET status = 'idle' WHERE status = 'active'")
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Zero every team's current bid and last-bid time.
    pub async fn clear_current_bids_tx(conn: &mut SqliteConnection) -> Result<(), AuctionError> {
        sqlx::query("UPDATE teams SET current_bid = 0, last_bid_time = NULL")
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Remove a team and its bids. Bids go first to keep the history
    /// referentially consistent.
    pub async fn delete_team_tx(
        conn: &mut SqliteConnection,
        team_id: &str,
    ) -> Result<(), AuctionError> {
        sqlx::query("DELETE FROM bids WHERE team_id = ?")
            .bind(team_id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM teams WHERE id = ?")
            .bind(team_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn log_event_tx(
        conn: &mut SqliteConnection,
        kind: &str,
        payload: serde_json::Value,
        timestamp: i64,
    ) -> Result<(), AuctionError> {
        sqlx::query("INSERT INTO events (type, payload, timestamp) VALUES (?, ?, ?)")
            .bind(kind)
            .bind(payload.to_string())
            .bind(timestamp)
            .execute(conn)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
