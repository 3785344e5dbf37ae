//! Session and presence registry.
//!
//! Owns the per-audience push channels: one broadcast channel each for
//! the admin console and the public display, and one per team so pushes
//! stay scoped (team A never receives team B's wallet). Token→team
//! resolution itself lives in the ledger; this registry is process-local
//! and safe to lose on restart.
//!
//! Injected as a dependency rather than a process-wide singleton, so
//! tests can instantiate isolated instances.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::types::{AdminView, DisplayView, TeamView};

/// Buffered updates per subscriber; slow consumers skip to the latest.
const CHANNEL_CAPACITY: usize = 32;

pub struct SessionRegistry {
    admin_tx: broadcast::Sender<AdminView>,
    display_tx: broadcast::Sender<DisplayView>,
    teams: Mutex<HashMap<String, broadcast::Sender<TeamView>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (admin_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (display_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            admin_tx,
            display_tx,
            teams: Mutex::new(HashMap::new()),
        }
    }

    // -- Subscriptions -----------------------------------------------------

    pub fn subscribe_admin(&self) -> broadcast::Receiver<AdminView> {
        self.admin_tx.subscribe()
    }

    pub fn subscribe_display(&self) -> broadcast::Receiver<DisplayView> {
        self.display_tx.subscribe()
    }

    /// Subscribe to a team's scoped channel, creating it on first use.
    pub fn subscribe_team(&self, team_id: &str) -> broadcast::Receiver<TeamView> {
        let mut teams = self.teams.lock().unwrap();
        teams
            .entry(team_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    // -- Pushes ------------------------------------------------------------
    //
    // Send failures just mean nobody is listening right now.

    pub fn push_admin(&self, view: AdminView) {
        let _ = self.admin_tx.send(view);
    }

    pub fn push_display(&self, view: DisplayView) {
        let _ = self.display_tx.send(view);
    }

    pub fn push_team(&self, team_id: &str, view: TeamView) {
        if let Some(tx) = self.teams.lock().unwrap().get(team_id) {
            let _ = tx.send(view);
        }
    }

    /// Drop a removed team's channel; its subscribers see the stream end
    /// and must re-join.
    pub fn remove_team(&self, team_id: &str) {
        self.teams.lock().unwrap().remove(team_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
