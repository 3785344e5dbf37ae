//! HTTP and WebSocket route handlers.
//!
//! REST endpoints return JSON; rejections map onto the error taxonomy in
//! [`AuctionError`] with a stable `{"error": code, "message": ...}` body.
//! WebSocket frames are tagged envelopes: `{"type":"state","data":{...}}`
//! for pushes, `{"type":"error","code":...,"message":...}` for soft
//! failures that keep the socket open.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::engine::Auction;
use crate::types::{AuctionError, AuditEvent};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ServerState {
    pub auction: Auction,
    pub admin_password: SecretString,
}

pub type AppState = Arc<ServerState>;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub name: String,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BidRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub item_label: Option<String>,
    pub duration_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRequest {
    pub team_id: String,
    pub wallet: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRequest {
    pub team_id: String,
    pub locked: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamIdRequest {
    pub team_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TeamSocketQuery {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct AdminSocketQuery {
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct ClientCommand {
    action: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub token: String,
    pub state: crate::types::TeamView,
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

impl IntoResponse for AuctionError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuctionError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuctionError::UnknownSession => StatusCode::UNAUTHORIZED,
            AuctionError::NotFound(_) | AuctionError::NoBid => StatusCode::NOT_FOUND,
            AuctionError::Conflict(_) | AuctionError::NameTaken(_) => StatusCode::CONFLICT,
            AuctionError::Cooldown { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuctionError::NoActiveRound
            | AuctionError::TeamLocked
            | AuctionError::BidCeiling { .. }
            | AuctionError::InsufficientFunds { .. } => StatusCode::BAD_REQUEST,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self, "Request failed");
        }
        let body = json!({ "error": self.code(), "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

fn require_admin(state: &ServerState, headers: &HeaderMap) -> Result<(), Response> {
    let supplied = headers
        .get("x-admin-password")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if supplied == state.admin_password.expose_secret() {
        Ok(())
    } else {
        debug!("Admin request rejected: bad password");
        let body = json!({ "error": "unauthorized", "message": "bad admin password" });
        Err((StatusCode::UNAUTHORIZED, Json(body)).into_response())
    }
}

// ---------------------------------------------------------------------------
// Team endpoints
// ---------------------------------------------------------------------------

/// POST /api/team/join
pub async fn team_join(State(state): State<AppState>, Json(req): Json<JoinRequest>) -> Response {
    match state.auction.join(&req.name, req.token.as_deref()).await {
        Ok((token, view)) => Json(JoinResponse { token, state: view }).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/team/bid
pub async fn team_bid(State(state): State<AppState>, Json(req): Json<BidRequest>) -> Response {
    match state.auction.attempt_bid(&req.token).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => e.into_response(),
    }
}

// ---------------------------------------------------------------------------
// Admin endpoints
// ---------------------------------------------------------------------------

/// POST /api/admin/login
pub async fn admin_login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Response {
    if req.password.as_str() == state.admin_password.expose_secret().as_str() {
        Json(json!({ "ok": true })).into_response()
    } else {
        let body = json!({ "error": "unauthorized", "message": "bad admin password" });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

/// POST /api/admin/round/start
pub async fn admin_round_start(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StartRequest>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let label = req.item_label.as_deref().unwrap_or("");
    match state.auction.admin_start(label, req.duration_seconds).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/admin/round/close
pub async fn admin_round_close(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.auction.admin_close().await {
        Ok(result) => Json(result).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/admin/round/reset
pub async fn admin_round_reset(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.auction.admin_reset().await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/admin/team/wallet
pub async fn admin_team_wallet(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<WalletRequest>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.auction.admin_set_wallet(&req.team_id, req.wallet).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/admin/team/lock
pub async fn admin_team_lock(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LockRequest>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.auction.admin_set_locked(&req.team_id, req.locked).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/admin/team/cancel-bid
pub async fn admin_team_cancel_bid(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TeamIdRequest>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.auction.admin_cancel_last_bid(&req.team_id).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/admin/team/remove
pub async fn admin_team_remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TeamIdRequest>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.auction.admin_remove_team(&req.team_id).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/admin/wallets/reset
pub async fn admin_wallets_reset(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.auction.admin_reset_all_wallets().await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/admin/teams
pub async fn admin_teams(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.auction.admin_view().await {
        Ok(view) => Json(view).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/admin/export
pub async fn admin_export(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.auction.export_audit_log().await {
        Ok(events) => {
            let csv = export_csv(&events);
            (
                [
                    (header::CONTENT_TYPE, "text/csv"),
                    (
                        header::CONTENT_DISPOSITION,
                        "attachment; filename=\"auction-log.csv\"",
                    ),
                ],
                csv,
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// GET /api/display
pub async fn display(State(state): State<AppState>) -> Response {
    match state.auction.display_view().await {
        Ok(view) => Json(view).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// CSV export
// ---------------------------------------------------------------------------

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn export_csv(events: &[AuditEvent]) -> String {
    let mut out = String::from("ID,Event,Time,TeamName,TeamId,Amount,ItemLabel\n");
    for event in events {
        let payload = event.payload_json();
        let time = chrono::DateTime::from_timestamp_millis(event.timestamp)
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        let team_name = payload.get("name").and_then(|v| v.as_str()).unwrap_or("");
        let team_id = payload.get("teamId").and_then(|v| v.as_str()).unwrap_or("");
        let amount = payload
            .get("amount")
            .or_else(|| payload.get("cancelledAmount"))
            .or_else(|| payload.get("wallet"))
            .and_then(|v| v.as_i64())
            .map(|v| v.to_string())
            .unwrap_or_default();
        let item_label = payload
            .get("itemLabel")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        out.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            event.id,
            csv_field(&event.kind),
            time,
            csv_field(team_name),
            team_id,
            amount,
            csv_field(item_label),
        ));
    }
    out
}

// ---------------------------------------------------------------------------
// WebSocket endpoints
// ---------------------------------------------------------------------------

fn state_frame<T: Serialize>(view: &T) -> String {
    json!({ "type": "state", "data": view }).to_string()
}

fn error_frame(err: &AuctionError) -> String {
    json!({ "type": "error", "code": err.code(), "message": err.to_string() }).to_string()
}

/// GET /ws/team?token=...
pub async fn ws_team(
    ws: WebSocketUpgrade,
    Query(query): Query<TeamSocketQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| team_socket(socket, state, query.token))
}

async fn team_socket(socket: WebSocket, state: AppState, token: String) {
    let (mut sink, mut stream) = socket.split();

    // A stale token gets a soft error so the client can re-join.
    let team = match state.auction.reconnect(&token).await {
        Ok(team) => team,
        Err(e) => {
            let _ = sink.send(Message::Text(error_frame(&e))).await;
            return;
        }
    };

    let mut updates = state.auction.registry().subscribe_team(&team.id);
    match state.auction.projector().team_view(&team.id).await {
        Ok(view) => {
            if sink.send(Message::Text(state_frame(&view))).await.is_err() {
                return;
            }
        }
        Err(e) => {
            let _ = sink.send(Message::Text(error_frame(&e))).await;
            return;
        }
    }

    debug!(team = %team.name, "Team socket connected");

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(view) => {
                    if sink.send(Message::Text(state_frame(&view))).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let Ok(cmd) = serde_json::from_str::<ClientCommand>(&text) else {
                        continue;
                    };
                    if cmd.action == "bid" {
                        // Rejections go back on this socket only; accepted
                        // bids come back through the broadcast channel.
                        if let Err(e) = state.auction.attempt_bid(&token).await {
                            if sink.send(Message::Text(error_frame(&e))).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }

    debug!(team = %team.name, "Team socket closed");
}

/// GET /ws/admin?password=...
pub async fn ws_admin(
    ws: WebSocketUpgrade,
    Query(query): Query<AdminSocketQuery>,
    State(state): State<AppState>,
) -> Response {
    if query.password.as_str() != state.admin_password.expose_secret().as_str() {
        let body = json!({ "error": "unauthorized", "message": "bad admin password" });
        return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    }
    ws.on_upgrade(move |socket| admin_socket(socket, state))
}

async fn admin_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut updates = state.auction.registry().subscribe_admin();

    match state.auction.admin_view().await {
        Ok(view) => {
            if sink.send(Message::Text(state_frame(&view))).await.is_err() {
                return;
            }
        }
        Err(e) => {
            let _ = sink.send(Message::Text(error_frame(&e))).await;
            return;
        }
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(view) => {
                    if sink.send(Message::Text(state_frame(&view))).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }
}

/// GET /ws/display
pub async fn ws_display(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| display_socket(socket, state))
}

async fn display_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut updates = state.auction.registry().subscribe_display();

    match state.auction.display_view().await {
        Ok(view) => {
            if sink.send(Message::Text(state_frame(&view))).await.is_err() {
                return;
            }
        }
        Err(e) => {
            let _ = sink.send(Message::Text(error_frame(&e))).await;
            return;
        }
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(view) => {
                    if sink.send(Message::Text(state_frame(&view))).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (AuctionError::UnknownSession, StatusCode::UNAUTHORIZED),
            (AuctionError::NoBid, StatusCode::NOT_FOUND),
            (AuctionError::NameTaken("x".into()), StatusCode::CONFLICT),
            (
                AuctionError::Cooldown { remaining_ms: 10 },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (AuctionError::NoActiveRound, StatusCode::BAD_REQUEST),
            (AuctionError::TeamLocked, StatusCode::BAD_REQUEST),
            (
                AuctionError::BidCeiling { next_bid: 2_200, max_bid: 2_000 },
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_export_csv_columns() {
        let events = vec![AuditEvent {
            id: 1,
            kind: "bid".into(),
            payload: r#"{"teamId":"t1","name":"Heisenbugs","amount":600}"#.into(),
            timestamp: 1_700_000_000_000,
        }];
        let csv = export_csv(&events);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "ID,Event,Time,TeamName,TeamId,Amount,ItemLabel"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("1,bid,"));
        assert!(row.contains("Heisenbugs"));
        assert!(row.contains("t1"));
        assert!(row.contains("600"));
    }

    #[test]
    fn test_export_csv_round_start_label() {
        let events = vec![AuditEvent {
            id: 2,
            kind: "round_start".into(),
            payload: r#"{"roundId":1,"itemLabel":"Null pointer, checkout","durationSeconds":90}"#
                .into(),
            timestamp: 1_700_000_000_000,
        }];
        let csv = export_csv(&events);
        assert!(csv.contains("\"Null pointer, checkout\""));
    }

    #[test]
    fn test_frames_are_tagged() {
        let frame = state_frame(&json!({ "wallet": 12_000 }));
        assert!(frame.contains("\"type\":\"state\""));

        let frame = error_frame(&AuctionError::TeamLocked);
        assert!(frame.contains("\"type\":\"error\""));
        assert!(frame.contains("team_locked"));
    }

    #[test]
    fn test_join_request_accepts_camel_case() {
        let req: JoinRequest =
            serde_json::from_str(r#"{"name":"Heisenbugs","token":null}"#).unwrap();
        assert_eq!(req.name, "Heisenbugs");
        assert!(req.token.is_none());

        let req: StartRequest =
            serde_json::from_str(r#"{"itemLabel":"Race in login","durationSeconds":60}"#).unwrap();
        assert_eq!(req.item_label.as_deref(), Some("Race in login"));
        assert_eq!(req.duration_seconds, Some(60));
    }
}
