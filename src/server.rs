// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! JSON-over-HTTP API for the ledger.
//!
//! ## Endpoints
//!
//! - `GET  /api/profile?username=` - Fetch (or create) a profile
//! - `POST /api/profile/save` - Save a session, optionally overwriting the balance
//! - `POST /api/game/charge` - Debit a wager
//! - `POST /api/game/payout` - Credit winnings
//! - `GET  /api/admin/users` - List all accounts
//! - `GET  /api/admin/user-detail?username=` - One account with its history
//! - `POST /api/admin/set-balance` - Overwrite a balance
//! - `POST /api/admin/delete-user` - Delete an account
//!
//! Every body carries an `ok` flag. Client errors are `400` with an `error`
//! code; business refusals (`INSUFFICIENT_FUNDS`, `NO_SUCH_USER`) are `200`
//! with `ok: false`; storage faults are `500` with `SERVER_ERROR`. A body that
//! is not valid JSON is `INVALID_JSON` and an unreadable query string is
//! `INVALID_QUERY`, both `400`.
//!
//! The admin endpoints are not authenticated. Put them behind whatever access
//! control the deployment provides.
//!
//! ## Example Usage
//!
//! ```bash
//! curl 'http://localhost:3000/api/profile?username=alice'
//!
//! curl -X POST http://localhost:3000/api/game/charge \
//!   -H "Content-Type: application/json" \
//!   -d '{"username": "alice", "game": "slots", "amount": 200}'
//! ```

use crate::{ChargeOutcome, Ledger, LedgerError, Profile, Store, UserDetail};
use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

// === Requests ===
//
// Bodies are read leniently: a field of the wrong JSON type counts as absent,
// so a request never fails on field types alone.

/// Query string of the profile and user-detail endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct UsernameQuery {
    #[serde(default)]
    pub username: String,
}

/// Body of `POST /api/profile/save`.
#[derive(Debug, Default, Deserialize)]
pub struct SaveProfileRequest {
    #[serde(default, deserialize_with = "text")]
    pub username: Option<String>,
    #[serde(default)]
    pub balance: Option<Value>,
}

/// Body of the charge and payout endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct GameRequest {
    #[serde(default, deserialize_with = "text")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub game: Option<String>,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default, deserialize_with = "text")]
    pub desc: Option<String>,
}

/// Body of `POST /api/admin/set-balance`.
#[derive(Debug, Default, Deserialize)]
pub struct SetBalanceRequest {
    #[serde(default, deserialize_with = "text")]
    pub username: Option<String>,
    #[serde(default)]
    pub balance: Option<Value>,
    #[serde(default, deserialize_with = "text")]
    pub note: Option<String>,
}

/// Body of `POST /api/admin/delete-user`.
#[derive(Debug, Default, Deserialize)]
pub struct DeleteUserRequest {
    #[serde(default, deserialize_with = "text")]
    pub username: Option<String>,
}

/// JSON strings count; any other value reads as absent.
fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => Some(text),
        _ => None,
    })
}

/// JSON numbers count; strings, booleans and nulls do not.
fn numeric(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64)
}

/// Unwraps a JSON body.
///
/// A request without a JSON content type reads as an empty body. A body that
/// does not parse, or is not an object, is `INVALID_JSON`.
fn body<T: Default>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    match payload {
        Ok(Json(request)) => Ok(request),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(rejection) => {
            debug!(status = %rejection.status(), "request body rejected");
            Err(AppError::BadRequest("INVALID_JSON"))
        }
    }
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    params.map(|Query(params)| params).map_err(|rejection| {
        debug!(status = %rejection.status(), "query string rejected");
        AppError::BadRequest("INVALID_QUERY")
    })
}

// === Responses ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub ok: bool,
    pub username: String,
    pub balance: u64,
}

/// Balance after a mutation. `error` is set when a charge was refused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub balance: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsersResponse {
    pub ok: bool,
    pub users: Vec<Profile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserDetailResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub detail: UserDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
}

impl ErrorResponse {
    fn new(code: &str) -> Self {
        Self {
            ok: false,
            error: code.to_string(),
        }
    }
}

// === Errors ===

/// Wrapper for converting ledger failures into HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// The request could not be read; carries the error code.
    BadRequest(&'static str),
    Ledger(LedgerError),
    Task(JoinError),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError::Ledger(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::BadRequest(code) => (StatusCode::BAD_REQUEST, *code),
            AppError::Ledger(err) if err.is_client_error() => (StatusCode::BAD_REQUEST, err.code()),
            AppError::Ledger(err) => {
                error!(error = %err, "ledger operation failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "SERVER_ERROR")
            }
            AppError::Task(err) => {
                error!(error = %err, "ledger task did not complete");
                (StatusCode::INTERNAL_SERVER_ERROR, "SERVER_ERROR")
            }
        };
        (status, Json(ErrorResponse::new(code))).into_response()
    }
}

/// Runs a ledger call on the blocking pool; persistence does file i/o.
async fn run<S, T, F>(ledger: Arc<Ledger<S>>, op: F) -> Result<T, AppError>
where
    S: Store,
    T: Send + 'static,
    F: FnOnce(&Ledger<S>) -> Result<T, LedgerError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || op(ledger.as_ref()))
        .await
        .map_err(AppError::Task)?
        .map_err(AppError::from)
}

// === Handlers ===

/// GET /api/profile
async fn get_profile<S: Store>(
    State(ledger): State<Arc<Ledger<S>>>,
    params: Result<Query<UsernameQuery>, QueryRejection>,
) -> Result<Json<ProfileResponse>, AppError> {
    let params = query(params)?;
    let profile = run(ledger, move |l| l.get_or_create_account(&params.username)).await?;
    Ok(Json(ProfileResponse {
        ok: true,
        username: profile.username.to_string(),
        balance: profile.balance,
    }))
}

/// POST /api/profile/save
async fn save_profile<S: Store>(
    State(ledger): State<Arc<Ledger<S>>>,
    payload: Result<Json<SaveProfileRequest>, JsonRejection>,
) -> Result<Json<OkResponse>, AppError> {
    let request = body(payload)?;
    let balance = numeric(request.balance.as_ref());
    run(ledger, move |l| {
        l.save_profile(request.username.as_deref().unwrap_or_default(), balance)
    })
    .await?;
    Ok(Json(OkResponse { ok: true }))
}

/// POST /api/game/charge
async fn charge<S: Store>(
    State(ledger): State<Arc<Ledger<S>>>,
    payload: Result<Json<GameRequest>, JsonRejection>,
) -> Result<Json<BalanceResponse>, AppError> {
    let request = body(payload)?;
    let amount = numeric(request.amount.as_ref());
    let outcome = run(ledger, move |l| {
        l.charge(
            request.username.as_deref().unwrap_or_default(),
            request.game.as_deref(),
            amount,
            request.desc.as_deref(),
        )
    })
    .await?;

    let response = match outcome {
        ChargeOutcome::Charged { balance } => BalanceResponse {
            ok: true,
            error: None,
            balance,
        },
        ChargeOutcome::InsufficientFunds { balance } => BalanceResponse {
            ok: false,
            error: Some("INSUFFICIENT_FUNDS".to_string()),
            balance,
        },
    };
    Ok(Json(response))
}

/// POST /api/game/payout
async fn payout<S: Store>(
    State(ledger): State<Arc<Ledger<S>>>,
    payload: Result<Json<GameRequest>, JsonRejection>,
) -> Result<Json<BalanceResponse>, AppError> {
    let request = body(payload)?;
    let amount = numeric(request.amount.as_ref());
    let balance = run(ledger, move |l| {
        l.payout(
            request.username.as_deref().unwrap_or_default(),
            request.game.as_deref(),
            amount,
            request.desc.as_deref(),
        )
    })
    .await?;
    Ok(Json(BalanceResponse {
        ok: true,
        error: None,
        balance,
    }))
}

/// GET /api/admin/users
async fn list_users<S: Store>(
    State(ledger): State<Arc<Ledger<S>>>,
) -> Result<Json<UsersResponse>, AppError> {
    let users = run(ledger, |l| Ok(l.list_users())).await?;
    Ok(Json(UsersResponse { ok: true, users }))
}

/// GET /api/admin/user-detail
async fn user_detail<S: Store>(
    State(ledger): State<Arc<Ledger<S>>>,
    params: Result<Query<UsernameQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let params = query(params)?;
    let detail = run(ledger, move |l| l.get_user_detail(&params.username)).await?;
    let response = match detail {
        Some(detail) => Json(UserDetailResponse { ok: true, detail }).into_response(),
        None => Json(ErrorResponse::new("NO_SUCH_USER")).into_response(),
    };
    Ok(response)
}

/// POST /api/admin/set-balance
async fn set_balance<S: Store>(
    State(ledger): State<Arc<Ledger<S>>>,
    payload: Result<Json<SetBalanceRequest>, JsonRejection>,
) -> Result<Json<BalanceResponse>, AppError> {
    let request = body(payload)?;
    let balance = numeric(request.balance.as_ref());
    let balance = run(ledger, move |l| {
        l.admin_set_balance(
            request.username.as_deref().unwrap_or_default(),
            balance,
            request.note.as_deref(),
        )
    })
    .await?;
    Ok(Json(BalanceResponse {
        ok: true,
        error: None,
        balance,
    }))
}

/// POST /api/admin/delete-user
async fn delete_user<S: Store>(
    State(ledger): State<Arc<Ledger<S>>>,
    payload: Result<Json<DeleteUserRequest>, JsonRejection>,
) -> Result<Json<OkResponse>, AppError> {
    let request = body(payload)?;
    run(ledger, move |l| {
        l.admin_delete_user(request.username.as_deref().unwrap_or_default())
    })
    .await?;
    Ok(Json(OkResponse { ok: true }))
}

/// Builds the API router around `ledger`.
pub fn router<S: Store>(ledger: Arc<Ledger<S>>) -> Router {
    Router::new()
        .route("/api/profile", get(get_profile::<S>))
        .route("/api/profile/save", post(save_profile::<S>))
        .route("/api/game/charge", post(charge::<S>))
        .route("/api/game/payout", post(payout::<S>))
        .route("/api/admin/users", get(list_users::<S>))
        .route("/api/admin/user-detail", get(user_detail::<S>))
        .route("/api/admin/set-balance", post(set_balance::<S>))
        .route("/api/admin/delete-user", post(delete_user::<S>))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(ledger)
}

/// Serves the API on `listener` until Ctrl-C.
pub async fn serve<S: Store>(listener: TcpListener, ledger: Arc<Ledger<S>>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "ledger API listening");
    }
    axum::serve(listener, router(ledger))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}
