//! # API Module
//!
//! HTTP handlers over the wallet aggregator and the transaction submitter.
//!
//! ## Available Endpoints
//!
//! - `GET /api/health`
//! - `GET /api/wallet/:chain/:address/{summary,balance,tokens,transfers,nfts,approvals}`
//! - `GET /api/storage/:chain` - read the storage contract
//! - `POST /api/storage/:chain` - store a value, signing with the supplied key
//! - `GET /api/tx/:chain/:hash` - re-check a transaction receipt
//!
//! Errors are returned as `{"error": "..."}` with a status derived from the
//! failure: bad input is 400, upstream failures 502, a rejected broadcast 422
//! and an unconfirmed (but accepted) transaction 202.

use axum::{
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, warn};

use crate::blockchain::models::{
    ChainTarget, ContractError, FactFailure, KeyError, ProviderError, SubmissionError, WalletQueryError,
};
use crate::AppState;

pub mod health;
pub mod storage;
pub mod tx;
pub mod wallet;

pub type ApiError = (StatusCode, Json<Value>);
pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// All routes, nested under `/api`, with request tracing.
pub fn router(state: AppState) -> Router {
    let api_router = Router::new()
        .route("/health", get(health::health_handler))
        .merge(wallet::create_wallet_router())
        .route(
            "/storage/:chain",
            get(storage::get_value_handler).post(storage::set_value_handler),
        )
        .route("/tx/:chain/:hash", get(tx::get_receipt_handler));

    Router::new()
        .nest("/api", api_router)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub(crate) fn error_body(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Resolve a path segment to a configured chain, or 400.
pub(crate) fn resolve_chain<'a>(state: &'a AppState, chain: &str) -> Result<&'a ChainTarget, ApiError> {
    state.config.chain(chain).ok_or_else(|| {
        error_body(
            StatusCode::BAD_REQUEST,
            format!(
                "unknown chain '{}'; configured chains: {}",
                chain,
                state.config.supported_chains().join(", ")
            ),
        )
    })
}

fn fact_failure_json(failure: &FactFailure) -> Value {
    json!({
        "fact": failure.fact,
        "message": failure.to_string(),
        "attempts": failure
            .attempts
            .iter()
            .map(|(provider, err)| json!({ "provider": provider, "error": err.to_string() }))
            .collect::<Vec<_>>(),
    })
}

pub(crate) fn wallet_query_error(err: WalletQueryError) -> ApiError {
    match err {
        WalletQueryError::InvalidAddress(e) => error_body(StatusCode::BAD_REQUEST, e.to_string()),
        WalletQueryError::Fact(failure) => {
            warn!(error = %failure, "wallet query failed");
            let mut body = fact_failure_json(&failure);
            body["error"] = Value::String(failure.to_string());
            (StatusCode::BAD_GATEWAY, Json(body))
        }
        WalletQueryError::Aggregation(aggregation) => {
            warn!(error = %aggregation, "wallet summary incomplete");
            let body = json!({
                "error": aggregation.to_string(),
                "failures": aggregation.failures.iter().map(fact_failure_json).collect::<Vec<_>>(),
                "partial": aggregation.partial,
            });
            (StatusCode::BAD_GATEWAY, Json(body))
        }
    }
}

pub(crate) fn key_error(err: KeyError) -> ApiError {
    error_body(StatusCode::BAD_REQUEST, err.to_string())
}

pub(crate) fn provider_error(err: ProviderError) -> ApiError {
    warn!(error = %err, "upstream call failed");
    error_body(StatusCode::BAD_GATEWAY, err.to_string())
}

pub(crate) fn contract_error(err: ContractError) -> ApiError {
    warn!(error = %err, "contract read failed");
    error_body(StatusCode::BAD_GATEWAY, err.to_string())
}

pub(crate) fn submission_error(err: SubmissionError) -> ApiError {
    match &err {
        SubmissionError::Broadcast(_) => error_body(StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
        SubmissionError::ConfirmationTimeout { tx_hash, .. } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "pending",
                "tx_hash": format!("{:?}", tx_hash),
                "error": err.to_string(),
            })),
        ),
        SubmissionError::Signing(_) => {
            error!(error = %err, "signing failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
        SubmissionError::Nonce(_) | SubmissionError::BroadcastTransport(_) => {
            warn!(error = %err, "transaction submission failed");
            error_body(StatusCode::BAD_GATEWAY, err.to_string())
        }
    }
}
