use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use super::{resolve_chain, wallet_query_error, ApiResult};
use crate::{
    blockchain::{
        models::{Approval, Balance, NftAsset, TokenTransfer, WalletSummary},
        normalizer::Normalized,
    },
    AppState,
};

/// Read-only wallet views, `/wallet/:chain/:address/...`.
pub fn create_wallet_router() -> Router<AppState> {
    Router::new()
        .route("/wallet/:chain/:address/summary", get(summary_handler))
        .route("/wallet/:chain/:address/balance", get(balance_handler))
        .route("/wallet/:chain/:address/tokens", get(tokens_handler))
        .route("/wallet/:chain/:address/transfers", get(transfers_handler))
        .route("/wallet/:chain/:address/nfts", get(nfts_handler))
        .route("/wallet/:chain/:address/approvals", get(approvals_handler))
}

pub async fn summary_handler(
    State(state): State<AppState>,
    Path((chain, address)): Path<(String, String)>,
) -> ApiResult<WalletSummary> {
    let chain = resolve_chain(&state, &chain)?;
    state
        .aggregator
        .summary(&address, chain)
        .await
        .map(Json)
        .map_err(wallet_query_error)
}

pub async fn balance_handler(
    State(state): State<AppState>,
    Path((chain, address)): Path<(String, String)>,
) -> ApiResult<Balance> {
    let chain = resolve_chain(&state, &chain)?;
    state
        .aggregator
        .native_balance(&address, chain)
        .await
        .map(Json)
        .map_err(wallet_query_error)
}

pub async fn tokens_handler(
    State(state): State<AppState>,
    Path((chain, address)): Path<(String, String)>,
) -> ApiResult<Normalized<Balance>> {
    let chain = resolve_chain(&state, &chain)?;
    state
        .aggregator
        .token_balances(&address, chain)
        .await
        .map(Json)
        .map_err(wallet_query_error)
}

pub async fn transfers_handler(
    State(state): State<AppState>,
    Path((chain, address)): Path<(String, String)>,
) -> ApiResult<Normalized<TokenTransfer>> {
    let chain = resolve_chain(&state, &chain)?;
    state
        .aggregator
        .transfers(&address, chain)
        .await
        .map(Json)
        .map_err(wallet_query_error)
}

pub async fn nfts_handler(
    State(state): State<AppState>,
    Path((chain, address)): Path<(String, String)>,
) -> ApiResult<Normalized<NftAsset>> {
    let chain = resolve_chain(&state, &chain)?;
    state
        .aggregator
        .nfts(&address, chain)
        .await
        .map(Json)
        .map_err(wallet_query_error)
}

pub async fn approvals_handler(
    State(state): State<AppState>,
    Path((chain, address)): Path<(String, String)>,
) -> ApiResult<Normalized<Approval>> {
    let chain = resolve_chain(&state, &chain)?;
    state
        .aggregator
        .approvals(&address, chain)
        .await
        .map(Json)
        .map_err(wallet_query_error)
}
