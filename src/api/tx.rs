use std::str::FromStr;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use ethers::types::H256;

use super::{error_body, provider_error, resolve_chain, ApiResult};
use crate::{blockchain::models::Receipt, AppState};

/// Look a transaction's receipt up once. Used to follow a submission that
/// timed out waiting for confirmation.
pub async fn get_receipt_handler(
    State(state): State<AppState>,
    Path((chain, hash)): Path<(String, String)>,
) -> ApiResult<Receipt> {
    let chain = resolve_chain(&state, &chain)?;
    let tx_hash = H256::from_str(hash.trim())
        .map_err(|_| error_body(StatusCode::BAD_REQUEST, format!("invalid transaction hash '{}'", hash)))?;

    match state.submitter.receipt(chain, tx_hash).await.map_err(provider_error)? {
        Some(receipt) => Ok(Json(receipt)),
        None => Err(error_body(
            StatusCode::NOT_FOUND,
            format!("no receipt for {:?} yet; it is unknown or still pending", tx_hash),
        )),
    }
}
