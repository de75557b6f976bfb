use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use ethers::types::U256;
use ethers::utils::to_checksum;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{contract_error, error_body, key_error, submission_error, ApiResult};
use crate::{
    blockchain::{key_material::Account, models::Receipt},
    AppState,
};

/// Request to store a value in the storage contract
#[derive(Debug, Deserialize)]
pub struct SetValueRequest {
    /// Hex private key of the sending account; never logged or echoed
    pub private_key: SecretString,
    pub value: u64,
    /// Optional overrides of the configured gas defaults
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct StoredValueResponse {
    pub chain: String,
    pub contract: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct SetValueResponse {
    pub from: String,
    pub receipt: Receipt,
}

pub async fn get_value_handler(
    State(state): State<AppState>,
    Path(chain): Path<String>,
) -> ApiResult<StoredValueResponse> {
    let target = super::resolve_chain(&state, &chain)?;
    let storage = state.storage();
    let value = storage.get(target).await.map_err(contract_error)?;

    Ok(Json(StoredValueResponse {
        chain: target.id.clone(),
        contract: to_checksum(&storage.address(), None),
        value: value.to_string(),
    }))
}

pub async fn set_value_handler(
    State(state): State<AppState>,
    Path(chain): Path<String>,
    Json(req): Json<SetValueRequest>,
) -> ApiResult<SetValueResponse> {
    let mut session = state.config.session(&chain).ok_or_else(|| {
        error_body(StatusCode::BAD_REQUEST, format!("unknown chain '{}'", chain))
    })?;
    if let Some(gas_limit) = req.gas_limit {
        session.gas_limit = U256::from(gas_limit);
    }
    if let Some(gas_price) = req.gas_price {
        session.gas_price_wei = U256::from(gas_price);
    }

    let account = Account::load(req.private_key.expose_secret()).map_err(key_error)?;
    let from = account.checksummed();
    info!(chain = %session.chain.id, from = %from, value = req.value, "set value requested");

    let receipt = state
        .storage()
        .set(&state.submitter, account, &session, U256::from(req.value))
        .await
        .map_err(submission_error)?;

    Ok(Json(SetValueResponse { from, receipt }))
}
