// Transfer HTTP routes

use account_core::{Money, TransferState, TransferStatus};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::accounts::AppState;
use super::common::{ApiError, ApiJson, ApiPath};

/// Request to move money between two accounts
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransferWriteData {
    /// Client-chosen id, unique across transfers and deposits
    pub transfer_id: Uuid,
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    /// Positive amount, as a JSON number or string
    #[schema(value_type = f64, example = 25.5)]
    pub amount: Money,
}

/// Transfer as returned by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TransferReadData {
    pub transfer_id: Uuid,
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64, example = 25.5)]
    pub amount: Money,
    pub status: TransferStatus,
}

impl From<&TransferState> for TransferReadData {
    fn from(state: &TransferState) -> Self {
        Self {
            transfer_id: state.id,
            source_account_id: state.source_account_id,
            target_account_id: state.target_account_id,
            amount: state.amount,
            status: state.status,
        }
    }
}

/// Create transfer routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/transfers", post(make_transfer))
        .route("/transfers/:transfer_id", get(get_transfer))
        .with_state(state)
}

/// POST /transfers - Transfer money and wait for the outcome
#[utoipa::path(
    post,
    path = "/transfers",
    request_body = TransferWriteData,
    responses(
        (status = 200, description = "Transfer finished, see status for the outcome", body = TransferReadData),
        (status = 400, description = "Malformed request, non-positive amount or same account"),
        (status = 404, description = "Source or target account not found"),
        (status = 409, description = "Transfer id already used or being created"),
        (status = 504, description = "Transfer did not finish in time, it continues in the background")
    ),
    tag = "transfers"
)]
pub async fn make_transfer(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<TransferWriteData>,
) -> Result<Json<TransferReadData>, ApiError> {
    let transfer = state
        .service
        .make_transfer(
            req.transfer_id,
            req.source_account_id,
            req.target_account_id,
            req.amount,
        )
        .await?;
    Ok(Json(TransferReadData::from(&transfer)))
}

/// GET /transfers/{transfer_id} - Get a transfer or deposit
#[utoipa::path(
    get,
    path = "/transfers/{transfer_id}",
    params(("transfer_id" = Uuid, Path, description = "Transfer ID")),
    responses(
        (status = 200, description = "Transfer found", body = TransferReadData),
        (status = 404, description = "Transfer not found")
    ),
    tag = "transfers"
)]
pub async fn get_transfer(
    State(state): State<AppState>,
    ApiPath(transfer_id): ApiPath<Uuid>,
) -> Result<Json<TransferReadData>, ApiError> {
    let transfer = state.service.retrieve_transfer(transfer_id).await?;
    Ok(Json(TransferReadData::from(&transfer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use account_core::{TransferEvent, TransferKind};
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_transfer_read_data_from_state() {
        let started = TransferEvent::Started {
            id: Uuid::new_v4(),
            kind: TransferKind::Transfer,
            source_account_id: Uuid::new_v4(),
            target_account_id: Uuid::new_v4(),
            amount: "12.5".parse().unwrap(),
            time: Utc::now(),
        }
        .apply(None)
        .unwrap();
        let state = TransferEvent::MoneyBlockFailed {
            status: TransferStatus::LowBalance,
            time: Utc::now(),
        }
        .apply(Some(started))
        .unwrap();

        let data = TransferReadData::from(&state);
        assert_eq!(data.transfer_id, state.id);
        assert_eq!(data.source_account_id, state.source_account_id);
        assert_eq!(data.target_account_id, state.target_account_id);
        assert_eq!(
            serde_json::to_value(&data).unwrap(),
            json!({
                "transfer_id": state.id,
                "source_account_id": state.source_account_id,
                "target_account_id": state.target_account_id,
                "amount": 12.5,
                "status": "low_balance"
            })
        );
    }

    #[test]
    fn test_transfer_write_data_requires_all_fields() {
        let result: Result<TransferWriteData, _> = serde_json::from_value(json!({
            "transfer_id": Uuid::new_v4(),
            "source_account_id": Uuid::new_v4(),
            "amount": 1
        }));
        assert!(result.is_err());
    }
}
