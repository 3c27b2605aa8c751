// Account HTTP routes

use std::sync::Arc;

use account_core::{AccountState, Money, TransferState, TransferStatus};
use account_runtime::AccountService;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::{ApiError, ApiJson, ApiPath};

/// Request to create an account
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccountWriteData {
    /// Client-chosen account id
    pub account_id: Uuid,
    #[schema(example = "Savings")]
    pub name: String,
}

/// Account as returned by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AccountReadData {
    pub account_id: Uuid,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64, example = 100.5)]
    pub balance: Money,
}

impl From<&AccountState> for AccountReadData {
    fn from(state: &AccountState) -> Self {
        Self {
            account_id: state.id,
            name: state.name.clone(),
            balance: state.balance,
        }
    }
}

/// Request to deposit money from outside the system
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DepositWriteData {
    /// Client-chosen id, unique across transfers and deposits
    pub transfer_id: Uuid,
    /// Positive amount, as a JSON number or string
    #[schema(value_type = f64, example = 100.0)]
    pub amount: Money,
}

/// Outcome of a deposit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DepositReadData {
    pub transfer_id: Uuid,
    pub target_account_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64, example = 100.0)]
    pub amount: Money,
    pub status: TransferStatus,
}

impl From<&TransferState> for DepositReadData {
    fn from(state: &TransferState) -> Self {
        Self {
            transfer_id: state.id,
            target_account_id: state.target_account_id,
            amount: state.amount,
            status: state.status,
        }
    }
}

/// App state for account routes
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn AccountService>,
}

impl AppState {
    pub fn new(service: Arc<dyn AccountService>) -> Self {
        Self { service }
    }
}

/// Create account routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/accounts", post(create_account))
        .route("/accounts/:account_id", get(get_account))
        .route("/accounts/:account_id/deposit", post(deposit_money))
        .with_state(state)
}

/// POST /accounts - Create an account with zero balance
#[utoipa::path(
    post,
    path = "/accounts",
    request_body = AccountWriteData,
    responses(
        (status = 200, description = "Account created, body is the account id", body = String),
        (status = 400, description = "Malformed request"),
        (status = 409, description = "Account already exists")
    ),
    tag = "accounts"
)]
pub async fn create_account(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<AccountWriteData>,
) -> Result<Json<Uuid>, ApiError> {
    let id = state.service.create_account(req.account_id, req.name).await?;
    Ok(Json(id))
}

/// GET /accounts/{account_id} - Get an account
#[utoipa::path(
    get,
    path = "/accounts/{account_id}",
    params(("account_id" = Uuid, Path, description = "Account ID")),
    responses(
        (status = 200, description = "Account found", body = AccountReadData),
        (status = 404, description = "Account not found")
    ),
    tag = "accounts"
)]
pub async fn get_account(
    State(state): State<AppState>,
    ApiPath(account_id): ApiPath<Uuid>,
) -> Result<Json<AccountReadData>, ApiError> {
    let account = state.service.retrieve_account(account_id).await?;
    Ok(Json(AccountReadData::from(&account)))
}

/// POST /accounts/{account_id}/deposit - Deposit money into an account
#[utoipa::path(
    post,
    path = "/accounts/{account_id}/deposit",
    params(("account_id" = Uuid, Path, description = "Target account ID")),
    request_body = DepositWriteData,
    responses(
        (status = 200, description = "Deposit finished", body = DepositReadData),
        (status = 400, description = "Malformed request or non-positive amount"),
        (status = 404, description = "Account not found"),
        (status = 409, description = "Transfer id already used or being created"),
        (status = 504, description = "Deposit did not finish in time")
    ),
    tag = "accounts"
)]
pub async fn deposit_money(
    State(state): State<AppState>,
    ApiPath(account_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<DepositWriteData>,
) -> Result<Json<DepositReadData>, ApiError> {
    let transfer = state
        .service
        .deposit_money(req.transfer_id, account_id, req.amount)
        .await?;
    Ok(Json(DepositReadData::from(&transfer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use account_core::{TransferEvent, TransferKind};
    use chrono::Utc;
    use serde_json::json;

    fn transfer_state() -> TransferState {
        TransferEvent::Started {
            id: Uuid::new_v4(),
            kind: TransferKind::Deposit,
            source_account_id: Uuid::new_v4(),
            target_account_id: Uuid::new_v4(),
            amount: Money::from(100),
            time: Utc::now(),
        }
        .apply(None)
        .unwrap()
    }

    #[test]
    fn test_account_read_data_from_state() {
        let state = AccountState::new(Uuid::new_v4(), "test", Money::from(100), Utc::now());
        let data = AccountReadData::from(&state);

        assert_eq!(data.account_id, state.id);
        assert_eq!(data.name, "test");
        assert_eq!(data.balance, state.balance);
        assert_eq!(
            serde_json::to_value(&data).unwrap(),
            json!({"account_id": state.id, "name": "test", "balance": 100.0})
        );
    }

    #[test]
    fn test_deposit_read_data_from_state() {
        let state = transfer_state();
        let data = DepositReadData::from(&state);

        assert_eq!(data.transfer_id, state.id);
        assert_eq!(data.target_account_id, state.target_account_id);
        assert_eq!(data.amount, state.amount);
        assert_eq!(
            serde_json::to_value(&data).unwrap(),
            json!({
                "transfer_id": state.id,
                "target_account_id": state.target_account_id,
                "amount": 100.0,
                "status": "in_progress"
            })
        );
    }

    #[test]
    fn test_write_data_accepts_number_or_string_amount() {
        let id = Uuid::new_v4();
        let from_number: DepositWriteData =
            serde_json::from_value(json!({"transfer_id": id, "amount": 50.0})).unwrap();
        let from_string: DepositWriteData =
            serde_json::from_value(json!({"transfer_id": id, "amount": "50.0"})).unwrap();

        assert_eq!(from_number.transfer_id, id);
        assert_eq!(from_number.amount, Money::from(50));
        assert_eq!(from_string.amount, Money::from(50));

        let account: AccountWriteData = serde_json::from_value(
            json!({"account_id": id, "name": "test", "ignored": true}),
        )
        .unwrap();
        assert_eq!(account.account_id, id);
        assert_eq!(account.name, "test");
    }
}
