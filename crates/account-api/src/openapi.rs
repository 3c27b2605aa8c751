// OpenAPI specification generation
//
// Served by the API server at /api-doc/openapi.json.

use crate::api;
use account_core::TransferStatus;
use utoipa::OpenApi;

/// OpenAPI documentation for the account service API
#[derive(OpenApi)]
#[openapi(
    paths(
        api::accounts::create_account,
        api::accounts::get_account,
        api::accounts::deposit_money,
        api::transfers::make_transfer,
        api::transfers::get_transfer,
    ),
    components(
        schemas(
            api::accounts::AccountWriteData, api::accounts::AccountReadData,
            api::accounts::DepositWriteData, api::accounts::DepositReadData,
            api::transfers::TransferWriteData, api::transfers::TransferReadData,
            TransferStatus,
        )
    ),
    tags(
        (name = "accounts", description = "Account and deposit endpoints"),
        (name = "transfers", description = "Money transfer endpoints")
    ),
    info(
        title = "Account Service API",
        description = "Event-sourced accounts with money transfers between them"
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI spec as a pretty-printed JSON string
    pub fn to_json() -> Result<String, serde_json::Error> {
        Self::openapi().to_pretty_json()
    }
}
