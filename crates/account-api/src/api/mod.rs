// HTTP API modules

pub mod accounts;
pub mod common;
pub mod transfers;

pub use accounts::AppState;
pub use common::{ApiError, ApiJson, ApiPath, BAD_REQUEST_MESSAGE};
