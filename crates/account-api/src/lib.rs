// Account service HTTP server library
//
// Exposed as a library so integration tests can drive the router directly.

pub mod api;
pub mod boot;
pub mod config;
pub mod openapi;
pub mod shutdown;

pub use boot::{build, build_router, AppContext};
pub use config::{AppConfig, StorageBackend};
pub use openapi::ApiDoc;
