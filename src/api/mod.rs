//! HTTP surface of the gateway
//!
//! Signed JSON endpoints for channel and chaincode lifecycle, chaincode
//! invocation and the paginated block record listing.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use handlers::AppState;
pub use server::{create_app, GatewayServer};
