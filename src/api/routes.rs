//! Route Definitions

use super::handlers::*;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        // Channel and chaincode lifecycle
        .route("/channel/create", post(create_channel_handler))
        .route("/chaincode/join", post(join_channel_handler))
        .route("/chaincode/install", post(install_chaincode_handler))
        .route("/chaincode/instantiate", post(instantiate_chaincode_handler))
        .route("/chaincode/upgrade", post(upgrade_chaincode_handler))
        // Invocation
        .route("/chaincode/exec", post(exec_chaincode_handler))
        .route("/chaincode/query", post(query_chaincode_handler))
        // Block records
        .route("/pagination/block", get(list_blocks_handler))
        .route("/block/tx/:tx_id", get(block_by_tx_handler))
        .route("/callback", post(callback_handler));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api)
        .with_state(state)
}
