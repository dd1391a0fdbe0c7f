//! Ledger Gateway - HTTP gateway for a permissioned ledger network
//!
//! Accepts signed JSON requests, manages one network session per configured
//! organization, caches per-(channel, org, user) clients, submits chaincode
//! transactions and queries, forwards chaincode events to webhooks and keeps a
//! local, paginated record of the block that committed each transaction.

pub mod api;
pub mod auth;
pub mod block_query;
pub mod client_cache;
pub mod common;
pub mod config;
pub mod errors;
pub mod network;
pub mod orchestrator;
pub mod recorder;
pub mod session;
pub mod storage;
pub mod webhook;

pub use config::GatewayConfig;
pub use errors::{GatewayError, GatewayResult};

use crate::{
    api::AppState,
    auth::Authenticator,
    block_query::BlockQueryService,
    client_cache::ClientCache,
    common::traits::{BlockStore, NetworkSessionFactory},
    orchestrator::{EventSink, TransactionOrchestrator},
    recorder::CommitRecorder,
    session::SessionRegistry,
};
use std::sync::Arc;

/// Open every organization session and assemble the shared request state.
///
/// Fails if any organization session cannot be opened; nothing is left open
/// in that case.
pub async fn build_app_state(
    config: &GatewayConfig,
    factory: &dyn NetworkSessionFactory,
    store: Arc<dyn BlockStore>,
    sink: Arc<dyn EventSink>,
) -> GatewayResult<Arc<AppState>> {
    let sessions = Arc::new(
        SessionRegistry::init(&config.organizations, factory, &config.network.chaincode_root).await?,
    );
    let cache = Arc::new(ClientCache::new(sessions.clone()));

    Ok(Arc::new(AppState {
        authenticator: Authenticator::new(config.auth.max_request_age_secs),
        sessions,
        orchestrator: TransactionOrchestrator::new(cache, sink, config.event_wait_timeout()),
        recorder: Arc::new(CommitRecorder::new(store.clone())),
        blocks: BlockQueryService::new(store),
    }))
}
