//! Request Handlers
//!
//! Each signed endpoint parses its body, rebuilds the canonical source string,
//! verifies the signature and only then touches the network or the store.

use super::{
    errors::ApiError,
    middleware::RequestId,
    models::*,
};
use crate::{
    auth::Authenticator,
    block_query::{page_window, BlockQueryService},
    common::types::{BlockRecord, ChaincodeEvent, PageRequest, SortOrder},
    errors::GatewayError,
    orchestrator::TransactionOrchestrator,
    recorder::CommitRecorder,
    session::SessionRegistry,
};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    Extension, Json,
};
use std::sync::Arc;
use tracing::info;

/// Shared application state
pub struct AppState {
    pub authenticator: Authenticator,
    pub sessions: Arc<SessionRegistry>,
    pub orchestrator: TransactionOrchestrator,
    pub recorder: Arc<CommitRecorder>,
    pub blocks: BlockQueryService,
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn parse_body<T>(request_id: &RequestId, body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(inner)| inner)
        .map_err(|e| ApiError::new(&request_id.0, GatewayError::ParseParams(e.body_text())))
}

fn verify(state: &AppState, request_id: &RequestId, timestamp: i64, sign: &str, src: &str) -> Result<(), ApiError> {
    state
        .authenticator
        .verify(timestamp, sign, src)
        .map_err(|e| ApiError::new(&request_id.0, e))
}

/// Health check handler
/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let mut organizations: Vec<String> = state.sessions.org_names().map(str::to_string).collect();
    organizations.sort();
    Json(HealthResponse {
        status: "Running".to_string(),
        organizations,
    })
}

/// POST /api/channel/create
pub async fn create_channel_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChannelRequest>, JsonRejection>,
) -> ApiResult<()> {
    let req = parse_body(&request_id, body)?;
    verify(&state, &request_id, req.timestamp, &req.sign, &req.canonical())?;

    let err = |e| ApiError::new(&request_id.0, e);
    let session = state.sessions.get(&req.org_name).map_err(err)?;
    session.create_channel(&req.channel_id).await.map_err(err)?;

    Ok(Json(ApiResponse::ok_empty("channel created")))
}

/// POST /api/chaincode/join
pub async fn join_channel_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChannelRequest>, JsonRejection>,
) -> ApiResult<()> {
    let req = parse_body(&request_id, body)?;
    verify(&state, &request_id, req.timestamp, &req.sign, &req.canonical())?;

    let err = |e| ApiError::new(&request_id.0, e);
    let session = state.sessions.get(&req.org_name).map_err(err)?;
    session.join_channel(&req.channel_id).await.map_err(err)?;

    Ok(Json(ApiResponse::ok_empty("channel joined")))
}

/// POST /api/chaincode/install
pub async fn install_chaincode_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChaincodeLifecycleRequest>, JsonRejection>,
) -> ApiResult<()> {
    let req = parse_body(&request_id, body)?;
    verify(&state, &request_id, req.timestamp, &req.sign, &req.install_canonical())?;

    let err = |e| ApiError::new(&request_id.0, e);
    let session = state.sessions.get(&req.org_name).map_err(err)?;
    session
        .install_chaincode(&req.chaincode_id, &req.chaincode_version, &req.chaincode_path)
        .await
        .map_err(err)?;

    Ok(Json(ApiResponse::ok_empty("chaincode installed")))
}

/// POST /api/chaincode/instantiate
pub async fn instantiate_chaincode_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChaincodeLifecycleRequest>, JsonRejection>,
) -> ApiResult<()> {
    let req = parse_body(&request_id, body)?;
    verify(&state, &request_id, req.timestamp, &req.sign, &req.deploy_canonical())?;

    let err = |e| ApiError::new(&request_id.0, e);
    let session = state.sessions.get(&req.org_name).map_err(err)?;
    session
        .instantiate_chaincode(
            &req.channel_id,
            &req.chaincode_id,
            &req.chaincode_version,
            &req.chaincode_path,
            &req.args,
        )
        .await
        .map_err(err)?;

    Ok(Json(ApiResponse::ok_empty("chaincode instantiated")))
}

/// POST /api/chaincode/upgrade
pub async fn upgrade_chaincode_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChaincodeLifecycleRequest>, JsonRejection>,
) -> ApiResult<()> {
    let req = parse_body(&request_id, body)?;
    verify(&state, &request_id, req.timestamp, &req.sign, &req.deploy_canonical())?;

    let err = |e| ApiError::new(&request_id.0, e);
    let session = state.sessions.get(&req.org_name).map_err(err)?;
    session
        .upgrade_chaincode(
            &req.channel_id,
            &req.chaincode_id,
            &req.chaincode_version,
            &req.chaincode_path,
            &req.args,
        )
        .await
        .map_err(err)?;

    Ok(Json(ApiResponse::ok_empty("chaincode upgraded")))
}

/// Execute a transaction and record the block that committed it
/// POST /api/chaincode/exec
pub async fn exec_chaincode_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChaincodeInvokeRequest>, JsonRejection>,
) -> ApiResult<InvocationResponse> {
    let req = parse_body(&request_id, body)?;
    let err = |e| ApiError::new(&request_id.0, e);
    req.ensure_args().map_err(err)?;
    verify(&state, &request_id, req.timestamp, &req.sign, &req.exec_canonical())?;

    let invocation = req.invocation();
    let setup = state
        .orchestrator
        .setup(&invocation.key(), &invocation.chaincode_id)
        .await
        .map_err(err)?;
    let execution = state
        .orchestrator
        .execute(&setup, &invocation)
        .await
        .map_err(err)?;

    // Detached so a timed out request still records the committed tx
    let recording = state
        .recorder
        .spawn_record(execution.response.clone(), setup.ledger_client.clone());
    let record = CommitRecorder::join(&execution.response.transaction_id, recording)
        .await
        .map_err(err)?;

    info!(request_id = %request_id.0, tx_id = %execution.response.transaction_id, "Chaincode exec complete");
    Ok(Json(ApiResponse::ok(
        "chaincode executed",
        InvocationResponse::from_tx(&execution.response, Some(record)),
    )))
}

/// POST /api/chaincode/query
pub async fn query_chaincode_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChaincodeInvokeRequest>, JsonRejection>,
) -> ApiResult<InvocationResponse> {
    let req = parse_body(&request_id, body)?;
    let err = |e| ApiError::new(&request_id.0, e);
    req.ensure_args().map_err(err)?;
    verify(&state, &request_id, req.timestamp, &req.sign, &req.query_canonical())?;

    let invocation = req.invocation();
    let setup = state
        .orchestrator
        .setup(&invocation.key(), &invocation.chaincode_id)
        .await
        .map_err(err)?;
    let response = state
        .orchestrator
        .query(&setup, &invocation.fcn, &invocation.args)
        .await
        .map_err(err)?;

    Ok(Json(ApiResponse::ok(
        "chaincode queried",
        InvocationResponse::from_tx(&response, None),
    )))
}

/// GET /api/pagination/block
pub async fn list_blocks_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    query: Result<Query<PaginationQuery>, QueryRejection>,
) -> ApiResult<BlockListResponse> {
    let Query(query) = query
        .map_err(|e| ApiError::new(&request_id.0, GatewayError::ParseParams(e.body_text())))?;
    verify(&state, &request_id, query.timestamp, &query.sign, &query.canonical())?;

    let (start, limit) = page_window(query.page_number, query.limit);
    let page = PageRequest::new(start, limit)
        .sorted(query.sort_name.clone(), SortOrder::parse(&query.sort_order));
    let result = state
        .blocks
        .list_blocks(&page)
        .await
        .map_err(|e| ApiError::new(&request_id.0, e))?;

    Ok(Json(ApiResponse::ok(
        "block records listed",
        BlockListResponse {
            total: result.total,
            rows: result.rows,
        },
    )))
}

/// Read-only lookup of one recorded transaction
/// GET /api/block/tx/:tx_id
pub async fn block_by_tx_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(tx_id): Path<String>,
) -> ApiResult<BlockRecord> {
    let record = state
        .blocks
        .find_by_tx_id(&tx_id)
        .await
        .map_err(|e| ApiError::new(&request_id.0, e))?;
    Ok(Json(ApiResponse::ok("block record found", record)))
}

/// Echo endpoint for exercising webhook receivers
/// POST /api/callback
pub async fn callback_handler(
    Extension(request_id): Extension<RequestId>,
    body: Result<Json<ChaincodeEvent>, JsonRejection>,
) -> ApiResult<ChaincodeEvent> {
    let event = parse_body(&request_id, body)?;
    info!(request_id = %request_id.0, tx_id = %event.tx_id, event = %event.event_name, "Callback event received");
    Ok(Json(ApiResponse::ok("callback event", event)))
}
