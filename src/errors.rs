//! Error types for the ledger gateway
//!
//! Every failure surfaced to a caller maps onto a stable numeric code and one
//! of four categories: request shape, authentication, downstream (network or
//! storage) and post-commit bookkeeping.

use thiserror::Error;

/// Stable response codes. Values never change between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Ok = 0,
    ParseParams = 1,
    SignExpired = 2,
    SignInvalid = 3,
    UnknownOrganization = 4,
    ChannelCreateFailed = 5,
    ChannelJoinFailed = 6,
    InstallFailed = 7,
    InstantiateFailed = 8,
    UpgradeFailed = 9,
    ArgsInvalid = 10,
    TxClientCreateFailed = 11,
    ExecutionFailed = 12,
    QueryFailed = 13,
    LedgerClientCreateFailed = 14,
    PersistFailed = 15,
    BlockLookupFailed = 16,
    PayloadDecodeFailed = 17,
    BlockListFailed = 18,
    RecordNotFound = 19,
    SessionInitFailed = 20,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Coarse classification used for HTTP status selection and by callers that
/// need to know whether the ledger was touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or invalid request; nothing was attempted.
    Request,
    /// Expired or tampered signature; nothing was attempted.
    Authentication,
    /// Network, ledger or storage failure; no ledger change is known to have happened.
    Downstream,
    /// The transaction committed but recording its block metadata failed.
    PostCommit,
}

/// Errors reported by ledger network collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("transient network failure: {0}")]
    Transient(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("endorsement failed: {0}")]
    Endorsement(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("chaincode package error: {0}")]
    Package(String),

    #[error("network session closed")]
    Closed,
}

impl NetworkError {
    /// Whether a bounded retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, NetworkError::Transient(_) | NetworkError::Connection(_))
    }
}

/// Errors reported by the block record store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database open failed: {0}")]
    DatabaseOpenFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("corrupted data: {0}")]
    CorruptedData(String),

    #[error("duplicate block record for transaction {0}")]
    DuplicateTransaction(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::WriteFailed(e.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::CorruptedData(e.to_string())
    }
}

/// Root error type for gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to parse request parameters: {0}")]
    ParseParams(String),

    #[error("signature expired: request is {age_secs}s old (max {max_age_secs}s)")]
    SignExpired { age_secs: i64, max_age_secs: u64 },

    #[error("signature invalid")]
    SignInvalid,

    #[error("organization '{0}' is not configured")]
    UnknownOrganization(String),

    #[error("failed to create channel: {0}")]
    ChannelCreateFailed(#[source] NetworkError),

    #[error("failed to join channel: {0}")]
    ChannelJoinFailed(#[source] NetworkError),

    #[error("failed to install chaincode: {0}")]
    InstallFailed(#[source] NetworkError),

    #[error("failed to instantiate chaincode: {0}")]
    InstantiateFailed(#[source] NetworkError),

    #[error("failed to upgrade chaincode: {0}")]
    UpgradeFailed(#[source] NetworkError),

    #[error("invalid chaincode arguments: {0}")]
    ArgsInvalid(String),

    #[error("failed to create channel client: {0}")]
    TxClientCreateFailed(#[source] NetworkError),

    #[error("failed to execute chaincode: {0}")]
    ExecutionFailed(#[source] NetworkError),

    #[error("failed to query chaincode: {0}")]
    QueryFailed(#[source] NetworkError),

    #[error("failed to create ledger client: {0}")]
    LedgerClientCreateFailed(#[source] NetworkError),

    #[error("transaction {tx_id} committed but its block record could not be stored: {source}")]
    PersistFailed {
        tx_id: String,
        #[source]
        source: StorageError,
    },

    #[error("transaction {tx_id} committed but its block could not be resolved: {source}")]
    BlockLookupFailed {
        tx_id: String,
        #[source]
        source: NetworkError,
    },

    #[error("transaction {tx_id} committed but its response payload could not be decoded: {reason}")]
    PayloadDecodeFailed { tx_id: String, reason: String },

    #[error("failed to list block records: {0}")]
    BlockListFailed(#[source] StorageError),

    #[error("no block record for transaction {0}")]
    RecordNotFound(String),

    #[error("failed to open session for organization '{org}': {source}")]
    SessionInitFailed {
        org: String,
        #[source]
        source: NetworkError,
    },
}

impl GatewayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::ParseParams(_) => ErrorCode::ParseParams,
            GatewayError::SignExpired { .. } => ErrorCode::SignExpired,
            GatewayError::SignInvalid => ErrorCode::SignInvalid,
            GatewayError::UnknownOrganization(_) => ErrorCode::UnknownOrganization,
            GatewayError::ChannelCreateFailed(_) => ErrorCode::ChannelCreateFailed,
            GatewayError::ChannelJoinFailed(_) => ErrorCode::ChannelJoinFailed,
            GatewayError::InstallFailed(_) => ErrorCode::InstallFailed,
            GatewayError::InstantiateFailed(_) => ErrorCode::InstantiateFailed,
            GatewayError::UpgradeFailed(_) => ErrorCode::UpgradeFailed,
            GatewayError::ArgsInvalid(_) => ErrorCode::ArgsInvalid,
            GatewayError::TxClientCreateFailed(_) => ErrorCode::TxClientCreateFailed,
            GatewayError::ExecutionFailed(_) => ErrorCode::ExecutionFailed,
            GatewayError::QueryFailed(_) => ErrorCode::QueryFailed,
            GatewayError::LedgerClientCreateFailed(_) => ErrorCode::LedgerClientCreateFailed,
            GatewayError::PersistFailed { .. } => ErrorCode::PersistFailed,
            GatewayError::BlockLookupFailed { .. } => ErrorCode::BlockLookupFailed,
            GatewayError::PayloadDecodeFailed { .. } => ErrorCode::PayloadDecodeFailed,
            GatewayError::BlockListFailed(_) => ErrorCode::BlockListFailed,
            GatewayError::RecordNotFound(_) => ErrorCode::RecordNotFound,
            GatewayError::SessionInitFailed { .. } => ErrorCode::SessionInitFailed,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::ParseParams(_)
            | GatewayError::ArgsInvalid(_)
            | GatewayError::UnknownOrganization(_)
            | GatewayError::RecordNotFound(_) => ErrorCategory::Request,
            GatewayError::SignExpired { .. } | GatewayError::SignInvalid => {
                ErrorCategory::Authentication
            }
            GatewayError::PersistFailed { .. }
            | GatewayError::BlockLookupFailed { .. }
            | GatewayError::PayloadDecodeFailed { .. } => ErrorCategory::PostCommit,
            _ => ErrorCategory::Downstream,
        }
    }

    /// Transaction id of a change that reached the ledger, for post-commit failures.
    pub fn committed_tx_id(&self) -> Option<&str> {
        match self {
            GatewayError::PersistFailed { tx_id, .. }
            | GatewayError::BlockLookupFailed { tx_id, .. }
            | GatewayError::PayloadDecodeFailed { tx_id, .. } => Some(tx_id),
            _ => None,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
