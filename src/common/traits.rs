//! Collaborator interfaces
//!
//! The ledger network SDK and the record store sit behind these traits so the
//! orchestration core never depends on a concrete binding.

use crate::common::types::{
    Block, BlockRecord, ChaincodeEvent, ChaincodeRequest, ClientCacheKey, DeployRequest,
    EventRegistration, InstallRequest, PageRequest, RequestOptions, SaveChannelRequest,
    SigningIdentity, TxResponse,
};
use crate::config::OrganizationConfig;
use crate::errors::{NetworkError, StorageError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type NetworkResult<T> = Result<T, NetworkError>;

/// Opens one network session per organization
#[async_trait]
pub trait NetworkSessionFactory: Send + Sync {
    async fn open(&self, org: &OrganizationConfig) -> NetworkResult<Arc<dyn NetworkSession>>;
}

/// A live connection to the ledger network on behalf of one organization
#[async_trait]
pub trait NetworkSession: Send + Sync {
    /// Resource management client acting as `user` of `org_name`
    async fn resource_client(
        &self,
        org_name: &str,
        user: &str,
    ) -> NetworkResult<Arc<dyn ResourceManagementClient>>;

    async fn identity_client(&self, org_name: &str) -> NetworkResult<Arc<dyn IdentityClient>>;

    /// Derive a channel context for the key and build a transaction client on it
    async fn transaction_client(
        &self,
        key: &ClientCacheKey,
    ) -> NetworkResult<Arc<dyn TransactionClient>>;

    /// Derive a channel context for the key and build a ledger client on it
    async fn ledger_client(&self, key: &ClientCacheKey) -> NetworkResult<Arc<dyn LedgerClient>>;

    async fn close(&self);
}

/// Channel and chaincode lifecycle
#[async_trait]
pub trait ResourceManagementClient: Send + Sync {
    async fn save_channel(
        &self,
        req: &SaveChannelRequest,
        opts: &RequestOptions,
    ) -> NetworkResult<()>;

    async fn join_channel(&self, channel_id: &str, opts: &RequestOptions) -> NetworkResult<()>;

    async fn install_chaincode(
        &self,
        req: &InstallRequest,
        opts: &RequestOptions,
    ) -> NetworkResult<()>;

    async fn instantiate_chaincode(
        &self,
        channel_id: &str,
        req: &DeployRequest,
        opts: &RequestOptions,
    ) -> NetworkResult<()>;

    async fn upgrade_chaincode(
        &self,
        channel_id: &str,
        req: &DeployRequest,
        opts: &RequestOptions,
    ) -> NetworkResult<()>;
}

#[async_trait]
pub trait IdentityClient: Send + Sync {
    async fn signing_identity(&self, user: &str) -> NetworkResult<SigningIdentity>;
}

/// Chaincode execution on one channel as one user
#[async_trait]
pub trait TransactionClient: Send + Sync {
    /// Endorse, order and commit a state-changing transaction
    async fn execute(&self, req: &ChaincodeRequest) -> NetworkResult<TxResponse>;

    /// Evaluate without committing
    async fn query(&self, req: &ChaincodeRequest) -> NetworkResult<TxResponse>;

    async fn register_chaincode_event(
        &self,
        chaincode_id: &str,
        event_filter: &str,
    ) -> NetworkResult<(EventRegistration, mpsc::Receiver<ChaincodeEvent>)>;

    async fn unregister_chaincode_event(&self, registration: EventRegistration);
}

/// Read access to committed blocks
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn query_block_by_tx_id(&self, tx_id: &str) -> NetworkResult<Block>;
}

/// Durable store of committed-transaction block metadata
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Insert a record, assigning its id. At most one record per `tx_id`.
    async fn insert(&self, record: BlockRecord) -> Result<BlockRecord, StorageError>;

    /// One page of records plus the total count, read from a single snapshot
    async fn find_page(&self, page: &PageRequest) -> Result<(Vec<BlockRecord>, u64), StorageError>;

    async fn find_by_tx_id(&self, tx_id: &str) -> Result<Option<BlockRecord>, StorageError>;
}
