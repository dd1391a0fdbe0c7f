//! In-process simulated ledger network
//!
//! Implements every network collaborator trait against an in-memory ledger:
//! channels, installed and instantiated chaincode, one block per committed
//! transaction, and a chaincode event bus. Used by the binary in
//! `NetworkMode::Simulated` and by tests. A real SDK binding replaces it by
//! implementing the same traits.
//!
//! The simulated chaincode stores `{fcn, args}` under `args[0]`, answers
//! queries with the stored value for `args[0]`, and emits one event per
//! executed transaction named after the invoked function.

use crate::{
    common::{
        traits::{
            IdentityClient, LedgerClient, NetworkResult, NetworkSession, NetworkSessionFactory,
            ResourceManagementClient, TransactionClient,
        },
        types::{
            Block, BlockHeader, ChaincodeEvent, ChaincodeRequest, ClientCacheKey, DeployRequest,
            EndorsementPolicy, EventRegistration, InstallRequest, RequestOptions,
            SaveChannelRequest, SigningIdentity, TxResponse,
        },
    },
    config::OrganizationConfig,
    errors::NetworkError,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

const EVENT_BUFFER: usize = 16;

/// Chaincode instantiated on a channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployedChaincode {
    pub version: String,
    pub path: String,
    pub policy: EndorsementPolicy,
    pub init_args: Vec<Vec<u8>>,
}

#[derive(Default)]
struct ChannelLedger {
    joined: HashSet<String>,
    chaincodes: HashMap<String, DeployedChaincode>,
    blocks: Vec<Block>,
    tx_index: HashMap<String, u64>,
    state: HashMap<String, Vec<u8>>,
}

impl ChannelLedger {
    fn with_genesis(channel_id: &str) -> Self {
        let genesis = Block {
            header: BlockHeader {
                number: 0,
                previous_hash: Vec::new(),
                data_hash: Sha256::digest(channel_id.as_bytes()).to_vec(),
            },
            tx_ids: Vec::new(),
        };
        Self {
            blocks: vec![genesis],
            ..Default::default()
        }
    }

    fn append(&mut self, tx_id: &str) -> u64 {
        let previous_hash = self
            .blocks
            .last()
            .map(|b| header_hash(&b.header))
            .unwrap_or_default();
        let number = self.blocks.len() as u64;
        self.blocks.push(Block {
            header: BlockHeader {
                number,
                previous_hash,
                data_hash: Sha256::digest(tx_id.as_bytes()).to_vec(),
            },
            tx_ids: vec![tx_id.to_string()],
        });
        self.tx_index.insert(tx_id.to_string(), number);
        number
    }
}

fn header_hash(header: &BlockHeader) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(header.number.to_be_bytes());
    hasher.update(&header.previous_hash);
    hasher.update(&header.data_hash);
    hasher.finalize().to_vec()
}

struct Listener {
    channel_id: String,
    chaincode_id: String,
    filter: String,
    sender: mpsc::Sender<ChaincodeEvent>,
}

impl Listener {
    fn matches(&self, channel_id: &str, event: &ChaincodeEvent) -> bool {
        self.channel_id == channel_id
            && self.chaincode_id == event.chaincode_id
            && (self.filter.is_empty() || self.filter == ".*" || self.filter == event.event_name)
    }
}

struct Inner {
    channels: DashMap<String, ChannelLedger>,
    /// (org, chaincode, version) -> package digest
    installed: DashMap<(String, String, String), [u8; 32]>,
    listeners: DashMap<Uuid, Listener>,
    rejected_orgs: DashMap<String, ()>,
    open_sessions: AtomicUsize,
    tx_clients_built: AtomicUsize,
    ledger_clients_built: AtomicUsize,
    lifecycle_failures: AtomicU32,
    client_build_failures: AtomicU32,
    execute_failures: AtomicU32,
    lookup_failures: AtomicU32,
    events_enabled: AtomicBool,
}

/// Shared handle to one simulated network
#[derive(Clone)]
pub struct SimulatedNetwork {
    inner: Arc<Inner>,
}

impl Default for SimulatedNetwork {
    fn default() -> Self {
        Self::new()
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                channels: DashMap::new(),
                installed: DashMap::new(),
                listeners: DashMap::new(),
                rejected_orgs: DashMap::new(),
                open_sessions: AtomicUsize::new(0),
                tx_clients_built: AtomicUsize::new(0),
                ledger_clients_built: AtomicUsize::new(0),
                lifecycle_failures: AtomicU32::new(0),
                client_build_failures: AtomicU32::new(0),
                execute_failures: AtomicU32::new(0),
                lookup_failures: AtomicU32::new(0),
                events_enabled: AtomicBool::new(true),
            }),
        }
    }

    // Fault injection and inspection

    /// Refuse to open sessions for `org_name`
    pub fn reject_org(&self, org_name: &str) {
        self.inner.rejected_orgs.insert(org_name.to_string(), ());
    }

    /// Fail the next `n` lifecycle calls with a transient error
    pub fn fail_next_lifecycle_calls(&self, n: u32) {
        self.inner.lifecycle_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` channel/ledger client constructions
    pub fn fail_next_client_builds(&self, n: u32) {
        self.inner.client_build_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` executions at endorsement
    pub fn fail_next_executions(&self, n: u32) {
        self.inner.execute_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` block lookups
    pub fn fail_next_block_lookups(&self, n: u32) {
        self.inner.lookup_failures.store(n, Ordering::SeqCst);
    }

    /// Stop emitting chaincode events on execute
    pub fn set_events_enabled(&self, enabled: bool) {
        self.inner.events_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn open_sessions(&self) -> usize {
        self.inner.open_sessions.load(Ordering::SeqCst)
    }

    pub fn transaction_clients_built(&self) -> usize {
        self.inner.tx_clients_built.load(Ordering::SeqCst)
    }

    pub fn ledger_clients_built(&self) -> usize {
        self.inner.ledger_clients_built.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    pub fn has_joined(&self, channel_id: &str, org_name: &str) -> bool {
        self.inner
            .channels
            .get(channel_id)
            .map(|c| c.joined.contains(org_name))
            .unwrap_or(false)
    }

    pub fn deployed(&self, channel_id: &str, chaincode_id: &str) -> Option<DeployedChaincode> {
        self.inner
            .channels
            .get(channel_id)
            .and_then(|c| c.chaincodes.get(chaincode_id).cloned())
    }

    pub fn block_height(&self, channel_id: &str) -> Option<u64> {
        self.inner.channels.get(channel_id).map(|c| c.blocks.len() as u64)
    }

    /// Deliver an event to matching listeners, returning how many received it
    pub fn emit_event(&self, channel_id: &str, event: ChaincodeEvent) -> usize {
        let mut delivered = 0;
        for listener in self.inner.listeners.iter() {
            if listener.matches(channel_id, &event) && listener.sender.try_send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        trace!(channel = channel_id, event = %event.event_name, delivered, "Chaincode event emitted");
        delivered
    }

    /// Create a channel, join `orgs` and instantiate `chaincode_id` without going
    /// through the lifecycle clients.
    pub fn bootstrap_channel(&self, channel_id: &str, orgs: &[&str], chaincode_id: &str, msp_ids: &[&str]) {
        let mut ledger = ChannelLedger::with_genesis(channel_id);
        ledger.joined = orgs.iter().map(|o| o.to_string()).collect();
        ledger.chaincodes.insert(
            chaincode_id.to_string(),
            DeployedChaincode {
                version: "1.0".to_string(),
                path: chaincode_id.to_string(),
                policy: EndorsementPolicy::SignedByAnyMember(
                    msp_ids.iter().map(|m| m.to_string()).collect(),
                ),
                init_args: Vec::new(),
            },
        );
        self.inner.channels.insert(channel_id.to_string(), ledger);
    }

    fn lifecycle_gate(&self) -> NetworkResult<()> {
        if take_failure(&self.inner.lifecycle_failures) {
            return Err(NetworkError::Transient("orderer busy".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkSessionFactory for SimulatedNetwork {
    async fn open(&self, org: &OrganizationConfig) -> NetworkResult<Arc<dyn NetworkSession>> {
        if self.inner.rejected_orgs.contains_key(&org.org_name) {
            return Err(NetworkError::Connection(format!(
                "no peers reachable for {}",
                org.org_name
            )));
        }
        self.inner.open_sessions.fetch_add(1, Ordering::SeqCst);
        debug!(org = %org.org_name, "Simulated session opened");
        Ok(Arc::new(SimulatedSession {
            network: self.clone(),
            org: org.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct SimulatedSession {
    network: SimulatedNetwork,
    org: OrganizationConfig,
    closed: AtomicBool,
}

impl SimulatedSession {
    fn ensure_open(&self) -> NetworkResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NetworkError::Closed);
        }
        Ok(())
    }

    fn client_gate(&self, key: &ClientCacheKey) -> NetworkResult<()> {
        self.ensure_open()?;
        if take_failure(&self.network.inner.client_build_failures) {
            return Err(NetworkError::Connection("channel context unavailable".to_string()));
        }
        if key.org_name != self.org.org_name {
            return Err(NetworkError::Rejected(format!(
                "session of {} cannot act for {}",
                self.org.org_name, key.org_name
            )));
        }
        if key.user_name.is_empty() {
            return Err(NetworkError::NotFound("user name is empty".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkSession for SimulatedSession {
    async fn resource_client(
        &self,
        org_name: &str,
        _user: &str,
    ) -> NetworkResult<Arc<dyn ResourceManagementClient>> {
        self.ensure_open()?;
        Ok(Arc::new(SimulatedResourceClient {
            network: self.network.clone(),
            org_name: org_name.to_string(),
        }))
    }

    async fn identity_client(&self, org_name: &str) -> NetworkResult<Arc<dyn IdentityClient>> {
        self.ensure_open()?;
        Ok(Arc::new(SimulatedIdentityClient {
            org_name: org_name.to_string(),
            msp_id: self.org.org_msp_id.clone(),
        }))
    }

    async fn transaction_client(
        &self,
        key: &ClientCacheKey,
    ) -> NetworkResult<Arc<dyn TransactionClient>> {
        self.client_gate(key)?;
        self.network.inner.tx_clients_built.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(SimulatedTransactionClient {
            network: self.network.clone(),
            key: key.clone(),
        }))
    }

    async fn ledger_client(&self, key: &ClientCacheKey) -> NetworkResult<Arc<dyn LedgerClient>> {
        self.client_gate(key)?;
        self.network.inner.ledger_clients_built.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(SimulatedLedgerClient {
            network: self.network.clone(),
            channel_id: key.channel_id.clone(),
        }))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.network.inner.open_sessions.fetch_sub(1, Ordering::SeqCst);
            debug!(org = %self.org.org_name, "Simulated session closed");
        }
    }
}

struct SimulatedIdentityClient {
    org_name: String,
    msp_id: String,
}

#[async_trait]
impl IdentityClient for SimulatedIdentityClient {
    async fn signing_identity(&self, user: &str) -> NetworkResult<SigningIdentity> {
        if user.is_empty() {
            return Err(NetworkError::NotFound("user name is empty".to_string()));
        }
        let id = format!("{}@{}", user, self.org_name);
        Ok(SigningIdentity {
            certificate: Sha256::digest(id.as_bytes()).to_vec(),
            id,
            msp_id: self.msp_id.clone(),
        })
    }
}

struct SimulatedResourceClient {
    network: SimulatedNetwork,
    org_name: String,
}

impl SimulatedResourceClient {
    fn check_deploy(&self, ledger: &ChannelLedger, channel_id: &str, req: &DeployRequest) -> NetworkResult<()> {
        if !ledger.joined.contains(&self.org_name) {
            return Err(NetworkError::Rejected(format!(
                "{} has not joined {}",
                self.org_name, channel_id
            )));
        }
        let installed = (self.org_name.clone(), req.name.clone(), req.version.clone());
        if !self.network.inner.installed.contains_key(&installed) {
            return Err(NetworkError::NotFound(format!(
                "chaincode {}:{} is not installed",
                req.name, req.version
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceManagementClient for SimulatedResourceClient {
    async fn save_channel(&self, req: &SaveChannelRequest, opts: &RequestOptions) -> NetworkResult<()> {
        self.network.lifecycle_gate()?;
        if opts.orderer_endpoint.is_none() {
            return Err(NetworkError::Rejected("no orderer endpoint".to_string()));
        }
        if req.signing_identities.is_empty() {
            return Err(NetworkError::Rejected("channel update is unsigned".to_string()));
        }
        if self.network.inner.channels.contains_key(&req.channel_id) {
            return Err(NetworkError::Rejected(format!("channel {} already exists", req.channel_id)));
        }
        self.network
            .inner
            .channels
            .insert(req.channel_id.clone(), ChannelLedger::with_genesis(&req.channel_id));
        Ok(())
    }

    async fn join_channel(&self, channel_id: &str, _opts: &RequestOptions) -> NetworkResult<()> {
        self.network.lifecycle_gate()?;
        let mut ledger = self
            .network
            .inner
            .channels
            .get_mut(channel_id)
            .ok_or_else(|| NetworkError::NotFound(format!("channel {}", channel_id)))?;
        ledger.joined.insert(self.org_name.clone());
        Ok(())
    }

    async fn install_chaincode(&self, req: &InstallRequest, _opts: &RequestOptions) -> NetworkResult<()> {
        self.network.lifecycle_gate()?;
        let key = (self.org_name.clone(), req.name.clone(), req.version.clone());
        if self.network.inner.installed.contains_key(&key) {
            return Err(NetworkError::Rejected(format!(
                "chaincode {}:{} already installed",
                req.name, req.version
            )));
        }
        self.network.inner.installed.insert(key, req.package.digest);
        Ok(())
    }

    async fn instantiate_chaincode(
        &self,
        channel_id: &str,
        req: &DeployRequest,
        _opts: &RequestOptions,
    ) -> NetworkResult<()> {
        self.network.lifecycle_gate()?;
        let mut ledger = self
            .network
            .inner
            .channels
            .get_mut(channel_id)
            .ok_or_else(|| NetworkError::NotFound(format!("channel {}", channel_id)))?;
        self.check_deploy(&ledger, channel_id, req)?;
        if ledger.chaincodes.contains_key(&req.name) {
            return Err(NetworkError::Rejected(format!(
                "chaincode {} already instantiated on {}",
                req.name, channel_id
            )));
        }
        ledger.chaincodes.insert(
            req.name.clone(),
            DeployedChaincode {
                version: req.version.clone(),
                path: req.path.clone(),
                policy: req.policy.clone(),
                init_args: req.args.clone(),
            },
        );
        Ok(())
    }

    async fn upgrade_chaincode(
        &self,
        channel_id: &str,
        req: &DeployRequest,
        _opts: &RequestOptions,
    ) -> NetworkResult<()> {
        self.network.lifecycle_gate()?;
        let mut ledger = self
            .network
            .inner
            .channels
            .get_mut(channel_id)
            .ok_or_else(|| NetworkError::NotFound(format!("channel {}", channel_id)))?;
        self.check_deploy(&ledger, channel_id, req)?;
        let current = ledger
            .chaincodes
            .get(&req.name)
            .ok_or_else(|| NetworkError::NotFound(format!("chaincode {} on {}", req.name, channel_id)))?;
        if current.version == req.version {
            return Err(NetworkError::Rejected(format!(
                "chaincode {} is already at version {}",
                req.name, req.version
            )));
        }
        ledger.chaincodes.insert(
            req.name.clone(),
            DeployedChaincode {
                version: req.version.clone(),
                path: req.path.clone(),
                policy: req.policy.clone(),
                init_args: req.args.clone(),
            },
        );
        Ok(())
    }
}

struct SimulatedTransactionClient {
    network: SimulatedNetwork,
    key: ClientCacheKey,
}

impl SimulatedTransactionClient {
    fn state_key(chaincode_id: &str, req: &ChaincodeRequest) -> String {
        let first = req
            .args
            .first()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .unwrap_or_default();
        format!("{}\u{0}{}", chaincode_id, first)
    }

    fn check_invocable(&self, ledger: &ChannelLedger, chaincode_id: &str) -> NetworkResult<()> {
        if !ledger.joined.contains(&self.key.org_name) {
            return Err(NetworkError::Endorsement(format!(
                "no peers of {} on {}",
                self.key.org_name, self.key.channel_id
            )));
        }
        if !ledger.chaincodes.contains_key(chaincode_id) {
            return Err(NetworkError::Endorsement(format!(
                "chaincode {} is not instantiated on {}",
                chaincode_id, self.key.channel_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionClient for SimulatedTransactionClient {
    async fn execute(&self, req: &ChaincodeRequest) -> NetworkResult<TxResponse> {
        if take_failure(&self.network.inner.execute_failures) {
            return Err(NetworkError::Endorsement("endorsement policy not satisfied".to_string()));
        }

        let tx_id = hex::encode(Sha256::digest(Uuid::new_v4().as_bytes()));
        let now = chrono::Utc::now();
        let args: Vec<String> = req
            .args
            .iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect();

        let block_number = {
            let mut ledger = self
                .network
                .inner
                .channels
                .get_mut(&self.key.channel_id)
                .ok_or_else(|| NetworkError::NotFound(format!("channel {}", self.key.channel_id)))?;
            self.check_invocable(&ledger, &req.chaincode_id)?;

            let value = serde_json::json!({ "fcn": req.fcn, "args": args });
            ledger
                .state
                .insert(Self::state_key(&req.chaincode_id, req), value.to_string().into_bytes());
            ledger.append(&tx_id)
        };

        // Chaincode marshals the timestamp as a byte slice
        let timestamp = serde_json::json!({
            "seconds": now.timestamp(),
            "nanos": now.timestamp_subsec_nanos(),
        });
        let payload = serde_json::json!({
            "Channel": self.key.channel_id,
            "TxID": tx_id,
            "Timestamp": STANDARD.encode(timestamp.to_string()),
        });

        if self.network.inner.events_enabled.load(Ordering::SeqCst) {
            self.network.emit_event(
                &self.key.channel_id,
                ChaincodeEvent {
                    tx_id: tx_id.clone(),
                    chaincode_id: req.chaincode_id.clone(),
                    event_name: req.fcn.clone(),
                    payload: serde_json::to_vec(&args).unwrap_or_default(),
                    block_number,
                    source_url: String::new(),
                },
            );
        }

        debug!(channel = %self.key.channel_id, tx_id = %tx_id, block = block_number, "Simulated transaction committed");
        Ok(TxResponse {
            transaction_id: tx_id,
            payload: payload.to_string().into_bytes(),
            validation_code: 0,
        })
    }

    async fn query(&self, req: &ChaincodeRequest) -> NetworkResult<TxResponse> {
        let ledger = self
            .network
            .inner
            .channels
            .get(&self.key.channel_id)
            .ok_or_else(|| NetworkError::NotFound(format!("channel {}", self.key.channel_id)))?;
        self.check_invocable(&ledger, &req.chaincode_id)?;

        let payload = ledger
            .state
            .get(&Self::state_key(&req.chaincode_id, req))
            .cloned()
            .ok_or_else(|| NetworkError::Endorsement("no state for key".to_string()))?;

        Ok(TxResponse {
            transaction_id: hex::encode(Sha256::digest(Uuid::new_v4().as_bytes())),
            payload,
            validation_code: 0,
        })
    }

    async fn register_chaincode_event(
        &self,
        chaincode_id: &str,
        event_filter: &str,
    ) -> NetworkResult<(EventRegistration, mpsc::Receiver<ChaincodeEvent>)> {
        if chaincode_id.is_empty() {
            return Err(NetworkError::Rejected("chaincode id is empty".to_string()));
        }
        let registration = EventRegistration::new(chaincode_id, event_filter);
        let (sender, receiver) = mpsc::channel(EVENT_BUFFER);
        self.network.inner.listeners.insert(
            registration.id,
            Listener {
                channel_id: self.key.channel_id.clone(),
                chaincode_id: chaincode_id.to_string(),
                filter: event_filter.to_string(),
                sender,
            },
        );
        Ok((registration, receiver))
    }

    async fn unregister_chaincode_event(&self, registration: EventRegistration) {
        self.network.inner.listeners.remove(&registration.id);
    }
}

struct SimulatedLedgerClient {
    network: SimulatedNetwork,
    channel_id: String,
}

#[async_trait]
impl LedgerClient for SimulatedLedgerClient {
    async fn query_block_by_tx_id(&self, tx_id: &str) -> NetworkResult<Block> {
        if take_failure(&self.network.inner.lookup_failures) {
            return Err(NetworkError::Connection("peer unavailable".to_string()));
        }
        let ledger = self
            .network
            .inner
            .channels
            .get(&self.channel_id)
            .ok_or_else(|| NetworkError::NotFound(format!("channel {}", self.channel_id)))?;
        let number = ledger
            .tx_index
            .get(tx_id)
            .copied()
            .ok_or_else(|| NetworkError::NotFound(format!("transaction {}", tx_id)))?;
        ledger
            .blocks
            .get(number as usize)
            .cloned()
            .ok_or_else(|| NetworkError::NotFound(format!("block {}", number)))
    }
}
