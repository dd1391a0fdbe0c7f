//! Chaincode execution and event notification
//!
//! Execute and query go straight through the cached transaction client with
//! no retry. When an invocation carries an event filter, a listener is
//! registered before the transaction is submitted and a background task waits
//! for the first matching event or the timeout, whichever comes first. The
//! task always unregisters the listener and hands the outcome to the
//! configured [`EventSink`]. It never affects the invocation's own result.

use crate::{
    client_cache::ClientCache,
    common::{
        traits::{LedgerClient, TransactionClient},
        types::{ChaincodeEvent, ChaincodeRequest, ClientCacheKey, EventRegistration, TxResponse},
    },
    errors::{GatewayError, GatewayResult, NetworkError},
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

/// Receives the outcome of an event wait: `Some(event)` when one arrived,
/// `None` when the wait timed out.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event_filter: &str, callback_url: &str, event: Option<ChaincodeEvent>);
}

/// A chaincode invocation as received from a caller
#[derive(Clone, Debug, Default)]
pub struct Invocation {
    pub channel_id: String,
    pub org_name: String,
    pub user_name: String,
    pub chaincode_id: String,
    pub fcn: String,
    pub args: Vec<String>,
    pub event_filter: String,
    pub event_callback_url: String,
}

impl Invocation {
    pub fn key(&self) -> ClientCacheKey {
        ClientCacheKey::new(&self.channel_id, &self.org_name, &self.user_name)
    }
}

/// Clients bound to one chaincode for one (channel, org, user)
#[derive(Clone)]
pub struct ChaincodeSetup {
    pub chaincode_id: String,
    pub tx_client: Arc<dyn TransactionClient>,
    pub ledger_client: Arc<dyn LedgerClient>,
}

impl ChaincodeSetup {
    pub async fn execute(&self, fcn: &str, args: &[String]) -> Result<TxResponse, NetworkError> {
        self.tx_client
            .execute(&ChaincodeRequest::new(&self.chaincode_id, fcn, args))
            .await
    }

    pub async fn query(&self, fcn: &str, args: &[String]) -> Result<TxResponse, NetworkError> {
        self.tx_client
            .query(&ChaincodeRequest::new(&self.chaincode_id, fcn, args))
            .await
    }
}

/// Result of a successful execute
pub struct Execution {
    pub response: TxResponse,
    /// Background event wait, when an event filter was supplied and registered
    pub event_wait: Option<JoinHandle<()>>,
}

pub struct TransactionOrchestrator {
    cache: Arc<ClientCache>,
    sink: Arc<dyn EventSink>,
    event_timeout: Duration,
}

impl TransactionOrchestrator {
    pub fn new(cache: Arc<ClientCache>, sink: Arc<dyn EventSink>, event_timeout: Duration) -> Self {
        Self {
            cache,
            sink,
            event_timeout,
        }
    }

    pub fn cache(&self) -> &Arc<ClientCache> {
        &self.cache
    }

    /// Resolve both cached clients for an invocation
    pub async fn setup(&self, key: &ClientCacheKey, chaincode_id: &str) -> GatewayResult<ChaincodeSetup> {
        let tx_client = self.cache.transaction_client(key).await?;
        let ledger_client = self.cache.ledger_client(key).await?;
        Ok(ChaincodeSetup {
            chaincode_id: chaincode_id.to_string(),
            tx_client,
            ledger_client,
        })
    }

    /// Submit a state-changing transaction, watching for its event if asked to
    pub async fn execute(&self, setup: &ChaincodeSetup, invocation: &Invocation) -> GatewayResult<Execution> {
        let event_wait = if invocation.event_filter.is_empty() {
            None
        } else {
            self.watch(setup, &invocation.event_filter, &invocation.event_callback_url)
                .await
        };

        let response = setup
            .execute(&invocation.fcn, &invocation.args)
            .await
            .map_err(|e| {
                warn!(chaincode = %setup.chaincode_id, fcn = %invocation.fcn, error = %e, "Chaincode execution failed");
                GatewayError::ExecutionFailed(e)
            })?;

        info!(chaincode = %setup.chaincode_id, fcn = %invocation.fcn, tx_id = %response.transaction_id, "Chaincode executed");
        Ok(Execution { response, event_wait })
    }

    pub async fn query(&self, setup: &ChaincodeSetup, fcn: &str, args: &[String]) -> GatewayResult<TxResponse> {
        setup.query(fcn, args).await.map_err(|e| {
            warn!(chaincode = %setup.chaincode_id, fcn, error = %e, "Chaincode query failed");
            GatewayError::QueryFailed(e)
        })
    }

    async fn watch(&self, setup: &ChaincodeSetup, filter: &str, callback_url: &str) -> Option<JoinHandle<()>> {
        match setup
            .tx_client
            .register_chaincode_event(&setup.chaincode_id, filter)
            .await
        {
            Ok((registration, receiver)) => Some(spawn_event_wait(
                setup.tx_client.clone(),
                registration,
                receiver,
                self.event_timeout,
                self.sink.clone(),
                callback_url.to_string(),
            )),
            Err(e) => {
                warn!(chaincode = %setup.chaincode_id, filter, error = %e, "Event registration failed; continuing without listener");
                None
            }
        }
    }
}

/// Race the first event against `timeout` in a detached task.
///
/// Exactly one outcome reaches the sink, after the listener is unregistered.
pub fn spawn_event_wait(
    tx_client: Arc<dyn TransactionClient>,
    registration: EventRegistration,
    mut receiver: mpsc::Receiver<ChaincodeEvent>,
    timeout: Duration,
    sink: Arc<dyn EventSink>,
    callback_url: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let outcome = tokio::select! {
            event = receiver.recv() => event,
            _ = tokio::time::sleep(timeout) => None,
        };

        let filter = registration.filter.clone();
        tx_client.unregister_chaincode_event(registration).await;
        debug!(filter = %filter, received = outcome.is_some(), "Event wait finished");

        sink.deliver(&filter, &callback_url, outcome).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::OrganizationConfig, network::SimulatedNetwork, session::SessionRegistry};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(String, String, Option<ChaincodeEvent>, tokio::time::Instant)>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn deliver(&self, filter: &str, url: &str, event: Option<ChaincodeEvent>) {
            self.calls.lock().unwrap().push((
                filter.to_string(),
                url.to_string(),
                event,
                tokio::time::Instant::now(),
            ));
        }
    }

    async fn setup() -> (SimulatedNetwork, TransactionOrchestrator, Arc<RecordingSink>) {
        let network = SimulatedNetwork::new();
        network.bootstrap_channel("mychannel", &["Org1"], "mycc", &["Org1MSP"]);
        let orgs = vec![OrganizationConfig {
            org_name: "Org1".into(),
            org_admin: "Admin".into(),
            orderer_org_name: "orderer.example.com".into(),
            org_msp_id: "Org1MSP".into(),
            sdk_config_path: String::new(),
            channel_config_path: String::new(),
        }];
        let registry = SessionRegistry::init(&orgs, &network, "/tmp").await.unwrap();
        let cache = Arc::new(ClientCache::new(Arc::new(registry)));
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = TransactionOrchestrator::new(cache, sink.clone(), Duration::from_secs(20));
        (network, orchestrator, sink)
    }

    fn invocation(filter: &str) -> Invocation {
        Invocation {
            channel_id: "mychannel".into(),
            org_name: "Org1".into(),
            user_name: "admin".into(),
            chaincode_id: "mycc".into(),
            fcn: "transfer".into(),
            args: vec!["a".into(), "b".into(), "10".into()],
            event_filter: filter.into(),
            event_callback_url: "http://127.0.0.1:1/hook".into(),
        }
    }

    fn event(name: &str) -> ChaincodeEvent {
        ChaincodeEvent {
            tx_id: "tx-manual".into(),
            chaincode_id: "mycc".into(),
            event_name: name.into(),
            payload: Vec::new(),
            block_number: 1,
            source_url: String::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_delivers_none_exactly_once() {
        let (network, orchestrator, sink) = setup().await;
        network.set_events_enabled(false);
        let inv = invocation("transfer");
        let setup = orchestrator.setup(&inv.key(), &inv.chaincode_id).await.unwrap();

        let start = tokio::time::Instant::now();
        let execution = orchestrator.execute(&setup, &inv).await.unwrap();
        assert!(!execution.response.transaction_id.is_empty());
        execution.event_wait.unwrap().await.unwrap();

        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].2.is_none());
        assert_eq!(calls[0].3 - start, Duration::from_secs(20));
        assert_eq!(network.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_at_five_seconds_wins_and_timeout_never_fires() {
        let (network, orchestrator, sink) = setup().await;
        network.set_events_enabled(false);
        let inv = invocation("transfer");
        let setup = orchestrator.setup(&inv.key(), &inv.chaincode_id).await.unwrap();

        let start = tokio::time::Instant::now();
        let execution = orchestrator.execute(&setup, &inv).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(network.emit_event("mychannel", event("transfer")), 1);
        execution.event_wait.unwrap().await.unwrap();

        // Well past the 20s deadline
        tokio::time::sleep(Duration::from_secs(30)).await;

        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "transfer");
        assert_eq!(calls[0].2.as_ref().unwrap().tx_id, "tx-manual");
        assert_eq!(calls[0].3 - start, Duration::from_secs(5));
        assert_eq!(network.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_event_from_the_transaction_itself_is_observed() {
        let (network, orchestrator, sink) = setup().await;
        let inv = invocation("transfer");
        let setup = orchestrator.setup(&inv.key(), &inv.chaincode_id).await.unwrap();

        let execution = orchestrator.execute(&setup, &inv).await.unwrap();
        execution.event_wait.unwrap().await.unwrap();

        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let event = calls[0].2.as_ref().unwrap();
        assert_eq!(event.tx_id, execution.response.transaction_id);
        assert_eq!(calls[0].1, "http://127.0.0.1:1/hook");
        assert_eq!(network.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_no_filter_no_listener() {
        let (network, orchestrator, sink) = setup().await;
        let inv = invocation("");
        let setup = orchestrator.setup(&inv.key(), &inv.chaincode_id).await.unwrap();
        let execution = orchestrator.execute(&setup, &inv).await.unwrap();
        assert!(execution.event_wait.is_none());
        assert_eq!(network.listener_count(), 0);
        assert!(sink.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execution_failure_is_surfaced_without_retry() {
        let (network, orchestrator, _sink) = setup().await;
        let inv = invocation("");
        let setup = orchestrator.setup(&inv.key(), &inv.chaincode_id).await.unwrap();
        let height = network.block_height("mychannel").unwrap();

        network.fail_next_executions(1);
        let err = orchestrator.execute(&setup, &inv).await.err().unwrap();
        assert!(matches!(err, GatewayError::ExecutionFailed(NetworkError::Endorsement(_))));
        assert_eq!(network.block_height("mychannel").unwrap(), height);
    }

    #[tokio::test]
    async fn test_query_failure_maps_to_query_failed() {
        let (_network, orchestrator, _sink) = setup().await;
        let inv = invocation("");
        let setup = orchestrator.setup(&inv.key(), &inv.chaincode_id).await.unwrap();
        let err = orchestrator
            .query(&setup, "query", &["missing".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::QueryFailed(_)));
    }
}
