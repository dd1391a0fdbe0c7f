//! Per-(channel, org, user) client cache
//!
//! Transaction and ledger clients are created lazily from the organization's
//! session and kept for the life of the process.
//!
//! Population is deliberately relaxed: two requests that miss on the same key
//! at the same time both build a client and the later insert wins. Client
//! construction only derives a channel context from an existing session, so a
//! duplicate is harmless and short-lived. Once a key is populated every
//! request shares the same client. Failed constructions are never cached.

use crate::{
    common::{
        traits::{LedgerClient, TransactionClient},
        types::ClientCacheKey,
    },
    errors::{GatewayError, GatewayResult},
    session::SessionRegistry,
};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

pub struct ClientCache {
    sessions: Arc<SessionRegistry>,
    transaction_clients: DashMap<ClientCacheKey, Arc<dyn TransactionClient>>,
    ledger_clients: DashMap<ClientCacheKey, Arc<dyn LedgerClient>>,
}

impl ClientCache {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self {
            sessions,
            transaction_clients: DashMap::new(),
            ledger_clients: DashMap::new(),
        }
    }

    pub async fn transaction_client(
        &self,
        key: &ClientCacheKey,
    ) -> GatewayResult<Arc<dyn TransactionClient>> {
        if let Some(client) = self.transaction_clients.get(key) {
            return Ok(client.value().clone());
        }

        // No shard lock is held across the await below.
        let session = self.sessions.get(&key.org_name)?;
        let client = session
            .new_transaction_client(key)
            .await
            .map_err(GatewayError::TxClientCreateFailed)?;
        debug!(key = %key, "Transaction client created");

        self.transaction_clients.insert(key.clone(), client.clone());
        Ok(client)
    }

    pub async fn ledger_client(&self, key: &ClientCacheKey) -> GatewayResult<Arc<dyn LedgerClient>> {
        if let Some(client) = self.ledger_clients.get(key) {
            return Ok(client.value().clone());
        }

        let session = self.sessions.get(&key.org_name)?;
        let client = session
            .new_ledger_client(key)
            .await
            .map_err(GatewayError::LedgerClientCreateFailed)?;
        debug!(key = %key, "Ledger client created");

        self.ledger_clients.insert(key.clone(), client.clone());
        Ok(client)
    }

    /// Number of cached (transaction, ledger) clients
    pub fn len(&self) -> (usize, usize) {
        (self.transaction_clients.len(), self.ledger_clients.len())
    }

    pub fn is_empty(&self) -> bool {
        self.transaction_clients.is_empty() && self.ledger_clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::OrganizationConfig, network::SimulatedNetwork};

    async fn setup() -> (SimulatedNetwork, ClientCache) {
        let network = SimulatedNetwork::new();
        let orgs = vec![OrganizationConfig {
            org_name: "Org1".into(),
            org_admin: "Admin".into(),
            orderer_org_name: "orderer.example.com".into(),
            org_msp_id: "Org1MSP".into(),
            sdk_config_path: String::new(),
            channel_config_path: String::new(),
        }];
        let registry = SessionRegistry::init(&orgs, &network, "/tmp").await.unwrap();
        (network, ClientCache::new(Arc::new(registry)))
    }

    #[tokio::test]
    async fn test_hits_reuse_the_same_client() {
        let (network, cache) = setup().await;
        let key = ClientCacheKey::new("mychannel", "Org1", "admin");

        let first = cache.transaction_client(&key).await.unwrap();
        let second = cache.transaction_client(&key).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(network.transaction_clients_built(), 1);

        let l1 = cache.ledger_client(&key).await.unwrap();
        let l2 = cache.ledger_client(&key).await.unwrap();
        assert!(Arc::ptr_eq(&l1, &l2));
        assert_eq!(network.ledger_clients_built(), 1);
        assert_eq!(cache.len(), (1, 1));
    }

    #[tokio::test]
    async fn test_distinct_keys_get_distinct_clients() {
        let (network, cache) = setup().await;
        let a = cache
            .transaction_client(&ClientCacheKey::new("ch1", "Org1", "admin"))
            .await
            .unwrap();
        let b = cache
            .transaction_client(&ClientCacheKey::new("ch1", "Org1", "user1"))
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(network.transaction_clients_built(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let (network, cache) = setup().await;
        let key = ClientCacheKey::new("mychannel", "Org1", "admin");

        network.fail_next_client_builds(1);
        let err = cache.transaction_client(&key).await.err().unwrap();
        assert!(matches!(err, GatewayError::TxClientCreateFailed(_)));
        assert!(cache.is_empty());

        cache.transaction_client(&key).await.unwrap();
        assert_eq!(network.transaction_clients_built(), 1);
    }

    #[tokio::test]
    async fn test_ledger_failure_has_its_own_code() {
        let (network, cache) = setup().await;
        network.fail_next_client_builds(1);
        let err = cache
            .ledger_client(&ClientCacheKey::new("mychannel", "Org1", "admin"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::LedgerClientCreateFailed(_)));
    }

    #[tokio::test]
    async fn test_unknown_org() {
        let (_network, cache) = setup().await;
        let err = cache
            .transaction_client(&ClientCacheKey::new("mychannel", "Org9", "admin"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::UnknownOrganization(_)));
    }

    #[tokio::test]
    async fn test_concurrent_requests_settle_on_one_client() {
        let (_network, cache) = setup().await;
        let cache = Arc::new(cache);
        let key = ClientCacheKey::new("mychannel", "Org1", "admin");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let key = key.clone();
                tokio::spawn(async move { cache.transaction_client(&key).await.is_ok() })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(cache.len().0, 1);
        let a = cache.transaction_client(&key).await.unwrap();
        let b = cache.transaction_client(&key).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
