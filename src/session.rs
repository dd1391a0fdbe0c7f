//! Organization sessions
//!
//! One long-lived network session per configured organization, opened at
//! startup and closed at shutdown. Channel and chaincode lifecycle calls go
//! through the organization's administrative resource client under a bounded
//! retry policy.

use crate::{
    common::{
        traits::{
            IdentityClient, LedgerClient, NetworkSession, NetworkSessionFactory,
            ResourceManagementClient, TransactionClient,
        },
        types::{
            ChaincodePackage, ClientCacheKey, DeployRequest, EndorsementPolicy, InstallRequest,
            PackageFile, RequestOptions, SaveChannelRequest,
        },
    },
    config::OrganizationConfig,
    errors::{GatewayError, GatewayResult, NetworkError},
};
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, info, warn};

/// Bounded exponential backoff for resource management calls
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, NetworkError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, NetworkError>>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    debug!(operation, attempt, backoff_ms = backoff.as_millis() as u64, error = %e, "Retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.mul_f64(self.backoff_factor).min(self.max_backoff);
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(operation, attempts = attempt, error = %e, "Retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Network session of one organization plus its administrative clients
pub struct OrganizationSession {
    org: OrganizationConfig,
    network: Arc<dyn NetworkSession>,
    resource_client: Arc<dyn ResourceManagementClient>,
    identity_client: Arc<dyn IdentityClient>,
    retry: RetryPolicy,
    chaincode_root: PathBuf,
}

impl OrganizationSession {
    async fn open(
        org: &OrganizationConfig,
        factory: &dyn NetworkSessionFactory,
        retry: RetryPolicy,
        chaincode_root: PathBuf,
    ) -> Result<Self, NetworkError> {
        let network = factory.open(org).await?;
        let clients = async {
            let resource_client = network.resource_client(&org.org_name, &org.org_admin).await?;
            let identity_client = network.identity_client(&org.org_name).await?;
            Ok::<_, NetworkError>((resource_client, identity_client))
        }
        .await;

        match clients {
            Ok((resource_client, identity_client)) => Ok(Self {
                org: org.clone(),
                network,
                resource_client,
                identity_client,
                retry,
                chaincode_root,
            }),
            Err(e) => {
                network.close().await;
                Err(e)
            }
        }
    }

    fn request_options(&self) -> RequestOptions {
        RequestOptions {
            orderer_endpoint: Some(self.org.orderer_org_name.clone()),
        }
    }

    fn endorsement_policy(&self) -> EndorsementPolicy {
        EndorsementPolicy::SignedByAnyMember(vec![self.org.org_msp_id.clone()])
    }

    /// Create a channel signed by the organization's admin identity
    pub async fn create_channel(&self, channel_id: &str) -> GatewayResult<()> {
        let admin = self
            .identity_client
            .signing_identity(&self.org.org_admin)
            .await
            .map_err(GatewayError::ChannelCreateFailed)?;

        let req = SaveChannelRequest {
            channel_id: channel_id.to_string(),
            channel_config_path: self.org.channel_config_path.clone(),
            signing_identities: vec![admin],
        };
        let opts = self.request_options();
        self.retry
            .run("save_channel", || self.resource_client.save_channel(&req, &opts))
            .await
            .map_err(GatewayError::ChannelCreateFailed)?;

        info!(org = %self.org.org_name, channel = channel_id, "Channel created");
        Ok(())
    }

    pub async fn join_channel(&self, channel_id: &str) -> GatewayResult<()> {
        let opts = self.request_options();
        self.retry
            .run("join_channel", || self.resource_client.join_channel(channel_id, &opts))
            .await
            .map_err(GatewayError::ChannelJoinFailed)?;

        info!(org = %self.org.org_name, channel = channel_id, "Peers joined channel");
        Ok(())
    }

    pub async fn install_chaincode(&self, id: &str, version: &str, path: &str) -> GatewayResult<()> {
        let package =
            package_chaincode(&self.chaincode_root, path).map_err(GatewayError::InstallFailed)?;
        debug!(chaincode = id, files = package.files.len(), digest = %hex::encode(package.digest), "Chaincode packaged");

        let req = InstallRequest {
            name: id.to_string(),
            path: path.to_string(),
            version: version.to_string(),
            package,
        };
        let opts = RequestOptions::default();
        self.retry
            .run("install_chaincode", || self.resource_client.install_chaincode(&req, &opts))
            .await
            .map_err(GatewayError::InstallFailed)?;

        info!(org = %self.org.org_name, chaincode = id, version, "Chaincode installed");
        Ok(())
    }

    pub async fn instantiate_chaincode(
        &self,
        channel_id: &str,
        id: &str,
        version: &str,
        path: &str,
        args: &[String],
    ) -> GatewayResult<()> {
        let req = self.deploy_request(id, version, path, args);
        let opts = RequestOptions::default();
        self.retry
            .run("instantiate_chaincode", || {
                self.resource_client.instantiate_chaincode(channel_id, &req, &opts)
            })
            .await
            .map_err(GatewayError::InstantiateFailed)?;

        info!(org = %self.org.org_name, channel = channel_id, chaincode = id, version, "Chaincode instantiated");
        Ok(())
    }

    pub async fn upgrade_chaincode(
        &self,
        channel_id: &str,
        id: &str,
        version: &str,
        path: &str,
        args: &[String],
    ) -> GatewayResult<()> {
        let req = self.deploy_request(id, version, path, args);
        let opts = RequestOptions::default();
        self.retry
            .run("upgrade_chaincode", || {
                self.resource_client.upgrade_chaincode(channel_id, &req, &opts)
            })
            .await
            .map_err(GatewayError::UpgradeFailed)?;

        info!(org = %self.org.org_name, channel = channel_id, chaincode = id, version, "Chaincode upgraded");
        Ok(())
    }

    fn deploy_request(&self, id: &str, version: &str, path: &str, args: &[String]) -> DeployRequest {
        DeployRequest {
            name: id.to_string(),
            path: path.to_string(),
            version: version.to_string(),
            args: crate::common::types::to_bytes_args(args),
            policy: self.endorsement_policy(),
        }
    }

    pub(crate) async fn new_transaction_client(
        &self,
        key: &ClientCacheKey,
    ) -> Result<Arc<dyn TransactionClient>, NetworkError> {
        self.network.transaction_client(key).await
    }

    pub(crate) async fn new_ledger_client(
        &self,
        key: &ClientCacheKey,
    ) -> Result<Arc<dyn LedgerClient>, NetworkError> {
        self.network.ledger_client(key).await
    }

    async fn close(&self) {
        self.network.close().await;
    }
}

/// All organization sessions, immutable after initialization
pub struct SessionRegistry {
    sessions: HashMap<String, Arc<OrganizationSession>>,
}

impl SessionRegistry {
    /// Open a session for every organization. Fails on the first organization
    /// that cannot be opened, after closing the ones already opened.
    pub async fn init(
        orgs: &[OrganizationConfig],
        factory: &dyn NetworkSessionFactory,
        chaincode_root: impl Into<PathBuf>,
    ) -> GatewayResult<Self> {
        Self::init_with_retry(orgs, factory, chaincode_root, RetryPolicy::default()).await
    }

    pub async fn init_with_retry(
        orgs: &[OrganizationConfig],
        factory: &dyn NetworkSessionFactory,
        chaincode_root: impl Into<PathBuf>,
        retry: RetryPolicy,
    ) -> GatewayResult<Self> {
        let chaincode_root = chaincode_root.into();
        let mut sessions = HashMap::with_capacity(orgs.len());

        for org in orgs {
            match OrganizationSession::open(org, factory, retry.clone(), chaincode_root.clone()).await {
                Ok(session) => {
                    info!(org = %org.org_name, msp = %org.org_msp_id, "Organization session opened");
                    sessions.insert(org.org_name.clone(), Arc::new(session));
                }
                Err(source) => {
                    warn!(org = %org.org_name, error = %source, "Organization session failed to open");
                    Self { sessions }.close_all().await;
                    return Err(GatewayError::SessionInitFailed {
                        org: org.org_name.clone(),
                        source,
                    });
                }
            }
        }

        Ok(Self { sessions })
    }

    pub fn get(&self, org_name: &str) -> GatewayResult<Arc<OrganizationSession>> {
        self.sessions
            .get(org_name)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownOrganization(org_name.to_string()))
    }

    pub fn org_names(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Release every session. Closing twice is a no-op per session.
    pub async fn close_all(&self) {
        for (name, session) in &self.sessions {
            session.close().await;
            debug!(org = %name, "Organization session closed");
        }
    }
}

/// Collect `<root>/src/<path>` into an installable package.
///
/// Files are ordered by relative path so the digest is stable.
pub fn package_chaincode(root: &Path, path: &str) -> Result<ChaincodePackage, NetworkError> {
    let base = root.join("src").join(path);
    if !base.is_dir() {
        return Err(NetworkError::Package(format!(
            "chaincode source directory {} not found",
            base.display()
        )));
    }

    let mut files = Vec::new();
    collect_files(&base, &base, &mut files)?;
    if files.is_empty() {
        return Err(NetworkError::Package(format!("{} contains no files", base.display())));
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = Sha256::new();
    for file in &files {
        hasher.update(file.path.as_bytes());
        hasher.update(&file.content);
    }

    Ok(ChaincodePackage {
        files,
        digest: hasher.finalize().into(),
    })
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<PackageFile>) -> Result<(), NetworkError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| NetworkError::Package(format!("{}: {}", dir.display(), e)))?;

    for entry in entries {
        let entry = entry.map_err(|e| NetworkError::Package(e.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(base, &path, out)?;
        } else {
            let content = std::fs::read(&path)
                .map_err(|e| NetworkError::Package(format!("{}: {}", path.display(), e)))?;
            let relative = path
                .strip_prefix(base)
                .map_err(|e| NetworkError::Package(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            out.push(PackageFile { path: relative, content });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::SimulatedNetwork;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn org(name: &str) -> OrganizationConfig {
        OrganizationConfig {
            org_name: name.to_string(),
            org_admin: "Admin".to_string(),
            orderer_org_name: "orderer.example.com".to_string(),
            org_msp_id: format!("{}MSP", name),
            sdk_config_path: String::new(),
            channel_config_path: "./channel.tx".to_string(),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            backoff_factor: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let calls = &AtomicU32::new(0);
        let result = fast_retry()
            .run("op", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(NetworkError::Transient("busy".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast_retry()
            .run("op", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(NetworkError::Transient("busy".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast_retry()
            .run("op", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(NetworkError::Rejected("bad".into()))
            })
            .await;
        assert_eq!(result, Err(NetworkError::Rejected("bad".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_init_opens_every_org() {
        let network = SimulatedNetwork::new();
        let registry = SessionRegistry::init(&[org("Org1"), org("Org2")], &network, "/tmp")
            .await
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("Org1").is_ok());
        assert!(matches!(
            registry.get("Org3"),
            Err(GatewayError::UnknownOrganization(_))
        ));
        registry.close_all().await;
        assert_eq!(network.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_init_has_no_partial_success() {
        let network = SimulatedNetwork::new();
        network.reject_org("Org2");
        let err = SessionRegistry::init(&[org("Org1"), org("Org2")], &network, "/tmp")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::SessionInitFailed { org: ref failed, .. } if failed == "Org2"));
        assert_eq!(network.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_lifecycle_retries_transient_failures() {
        let network = SimulatedNetwork::new();
        let registry =
            SessionRegistry::init_with_retry(&[org("Org1")], &network, "/tmp", fast_retry())
                .await
                .unwrap();
        let session = registry.get("Org1").unwrap();

        network.fail_next_lifecycle_calls(2);
        session.create_channel("mychannel").await.unwrap();
        session.join_channel("mychannel").await.unwrap();
        assert!(network.has_joined("mychannel", "Org1"));

        network.fail_next_lifecycle_calls(5);
        let err = session.join_channel("other").await.unwrap_err();
        assert!(matches!(err, GatewayError::ChannelJoinFailed(_)));
    }

    #[tokio::test]
    async fn test_install_and_instantiate_use_org_policy() {
        let dir = tempfile::tempdir().unwrap();
        let cc_dir = dir.path().join("src").join("github.com/example/cc");
        std::fs::create_dir_all(cc_dir.join("lib")).unwrap();
        std::fs::write(cc_dir.join("main.go"), b"package main").unwrap();
        std::fs::write(cc_dir.join("lib").join("util.go"), b"package lib").unwrap();

        let network = SimulatedNetwork::new();
        let registry = SessionRegistry::init(&[org("Org1")], &network, dir.path())
            .await
            .unwrap();
        let session = registry.get("Org1").unwrap();

        session.create_channel("mychannel").await.unwrap();
        session.join_channel("mychannel").await.unwrap();
        session
            .install_chaincode("mycc", "1.0", "github.com/example/cc")
            .await
            .unwrap();
        session
            .instantiate_chaincode("mychannel", "mycc", "1.0", "github.com/example/cc", &["init".to_string()])
            .await
            .unwrap();

        let deployed = network.deployed("mychannel", "mycc").unwrap();
        assert_eq!(deployed.version, "1.0");
        assert_eq!(deployed.policy, EndorsementPolicy::SignedByAnyMember(vec!["Org1MSP".into()]));

        session
            .upgrade_chaincode("mychannel", "mycc", "1.1", "github.com/example/cc", &[])
            .await
            .unwrap();
        assert_eq!(network.deployed("mychannel", "mycc").unwrap().version, "1.1");
    }

    #[test]
    fn test_package_is_sorted_and_stable() {
        let dir = tempfile::tempdir().unwrap();
        let cc_dir = dir.path().join("src").join("cc");
        std::fs::create_dir_all(&cc_dir).unwrap();
        std::fs::write(cc_dir.join("b.go"), b"b").unwrap();
        std::fs::write(cc_dir.join("a.go"), b"a").unwrap();

        let first = package_chaincode(dir.path(), "cc").unwrap();
        let second = package_chaincode(dir.path(), "cc").unwrap();
        assert_eq!(first.files[0].path, "a.go");
        assert_eq!(first.digest, second.digest);
    }

    #[test]
    fn test_missing_package_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            package_chaincode(dir.path(), "nope"),
            Err(NetworkError::Package(_))
        ));
    }
}
