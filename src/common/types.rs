//! Shared type definitions for the gateway
//!
//! Values exchanged between the HTTP surface, the orchestration core and the
//! ledger network collaborators.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies the pair of channel clients derived for one (channel, org, user)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientCacheKey {
    pub channel_id: String,
    pub org_name: String,
    pub user_name: String,
}

impl ClientCacheKey {
    pub fn new(
        channel_id: impl Into<String>,
        org_name: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            org_name: org_name.into(),
            user_name: user_name.into(),
        }
    }
}

impl fmt::Display for ClientCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.channel_id, self.org_name, self.user_name)
    }
}

/// Chaincode invocation as submitted to a transaction client
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChaincodeRequest {
    pub chaincode_id: String,
    pub fcn: String,
    pub args: Vec<Vec<u8>>,
}

impl ChaincodeRequest {
    pub fn new(chaincode_id: impl Into<String>, fcn: impl Into<String>, args: &[String]) -> Self {
        Self {
            chaincode_id: chaincode_id.into(),
            fcn: fcn.into(),
            args: to_bytes_args(args),
        }
    }
}

pub fn to_bytes_args(args: &[String]) -> Vec<Vec<u8>> {
    args.iter().map(|a| a.as_bytes().to_vec()).collect()
}

/// Result of an execute or query round trip
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxResponse {
    pub transaction_id: String,
    pub payload: Vec<u8>,
    pub validation_code: i32,
}

/// Chaincode event delivered to registered listeners.
///
/// Field names follow the network SDK's JSON encoding so webhook receivers
/// written against it keep working. The payload travels as standard padded
/// base64, the way the SDK marshals byte slices.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeEvent {
    #[serde(rename = "TxID")]
    pub tx_id: String,
    #[serde(rename = "ChaincodeID")]
    pub chaincode_id: String,
    #[serde(rename = "EventName")]
    pub event_name: String,
    #[serde(rename = "Payload", with = "base64_bytes")]
    pub payload: Vec<u8>,
    #[serde(rename = "BlockNumber")]
    pub block_number: u64,
    #[serde(rename = "SourceURL", default)]
    pub source_url: String,
}

/// Handle returned by event registration, consumed by unregistration
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventRegistration {
    pub id: Uuid,
    pub chaincode_id: String,
    pub filter: String,
}

impl EventRegistration {
    pub fn new(chaincode_id: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            chaincode_id: chaincode_id.into(),
            filter: filter.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub previous_hash: Vec<u8>,
    pub data_hash: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub tx_ids: Vec<String>,
}

/// Signing identity of an enrolled user
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningIdentity {
    pub id: String,
    pub msp_id: String,
    pub certificate: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct SaveChannelRequest {
    pub channel_id: String,
    pub channel_config_path: String,
    pub signing_identities: Vec<SigningIdentity>,
}

/// Per-call options for resource management operations
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub orderer_endpoint: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageFile {
    pub path: String,
    pub content: Vec<u8>,
}

/// Chaincode source tree ready for installation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChaincodePackage {
    pub files: Vec<PackageFile>,
    /// SHA-256 over every file path and content, in package order
    pub digest: [u8; 32],
}

#[derive(Clone, Debug)]
pub struct InstallRequest {
    pub name: String,
    pub path: String,
    pub version: String,
    pub package: ChaincodePackage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndorsementPolicy {
    /// Any member of any listed MSP may endorse
    SignedByAnyMember(Vec<String>),
}

impl fmt::Display for EndorsementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndorsementPolicy::SignedByAnyMember(msps) => {
                let members: Vec<String> = msps.iter().map(|m| format!("'{}.member'", m)).collect();
                write!(f, "OR({})", members.join(","))
            }
        }
    }
}

/// Instantiate or upgrade request
#[derive(Clone, Debug)]
pub struct DeployRequest {
    pub name: String,
    pub path: String,
    pub version: String,
    pub args: Vec<Vec<u8>>,
    pub policy: EndorsementPolicy,
}

/// Persisted metadata of the block that committed a transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Assigned by the store on insert
    pub id: u64,
    pub number: u64,
    pub previous_hash: String,
    pub tx_id: String,
    pub timestamp: i64,
    pub channel_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
    /// Anything other than `asc`/`desc`: store order
    Unspecified,
}

impl SortOrder {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "asc" => SortOrder::Asc,
            "desc" => SortOrder::Desc,
            _ => SortOrder::Unspecified,
        }
    }
}

/// Offset pagination with optional sort
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageRequest {
    /// Zero-based row offset
    pub start: usize,
    pub limit: usize,
    pub sort_name: String,
    pub sort_order: SortOrder,
}

impl PageRequest {
    pub fn new(start: usize, limit: usize) -> Self {
        Self {
            start,
            limit,
            sort_name: String::new(),
            sort_order: SortOrder::Unspecified,
        }
    }

    pub fn sorted(mut self, sort_name: impl Into<String>, sort_order: SortOrder) -> Self {
        self.sort_name = sort_name.into();
        self.sort_order = sort_order;
        self
    }
}

pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}
