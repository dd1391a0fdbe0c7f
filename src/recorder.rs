//! Records the block that committed a transaction
//!
//! Every failure here happens after the ledger accepted the transaction, so
//! all of them are reported in the post-commit category along with the
//! transaction id. Re-recording the same transaction is rejected by the
//! store's unique index.

use crate::{
    common::{
        traits::{BlockStore, LedgerClient},
        types::{BlockRecord, TxResponse},
    },
    errors::{GatewayError, GatewayResult, StorageError},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Transaction summary carried in an execute response payload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TxInfo {
    #[serde(rename = "Channel", default)]
    pub channel: String,
    #[serde(rename = "TxID", default)]
    pub tx_id: String,
    #[serde(rename = "Timestamp", default)]
    pub timestamp: TxTimestamp,
}

/// Commit time carried in the execute payload.
///
/// Chaincode marshals it as a byte slice, so it normally arrives as base64 of
/// `{"seconds":..,"nanos":..}`. The bare object, plain epoch seconds and null
/// are accepted as well.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawTimestamp")]
pub struct TxTimestamp {
    pub seconds: i64,
    pub nanos: i32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Parts {
        #[serde(default)]
        seconds: i64,
        #[serde(default)]
        nanos: i32,
    },
    Seconds(i64),
    Encoded(String),
    Absent,
}

impl TryFrom<RawTimestamp> for TxTimestamp {
    type Error = String;

    fn try_from(raw: RawTimestamp) -> Result<Self, Self::Error> {
        match raw {
            RawTimestamp::Parts { seconds, nanos } => Ok(Self { seconds, nanos }),
            RawTimestamp::Seconds(seconds) => Ok(Self { seconds, nanos: 0 }),
            RawTimestamp::Absent => Ok(Self::default()),
            RawTimestamp::Encoded(encoded) if encoded.is_empty() => Ok(Self::default()),
            RawTimestamp::Encoded(encoded) => {
                let bytes = STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| format!("timestamp is not base64: {}", e))?;
                match serde_json::from_slice::<RawTimestamp>(&bytes)
                    .map_err(|e| format!("encoded timestamp: {}", e))?
                {
                    RawTimestamp::Encoded(_) => Err("timestamp encoded twice".to_string()),
                    inner => Self::try_from(inner),
                }
            }
        }
    }
}

impl TxInfo {
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

pub struct CommitRecorder {
    store: Arc<dyn BlockStore>,
}

impl CommitRecorder {
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self { store }
    }

    /// Record on its own task. The row is still written, and the outcome
    /// logged, when the caller stops waiting.
    pub fn spawn_record(
        self: &Arc<Self>,
        response: TxResponse,
        ledger: Arc<dyn LedgerClient>,
    ) -> JoinHandle<GatewayResult<BlockRecord>> {
        let recorder = Arc::clone(self);
        tokio::spawn(async move { recorder.record(&response, ledger.as_ref()).await })
    }

    /// Wait for a spawned recording, surfacing a crashed task as a persist failure
    pub async fn join(tx_id: &str, handle: JoinHandle<GatewayResult<BlockRecord>>) -> GatewayResult<BlockRecord> {
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(tx_id, error = %e, "Block recording task failed after commit");
                Err(GatewayError::PersistFailed {
                    tx_id: tx_id.to_string(),
                    source: StorageError::WriteFailed(format!("recording task: {}", e)),
                })
            }
        }
    }

    /// Resolve and persist the block metadata of a committed transaction
    pub async fn record(&self, response: &TxResponse, ledger: &dyn LedgerClient) -> GatewayResult<BlockRecord> {
        let committed_tx = response.transaction_id.clone();

        let info = TxInfo::decode(&response.payload).map_err(|e| {
            warn!(tx_id = %committed_tx, error = %e, "Undecodable execute payload");
            GatewayError::PayloadDecodeFailed {
                tx_id: committed_tx.clone(),
                reason: e.to_string(),
            }
        })?;

        let block = ledger
            .query_block_by_tx_id(&committed_tx)
            .await
            .map_err(|source| {
                warn!(tx_id = %committed_tx, error = %source, "Block lookup failed after commit");
                GatewayError::BlockLookupFailed {
                    tx_id: committed_tx.clone(),
                    source,
                }
            })?;

        let tx_id = if info.tx_id.is_empty() {
            committed_tx.clone()
        } else {
            info.tx_id
        };

        let record = BlockRecord {
            id: 0,
            number: block.header.number,
            previous_hash: hex::encode(&block.header.previous_hash),
            tx_id,
            timestamp: info.timestamp.seconds,
            channel_id: info.channel,
        };

        let stored = self.store.insert(record).await.map_err(|source| {
            warn!(tx_id = %committed_tx, error = %source, "Block record persist failed after commit");
            GatewayError::PersistFailed {
                tx_id: committed_tx.clone(),
                source,
            }
        })?;

        info!(tx_id = %stored.tx_id, block = stored.number, channel = %stored.channel_id, "Block record saved");
        Ok(stored)
    }
}
