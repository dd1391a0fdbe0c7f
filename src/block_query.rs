//! Paginated reads over stored block records

use crate::{
    common::{
        traits::BlockStore,
        types::{BlockRecord, PageRequest},
    },
    errors::{GatewayError, GatewayResult},
};
use std::sync::Arc;
use tracing::debug;

pub const MAX_PAGE_SIZE: usize = 100;

/// One page of block records and the unpaginated total
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPage {
    pub rows: Vec<BlockRecord>,
    pub total: u64,
}

#[derive(Clone)]
pub struct BlockQueryService {
    store: Arc<dyn BlockStore>,
}

impl BlockQueryService {
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self { store }
    }

    pub async fn list_blocks(&self, page: &PageRequest) -> GatewayResult<BlockPage> {
        let (rows, total) = self
            .store
            .find_page(page)
            .await
            .map_err(GatewayError::BlockListFailed)?;
        debug!(start = page.start, limit = page.limit, returned = rows.len(), total, "Listed block records");
        Ok(BlockPage { rows, total })
    }

    pub async fn find_by_tx_id(&self, tx_id: &str) -> GatewayResult<BlockRecord> {
        self.store
            .find_by_tx_id(tx_id)
            .await
            .map_err(GatewayError::BlockListFailed)?
            .ok_or_else(|| GatewayError::RecordNotFound(tx_id.to_string()))
    }
}

/// Turn a 1-based page number and requested size into a row window.
///
/// Page numbers below 1 are treated as 1; the size is clamped to
/// `[1, MAX_PAGE_SIZE]`.
pub fn page_window(page_number: u64, limit: u64) -> (usize, usize) {
    let limit = limit.clamp(1, MAX_PAGE_SIZE as u64) as usize;
    let page_number = page_number.max(1) as usize;
    ((page_number - 1).saturating_mul(limit), limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{common::types::SortOrder, storage::RocksBlockStore};
    use tempfile::TempDir;

    async fn service_with(numbers: &[u64]) -> (TempDir, BlockQueryService) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksBlockStore::open(dir.path()).unwrap());
        for &n in numbers {
            store
                .insert(BlockRecord {
                    id: 0,
                    number: n,
                    previous_hash: String::new(),
                    tx_id: format!("tx-{}", n),
                    timestamp: n as i64,
                    channel_id: "mychannel".into(),
                })
                .await
                .unwrap();
        }
        (dir, BlockQueryService::new(store))
    }

    #[test]
    fn test_page_window() {
        assert_eq!(page_window(1, 10), (0, 10));
        assert_eq!(page_window(3, 10), (20, 10));
        assert_eq!(page_window(0, 10), (0, 10));
        assert_eq!(page_window(2, 0), (1, 1));
        assert_eq!(page_window(1, 1000), (0, 100));
    }

    #[tokio::test]
    async fn test_total_ignores_pagination() {
        let numbers: Vec<u64> = (1..=25).collect();
        let (_dir, service) = service_with(&numbers).await;

        let (start, limit) = page_window(3, 10);
        let page = service.list_blocks(&PageRequest::new(start, limit)).await.unwrap();
        assert_eq!(page.total, 25);
        assert_eq!(page.rows.len(), 5);
    }

    #[tokio::test]
    async fn test_number_desc() {
        let (_dir, service) = service_with(&[4, 9, 1, 7]).await;
        let page = service
            .list_blocks(&PageRequest::new(0, 2).sorted("number", SortOrder::Desc))
            .await
            .unwrap();
        assert_eq!(page.rows.iter().map(|r| r.number).collect::<Vec<_>>(), vec![9, 7]);
        assert_eq!(page.total, 4);
    }

    #[tokio::test]
    async fn test_find_by_tx_id() {
        let (_dir, service) = service_with(&[1, 2]).await;
        assert_eq!(service.find_by_tx_id("tx-2").await.unwrap().number, 2);
        assert!(matches!(
            service.find_by_tx_id("tx-9").await,
            Err(GatewayError::RecordNotFound(_))
        ));
    }
}
