//! Block record storage using RocksDB
//!
//! Key layout:
//! * `block_record:{id:020}` -> bincode `BlockRecord` (store order = id order)
//! * `block_tx:{tx_id}` -> record id (big endian), unique per transaction
//! * `block_num:{number:020}:{id:020}` -> empty, orders records by block number
//! * `meta:next_block_record_id` -> next id to assign (big endian)
//!
//! Records are never deleted, so ids are dense and `next id - 1` is the row
//! count. Pages in id or block number order are read straight off the keys;
//! only the remaining sort fields load the whole table.

use crate::{
    common::{
        traits::BlockStore,
        types::{BlockRecord, PageRequest, SortOrder},
    },
    errors::StorageError,
};
use async_trait::async_trait;
use rocksdb::{Direction, IteratorMode, Options, Snapshot, WriteBatch, DB};
use std::{cmp::Ordering, path::Path, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, info};

const RECORD_PREFIX: &str = "block_record:";
const TX_INDEX_PREFIX: &str = "block_tx:";
const NUMBER_INDEX_PREFIX: &str = "block_num:";
/// Sorts after every `block_num:` key
const NUMBER_INDEX_END: &[u8] = b"block_num;";
const NEXT_ID_KEY: &[u8] = b"meta:next_block_record_id";
const NUMBER_INDEX_READY_KEY: &[u8] = b"meta:number_index_ready";

fn record_key(id: u64) -> Vec<u8> {
    format!("{}{:020}", RECORD_PREFIX, id).into_bytes()
}

fn tx_index_key(tx_id: &str) -> Vec<u8> {
    format!("{}{}", TX_INDEX_PREFIX, tx_id).into_bytes()
}

fn number_index_key(number: u64, id: u64) -> Vec<u8> {
    format!("{}{:020}:{:020}", NUMBER_INDEX_PREFIX, number, id).into_bytes()
}

fn id_from_number_index(key: &[u8]) -> Result<u64, StorageError> {
    std::str::from_utf8(key)
        .ok()
        .and_then(|k| k.rsplit(':').next())
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| {
            StorageError::CorruptedData(format!("bad number index key {}", String::from_utf8_lossy(key)))
        })
}

fn decode_u64(bytes: &[u8]) -> Result<u64, StorageError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::CorruptedData(format!("expected 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

fn read_err(e: rocksdb::Error) -> StorageError {
    StorageError::ReadFailed(e.to_string())
}

type Comparator = fn(&BlockRecord, &BlockRecord) -> Ordering;

fn comparator(sort_name: &str) -> Option<Comparator> {
    let compare: Comparator = match sort_name {
        "id" => |a: &BlockRecord, b: &BlockRecord| a.id.cmp(&b.id),
        "number" => |a: &BlockRecord, b: &BlockRecord| a.number.cmp(&b.number),
        "previous_hash" => |a: &BlockRecord, b: &BlockRecord| a.previous_hash.cmp(&b.previous_hash),
        "tx_id" => |a: &BlockRecord, b: &BlockRecord| a.tx_id.cmp(&b.tx_id),
        "timestamp" => |a: &BlockRecord, b: &BlockRecord| a.timestamp.cmp(&b.timestamp),
        "channel_id" => |a: &BlockRecord, b: &BlockRecord| a.channel_id.cmp(&b.channel_id),
        _ => return None,
    };
    Some(compare)
}

/// Sort `records` in place by a named field.
///
/// Returns false, leaving the order untouched, when the order is unspecified
/// or the field is not sortable.
pub fn sort_records(records: &mut [BlockRecord], sort_name: &str, order: SortOrder) -> bool {
    let Some(compare) = comparator(sort_name) else {
        return false;
    };

    match order {
        SortOrder::Asc => records.sort_by(compare),
        SortOrder::Desc => records.sort_by(|a, b| compare(b, a)),
        SortOrder::Unspecified => return false,
    }
    true
}

/// How a page request is served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageScan {
    ById { desc: bool },
    ByNumber { desc: bool },
    FullSort,
}

impl PageScan {
    fn for_request(page: &PageRequest) -> Self {
        let desc = page.sort_order == SortOrder::Desc;
        match (page.sort_name.as_str(), page.sort_order) {
            (_, SortOrder::Unspecified) => PageScan::ById { desc: false },
            ("id", _) => PageScan::ById { desc },
            ("number", _) => PageScan::ByNumber { desc },
            (name, _) if comparator(name).is_some() => PageScan::FullSort,
            _ => PageScan::ById { desc: false },
        }
    }
}

#[derive(Clone)]
pub struct RocksBlockStore {
    db: Arc<DB>,
    /// Serializes the unique check, id assignment and write of inserts
    write_lock: Arc<Mutex<()>>,
}

impl RocksBlockStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path.as_ref())
            .map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;
        info!(path = %path.as_ref().display(), "Block record store opened");

        let store = Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        };
        store.ensure_number_index()?;
        Ok(store)
    }

    /// Build the block number index for records written before it existed
    fn ensure_number_index(&self) -> Result<(), StorageError> {
        if self.db.get(NUMBER_INDEX_READY_KEY).map_err(read_err)?.is_some() {
            return Ok(());
        }

        let records = self.scan_records()?;
        let mut batch = WriteBatch::default();
        for record in &records {
            batch.put(number_index_key(record.number, record.id), b"");
        }
        batch.put(NUMBER_INDEX_READY_KEY, b"");
        self.db.write(batch)?;

        if !records.is_empty() {
            info!(records = records.len(), "Block number index rebuilt");
        }
        Ok(())
    }

    fn next_id(&self) -> Result<u64, StorageError> {
        match self.db.get(NEXT_ID_KEY).map_err(read_err)? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(1),
        }
    }

    fn stored_count(snapshot: &Snapshot<'_>) -> Result<u64, StorageError> {
        match snapshot.get(NEXT_ID_KEY).map_err(read_err)? {
            Some(bytes) => Ok(decode_u64(&bytes)?.saturating_sub(1)),
            None => Ok(0),
        }
    }

    fn load_record(snapshot: &Snapshot<'_>, id: u64) -> Result<BlockRecord, StorageError> {
        match snapshot.get(record_key(id)).map_err(read_err)? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Err(StorageError::CorruptedData(format!("index points at missing record {}", id))),
        }
    }

    /// Seek to the first id of the page and decode only the rows it returns
    fn page_by_id(&self, start: usize, limit: usize, desc: bool) -> Result<(Vec<BlockRecord>, u64), StorageError> {
        let snapshot = self.db.snapshot();
        let total = Self::stored_count(&snapshot)?;
        let start = start as u64;
        if start >= total || limit == 0 {
            return Ok((Vec::new(), total));
        }

        let (first, direction) = if desc {
            (total - start, Direction::Reverse)
        } else {
            (start + 1, Direction::Forward)
        };
        let first_key = record_key(first);
        let prefix = RECORD_PREFIX.as_bytes();

        let mut rows = Vec::with_capacity(limit.min((total - start) as usize));
        for item in snapshot
            .iterator(IteratorMode::From(&first_key[..], direction))
            .take(limit)
        {
            let (key, value) = item.map_err(read_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push(bincode::deserialize::<BlockRecord>(&value)?);
        }
        Ok((rows, total))
    }

    /// Walk the number index, skipping `start` keys without loading records
    fn page_by_number(&self, start: usize, limit: usize, desc: bool) -> Result<(Vec<BlockRecord>, u64), StorageError> {
        let snapshot = self.db.snapshot();
        let total = Self::stored_count(&snapshot)?;
        let prefix = NUMBER_INDEX_PREFIX.as_bytes();
        let mode = if desc {
            IteratorMode::From(NUMBER_INDEX_END, Direction::Reverse)
        } else {
            IteratorMode::From(prefix, Direction::Forward)
        };

        let mut rows = Vec::with_capacity(limit.min(total as usize));
        let keys = snapshot
            .iterator(mode)
            .take_while(|item| item.as_ref().map_or(true, |(key, _)| key.starts_with(prefix)))
            .skip(start)
            .take(limit);
        for item in keys {
            let (key, _) = item.map_err(read_err)?;
            let id = id_from_number_index(&key)?;
            rows.push(Self::load_record(&snapshot, id)?);
        }
        Ok((rows, total))
    }

    /// All records in id order, from one snapshot
    fn scan_records(&self) -> Result<Vec<BlockRecord>, StorageError> {
        let snapshot = self.db.snapshot();
        let prefix = RECORD_PREFIX.as_bytes();
        let mut records = Vec::new();

        for item in snapshot.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item.map_err(read_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            records.push(bincode::deserialize::<BlockRecord>(&value)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl BlockStore for RocksBlockStore {
    async fn insert(&self, mut record: BlockRecord) -> Result<BlockRecord, StorageError> {
        let _guard = self.write_lock.lock().await;

        let tx_key = tx_index_key(&record.tx_id);
        if self.db.get(&tx_key).map_err(read_err)?.is_some() {
            return Err(StorageError::DuplicateTransaction(record.tx_id));
        }

        let id = self.next_id()?;
        record.id = id;

        let mut batch = WriteBatch::default();
        batch.put(record_key(id), bincode::serialize(&record)?);
        batch.put(&tx_key, id.to_be_bytes());
        batch.put(number_index_key(record.number, id), b"");
        batch.put(NEXT_ID_KEY, (id + 1).to_be_bytes());
        self.db.write(batch)?;

        debug!(id, tx_id = %record.tx_id, number = record.number, "Block record stored");
        Ok(record)
    }

    async fn find_page(&self, page: &PageRequest) -> Result<(Vec<BlockRecord>, u64), StorageError> {
        match PageScan::for_request(page) {
            PageScan::ById { desc } => self.page_by_id(page.start, page.limit, desc),
            PageScan::ByNumber { desc } => self.page_by_number(page.start, page.limit, desc),
            PageScan::FullSort => {
                let mut records = self.scan_records()?;
                let total = records.len() as u64;
                sort_records(&mut records, &page.sort_name, page.sort_order);

                let rows = records
                    .into_iter()
                    .skip(page.start)
                    .take(page.limit)
                    .collect();
                Ok((rows, total))
            }
        }
    }

    async fn find_by_tx_id(&self, tx_id: &str) -> Result<Option<BlockRecord>, StorageError> {
        let snapshot = self.db.snapshot();
        let Some(id_bytes) = snapshot.get(tx_index_key(tx_id)).map_err(read_err)? else {
            return Ok(None);
        };
        let id = decode_u64(&id_bytes)?;
        Self::load_record(&snapshot, id).map(Some)
    }
}
