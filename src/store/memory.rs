//! In-memory log store.
//!
//! Records live in a copy-on-write map. A snapshot is a cheap `Arc` clone of
//! the map; writers that find a snapshot alive copy the map before mutating, so
//! every snapshot stays frozen at the moment it was taken.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{LogRecord, LogSnapshot, LogStore, NewLogRecord, StoreResult};

type RecordMap = BTreeMap<i64, LogRecord>;

#[derive(Default)]
struct MemoryState {
    records: Arc<RecordMap>,
    last_id: i64,
}

/// Log store backed by process memory. Contents are lost on restart.
#[derive(Default)]
pub struct InMemoryLogStore {
    state: RwLock<MemoryState>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, assigning the next id.
    pub async fn insert(&self, record: NewLogRecord) -> LogRecord {
        let mut state = self.state.write().await;
        state.last_id += 1;
        let record = record.into_record(state.last_id);
        Arc::make_mut(&mut state.records).insert(record.id, record.clone());
        record
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn ids(&self) -> Vec<i64> {
        self.state.read().await.records.keys().copied().collect()
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn snapshot(&self) -> StoreResult<Box<dyn LogSnapshot>> {
        let records = Arc::clone(&self.state.read().await.records);
        Ok(Box::new(MemorySnapshot { records }))
    }

    async fn delete_by_ids(&self, ids: &[i64]) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.write().await;
        let records = Arc::make_mut(&mut state.records);
        let removed = ids.iter().filter(|id| records.remove(*id).is_some()).count();
        Ok(removed as u64)
    }
}

struct MemorySnapshot {
    records: Arc<RecordMap>,
}

impl MemorySnapshot {
    fn sorted_by_age<'a>(&'a self, filter: impl Fn(&LogRecord) -> bool) -> Vec<&'a LogRecord> {
        let mut records: Vec<&LogRecord> = self.records.values().filter(|r| filter(r)).collect();
        records.sort_by_key(|r| (r.timestamp, r.id));
        records
    }
}

#[async_trait]
impl LogSnapshot for MemorySnapshot {
    async fn count_older_than(&mut self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        Ok(self.records.values().filter(|r| r.timestamp < cutoff).count() as u64)
    }

    async fn fetch_older_than(&mut self, cutoff: DateTime<Utc>) -> StoreResult<Vec<LogRecord>> {
        Ok(self
            .sorted_by_age(|r| r.timestamp < cutoff)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn total_count(&mut self) -> StoreResult<u64> {
        Ok(self.records.len() as u64)
    }

    async fn fetch_oldest(&mut self, n: u64) -> StoreResult<Vec<LogRecord>> {
        let limit = usize::try_from(n).unwrap_or(usize::MAX);
        Ok(self
            .sorted_by_age(|_| true)
            .into_iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn timestamp_range(&mut self) -> StoreResult<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let oldest = self.records.values().map(|r| r.timestamp).min();
        let newest = self.records.values().map(|r| r.timestamp).max();
        Ok(oldest.zip(newest))
    }
}
