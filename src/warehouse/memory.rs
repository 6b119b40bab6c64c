use anyhow::{anyhow, Result};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Mutex};

use super::{TableId, Warehouse};

/// In-process [`Warehouse`] holding one batch per table.
#[derive(Default)]
pub struct MemoryWarehouse {
    tables: Mutex<HashMap<String, RecordBatch>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `table` with `batch`.
    pub fn with_table(self, table: &TableId, batch: RecordBatch) -> Self {
        self.insert(table, batch);
        self
    }

    pub fn insert(&self, table: &TableId, batch: RecordBatch) {
        self.lock().insert(table.to_string(), batch);
    }

    /// Current contents of `table`, if it exists.
    pub fn table(&self, table: &TableId) -> Option<RecordBatch> {
        self.lock().get(&table.to_string()).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RecordBatch>> {
        // a poisoned map still holds whole batches; keep using it
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn read_table(&self, table: &TableId) -> Result<RecordBatch> {
        self.table(table)
            .ok_or_else(|| anyhow!("Not found: Table {}", table))
    }

    async fn overwrite_table(&self, table: &TableId, batch: &RecordBatch) -> Result<u64> {
        self.insert(table, batch.clone());
        Ok(batch.num_rows() as u64)
    }
}
