//! Live knowledge base with atomic reload.
//!
//! Readers take an `Arc` snapshot and keep using it for the whole match, so
//! a reload landing mid-scan never mixes old and new rows. Reload builds the
//! new table completely before swapping the pointer; on failure the previous
//! table stays live.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};

use crate::error::KnowledgeBaseError;
use crate::kb::record::KnowledgeBase;
use crate::kb::sheets::SheetSource;

/// Owns the live knowledge base table.
pub struct KnowledgeBaseStore {
    source: Arc<dyn SheetSource>,
    table: RwLock<Arc<KnowledgeBase>>,
    /// Serializes reloads so two operators cannot race their swaps.
    reload_lock: Mutex<()>,
}

impl KnowledgeBaseStore {
    /// Create a store with an empty table. Call [`reload`](Self::reload) to fill it.
    pub fn new(source: Arc<dyn SheetSource>) -> Self {
        Self::with_table(source, KnowledgeBase::default())
    }

    /// Create a store with a preloaded table.
    pub fn with_table(source: Arc<dyn SheetSource>, table: KnowledgeBase) -> Self {
        Self {
            source,
            table: RwLock::new(Arc::new(table)),
            reload_lock: Mutex::new(()),
        }
    }

    /// Snapshot of the live table.
    pub async fn current(&self) -> Arc<KnowledgeBase> {
        Arc::clone(&*self.table.read().await)
    }

    /// Fetch all rows from the source and replace the live table.
    pub async fn reload(&self) -> Result<Arc<KnowledgeBase>, KnowledgeBaseError> {
        let _guard = self.reload_lock.lock().await;

        let rows = match self.source.fetch_rows().await {
            Ok(rows) => rows,
            Err(e) => {
                error!(source = %self.source.name(), error = %e, "Knowledge base reload failed, keeping previous table");
                return Err(e);
            }
        };

        let table = Arc::new(KnowledgeBase::from_rows(self.source.name(), &rows)?);
        *self.table.write().await = Arc::clone(&table);

        info!(
            source = %self.source.name(),
            rows = table.len(),
            skipped = table.skipped(),
            "Knowledge base loaded"
        );
        Ok(table)
    }
}
