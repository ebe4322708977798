use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::RwLock;

use pixel_api::{BackendError, StateRecord, StateStore};

// ═══════════════════════════════════════════════════════════════
//  MemoryStateStore
// ═══════════════════════════════════════════════════════════════

/// In-memory state store: `coordinate → StateRecord`.
/// Для тестов и запуска без диска; состояние теряется при рестарте.
#[derive(Default)]
pub struct MemoryStateStore {
    records: RwLock<HashMap<String, StateRecord>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl StateStore for MemoryStateStore {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn upsert(
        &self,
        record: StateRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async move {
            let mut records = self.records.write().await;
            records.insert(record.coordinate.clone(), record);
            Ok(())
        })
    }

    fn get(
        &self,
        coordinate: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StateRecord>, BackendError>> + Send + '_>> {
        let coordinate = coordinate.to_string();
        Box::pin(async move { Ok(self.records.read().await.get(&coordinate).cloned()) })
    }

    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}
