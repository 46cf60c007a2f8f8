//! Shared test doubles.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mockall::mock;
use tokio::sync::Semaphore;

use roomrec_storage::{ArtifactStore, StorageError, StorageResult};
use roomrec_video::{SessionProvider, VideoResult};

mock! {
    pub Provider {}

    #[async_trait]
    impl SessionProvider for Provider {
        async fn connected_participants(&self, room: &str) -> VideoResult<usize>;
        fn mint_access_token(&self, identity: &str, room: &str) -> VideoResult<String>;
        async fn disconnect_participant(&self, room: &str, identity: &str) -> VideoResult<()>;
    }
}

/// In-memory artifact store that can fail or block puts on demand.
#[derive(Default)]
pub struct MemoryStore {
    puts: Mutex<Vec<(String, Vec<u8>, String)>>,
    failures_left: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl MemoryStore {
    /// Fail the first `count` puts.
    pub fn failing(count: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(count),
            ..Default::default()
        }
    }

    /// Block every put until the returned semaphore hands out a permit.
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let store = Self {
            gate: Some(gate.clone()),
            ..Default::default()
        };
        (store, gate)
    }

    pub fn keys(&self) -> Vec<String> {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _, _)| key.clone())
            .collect()
    }

    /// Body of the most recent put for `key`.
    pub fn last_body(&self, key: &str) -> Option<Vec<u8>> {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _, _)| k == key)
            .map(|(_, body, _)| body.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _, _)| k == key)
            .map(|(_, _, content_type)| content_type.clone())
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> StorageResult<()> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| StorageError::upload_failed(e.to_string()))?
                .forget();
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::upload_failed(format!("{}: service unavailable", key)));
        }

        self.puts
            .lock()
            .unwrap()
            .push((key.to_string(), bytes, content_type.to_string()));
        Ok(())
    }
}
