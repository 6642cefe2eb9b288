//! Shared application state

use std::sync::Arc;
use std::time::Duration;

use takeoff_core::{CountDetector, ImageStore, ScaleDetector, Takeoff};
use takeoff_storage::Storage;
use tokio::sync::{Mutex, RwLock};

use crate::error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub takeoff: Arc<RwLock<Takeoff>>,
    pub scale_detector: Arc<dyn ScaleDetector>,
    pub count_detector: Arc<dyn CountDetector>,
    pub images: Arc<dyn ImageStore>,
    /// Snapshot target; `None` keeps everything in memory
    pub storage: Option<Arc<Storage>>,
    /// Serializes snapshot writes
    persist_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        takeoff: Takeoff,
        scale_detector: Arc<dyn ScaleDetector>,
        count_detector: Arc<dyn CountDetector>,
        images: Arc<dyn ImageStore>,
    ) -> Self {
        Self {
            takeoff: Arc::new(RwLock::new(takeoff)),
            scale_detector,
            count_detector,
            images,
            storage: None,
            persist_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_storage(mut self, storage: Arc<Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub async fn detection_timeout(&self) -> Duration {
        self.takeoff.read().await.config().detection_timeout
    }

    /// Write the current snapshot to storage, if any
    pub async fn persist(&self) -> ApiResult<()> {
        let Some(storage) = self.storage.clone() else {
            return Ok(());
        };

        let _guard = self.persist_lock.lock().await;
        let snapshot = self.takeoff.read().await.snapshot();
        tokio::task::spawn_blocking(move || storage.save_snapshot(&snapshot))
            .await
            .map_err(|e| ApiError::Internal(format!("snapshot task failed: {e}")))??;
        Ok(())
    }
}
