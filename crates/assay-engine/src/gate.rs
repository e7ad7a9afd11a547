//! Admission control for calls to the analysis service.

use std::{future::Future, sync::Arc, time::Duration};

use assay_core::analysis::AnalysisError;
use tokio::sync::Semaphore;

/// Bounds in-flight external calls and gives each one a deadline.
///
/// Callers past the limit wait for a permit; nothing is dropped. The deadline
/// covers the call itself, not the wait.
#[derive(Debug, Clone)]
pub struct AnalysisGate {
  permits: Arc<Semaphore>,
  timeout: Duration,
}

impl AnalysisGate {
  pub fn new(max_concurrent: usize, timeout: Duration) -> Self {
    Self {
      permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
      timeout,
    }
  }

  pub async fn run<T, F>(&self, call: F) -> Result<T, AnalysisError>
  where
    F: Future<Output = Result<T, AnalysisError>>,
  {
    let _permit = self
      .permits
      .acquire()
      .await
      .map_err(|_| AnalysisError::Unavailable("analysis gate closed".into()))?;
    tokio::time::timeout(self.timeout, call)
      .await
      .map_err(|_| AnalysisError::Timeout)?
  }

  /// Permits not currently held.
  pub fn available(&self) -> usize { self.permits.available_permits() }
}
