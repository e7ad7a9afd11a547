//! Per-audit mutual exclusion.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per audit, created on first use. Mutations of the same
/// audit queue up behind each other; different audits never contend.
#[derive(Debug, Default)]
pub struct AuditLocks {
  inner: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl AuditLocks {
  pub async fn lock(&self, audit_id: Uuid) -> OwnedMutexGuard<()> {
    let slot = {
      let mut map = self.inner.lock().await;
      Arc::clone(map.entry(audit_id).or_default())
    };
    slot.lock_owned().await
  }

  /// Drop the slot of a deleted audit.
  pub async fn forget(&self, audit_id: Uuid) {
    self.inner.lock().await.remove(&audit_id);
  }
}
