//! Persistence of verification records.

use std::sync::Arc;

use tether_core::{record::VerificationRecord, store::MonitorStore};
use tracing::{debug, error};
use uuid::Uuid;

use crate::{Error, Result};

/// Appends one immutable record per check.
pub struct VerificationRecorder<S> {
  store: Arc<S>,
}

impl<S: MonitorStore> VerificationRecorder<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Append `record`. A failure here fails the check that produced it.
  pub async fn record(&self, record: &VerificationRecord) -> Result<Uuid> {
    match self.store.append_record(record).await {
      Ok(id) => {
        debug!(record_id = %id, subject_id = %record.subject_id, status = ?record.status, "record appended");
        Ok(id)
      }
      Err(e) => {
        error!(record_id = %record.record_id, subject_id = %record.subject_id, error = %e, "cannot append record");
        Err(Error::persistence(e))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use tether_core::store::RecordQuery;

  use super::*;
  use crate::testing::{MemoryStore, failed_record};

  #[tokio::test]
  async fn appends_and_returns_id() {
    let store = Arc::new(MemoryStore::default());
    let recorder = VerificationRecorder::new(store.clone());
    let record = failed_record(Uuid::new_v4());

    let id = recorder.record(&record).await.unwrap();
    assert_eq!(id, record.record_id);
    assert_eq!(store.count_records(&RecordQuery::default()).await.unwrap(), 1);
  }

  #[tokio::test]
  async fn store_failure_is_a_persistence_error() {
    let store = Arc::new(MemoryStore::default());
    store.fail_appends(true);
    let recorder = VerificationRecorder::new(store);

    let err = recorder.record(&failed_record(Uuid::new_v4())).await.unwrap_err();
    assert!(matches!(err, Error::Persistence(_)));
  }
}
