//! Process-local health counters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use botgrid_state::{HealthRecord, HealthStatus, StatKind, WorkloadId};
use tracing::debug;

/// Mutex-guarded map of workload id to [`HealthRecord`].
///
/// Cheap to clone; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    records: Arc<Mutex<HashMap<WorkloadId, HealthRecord>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WorkloadId, HealthRecord>> {
        // Every mutation leaves the map consistent, so a poisoned lock is safe to reuse.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count an event against a workload. Critical events mark it unhealthy.
    pub fn increment(&self, workload_id: &str, kind: StatKind) {
        let mut records = self.lock();
        let record = records.entry(workload_id.to_string()).or_default();
        match kind {
            StatKind::Error => record.error_count += 1,
            StatKind::Warning => record.warning_count += 1,
            StatKind::Critical => {
                record.critical_count += 1;
                record.status = HealthStatus::Unhealthy;
            }
        }
    }

    /// Set a workload's status. `Disabled` also zeroes its counters.
    pub fn set_status(&self, workload_id: &str, status: HealthStatus) {
        let mut records = self.lock();
        let record = records.entry(workload_id.to_string()).or_default();
        record.status = status;
        if status == HealthStatus::Disabled {
            record.error_count = 0;
            record.warning_count = 0;
            record.critical_count = 0;
        }
        debug!(%workload_id, ?status, "health status set");
    }

    pub fn get(&self, workload_id: &str) -> Option<HealthRecord> {
        self.lock().get(workload_id).copied()
    }

    /// Copy of the whole map.
    pub fn snapshot(&self) -> HashMap<WorkloadId, HealthRecord> {
        self.lock().clone()
    }

    /// Drop records of workloads that are not in `live`. Returns how many
    /// were removed.
    pub fn prune(&self, live: &[WorkloadId]) -> usize {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|id, _| live.contains(id));
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
