// =====================================================================================
// AUDIT SERVICE - ACTION LOG FOR ANALYSIS LIFECYCLE EVENTS
// =====================================================================================

use std::sync::Arc;
use tracing::{info, warn, instrument};

use crate::models::AuditLogEntry;
use crate::store::AnalysisStore;

pub const SCHEDULER_ACTOR: &str = "system:scheduler";
pub const ARCHIVAL_ACTOR: &str = "system:archival";

pub struct AuditService {
    store: Arc<dyn AnalysisStore>,
}

impl AuditService {
    pub fn new(store: Arc<dyn AnalysisStore>) -> Self {
        Self { store }
    }

    /// Records the entry in structured logs and persists it. A failed
    /// write is logged but never undoes the action being audited.
    #[instrument(skip(self, entry), fields(action = %entry.action, entity_id = %entry.entity_id))]
    pub async fn record(&self, entry: AuditLogEntry) {
        info!(
            audit_id = %entry.id,
            entity_type = %entry.entity_type,
            actor = %entry.actor,
            "AUDIT: {}", entry.action
        );

        if let Err(e) = self.store.insert_audit_entry(&entry).await {
            warn!(audit_id = %entry.id, error = %e, "Failed to persist audit entry");
        }
    }
}
