use serde::Serialize;
use uuid::Uuid;

/// Per-item result of a best-effort bulk removal.
///
/// Items that were removed stay removed when others fail; callers get the
/// split instead of a rollback.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

impl BulkOutcome {
    pub fn record(&mut self, id: Uuid, removed: bool) {
        if removed {
            self.succeeded.push(id);
        } else {
            self.failed.push(id);
        }
    }
}
