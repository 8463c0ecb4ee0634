/// Every run is keyed by a time-ordered UUID (v7).
pub type RunId = uuid::Uuid;

/// All wall-clock timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Allocate a fresh run identifier.
pub fn new_run_id() -> RunId {
    uuid::Uuid::now_v7()
}
