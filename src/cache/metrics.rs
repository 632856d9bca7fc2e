//! Metric keys emitted by the engine and the change hub.

pub const LOAD_TOTAL: &str = "persisted_state_load_total";
pub const STALE_LOAD_DISCARDED_TOTAL: &str = "persisted_state_stale_load_discarded_total";
pub const LOAD_FAILED_TOTAL: &str = "persisted_state_load_failed_total";
pub const WRITE_TOTAL: &str = "persisted_state_write_total";
pub const EXTERNAL_CHANGE_TOTAL: &str = "persisted_state_external_change_total";
pub const SUBSCRIBERS: &str = "persisted_state_subscribers";
