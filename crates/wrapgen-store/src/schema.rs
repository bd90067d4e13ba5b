//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary credit account records, keyed by `user_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Generation tasks, keyed by `task_id` (ULID).
    pub const TASKS: &str = "tasks";

    /// Index: tasks by user, keyed by `user_id || task_id`. Value is empty.
    pub const TASKS_BY_USER: &str = "tasks_by_user";

    /// In-flight reservations, keyed by `user_id || task_id`.
    /// Value is the reserved credit amount (big-endian `i64`). An entry
    /// exists only while the task is pending or processing.
    pub const INFLIGHT: &str = "inflight";

    /// Idempotency keys, keyed by `user_id || key`. Value is the task ID.
    pub const IDEMPOTENCY: &str = "idempotency";

    /// Ledger entries, keyed by `entry_id` (ULID).
    pub const LEDGER: &str = "ledger";

    /// Index: ledger entries by user, keyed by `user_id || entry_id`.
    /// Value is empty (index only).
    pub const LEDGER_BY_USER: &str = "ledger_by_user";

    /// Settlement markers, keyed by `task_id`. Value is the ID of the
    /// `generation_charge` ledger entry. Presence makes `settle` idempotent.
    pub const TASK_CHARGES: &str = "task_charges";

    /// Persisted wraps, keyed by `wrap_id`.
    pub const WRAPS: &str = "wraps";

    /// Index: wrap by producing task, keyed by `task_id`. Value is the wrap ID.
    pub const WRAPS_BY_TASK: &str = "wraps_by_task";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::TASKS,
        cf::TASKS_BY_USER,
        cf::INFLIGHT,
        cf::IDEMPOTENCY,
        cf::LEDGER,
        cf::LEDGER_BY_USER,
        cf::TASK_CHARGES,
        cf::WRAPS,
        cf::WRAPS_BY_TASK,
    ]
}
