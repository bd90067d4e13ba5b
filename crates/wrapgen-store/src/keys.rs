//! Key encoding utilities for `RocksDB`.
//!
//! User-scoped index keys are `user_id (16 bytes) || suffix`. Task and ledger
//! IDs are ULIDs, so suffixed keys sort chronologically within a user prefix.

use wrapgen_core::{LedgerEntryId, TaskId, UserId, WrapId};

/// Create an account key from a user ID.
#[must_use]
pub fn account_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a task key from a task ID.
#[must_use]
pub fn task_key(task_id: &TaskId) -> Vec<u8> {
    task_id.to_bytes().to_vec()
}

/// Create a user-task index key: `user_id (16) || task_id (16)`.
#[must_use]
pub fn user_task_key(user_id: &UserId, task_id: &TaskId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&task_id.to_bytes());
    key
}

/// Create a prefix for iterating a user's tasks (or in-flight reservations).
#[must_use]
pub fn user_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Extract the task ID from a user-task index key.
///
/// # Panics
///
/// Panics if the key is not at least 32 bytes.
#[must_use]
pub fn extract_task_id_from_user_key(key: &[u8]) -> TaskId {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[16..32]);
    TaskId::from_bytes(bytes).expect("valid ULID bytes")
}

/// Create an idempotency key: `user_id (16) || key bytes`.
#[must_use]
pub fn idempotency_key(user_id: &UserId, key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + key.len());
    out.extend_from_slice(user_id.as_bytes());
    out.extend_from_slice(key.as_bytes());
    out
}

/// Create a ledger entry key from an entry ID.
#[must_use]
pub fn ledger_key(entry_id: &LedgerEntryId) -> Vec<u8> {
    entry_id.to_bytes().to_vec()
}

/// Create a user-ledger index key: `user_id (16) || entry_id (16)`.
#[must_use]
pub fn user_ledger_key(user_id: &UserId, entry_id: &LedgerEntryId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&entry_id.to_bytes());
    key
}

/// Extract the ledger entry ID from a user-ledger index key.
///
/// # Panics
///
/// Panics if the key is not at least 32 bytes.
#[must_use]
pub fn extract_ledger_id_from_user_key(key: &[u8]) -> LedgerEntryId {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[16..32]);
    LedgerEntryId::from_bytes(bytes).expect("valid ULID bytes")
}

/// Create a wrap key from a wrap ID.
#[must_use]
pub fn wrap_key(wrap_id: &WrapId) -> Vec<u8> {
    wrap_id.as_bytes().to_vec()
}

/// Encode an in-flight reservation amount.
#[must_use]
pub fn encode_reserved(amount: i64) -> [u8; 8] {
    amount.to_be_bytes()
}

/// Decode an in-flight reservation amount.
///
/// Returns 0 for malformed values rather than failing the scan.
#[must_use]
pub fn decode_reserved(value: &[u8]) -> i64 {
    value
        .try_into()
        .map_or(0, i64::from_be_bytes)
}
