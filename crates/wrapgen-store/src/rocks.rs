//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! Compound operations hold the owning user's lock from first read to final
//! batch write, so balance checks and the writes they justify cannot race.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use wrapgen_core::{
    CreditAccount, LedgerEntry, StepKind, Task, TaskId, TaskStatus, TaskStep, UserId, Wrap, WrapId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{ReserveOutcome, RefundOutcome, Store};

/// Per-user lock registry.
///
/// Serializes balance-affecting operations for one user while leaving other
/// users fully concurrent. Lock entries are never removed; the registry is
/// bounded by the number of distinct users seen by this process.
#[derive(Default)]
struct UserLocks {
    inner: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    fn for_user(&self, user_id: &UserId) -> Arc<Mutex<()>> {
        let mut map = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        map.entry(*user_id).or_default().clone()
    }
}

/// `RocksDB`-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    locks: UserLocks,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            locks: UserLocks::default(),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_cf_value<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn get_task_required(&self, task_id: &TaskId) -> Result<Task> {
        self.get_task(task_id)?.ok_or_else(|| StoreError::NotFound {
            entity: "task",
            id: task_id.to_string(),
        })
    }

    fn put_task_value(&self, batch: &mut WriteBatch, task: &Task) -> Result<()> {
        let cf_tasks = self.cf(cf::TASKS)?;
        batch.put_cf(&cf_tasks, keys::task_key(&task.id), Self::serialize(task)?);
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Write a ledger entry plus its user index into a batch.
    fn batch_ledger_entry(&self, batch: &mut WriteBatch, entry: &LedgerEntry) -> Result<()> {
        let cf_ledger = self.cf(cf::LEDGER)?;
        let cf_by_user = self.cf(cf::LEDGER_BY_USER)?;
        batch.put_cf(&cf_ledger, keys::ledger_key(&entry.id), Self::serialize(entry)?);
        batch.put_cf(
            &cf_by_user,
            keys::user_ledger_key(&entry.user_id, &entry.id),
            [],
        );
        Ok(())
    }

    /// Sum of in-flight reservations for a user (caller holds the user lock
    /// when the result gates a write).
    fn scan_reserved(&self, user_id: &UserId) -> Result<(usize, i64)> {
        let cf_inflight = self.cf(cf::INFLIGHT)?;
        let prefix = keys::user_prefix(user_id);

        let mut count = 0;
        let mut reserved = 0;
        let iter = self.db.iterator_cf(
            &cf_inflight,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            count += 1;
            reserved += keys::decode_reserved(&value);
        }
        Ok((count, reserved))
    }

    /// Whether a `generation_charge` has been written for this task.
    fn is_settled(&self, task_id: &TaskId) -> Result<bool> {
        let cf_charges = self.cf(cf::TASK_CHARGES)?;
        let settled = self
            .db
            .get_cf(&cf_charges, keys::task_key(task_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        Ok(settled)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    fn get_account(&self, user_id: &UserId) -> Result<Option<CreditAccount>> {
        self.get_cf_value(cf::ACCOUNTS, &keys::account_key(user_id))
    }

    fn top_up(&self, user_id: &UserId, amount: i64, description: &str) -> Result<i64> {
        let lock = self.locks.for_user(user_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut account = self
            .get_account(user_id)?
            .unwrap_or_else(|| CreditAccount::new(*user_id));
        account.credit(amount);

        let entry = LedgerEntry::top_up(*user_id, amount, description.to_string());

        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_accounts,
            keys::account_key(user_id),
            Self::serialize(&account)?,
        );
        self.batch_ledger_entry(&mut batch, &entry)?;
        self.write(batch)?;

        Ok(account.balance)
    }

    fn available_balance(&self, user_id: &UserId) -> Result<i64> {
        let balance = self.get_account(user_id)?.map_or(0, |a| a.balance);
        let (_, reserved) = self.scan_reserved(user_id)?;
        Ok(balance - reserved)
    }

    // =========================================================================
    // Task Operations
    // =========================================================================

    fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>> {
        self.get_cf_value(cf::TASKS, &keys::task_key(task_id))
    }

    fn find_task_by_idempotency_key(&self, user_id: &UserId, key: &str) -> Result<Option<Task>> {
        let cf_idem = self.cf(cf::IDEMPOTENCY)?;
        let Some(task_id_bytes) = self
            .db
            .get_cf(&cf_idem, keys::idempotency_key(user_id, key))
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        let bytes: [u8; 16] = task_id_bytes
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Serialization("malformed idempotency value".into()))?;
        let task_id = TaskId::from_bytes(bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.get_task(&task_id)
    }

    fn list_tasks_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Task>> {
        let cf_by_user = self.cf(cf::TASKS_BY_USER)?;
        let prefix = keys::user_prefix(user_id);

        // ULIDs are time-ordered, so forward iteration is oldest-first;
        // collect then reverse for newest-first pagination.
        let mut all_keys: Vec<Vec<u8>> = Vec::new();
        let iter = self.db.iterator_cf(
            &cf_by_user,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            all_keys.push(key.to_vec());
        }
        all_keys.reverse();

        let mut tasks = Vec::new();
        for key in all_keys.into_iter().skip(offset) {
            if tasks.len() >= limit {
                break;
            }
            let task_id = keys::extract_task_id_from_user_key(&key);
            if let Some(task) = self.get_task(&task_id)? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    fn count_in_flight(&self, user_id: &UserId) -> Result<usize> {
        let (count, _) = self.scan_reserved(user_id)?;
        Ok(count)
    }

    fn reserved_in_flight(&self, user_id: &UserId) -> Result<i64> {
        let (_, reserved) = self.scan_reserved(user_id)?;
        Ok(reserved)
    }

    fn append_task_step(&self, task_id: &TaskId, step: TaskStep) -> Result<()> {
        let mut task = self.get_task_required(task_id)?;
        task.steps.push(step);
        task.updated_at = Utc::now();

        let mut batch = WriteBatch::default();
        self.put_task_value(&mut batch, &task)?;
        self.write(batch)
    }

    fn mark_task_processing(&self, task_id: &TaskId) -> Result<Task> {
        let mut task = self.get_task_required(task_id)?;
        if !task.status.can_transition_to(TaskStatus::Processing) {
            return Err(StoreError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: TaskStatus::Processing,
            });
        }

        let now = Utc::now();
        task.status = TaskStatus::Processing;
        task.started_at = Some(now);
        task.updated_at = now;
        task.steps.push(TaskStep::new(StepKind::ProcessingStarted));

        let mut batch = WriteBatch::default();
        self.put_task_value(&mut batch, &task)?;
        self.write(batch)?;
        Ok(task)
    }

    fn record_task_attempt(&self, task_id: &TaskId) -> Result<u32> {
        let mut task = self.get_task_required(task_id)?;
        task.attempts += 1;
        task.updated_at = Utc::now();

        let mut batch = WriteBatch::default();
        self.put_task_value(&mut batch, &task)?;
        self.write(batch)?;
        Ok(task.attempts)
    }

    // =========================================================================
    // Compound Operations
    // =========================================================================

    fn reserve_task(&self, task: Task, in_flight_cap: usize) -> Result<ReserveOutcome> {
        let user_id = task.user_id;
        let lock = self.locks.for_user(&user_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        // 1. Idempotency: an existing task for this (user, key) wins.
        if let Some(key) = &task.idempotency_key {
            if let Some(existing) = self.find_task_by_idempotency_key(&user_id, key)? {
                return Ok(ReserveOutcome::Duplicate { existing });
            }
        }

        // 2. In-flight cap.
        let (count, reserved) = self.scan_reserved(&user_id)?;
        if count >= in_flight_cap {
            return Err(StoreError::TooManyInFlight {
                count,
                cap: in_flight_cap,
            });
        }

        // 3. Provisional reservation against available (not raw) balance;
        //    the ledger is not charged until settlement.
        let balance = self.get_account(&user_id)?.map_or(0, |a| a.balance);
        let available = balance - reserved;
        if available < task.credits_reserved {
            return Err(StoreError::InsufficientCredits {
                available,
                required: task.credits_reserved,
            });
        }

        let cf_by_user = self.cf(cf::TASKS_BY_USER)?;
        let cf_inflight = self.cf(cf::INFLIGHT)?;

        let mut batch = WriteBatch::default();
        self.put_task_value(&mut batch, &task)?;
        batch.put_cf(&cf_by_user, keys::user_task_key(&user_id, &task.id), []);
        batch.put_cf(
            &cf_inflight,
            keys::user_task_key(&user_id, &task.id),
            keys::encode_reserved(task.credits_reserved),
        );
        if let Some(key) = &task.idempotency_key {
            let cf_idem = self.cf(cf::IDEMPOTENCY)?;
            batch.put_cf(
                &cf_idem,
                keys::idempotency_key(&user_id, key),
                task.id.to_bytes(),
            );
        }
        self.write(batch)?;

        let remaining = available - task.credits_reserved;
        Ok(ReserveOutcome::Created { task, remaining })
    }

    fn settle_task(&self, task_id: &TaskId, wrap: Option<Wrap>) -> Result<i64> {
        let owner = self.get_task_required(task_id)?;
        let lock = self.locks.for_user(&owner.user_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        // Re-read under the lock.
        let mut task = self.get_task_required(task_id)?;
        let user_id = task.user_id;

        // Idempotent: a prior generation_charge means we already settled.
        if self.is_settled(task_id)? {
            let balance = self.get_account(&user_id)?.map_or(0, |a| a.balance);
            return Ok(balance);
        }

        let target = if wrap.is_some() {
            TaskStatus::Completed
        } else {
            TaskStatus::CompletedUnlinked
        };
        if !task.status.can_transition_to(target) {
            return Err(StoreError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: target,
            });
        }

        // Belt-and-suspenders: reservation already guaranteed solvency.
        let mut account = self
            .get_account(&user_id)?
            .unwrap_or_else(|| CreditAccount::new(user_id));
        if account.balance < task.credits_reserved {
            return Err(StoreError::InsufficientCredits {
                available: account.balance,
                required: task.credits_reserved,
            });
        }
        account.debit(task.credits_reserved);

        let entry = LedgerEntry::generation_charge(
            user_id,
            *task_id,
            task.credits_reserved,
            format!("generation charge for task {task_id}"),
        );

        let now = Utc::now();
        task.status = target;
        task.finished_at = Some(now);
        task.updated_at = now;
        task.wrap_id = wrap.as_ref().map(|w| w.id);
        task.steps.push(TaskStep::new(StepKind::Settled));

        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_charges = self.cf(cf::TASK_CHARGES)?;
        let cf_inflight = self.cf(cf::INFLIGHT)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_accounts,
            keys::account_key(&user_id),
            Self::serialize(&account)?,
        );
        self.batch_ledger_entry(&mut batch, &entry)?;
        batch.put_cf(&cf_charges, keys::task_key(task_id), entry.id.to_bytes());
        batch.delete_cf(&cf_inflight, keys::user_task_key(&user_id, task_id));
        self.put_task_value(&mut batch, &task)?;

        if let Some(wrap) = &wrap {
            let cf_wraps = self.cf(cf::WRAPS)?;
            let cf_by_task = self.cf(cf::WRAPS_BY_TASK)?;
            batch.put_cf(&cf_wraps, keys::wrap_key(&wrap.id), Self::serialize(wrap)?);
            batch.put_cf(&cf_by_task, keys::task_key(task_id), wrap.id.as_bytes());
        }

        self.write(batch)?;

        tracing::info!(
            task_id = %task_id,
            user_id = %user_id,
            charged = task.credits_reserved,
            balance = account.balance,
            status = %task.status,
            "task settled"
        );
        Ok(account.balance)
    }

    fn fail_task(&self, task_id: &TaskId, code: &str, message: &str) -> Result<()> {
        let owner = self.get_task_required(task_id)?;
        let lock = self.locks.for_user(&owner.user_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut task = self.get_task_required(task_id)?;
        if task.status == TaskStatus::Failed || task.status.is_terminal() {
            return Ok(());
        }

        let now = Utc::now();
        task.status = TaskStatus::Failed;
        task.error_code = Some(code.to_string());
        task.error_message = Some(message.to_string());
        task.finished_at = Some(now);
        task.updated_at = now;
        task.steps.push(TaskStep::with_detail(StepKind::Failed, message));

        let cf_inflight = self.cf(cf::INFLIGHT)?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_inflight, keys::user_task_key(&task.user_id, task_id));
        self.put_task_value(&mut batch, &task)?;
        self.write(batch)?;

        tracing::warn!(
            task_id = %task_id,
            user_id = %task.user_id,
            error_code = code,
            "task failed"
        );
        Ok(())
    }

    fn refund_task(&self, task_id: &TaskId, reason: &str) -> Result<RefundOutcome> {
        let owner = self.get_task_required(task_id)?;
        let lock = self.locks.for_user(&owner.user_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut task = self.get_task_required(task_id)?;
        let user_id = task.user_id;

        let mut account = self
            .get_account(&user_id)?
            .unwrap_or_else(|| CreditAccount::new(user_id));

        if task.status == TaskStatus::FailedRefunded {
            return Ok(RefundOutcome {
                refunded: 0,
                balance: account.balance,
                already_refunded: true,
            });
        }
        if matches!(
            task.status,
            TaskStatus::Completed | TaskStatus::CompletedUnlinked
        ) {
            return Err(StoreError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: TaskStatus::FailedRefunded,
            });
        }

        // Only a settled task has actually been charged; an unsettled task
        // refunds 0 but still gets its audit entry.
        let refunded = if self.is_settled(task_id)? {
            task.credits_reserved
        } else {
            0
        };
        if refunded > 0 {
            account.reverse_debit(refunded);
        }

        let entry = LedgerEntry::refund(user_id, *task_id, refunded, reason.to_string());

        let now = Utc::now();
        if task.status != TaskStatus::Failed {
            // Force-fail an in-flight task (stale reclaim path).
            task.error_code.get_or_insert_with(|| "unknown_error".into());
            task.error_message.get_or_insert_with(|| reason.to_string());
            task.steps.push(TaskStep::with_detail(StepKind::Failed, reason));
        }
        task.status = TaskStatus::FailedRefunded;
        task.finished_at = Some(now);
        task.updated_at = now;
        task.steps.push(TaskStep::with_detail(StepKind::Refunded, reason));

        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_inflight = self.cf(cf::INFLIGHT)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_accounts,
            keys::account_key(&user_id),
            Self::serialize(&account)?,
        );
        self.batch_ledger_entry(&mut batch, &entry)?;
        batch.delete_cf(&cf_inflight, keys::user_task_key(&user_id, task_id));
        self.put_task_value(&mut batch, &task)?;
        self.write(batch)?;

        tracing::info!(
            task_id = %task_id,
            user_id = %user_id,
            refunded,
            balance = account.balance,
            "task refunded"
        );
        Ok(RefundOutcome {
            refunded,
            balance: account.balance,
            already_refunded: false,
        })
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    fn list_ledger_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let cf_by_user = self.cf(cf::LEDGER_BY_USER)?;
        let prefix = keys::user_prefix(user_id);

        let mut all_keys: Vec<Vec<u8>> = Vec::new();
        let iter = self.db.iterator_cf(
            &cf_by_user,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            all_keys.push(key.to_vec());
        }
        all_keys.reverse();

        let mut entries = Vec::new();
        for key in all_keys.into_iter().skip(offset) {
            if entries.len() >= limit {
                break;
            }
            let entry_id = keys::extract_ledger_id_from_user_key(&key);
            if let Some(entry) =
                self.get_cf_value::<LedgerEntry>(cf::LEDGER, &keys::ledger_key(&entry_id))?
            {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn ledger_sum(&self, user_id: &UserId) -> Result<i64> {
        let cf_by_user = self.cf(cf::LEDGER_BY_USER)?;
        let prefix = keys::user_prefix(user_id);

        let mut sum = 0;
        let iter = self.db.iterator_cf(
            &cf_by_user,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let entry_id = keys::extract_ledger_id_from_user_key(&key);
            if let Some(entry) =
                self.get_cf_value::<LedgerEntry>(cf::LEDGER, &keys::ledger_key(&entry_id))?
            {
                sum += entry.amount;
            }
        }
        Ok(sum)
    }

    // =========================================================================
    // Wrap Operations
    // =========================================================================

    fn get_wrap(&self, wrap_id: &WrapId) -> Result<Option<Wrap>> {
        self.get_cf_value(cf::WRAPS, &keys::wrap_key(wrap_id))
    }

    fn find_wrap_by_task(&self, task_id: &TaskId) -> Result<Option<Wrap>> {
        let cf_by_task = self.cf(cf::WRAPS_BY_TASK)?;
        let Some(wrap_id_bytes) = self
            .db
            .get_cf(&cf_by_task, keys::task_key(task_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };
        let bytes: [u8; 16] = wrap_id_bytes
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Serialization("malformed wrap index value".into()))?;
        self.get_wrap(&WrapId::from_uuid(uuid::Uuid::from_bytes(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wrapgen_core::LedgerEntryType;

    const CAP: usize = 2;
    const COST: i64 = 10;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn new_task(user_id: UserId, key: Option<&str>) -> Task {
        Task::new(
            user_id,
            "matte black with gold accents".into(),
            "model-3".into(),
            vec![],
            COST,
            key.map(String::from),
        )
    }

    fn reserve(store: &RocksStore, task: Task) -> (Task, i64) {
        match store.reserve_task(task, CAP).unwrap() {
            ReserveOutcome::Created { task, remaining } => (task, remaining),
            ReserveOutcome::Duplicate { .. } => panic!("expected fresh reservation"),
        }
    }

    #[test]
    fn top_up_creates_account_and_ledger_entry() {
        let (store, _dir) = create_test_store();
        let user = UserId::generate();

        let balance = store.top_up(&user, 30, "starter").unwrap();
        assert_eq!(balance, 30);

        let account = store.get_account(&user).unwrap().unwrap();
        assert_eq!(account.total_earned, 30);
        assert_eq!(store.ledger_sum(&user).unwrap(), 30);
    }

    #[test]
    fn reservation_reports_available_not_raw_balance() {
        let (store, _dir) = create_test_store();
        let user = UserId::generate();
        store.top_up(&user, 30, "starter").unwrap();

        let (_, remaining) = reserve(&store, new_task(user, Some("k1-0123456789abcdef")));
        assert_eq!(remaining, 20);

        // The ledger is untouched by a reservation.
        let account = store.get_account(&user).unwrap().unwrap();
        assert_eq!(account.balance, 30);
        assert_eq!(store.available_balance(&user).unwrap(), 20);
    }

    #[test]
    fn duplicate_idempotency_key_returns_existing_task() {
        let (store, _dir) = create_test_store();
        let user = UserId::generate();
        store.top_up(&user, 30, "starter").unwrap();

        let (first, _) = reserve(&store, new_task(user, Some("k1-0123456789abcdef")));

        let outcome = store
            .reserve_task(new_task(user, Some("k1-0123456789abcdef")), CAP)
            .unwrap();
        match outcome {
            ReserveOutcome::Duplicate { existing } => assert_eq!(existing.id, first.id),
            ReserveOutcome::Created { .. } => panic!("second reservation must not create"),
        }

        // Only one reservation exists.
        assert_eq!(store.count_in_flight(&user).unwrap(), 1);
    }

    #[test]
    fn concurrent_submissions_create_one_task_per_key() {
        let (store, _dir) = create_test_store();
        let store = Arc::new(store);
        let user = UserId::generate();
        store.top_up(&user, 1000, "load test").unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                match store
                    .reserve_task(new_task(user, Some("shared-key-0123456789")), 100)
                    .unwrap()
                {
                    ReserveOutcome::Created { .. } => 1,
                    ReserveOutcome::Duplicate { .. } => 0,
                }
            }));
        }

        let created: i32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(created, 1);
        assert_eq!(store.count_in_flight(&user).unwrap(), 1);
    }

    #[test]
    fn in_flight_cap_rejects_third_submission_regardless_of_balance() {
        let (store, _dir) = create_test_store();
        let user = UserId::generate();
        store.top_up(&user, 1000, "plenty").unwrap();

        reserve(&store, new_task(user, None));
        reserve(&store, new_task(user, None));

        let result = store.reserve_task(new_task(user, None), CAP);
        assert!(matches!(
            result,
            Err(StoreError::TooManyInFlight { count: 2, cap: 2 })
        ));
    }

    #[test]
    fn solvency_checked_against_available_balance() {
        let (store, _dir) = create_test_store();
        let user = UserId::generate();
        store.top_up(&user, 15, "small").unwrap();

        reserve(&store, new_task(user, None));

        // Balance 15, reserved 10 -> available 5 < 10.
        let result = store.reserve_task(new_task(user, None), CAP);
        assert!(matches!(
            result,
            Err(StoreError::InsufficientCredits {
                available: 5,
                required: 10
            })
        ));
    }

    #[test]
    fn settle_charges_once_and_is_idempotent() {
        let (store, _dir) = create_test_store();
        let user = UserId::generate();
        store.top_up(&user, 30, "starter").unwrap();

        let (task, _) = reserve(&store, new_task(user, None));
        store.mark_task_processing(&task.id).unwrap();

        let wrap = Wrap::new(user, task.id, "https://cdn.example.com/w.png".into());
        let balance = store.settle_task(&task.id, Some(wrap)).unwrap();
        assert_eq!(balance, 20);

        // Second settle: no double charge.
        let balance = store.settle_task(&task.id, None).unwrap();
        assert_eq!(balance, 20);

        let account = store.get_account(&user).unwrap().unwrap();
        assert_eq!(account.total_spent, 10);
        assert_eq!(account.balance, account.total_earned - account.total_spent);

        let stored = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert!(stored.wrap_id.is_some());
        assert_eq!(store.count_in_flight(&user).unwrap(), 0);

        let wrap = store.find_wrap_by_task(&task.id).unwrap().unwrap();
        assert_eq!(wrap.texture_url, "https://cdn.example.com/w.png");
    }

    #[test]
    fn settle_without_wrap_is_completed_unlinked() {
        let (store, _dir) = create_test_store();
        let user = UserId::generate();
        store.top_up(&user, 30, "starter").unwrap();

        let (task, _) = reserve(&store, new_task(user, None));
        store.mark_task_processing(&task.id).unwrap();

        let balance = store.settle_task(&task.id, None).unwrap();
        assert_eq!(balance, 20);

        let stored = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::CompletedUnlinked);
        assert!(stored.wrap_id.is_none());
        assert!(store.find_wrap_by_task(&task.id).unwrap().is_none());
    }

    #[test]
    fn refund_of_unsettled_task_restores_nothing_but_writes_entry() {
        let (store, _dir) = create_test_store();
        let user = UserId::generate();
        store.top_up(&user, 30, "starter").unwrap();

        let (task, _) = reserve(&store, new_task(user, None));
        store.mark_task_processing(&task.id).unwrap();
        store
            .fail_task(&task.id, "no_image_payload", "all candidates exhausted")
            .unwrap();

        let outcome = store.refund_task(&task.id, "no image produced").unwrap();
        assert_eq!(outcome.refunded, 0);
        assert_eq!(outcome.balance, 30);
        assert!(!outcome.already_refunded);

        let stored = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::FailedRefunded);

        // The zero-amount refund entry is still in the ledger for audit.
        let entries = store.list_ledger_by_user(&user, 10, 0).unwrap();
        let refund = entries
            .iter()
            .find(|e| e.entry_type == LedgerEntryType::Refund)
            .unwrap();
        assert_eq!(refund.amount, 0);
        assert_eq!(refund.task_id, Some(task.id));
    }

    #[test]
    fn refund_twice_is_a_noop_second_time() {
        let (store, _dir) = create_test_store();
        let user = UserId::generate();
        store.top_up(&user, 30, "starter").unwrap();

        let (task, _) = reserve(&store, new_task(user, None));
        store.fail_task(&task.id, "api_error", "boom").unwrap();

        let first = store.refund_task(&task.id, "boom").unwrap();
        assert!(!first.already_refunded);

        let second = store.refund_task(&task.id, "boom").unwrap();
        assert!(second.already_refunded);
        assert_eq!(second.refunded, 0);
        assert_eq!(second.balance, 30);

        // Exactly one refund entry.
        let entries = store.list_ledger_by_user(&user, 10, 0).unwrap();
        let refunds = entries
            .iter()
            .filter(|e| e.entry_type == LedgerEntryType::Refund)
            .count();
        assert_eq!(refunds, 1);
    }

    #[test]
    fn refund_of_completed_task_is_rejected() {
        let (store, _dir) = create_test_store();
        let user = UserId::generate();
        store.top_up(&user, 30, "starter").unwrap();

        let (task, _) = reserve(&store, new_task(user, None));
        store.mark_task_processing(&task.id).unwrap();
        store.settle_task(&task.id, None).unwrap();
        assert_eq!(store.get_account(&user).unwrap().unwrap().balance, 20);

        // Operator-driven reversal of a settled charge is not allowed through
        // refund_task; completed tasks are terminal.
        let result = store.refund_task(&task.id, "support request");
        assert!(matches!(result, Err(StoreError::InvalidTransition { .. })));
    }

    #[test]
    fn refund_force_fails_stale_in_flight_task() {
        let (store, _dir) = create_test_store();
        let user = UserId::generate();
        store.top_up(&user, 30, "starter").unwrap();

        let (task, _) = reserve(&store, new_task(user, None));
        store.mark_task_processing(&task.id).unwrap();

        // Worker died; task still processing.
        let outcome = store.refund_task(&task.id, "stale task reclaimed").unwrap();
        assert_eq!(outcome.refunded, 0);

        let stored = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::FailedRefunded);
        assert_eq!(store.count_in_flight(&user).unwrap(), 0);
        assert_eq!(store.available_balance(&user).unwrap(), 30);
    }

    #[test]
    fn full_scenario_conservation() {
        // Spec scenario: balance 30, cost 10.
        let (store, _dir) = create_test_store();
        let user = UserId::generate();
        store.top_up(&user, 30, "starter").unwrap();

        // k1 -> t1 pending, remaining 20.
        let (t1, remaining) = reserve(&store, new_task(user, Some("k1-0123456789abcdef")));
        assert_eq!(remaining, 20);

        // k1 replay -> same t1, no new charge.
        match store
            .reserve_task(new_task(user, Some("k1-0123456789abcdef")), CAP)
            .unwrap()
        {
            ReserveOutcome::Duplicate { existing } => assert_eq!(existing.id, t1.id),
            ReserveOutcome::Created { .. } => panic!("duplicate expected"),
        }

        // t1 succeeds -> settle charges 10.
        store.mark_task_processing(&t1.id).unwrap();
        store.settle_task(&t1.id, None).unwrap();
        let account = store.get_account(&user).unwrap().unwrap();
        assert_eq!(account.balance, 20);
        assert_eq!(account.total_spent, 10);

        // k2 fails after exhausting all models -> refunded, balance unchanged.
        let (t2, _) = reserve(&store, new_task(user, Some("k2-0123456789abcdef")));
        store.mark_task_processing(&t2.id).unwrap();
        store
            .fail_task(&t2.id, "no_image_payload", "model returned no image")
            .unwrap();
        store.refund_task(&t2.id, "model returned no image").unwrap();

        let account = store.get_account(&user).unwrap().unwrap();
        assert_eq!(account.balance, 20);
        assert_eq!(account.balance, account.total_earned - account.total_spent);
        assert_eq!(store.ledger_sum(&user).unwrap(), account.balance);

        // Newest-first ledger: refund(0), charge(-10), top_up(+30).
        let entries = store.list_ledger_by_user(&user, 10, 0).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].entry_type, LedgerEntryType::Refund);
        assert_eq!(entries[0].amount, 0);
        assert_eq!(entries[1].entry_type, LedgerEntryType::GenerationCharge);
        assert_eq!(entries[1].amount, -10);
    }

    #[test]
    fn task_listing_and_steps() {
        let (store, _dir) = create_test_store();
        let user = UserId::generate();
        store.top_up(&user, 100, "starter").unwrap();

        let (t1, _) = reserve(&store, new_task(user, None));
        std::thread::sleep(std::time::Duration::from_millis(2));
        let (t2, _) = reserve(&store, new_task(user, None));

        let tasks = store.list_tasks_by_user(&user, 10, 0).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, t2.id); // Newest first
        assert_eq!(tasks[1].id, t1.id);

        store
            .append_task_step(
                &t1.id,
                TaskStep::with_detail(StepKind::ProviderCallStart, "gemini"),
            )
            .unwrap();
        let stored = store.get_task(&t1.id).unwrap().unwrap();
        assert_eq!(stored.steps.last().unwrap().kind, StepKind::ProviderCallStart);
    }

    #[test]
    fn mark_processing_rejects_terminal_tasks() {
        let (store, _dir) = create_test_store();
        let user = UserId::generate();
        store.top_up(&user, 30, "starter").unwrap();

        let (task, _) = reserve(&store, new_task(user, None));
        store.mark_task_processing(&task.id).unwrap();
        store.fail_task(&task.id, "timeout", "budget exceeded").unwrap();

        let result = store.mark_task_processing(&task.id);
        assert!(matches!(result, Err(StoreError::InvalidTransition { .. })));
    }
}
