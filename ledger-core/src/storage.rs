//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Account balances (key: account_id)
//! - `transactions` - Transaction rows (key: transaction_id)
//! - `outbox` - Outbox events in commit order (key: sequence, big endian)
//! - `indices` - Secondary indices for lookups and relay scans
//!
//! Reads go straight to RocksDB. Writes are applied only by the ledger
//! actor, which makes it the single writer for balances and sequences.

use crate::{
    error::{Error, Result},
    types::{
        Account, AccountId, BalanceChange, OutboxEvent, OutboxStatus, Transaction,
        TransactionStatus,
    },
    unit::{CommitReceipt, Mutation, Precondition, UnitOfWork},
    Config,
};
use chrono::{DateTime, Utc};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use rust_decimal::Decimal;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_TRANSACTIONS: &str = "transactions";
const CF_OUTBOX: &str = "outbox";
const CF_INDICES: &str = "indices";

/// Index key prefixes (all in `indices`)
const IDX_CHALLENGE: &[u8] = b"c|";
const IDX_ACCOUNT: &[u8] = b"a|";
const IDX_STATUS: &[u8] = b"s|";
const IDX_OUTBOX_ID: &[u8] = b"o|";
const IDX_OUTBOX_PENDING: &[u8] = b"p|";
const IDX_OUTBOX_FAILED: &[u8] = b"f|";

/// Account being modified inside a unit
struct Staged {
    old_balance: Decimal,
    account: Account,
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: DB,

    /// Last assigned outbox sequence
    outbox_seq: AtomicU64,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("outbox_seq", &self.outbox_seq.load(Ordering::SeqCst))
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_OUTBOX, Self::cf_options_outbox()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        let storage = Self {
            db,
            outbox_seq: AtomicU64::new(0),
        };

        let last_seq = storage.last_outbox_sequence()?;
        storage.outbox_seq.store(last_seq, Ordering::SeqCst);

        tracing::info!(path = ?path, outbox_seq = last_seq, "Opened ledger storage");
        Ok(storage)
    }

    // Column family options

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        // Hot rows, favour read speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_outbox() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn last_outbox_sequence(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_OUTBOX)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                Self::decode_seq(&key)
            }
            None => Ok(0),
        }
    }

    // Account reads

    /// Find account by ID
    pub fn find_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        match self.db.get_cf(cf, account_id.as_str().as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Get account by ID
    pub fn get_account(&self, account_id: &AccountId) -> Result<Account> {
        self.find_account(account_id)?
            .ok_or_else(|| Error::AccountNotFound(account_id.to_string()))
    }

    // Transaction reads

    /// Find transaction by ID
    pub fn find_transaction(&self, transaction_id: Uuid) -> Result<Option<Transaction>> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        match self.db.get_cf(cf, transaction_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Get transaction by ID
    pub fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction> {
        self.find_transaction(transaction_id)?
            .ok_or_else(|| Error::TransactionNotFound(transaction_id.to_string()))
    }

    /// Transaction that owns an OTP challenge
    pub fn transaction_by_challenge(&self, challenge_id: &str) -> Result<Option<Transaction>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let key = Self::index_key_challenge(challenge_id);
        match self.db.get_cf(cf, &key)? {
            Some(value) => {
                let transaction_id = Self::decode_uuid(&value)?;
                self.find_transaction(transaction_id)
            }
            None => Ok(None),
        }
    }

    /// Transactions where the account is sender or receiver, newest first
    pub fn transactions_for_account(&self, account_id: &AccountId) -> Result<Vec<Transaction>> {
        let prefix = Self::index_prefix_account(account_id);
        let mut transactions = self.transactions_from_index(&prefix)?;
        // UUIDv7 keys scan oldest first
        transactions.reverse();
        Ok(transactions)
    }

    /// Transactions currently in a status, oldest first
    pub fn transactions_by_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>> {
        let mut prefix = IDX_STATUS.to_vec();
        prefix.push(status as u8);
        self.transactions_from_index(&prefix)
    }

    fn transactions_from_index(&self, prefix: &[u8]) -> Result<Vec<Transaction>> {
        let keys = self.scan_index(prefix)?;
        let mut transactions = Vec::with_capacity(keys.len());
        for key in keys {
            let transaction_id = Self::decode_uuid(&key[key.len().saturating_sub(16)..])?;
            transactions.push(self.get_transaction(transaction_id)?);
        }
        Ok(transactions)
    }

    // Outbox reads

    /// Get outbox event by ID
    pub fn get_outbox_event(&self, id: Uuid) -> Result<OutboxEvent> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let seq = self
            .db
            .get_cf(cf_indices, Self::index_key_outbox_id(id))?
            .ok_or_else(|| Error::OutboxEventNotFound(id.to_string()))?;
        self.outbox_at(Self::decode_seq(&seq)?)
    }

    /// PENDING events in creation order
    pub fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        self.pending_outbox_after(0, limit)
    }

    /// PENDING events with a sequence above `after`, in creation order
    pub fn pending_outbox_after(&self, after: u64, limit: usize) -> Result<Vec<OutboxEvent>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let start = Self::index_key_outbox(IDX_OUTBOX_PENDING, after.saturating_add(1));
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));

        let mut events = Vec::new();
        for item in iter {
            if events.len() >= limit {
                break;
            }
            let (key, _) = item?;
            if !key.starts_with(IDX_OUTBOX_PENDING) {
                break;
            }
            events.push(self.outbox_at(Self::decode_seq(&key[IDX_OUTBOX_PENDING.len()..])?)?);
        }
        Ok(events)
    }

    /// FAILED events in creation order
    pub fn failed_outbox(&self) -> Result<Vec<OutboxEvent>> {
        self.outbox_from_index(IDX_OUTBOX_FAILED, usize::MAX)
    }

    fn outbox_from_index(&self, prefix: &[u8], limit: usize) -> Result<Vec<OutboxEvent>> {
        let mut events = Vec::new();
        for key in self.scan_index(prefix)?.into_iter().take(limit) {
            events.push(self.outbox_at(Self::decode_seq(&key[prefix.len()..])?)?);
        }
        Ok(events)
    }

    fn outbox_at(&self, seq: u64) -> Result<OutboxEvent> {
        let cf = self.cf_handle(CF_OUTBOX)?;
        let value = self
            .db
            .get_cf(cf, seq.to_be_bytes())?
            .ok_or_else(|| Error::OutboxEventNotFound(format!("sequence {}", seq)))?;
        Ok(bincode::deserialize(&value)?)
    }

    // Writes (ledger actor only)

    /// Apply a unit of work atomically
    pub(crate) fn apply(&self, unit: UnitOfWork, now: DateTime<Utc>) -> Result<CommitReceipt> {
        unit.validate()?;
        for precondition in &unit.preconditions {
            self.check_precondition(precondition)?;
        }

        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_outbox = self.cf_handle(CF_OUTBOX)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let mut batch = WriteBatch::default();
        let mut staged: BTreeMap<AccountId, Staged> = BTreeMap::new();
        let mut written: HashMap<Uuid, Transaction> = HashMap::new();
        let mut receipt = CommitReceipt::default();
        let mut next_seq = self.outbox_seq.load(Ordering::SeqCst);

        for mutation in unit.mutations {
            match mutation {
                Mutation::OpenAccount(account) => {
                    if staged.contains_key(&account.account_id)
                        || self.find_account(&account.account_id)?.is_some()
                    {
                        return Err(Error::AccountExists(account.account_id.to_string()));
                    }
                    staged.insert(
                        account.account_id.clone(),
                        Staged {
                            old_balance: account.balance,
                            account,
                        },
                    );
                }

                Mutation::Debit { account_id, amount } => {
                    let entry = self.stage(&mut staged, &account_id)?;
                    if entry.account.balance < amount {
                        return Err(Error::InsufficientFunds {
                            account: account_id.to_string(),
                            available: entry.account.balance,
                            requested: amount,
                        });
                    }
                    entry.account.balance -= amount;
                }

                Mutation::Credit { account_id, amount } => {
                    let entry = self.stage(&mut staged, &account_id)?;
                    entry.account.balance += amount;
                }

                Mutation::PutTransaction(transaction) => {
                    let previous = match written.get(&transaction.transaction_id) {
                        Some(tx) => Some(tx.clone()),
                        None => self.find_transaction(transaction.transaction_id)?,
                    };
                    self.stage_transaction(
                        &mut batch,
                        cf_transactions,
                        cf_indices,
                        previous.as_ref(),
                        &transaction,
                    )?;
                    written.insert(transaction.transaction_id, transaction);
                }

                Mutation::Enqueue(mut event) => {
                    next_seq += 1;
                    event.sequence = next_seq;
                    let seq_key = next_seq.to_be_bytes();
                    batch.put_cf(cf_outbox, seq_key, bincode::serialize(&event)?);
                    batch.put_cf(cf_indices, Self::index_key_outbox_id(event.id), seq_key);
                    batch.put_cf(
                        cf_indices,
                        Self::index_key_outbox(IDX_OUTBOX_PENDING, next_seq),
                        b"",
                    );
                    receipt.outbox.push((event.id, next_seq));
                }
            }
        }

        for (account_id, mut entry) in staged {
            entry.account.version += 1;
            entry.account.updated_at = now;
            batch.put_cf(
                cf_accounts,
                account_id.as_str().as_bytes(),
                bincode::serialize(&entry.account)?,
            );
            receipt.balances.push(BalanceChange {
                account_id,
                old_balance: entry.old_balance,
                new_balance: entry.account.balance,
            });
        }

        // Atomic commit
        self.db.write(batch)?;
        self.outbox_seq.store(next_seq, Ordering::SeqCst);

        Ok(receipt)
    }

    /// Mark an outbox event PUBLISHED
    pub(crate) fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<OutboxEvent> {
        let mut event = self.get_outbox_event(id)?;
        let previous = event.status;
        event.status = OutboxStatus::Published;
        event.published_at = Some(at);
        self.write_outbox(&event, previous)?;
        Ok(event)
    }

    /// Record a failed publish; FAILED once `max_attempts` is reached
    pub(crate) fn record_publish_failure(
        &self,
        id: Uuid,
        error: String,
        next_attempt_at: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<OutboxEvent> {
        let mut event = self.get_outbox_event(id)?;
        let previous = event.status;
        event.attempts += 1;
        event.last_error = Some(error);
        event.next_attempt_at = next_attempt_at;
        if event.attempts >= max_attempts {
            event.status = OutboxStatus::Failed;
        }
        self.write_outbox(&event, previous)?;
        Ok(event)
    }

    /// Put a FAILED event back in the relay queue
    pub(crate) fn requeue_outbox(&self, id: Uuid, at: DateTime<Utc>) -> Result<OutboxEvent> {
        let mut event = self.get_outbox_event(id)?;
        if event.status != OutboxStatus::Failed {
            return Err(Error::PreconditionFailed(format!(
                "outbox event {} is {:?}, only FAILED events can be requeued",
                id, event.status
            )));
        }
        event.status = OutboxStatus::Pending;
        event.attempts = 0;
        event.next_attempt_at = at;
        self.write_outbox(&event, OutboxStatus::Failed)?;
        Ok(event)
    }

    fn write_outbox(&self, event: &OutboxEvent, previous: OutboxStatus) -> Result<()> {
        let cf_outbox = self.cf_handle(CF_OUTBOX)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_outbox, event.sequence.to_be_bytes(), bincode::serialize(event)?);
        if previous != event.status {
            if let Some(prefix) = Self::outbox_status_prefix(previous) {
                batch.delete_cf(cf_indices, Self::index_key_outbox(prefix, event.sequence));
            }
            if let Some(prefix) = Self::outbox_status_prefix(event.status) {
                batch.put_cf(cf_indices, Self::index_key_outbox(prefix, event.sequence), b"");
            }
        }
        self.db.write(batch)?;
        Ok(())
    }

    fn check_precondition(&self, precondition: &Precondition) -> Result<()> {
        match precondition {
            Precondition::TransactionAbsent(id) => {
                if self.find_transaction(*id)?.is_some() {
                    return Err(Error::PreconditionFailed(format!(
                        "transaction {} already exists",
                        id
                    )));
                }
            }
            Precondition::TransactionAt {
                transaction_id,
                status,
                saga_step,
            } => {
                let tx = self.get_transaction(*transaction_id)?;
                if tx.status != *status || tx.saga_step != *saga_step {
                    return Err(Error::PreconditionFailed(format!(
                        "transaction {} is {} at {:?}, expected {} at {:?}",
                        transaction_id, tx.status, tx.saga_step, status, saga_step
                    )));
                }
            }
            Precondition::TransactionOpen(id) => {
                let tx = self.get_transaction(*id)?;
                if tx.is_terminal() {
                    return Err(Error::PreconditionFailed(format!(
                        "transaction {} is already {}",
                        id, tx.status
                    )));
                }
            }
        }
        Ok(())
    }

    fn stage<'a>(
        &self,
        staged: &'a mut BTreeMap<AccountId, Staged>,
        account_id: &AccountId,
    ) -> Result<&'a mut Staged> {
        match staged.entry(account_id.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let account = self.get_account(account_id)?;
                Ok(entry.insert(Staged {
                    old_balance: account.balance,
                    account,
                }))
            }
        }
    }

    fn stage_transaction(
        &self,
        batch: &mut WriteBatch,
        cf_transactions: &ColumnFamily,
        cf_indices: &ColumnFamily,
        previous: Option<&Transaction>,
        transaction: &Transaction,
    ) -> Result<()> {
        let id = transaction.transaction_id;
        batch.put_cf(cf_transactions, id.as_bytes(), bincode::serialize(transaction)?);

        match previous {
            Some(prev) if prev.status != transaction.status => {
                batch.delete_cf(cf_indices, Self::index_key_status(prev.status, id));
                batch.put_cf(cf_indices, Self::index_key_status(transaction.status, id), b"");
            }
            Some(_) => {}
            None => {
                batch.put_cf(cf_indices, Self::index_key_status(transaction.status, id), b"");
                batch.put_cf(
                    cf_indices,
                    Self::index_key_account(&transaction.sender_account_id, id),
                    b"",
                );
                if transaction.receiver_account_id != transaction.sender_account_id {
                    batch.put_cf(
                        cf_indices,
                        Self::index_key_account(&transaction.receiver_account_id, id),
                        b"",
                    );
                }
            }
        }

        if let Some(challenge_id) = &transaction.challenge_id {
            batch.put_cf(cf_indices, Self::index_key_challenge(challenge_id), id.as_bytes());
        }
        Ok(())
    }

    fn scan_index(&self, prefix: &[u8]) -> Result<Vec<Box<[u8]>>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut keys = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }

    // Index key helpers

    fn index_key_challenge(challenge_id: &str) -> Vec<u8> {
        let mut key = IDX_CHALLENGE.to_vec();
        key.extend_from_slice(challenge_id.as_bytes());
        key
    }

    fn index_prefix_account(account_id: &AccountId) -> Vec<u8> {
        let mut key = IDX_ACCOUNT.to_vec();
        key.extend_from_slice(account_id.as_str().as_bytes());
        key.push(b'|'); // Separator
        key
    }

    fn index_key_account(account_id: &AccountId, transaction_id: Uuid) -> Vec<u8> {
        let mut key = Self::index_prefix_account(account_id);
        key.extend_from_slice(transaction_id.as_bytes());
        key
    }

    fn index_key_status(status: TransactionStatus, transaction_id: Uuid) -> Vec<u8> {
        let mut key = IDX_STATUS.to_vec();
        key.push(status as u8);
        key.extend_from_slice(transaction_id.as_bytes());
        key
    }

    fn index_key_outbox_id(id: Uuid) -> Vec<u8> {
        let mut key = IDX_OUTBOX_ID.to_vec();
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn index_key_outbox(prefix: &[u8], seq: u64) -> Vec<u8> {
        let mut key = prefix.to_vec();
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    fn outbox_status_prefix(status: OutboxStatus) -> Option<&'static [u8]> {
        match status {
            OutboxStatus::Pending => Some(IDX_OUTBOX_PENDING),
            OutboxStatus::Failed => Some(IDX_OUTBOX_FAILED),
            OutboxStatus::Published => None,
        }
    }

    fn decode_uuid(bytes: &[u8]) -> Result<Uuid> {
        Uuid::from_slice(bytes).map_err(|e| Error::Storage(format!("Corrupt index key: {}", e)))
    }

    fn decode_seq(bytes: &[u8]) -> Result<u64> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::Storage("Corrupt outbox sequence".to_string()))?;
        Ok(u64::from_be_bytes(raw))
    }
}
