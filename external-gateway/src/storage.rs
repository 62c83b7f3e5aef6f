//! Partner-side storage using RocksDB
//!
//! # Column Families
//!
//! - `transfers` - External transfers (key: external id)
//! - `origins` - Originating transaction id -> external id (unique)
//! - `open` - Transfers that still need processing or a callback
//!
//! A transfer and its index entries are always written in one `WriteBatch`.

use crate::{
    error::{Error, Result},
    types::ExternalTransfer,
};
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use uuid::Uuid;

const CF_TRANSFERS: &str = "transfers";
const CF_ORIGINS: &str = "origins";
const CF_OPEN: &str = "open";

/// Durable store of external transfers
pub struct TransferStore {
    db: DB,

    /// Serializes the origin uniqueness check with its insert
    insert_lock: Mutex<()>,
}

impl std::fmt::Debug for TransferStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferStore")
            .field("path", &self.db.path())
            .finish()
    }
}

impl TransferStore {
    /// Open or create database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_TRANSFERS, Options::default()),
            ColumnFamilyDescriptor::new(CF_ORIGINS, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_OPEN, Self::cf_options_index()),
        ];
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened gateway storage");
        Ok(Self {
            db,
            insert_lock: Mutex::new(()),
        })
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Insert a new transfer unless its originating transaction is known
    ///
    /// Returns the external id already recorded for the origin, if any.
    pub fn insert_unique(&self, transfer: &ExternalTransfer) -> Result<Option<Uuid>> {
        let _guard = self.insert_lock.lock();

        if let Some(existing) = self.id_for_origin(transfer.fortress_bank_transaction_id)? {
            return Ok(Some(existing));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf_handle(CF_ORIGINS)?,
            transfer.fortress_bank_transaction_id.as_bytes(),
            transfer.id.as_bytes(),
        );
        self.stage(&mut batch, transfer)?;
        self.db.write(batch)?;
        Ok(None)
    }

    /// Overwrite an existing transfer
    pub fn update(&self, transfer: &ExternalTransfer) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage(&mut batch, transfer)?;
        self.db.write(batch)?;
        Ok(())
    }

    fn stage(&self, batch: &mut WriteBatch, transfer: &ExternalTransfer) -> Result<()> {
        let key = transfer.id.as_bytes();
        batch.put_cf(self.cf_handle(CF_TRANSFERS)?, key, bincode::serialize(transfer)?);

        let cf_open = self.cf_handle(CF_OPEN)?;
        if transfer.status.is_terminal() && !transfer.awaiting_callback() {
            batch.delete_cf(cf_open, key);
        } else {
            batch.put_cf(cf_open, key, []);
        }
        Ok(())
    }

    /// Get transfer by external id
    pub fn get(&self, id: Uuid) -> Result<Option<ExternalTransfer>> {
        let cf = self.cf_handle(CF_TRANSFERS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// External id recorded for an originating transaction
    pub fn id_for_origin(&self, origin: Uuid) -> Result<Option<Uuid>> {
        let cf = self.cf_handle(CF_ORIGINS)?;
        match self.db.get_cf(cf, origin.as_bytes())? {
            Some(value) => Ok(Some(decode_id(&value)?)),
            None => Ok(None),
        }
    }

    /// Transfers still to be decided or reported, oldest first
    pub fn open_transfers(&self) -> Result<Vec<ExternalTransfer>> {
        let cf = self.cf_handle(CF_OPEN)?;
        let mut transfers = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            let id = decode_id(&key)?;
            match self.get(id)? {
                Some(transfer) => transfers.push(transfer),
                None => {
                    return Err(Error::Storage(format!(
                        "open index points at missing transfer {}",
                        id
                    )))
                }
            }
        }
        Ok(transfers)
    }

    /// Number of transfers recorded
    pub fn count(&self) -> Result<usize> {
        let cf = self.cf_handle(CF_ORIGINS)?;
        let mut count = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }
}

fn decode_id(bytes: &[u8]) -> Result<Uuid> {
    Uuid::from_slice(bytes).map_err(|e| Error::Storage(format!("Corrupt transfer id: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransferStatus;
    use chrono::Utc;
    use message_bus::events::ExternalTransferInitiatedEvent;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn transfer(origin: Uuid) -> ExternalTransfer {
        let event = ExternalTransferInitiatedEvent {
            transaction_id: origin,
            source_account_number: "ACC-1".into(),
            source_bank_code: "FTB".into(),
            destination_account_number: "0451000123".into(),
            destination_bank_code: "VCB".into(),
            amount: Decimal::new(12_345, 2),
            currency: "VND".into(),
            description: None,
            timestamp: Utc::now(),
        };
        ExternalTransfer::from_initiation(&event, Utc::now(), Utc::now())
    }

    #[test]
    fn test_origin_is_unique() {
        let temp = TempDir::new().unwrap();
        let store = TransferStore::open(temp.path()).unwrap();
        let origin = Uuid::now_v7();

        let first = transfer(origin);
        assert_eq!(store.insert_unique(&first).unwrap(), None);
        assert_eq!(store.insert_unique(&transfer(origin)).unwrap(), Some(first.id));
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get(first.id).unwrap(), Some(first));
    }

    #[test]
    fn test_open_index_follows_status() {
        let temp = TempDir::new().unwrap();
        let store = TransferStore::open(temp.path()).unwrap();
        let mut t = transfer(Uuid::now_v7());
        store.insert_unique(&t).unwrap();
        assert_eq!(store.open_transfers().unwrap().len(), 1);

        // Decided but not reported stays open
        t.status = TransferStatus::Completed;
        store.update(&t).unwrap();
        assert_eq!(store.open_transfers().unwrap().len(), 1);

        t.callback_sent_at = Some(Utc::now());
        store.update(&t).unwrap();
        assert!(store.open_transfers().unwrap().is_empty());
        assert_eq!(store.get(t.id).unwrap().unwrap().status, TransferStatus::Completed);
    }

    #[test]
    fn test_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let origin = Uuid::now_v7();
        let first = transfer(origin);
        {
            let store = TransferStore::open(temp.path()).unwrap();
            store.insert_unique(&first).unwrap();
        }

        let store = TransferStore::open(temp.path()).unwrap();
        assert_eq!(store.id_for_origin(origin).unwrap(), Some(first.id));
        assert_eq!(store.insert_unique(&transfer(origin)).unwrap(), Some(first.id));
        assert_eq!(store.open_transfers().unwrap(), vec![first]);
    }
}
