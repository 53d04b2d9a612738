//! Storage layer
//!
//! [`LedgerStore`] is an append-only record store keyed by merchant.
//! Every append must extend the merchant's chain by exactly one sequence
//! number; stores reject anything else.
//!
//! # RocksDB column families (`rocksdb` feature)
//!
//! - `transactions` - Entries (key: merchant_id || 0x00 || sequence BE)
//! - `tx_index` - Secondary index (key: transaction_id, value: entry key)

use crate::{
    config::{Config, StorageBackend},
    error::{Error, Result},
    types::{MerchantId, Transaction},
};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Append-only transaction store
pub trait LedgerStore: Send + Sync {
    /// Append an entry. `tx.sequence` must be the merchant's next sequence.
    fn append(&self, tx: &Transaction) -> Result<()>;

    /// Most recent entry for a merchant
    fn latest(&self, merchant: &MerchantId) -> Result<Option<Transaction>>;

    /// All entries for a merchant, oldest first
    fn history(&self, merchant: &MerchantId) -> Result<Vec<Transaction>>;

    /// Entry by ID
    fn get(&self, transaction_id: Uuid) -> Result<Option<Transaction>>;
}

/// Open the store selected by configuration
pub fn open_store(config: &Config) -> Result<Arc<dyn LedgerStore>> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "rocksdb")]
        StorageBackend::Rocksdb => Ok(Arc::new(rocks::RocksStore::open(config)?)),
        #[cfg(not(feature = "rocksdb"))]
        StorageBackend::Rocksdb => Err(Error::Config(
            "RocksDB backend requires the `rocksdb` feature".to_string(),
        )),
    }
}

fn check_next_sequence(latest: Option<&Transaction>, tx: &Transaction) -> Result<()> {
    let expected = latest.map_or(1, |t| t.sequence + 1);
    if tx.sequence != expected {
        return Err(Error::InvariantViolation(format!(
            "Out-of-order append for {}: sequence {} but expected {}",
            tx.merchant_id, tx.sequence, expected
        )));
    }
    Ok(())
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    chains: DashMap<MerchantId, Vec<Transaction>>,
    index: DashMap<Uuid, (MerchantId, usize)>,
}

impl MemoryStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    fn append(&self, tx: &Transaction) -> Result<()> {
        let mut chain = self.chains.entry(tx.merchant_id.clone()).or_default();

        check_next_sequence(chain.last(), tx)?;

        self.index
            .insert(tx.transaction_id, (tx.merchant_id.clone(), chain.len()));
        chain.push(tx.clone());

        Ok(())
    }

    fn latest(&self, merchant: &MerchantId) -> Result<Option<Transaction>> {
        Ok(self
            .chains
            .get(merchant)
            .and_then(|chain| chain.last().cloned()))
    }

    fn history(&self, merchant: &MerchantId) -> Result<Vec<Transaction>> {
        Ok(self
            .chains
            .get(merchant)
            .map(|chain| chain.clone())
            .unwrap_or_default())
    }

    fn get(&self, transaction_id: Uuid) -> Result<Option<Transaction>> {
        let Some(position) = self.index.get(&transaction_id).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        let (merchant, idx) = position;
        Ok(self
            .chains
            .get(&merchant)
            .and_then(|chain| chain.get(idx).cloned()))
    }
}

#[cfg(feature = "rocksdb")]
pub use rocks::RocksStore;

#[cfg(feature = "rocksdb")]
mod rocks {
    use super::*;
    use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};

    const CF_TRANSACTIONS: &str = "transactions";
    const CF_TX_INDEX: &str = "tx_index";

    /// RocksDB-backed store
    pub struct RocksStore {
        db: DB,
    }

    impl std::fmt::Debug for RocksStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RocksStore").field("path", &self.db.path()).finish()
        }
    }

    impl RocksStore {
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

            let mut tx_opts = Options::default();
            tx_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

            let cf_descriptors = vec![
                ColumnFamilyDescriptor::new(CF_TRANSACTIONS, tx_opts),
                ColumnFamilyDescriptor::new(CF_TX_INDEX, Options::default()),
            ];

            let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
            tracing::info!("Opened RocksDB ledger store at {:?}", path);

            Ok(Self { db })
        }

        fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
            self.db
                .cf_handle(name)
                .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
        }

        fn merchant_prefix(merchant: &MerchantId) -> Vec<u8> {
            let mut key = merchant.as_str().as_bytes().to_vec();
            key.push(0);
            key
        }

        fn entry_key(merchant: &MerchantId, sequence: u64) -> Vec<u8> {
            let mut key = Self::merchant_prefix(merchant);
            key.extend_from_slice(&sequence.to_be_bytes());
            key
        }
    }

    impl LedgerStore for RocksStore {
        fn append(&self, tx: &Transaction) -> Result<()> {
            check_next_sequence(self.latest(&tx.merchant_id)?.as_ref(), tx)?;

            let cf_tx = self.cf_handle(CF_TRANSACTIONS)?;
            let cf_index = self.cf_handle(CF_TX_INDEX)?;
            let key = Self::entry_key(&tx.merchant_id, tx.sequence);

            let mut batch = WriteBatch::default();
            batch.put_cf(cf_tx, &key, bincode::serialize(tx)?);
            batch.put_cf(cf_index, tx.transaction_id.as_bytes(), &key);
            self.db.write(batch)?;

            tracing::debug!(
                transaction_id = %tx.transaction_id,
                merchant_id = %tx.merchant_id,
                sequence = tx.sequence,
                "Transaction persisted"
            );

            Ok(())
        }

        fn latest(&self, merchant: &MerchantId) -> Result<Option<Transaction>> {
            let cf = self.cf_handle(CF_TRANSACTIONS)?;
            let prefix = Self::merchant_prefix(merchant);
            let upper = Self::entry_key(merchant, u64::MAX);

            let mut iter = self
                .db
                .iterator_cf(cf, IteratorMode::From(&upper, Direction::Reverse));

            match iter.next() {
                Some(item) => {
                    let (key, value) = item?;
                    if key.starts_with(&prefix) {
                        Ok(Some(bincode::deserialize(&value)?))
                    } else {
                        Ok(None)
                    }
                }
                None => Ok(None),
            }
        }

        fn history(&self, merchant: &MerchantId) -> Result<Vec<Transaction>> {
            let cf = self.cf_handle(CF_TRANSACTIONS)?;
            let prefix = Self::merchant_prefix(merchant);

            let mut entries = Vec::new();
            for item in self
                .db
                .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward))
            {
                let (key, value) = item?;
                if !key.starts_with(&prefix) {
                    break;
                }
                entries.push(bincode::deserialize(&value)?);
            }

            Ok(entries)
        }

        fn get(&self, transaction_id: Uuid) -> Result<Option<Transaction>> {
            let cf_index = self.cf_handle(CF_TX_INDEX)?;
            let Some(key) = self.db.get_cf(cf_index, transaction_id.as_bytes())? else {
                return Ok(None);
            };

            let cf_tx = self.cf_handle(CF_TRANSACTIONS)?;
            match self.db.get_cf(cf_tx, key)? {
                Some(value) => Ok(Some(bincode::deserialize(&value)?)),
                None => Err(Error::Storage(format!(
                    "Index points at missing transaction {}",
                    transaction_id
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntrySide, TransactionCategory};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn tx(merchant: &str, sequence: u64) -> Transaction {
        Transaction {
            transaction_id: Uuid::now_v7(),
            merchant_id: MerchantId::new(merchant),
            sequence,
            side: EntrySide::Credit,
            amount: dec!(10),
            category: TransactionCategory::Recharge,
            opening_balance: dec!(10) * rust_decimal::Decimal::from(sequence - 1),
            closing_balance: dec!(10) * rust_decimal::Decimal::from(sequence),
            shipment: None,
            reference_transaction_id: None,
            description: String::new(),
            created_at: Utc::now(),
        }
    }

    fn exercise_store(store: &dyn LedgerStore) {
        let merchant = MerchantId::new("M-1");
        assert!(store.latest(&merchant).unwrap().is_none());

        let first = tx("M-1", 1);
        let second = tx("M-1", 2);
        store.append(&first).unwrap();
        store.append(&second).unwrap();
        store.append(&tx("M-10", 1)).unwrap();

        assert_eq!(store.latest(&merchant).unwrap().unwrap(), second);
        assert_eq!(store.history(&merchant).unwrap(), vec![first.clone(), second]);
        assert_eq!(store.get(first.transaction_id).unwrap().unwrap(), first);
        assert!(store.get(Uuid::now_v7()).unwrap().is_none());

        // Gap in the chain
        let err = store.append(&tx("M-1", 4)).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }

    #[test]
    fn test_memory_store() {
        exercise_store(&MemoryStore::new());
    }

    #[cfg(feature = "rocksdb")]
    #[test]
    fn test_rocks_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.backend = StorageBackend::Rocksdb;
        config.data_dir = temp_dir.path().to_path_buf();

        let store = open_store(&config).unwrap();
        exercise_store(store.as_ref());
    }

    #[cfg(not(feature = "rocksdb"))]
    #[test]
    fn test_rocksdb_backend_needs_feature() {
        let config = Config {
            backend: StorageBackend::Rocksdb,
            ..Config::default()
        };
        assert!(matches!(open_store(&config), Err(Error::Config(_))));
    }
}
