//! Sled-based storage layer
//!
//! The engine keeps its working state in memory; this layer persists bincode snapshots of
//! the whole `AllocationStore` plus the counter repair audit trail.

use crate::store::AllocationStore;
use crate::types::CounterRepair;
use sled::{Db, Tree};
use std::path::Path;
use thiserror::Error;

const STORE_KEY: &[u8] = b"store";
const SAVED_AT_KEY: &[u8] = b"saved_at";

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] bincode::Error),
    #[error("corrupt record: {0}")]
    Corrupt(&'static str),
}

pub struct Storage {
    db: Db,
    snapshots: Tree,
    repairs: Tree,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Self::from_db(sled::open(path)?)
    }

    /// Throwaway database, removed on drop
    pub fn temporary() -> Result<Self, DbError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, DbError> {
        let snapshots = db.open_tree("snapshots")?;
        let repairs = db.open_tree("repairs")?;
        Ok(Self { db, snapshots, repairs })
    }

    pub fn save_store(&self, store: &AllocationStore, saved_at: u64) -> Result<(), DbError> {
        let value = bincode::serialize(store)?;
        self.snapshots.insert(STORE_KEY, value)?;
        self.snapshots.insert(SAVED_AT_KEY, &saved_at.to_be_bytes())?;

        // Audit trail is append-only; index by position
        for (i, repair) in store.repairs().iter().enumerate().skip(self.repairs.len()) {
            self.repairs.insert((i as u64).to_be_bytes(), bincode::serialize(repair)?)?;
        }

        self.db.flush()?;
        Ok(())
    }

    pub fn load_store(&self) -> Result<Option<AllocationStore>, DbError> {
        match self.snapshots.get(STORE_KEY)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    pub fn saved_at(&self) -> Result<Option<u64>, DbError> {
        let Some(value) = self.snapshots.get(SAVED_AT_KEY)? else {
            return Ok(None);
        };
        let bytes: [u8; 8] = value.as_ref().try_into().map_err(|_| DbError::Corrupt("saved_at"))?;
        Ok(Some(u64::from_be_bytes(bytes)))
    }

    pub fn repairs(&self) -> Result<Vec<CounterRepair>, DbError> {
        let mut out = Vec::with_capacity(self.repairs.len());
        for item in self.repairs.iter() {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }
}
