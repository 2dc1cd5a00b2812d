use std::path::Path;

use crate::error::Result;
use crate::message::DomainId;

use super::BlockStore;

/// A sled-backed [`BlockStore`]. One tree, one key per domain, values are
/// the block height as 8 big-endian bytes; sled inserts are atomic per key.
#[derive(Clone)]
pub struct SledBlockStore {
    db: sled::Db,
}

impl std::fmt::Debug for SledBlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledBlockStore").finish()
    }
}

const TREE: &str = "last_scanned_blocks";

impl SledBlockStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .use_compression(true)
            .compression_factor(18)
            .open()?;
        Ok(Self { db })
    }

    /// An ephemeral store backed by a temporary sled database.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }
}

impl BlockStore for SledBlockStore {
    #[tracing::instrument(skip(self))]
    fn store_block(&self, domain_id: DomainId, block: u64) -> Result<()> {
        let tree = self.db.open_tree(TREE)?;
        tree.insert([domain_id], &block.to_be_bytes())?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn last_block(&self, domain_id: DomainId) -> Result<Option<u64>> {
        let tree = self.db.open_tree(TREE)?;
        let value = tree.get([domain_id])?;
        Ok(value.map(|v| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&v);
            u64::from_be_bytes(bytes)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoints_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = SledBlockStore::open(tmp.path()).unwrap();
            store.store_block(1, 599).unwrap();
            store.store_block(2, 1_000_000).unwrap();
        }
        let store = SledBlockStore::open(tmp.path()).unwrap();
        assert_eq!(store.last_block(1).unwrap(), Some(599));
        assert_eq!(store.last_block(2).unwrap(), Some(1_000_000));
        assert_eq!(store.last_block(3).unwrap(), None);
    }

    #[test]
    fn checkpoints_are_keyed_per_domain() {
        let store = SledBlockStore::temporary().unwrap();
        store.store_block(1, 10).unwrap();
        store.store_block(1, 11).unwrap();
        store.store_block(9, 7).unwrap();
        assert_eq!(store.last_block(1).unwrap(), Some(11));
        assert_eq!(store.last_block(9).unwrap(), Some(7));
    }
}
