use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::message::DomainId;

use super::BlockStore;

/// An in-memory [`BlockStore`], used in tests.
#[derive(Clone, Default)]
pub struct InMemoryBlockStore {
    last_blocks: Arc<RwLock<HashMap<DomainId, u64>>>,
}

impl std::fmt::Debug for InMemoryBlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlockStore").finish()
    }
}

impl BlockStore for InMemoryBlockStore {
    fn store_block(&self, domain_id: DomainId, block: u64) -> Result<()> {
        self.last_blocks.write().insert(domain_id, block);
        Ok(())
    }

    fn last_block(&self, domain_id: DomainId) -> Result<Option<u64>> {
        Ok(self.last_blocks.read().get(&domain_id).copied())
    }
}
