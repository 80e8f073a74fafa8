use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, RwLock};

use super::{SimilarityStore, StoreMeta, StoreRebuild};
use crate::error::StoreError;
use crate::types::{ImageId, NeighborRecord};
use crate::utils::{lock, read, write};

type Records = BTreeMap<(ImageId, u32), (ImageId, f64)>;

#[derive(Default)]
struct Generation {
    records: Records,
    meta: StoreMeta,
}

/// 保存在内存中的相似图片列表，重建时先写入暂存区，提交时整体替换
#[derive(Default)]
pub struct MemorySimilarityStore {
    committed: RwLock<Generation>,
    /// 同一时间只允许一个重建
    writer: Mutex<()>,
}

impl MemorySimilarityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SimilarityStore for MemorySimilarityStore {
    type Rebuild<'a> = MemoryRebuild<'a>;

    fn begin_rebuild(&self) -> Result<Self::Rebuild<'_>, StoreError> {
        let guard = lock(&self.writer);
        let generation = read(&self.committed).meta.generation + 1;
        Ok(MemoryRebuild {
            store: self,
            _guard: guard,
            staged: Records::new(),
            sources: HashSet::new(),
            meta: StoreMeta { generation, ..Default::default() },
            ended: false,
        })
    }

    fn get_neighbors(&self, source: ImageId) -> Result<Vec<NeighborRecord>, StoreError> {
        let committed = read(&self.committed);
        let records = committed
            .records
            .range((source, 0)..=(source, u32::MAX))
            .map(|(&(source, rank), &(target, score))| NeighborRecord { source, target, rank, score })
            .collect();
        Ok(records)
    }

    fn size(&self) -> Result<usize, StoreError> {
        Ok(read(&self.committed).records.len())
    }

    fn meta(&self) -> Result<StoreMeta, StoreError> {
        Ok(read(&self.committed).meta)
    }
}

pub struct MemoryRebuild<'a> {
    store: &'a MemorySimilarityStore,
    _guard: MutexGuard<'a, ()>,
    staged: Records,
    sources: HashSet<ImageId>,
    meta: StoreMeta,
    ended: bool,
}

impl StoreRebuild for MemoryRebuild<'_> {
    fn add_neighbor(
        &mut self,
        source: ImageId,
        target: ImageId,
        rank: u32,
        score: f64,
    ) -> Result<(), StoreError> {
        if source == target {
            return Err(StoreError::SelfMatch(source));
        }
        if self.staged.contains_key(&(source, rank)) {
            return Err(StoreError::DuplicateRank { image: source, rank });
        }
        self.staged.insert((source, rank), (target, score));
        self.sources.insert(source);
        Ok(())
    }

    fn end_rebuild(&mut self) -> Result<(), StoreError> {
        self.meta.records = self.staged.len() as u64;
        self.meta.sources = self.sources.len() as u64;
        self.ended = true;
        Ok(())
    }

    fn commit(mut self) -> Result<(), StoreError> {
        if !self.ended {
            self.end_rebuild()?;
        }
        let records = std::mem::take(&mut self.staged);
        *write(&self.store.committed) = Generation { records, meta: self.meta };
        Ok(())
    }

    fn rollback(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncommitted_is_invisible() {
        let store = MemorySimilarityStore::new();
        let mut rebuild = store.begin_rebuild().unwrap();
        rebuild.add_neighbor(ImageId(1), ImageId(2), 0, 1.0).unwrap();
        rebuild.end_rebuild().unwrap();
        assert_eq!(store.size().unwrap(), 0);
        rebuild.commit().unwrap();
        assert_eq!(store.size().unwrap(), 1);
        assert_eq!(store.meta().unwrap(), StoreMeta { generation: 1, records: 1, sources: 1 });
    }

    #[test]
    fn test_rollback() {
        let store = MemorySimilarityStore::new();
        let mut rebuild = store.begin_rebuild().unwrap();
        rebuild.add_neighbor(ImageId(1), ImageId(2), 0, 1.0).unwrap();
        rebuild.rollback();
        assert_eq!(store.size().unwrap(), 0);
        assert_eq!(store.meta().unwrap().generation, 0);
    }
}
