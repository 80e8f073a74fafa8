use std::collections::HashSet;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use heed::types::{Bytes, SerdeBincode, Str};
use heed::{Database, Env, EnvOpenOptions, RwTxn, WithTls};
use log::debug;
use serde::{Deserialize, Serialize};

use super::{SimilarityStore, StoreMeta, StoreRebuild};
use crate::error::StoreError;
use crate::types::{ImageId, NeighborRecord};

/// 默认映射 16GiB 地址空间，实际占用的磁盘空间与数据量相关
const DEFAULT_MAP_SIZE: usize = 1 << 34;

/// 记录的值，键为 (source, rank)
#[derive(Serialize, Deserialize)]
struct NeighborValue {
    target: u64,
    score: f64,
}

/// 使用 lmdb 存储相似图片列表
///
/// 键为大端序的 `source(u64) ++ rank(u32)`，因此同一张图片的记录在 lmdb 中
/// 是连续的，并且按 rank 排序
pub struct LmdbSimilarityStore {
    env: Env<WithTls>,
    db_meta: Database<Str, SerdeBincode<StoreMeta>>,
    db_neighbor: Database<Bytes, SerdeBincode<NeighborValue>>,
}

impl LmdbSimilarityStore {
    /// 打开存储，目录不存在时会自动创建
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::open_with_map_size(path, DEFAULT_MAP_SIZE)
    }

    pub fn open_with_map_size<P: AsRef<Path>>(path: P, map_size: usize) -> Result<Self, StoreError> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(heed::Error::Io)?;
        debug!("打开相似度存储: {}", path.display());

        let env = unsafe { EnvOpenOptions::new().map_size(map_size).max_dbs(2).open(path)? };
        let mut txn = env.write_txn()?;
        let db_meta = env.create_database(&mut txn, Some("meta"))?;
        let db_neighbor = env.create_database(&mut txn, Some("neighbor"))?;
        txn.commit()?;

        Ok(Self { env, db_meta, db_neighbor })
    }
}

impl SimilarityStore for LmdbSimilarityStore {
    type Rebuild<'a> = LmdbRebuild<'a>;

    fn begin_rebuild(&self) -> Result<Self::Rebuild<'_>, StoreError> {
        let mut txn = self.env.write_txn()?;
        let meta = self.db_meta.get(&txn, "meta")?.unwrap_or_default();
        self.db_neighbor.clear(&mut txn)?;
        Ok(LmdbRebuild {
            txn,
            db_meta: self.db_meta,
            db_neighbor: self.db_neighbor,
            generation: meta.generation + 1,
            records: 0,
            sources: HashSet::new(),
            ended: false,
        })
    }

    fn get_neighbors(&self, source: ImageId) -> Result<Vec<NeighborRecord>, StoreError> {
        let txn = self.env.read_txn()?;
        let prefix = source.0.to_be_bytes();
        let mut records = vec![];
        for item in self.db_neighbor.prefix_iter(&txn, &prefix[..])? {
            let (key, value) = item?;
            records.push(NeighborRecord {
                source,
                target: ImageId(value.target),
                rank: BigEndian::read_u32(&key[8..12]),
                score: value.score,
            });
        }
        Ok(records)
    }

    fn size(&self) -> Result<usize, StoreError> {
        let txn = self.env.read_txn()?;
        Ok(self.db_neighbor.len(&txn)? as usize)
    }

    fn meta(&self) -> Result<StoreMeta, StoreError> {
        let txn = self.env.read_txn()?;
        Ok(self.db_meta.get(&txn, "meta")?.unwrap_or_default())
    }
}

pub struct LmdbRebuild<'a> {
    txn: RwTxn<'a>,
    db_meta: Database<Str, SerdeBincode<StoreMeta>>,
    db_neighbor: Database<Bytes, SerdeBincode<NeighborValue>>,
    generation: u64,
    records: u64,
    sources: HashSet<ImageId>,
    ended: bool,
}

impl StoreRebuild for LmdbRebuild<'_> {
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
        let key = neighbor_key(source, rank);
        if self.db_neighbor.get(&self.txn, &key[..])?.is_some() {
            return Err(StoreError::DuplicateRank { image: source, rank });
        }
        self.db_neighbor.put(&mut self.txn, &key[..], &NeighborValue { target: target.0, score })?;
        self.records += 1;
        self.sources.insert(source);
        Ok(())
    }

    fn end_rebuild(&mut self) -> Result<(), StoreError> {
        let meta = StoreMeta {
            generation: self.generation,
            records: self.records,
            sources: self.sources.len() as u64,
        };
        self.db_meta.put(&mut self.txn, "meta", &meta)?;
        self.ended = true;
        Ok(())
    }

    fn commit(mut self) -> Result<(), StoreError> {
        if !self.ended {
            self.end_rebuild()?;
        }
        self.txn.commit()?;
        Ok(())
    }

    fn rollback(self) {
        self.txn.abort();
    }
}

fn neighbor_key(source: ImageId, rank: u32) -> [u8; 12] {
    let mut key = [0; 12];
    BigEndian::write_u64(&mut key[..8], source.0);
    BigEndian::write_u32(&mut key[8..], rank);
    key
}
