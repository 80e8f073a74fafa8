//! 相似图片列表的持久化
//!
//! 每次重建都在一个写事务中完成：清空旧记录、写入新记录、更新元数据、提交。
//! 读取方只会看到上一次提交的完整结果，重建中途失败或被放弃时存储保持不变。

mod lmdb_store;
mod memory_store;

pub use lmdb_store::*;
pub use memory_store::*;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{ImageId, NeighborRecord};

/// 存储的元数据，在 `end_rebuild` 时写入
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    /// 已提交的重建次数
    pub generation: u64,
    /// 记录总数
    pub records: u64,
    /// 拥有相似图片的图片数量
    pub sources: u64,
}

pub trait SimilarityStore: Send + Sync {
    type Rebuild<'a>: StoreRebuild
    where
        Self: 'a;

    /// 开启写事务，并在其中清空所有旧记录
    fn begin_rebuild(&self) -> Result<Self::Rebuild<'_>, StoreError>;

    /// 返回按 rank 升序排列的相似图片，不存在时返回空列表
    fn get_neighbors(&self, source: ImageId) -> Result<Vec<NeighborRecord>, StoreError>;

    /// 返回记录总数
    fn size(&self) -> Result<usize, StoreError>;

    /// 返回最近一次提交的元数据
    fn meta(&self) -> Result<StoreMeta, StoreError>;
}

/// 一次进行中的重建，drop 时如果没有提交则自动放弃
pub trait StoreRebuild {
    /// 写入一条记录，同一个 source 的 rank 不能重复，target 不能等于 source
    fn add_neighbor(
        &mut self,
        source: ImageId,
        target: ImageId,
        rank: u32,
        score: f64,
    ) -> Result<(), StoreError>;

    /// 更新元数据等辅助结构，`commit` 时如果还没有调用会自动调用
    fn end_rebuild(&mut self) -> Result<(), StoreError>;

    /// 提交本次重建
    fn commit(self) -> Result<(), StoreError>;

    /// 放弃本次重建
    fn rollback(self);
}
