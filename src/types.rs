use std::fmt;

use serde::{Deserialize, Serialize};

/// 图片 ID，由外部图库分配，保证稳定
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageId(pub u64);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for ImageId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// 持久化的相似图片记录
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborRecord {
    pub source: ImageId,
    pub target: ImageId,
    /// 从 0 开始，同一个 source 下连续
    pub rank: u32,
    /// 越小越相似
    pub score: f64,
}
