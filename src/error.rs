use thiserror::Error;

use crate::types::ImageId;

/// 图片读取或解码失败，只影响单张图片
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("读取图片失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("解码图片失败: {0}")]
    Image(#[from] image::ImageError),

    #[error("图库中不存在图片 {0}")]
    UnknownImage(ImageId),

    #[error("处理图片时发生 panic: {0}")]
    Panicked(String),
}

/// 相似度存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Lmdb(#[from] heed::Error),

    #[error("{image} 的第 {rank} 位相似图片已存在")]
    DuplicateRank { image: ImageId, rank: u32 },

    #[error("{0} 不能作为自己的相似图片")]
    SelfMatch(ImageId),

    #[error("存储后端错误: {0}")]
    Backend(String),
}

/// 哈希流水线错误
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("哈希计算正在进行中")]
    AlreadyRunning,

    #[error("无法创建工作线程: {0}")]
    Spawn(#[from] std::io::Error),
}

/// 重建相似度索引失败，存储保持在上一次提交的状态
#[derive(Debug, Error)]
#[error("重建相似度索引失败: {0}")]
pub struct RebuildError(#[from] pub StoreError);

#[derive(Debug, Error)]
#[error("签名系数数量错误: 期望 {expected}, 实际 {actual}")]
pub struct InvalidSignature {
    pub expected: usize,
    pub actual: usize,
}
