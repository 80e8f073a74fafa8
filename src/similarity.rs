use std::sync::{Arc, RwLock};
use std::time::Instant;

use log::{error, info};

use crate::config::EngineConfig;
use crate::error::{PipelineError, RebuildError, StoreError};
use crate::index::SignatureIndex;
use crate::loader::ImageLoader;
use crate::metrics;
use crate::pipeline::{HashPipeline, SignatureMap};
use crate::store::{SimilarityStore, StoreRebuild};
use crate::types::{ImageId, NeighborRecord};
use crate::utils::read;

/// 相似图片引擎：计算签名、维护签名索引、持久化每张图片的相似图片列表
pub struct SimilarityEngine<L, I, S> {
    pipeline: HashPipeline<L, I>,
    index: Arc<RwLock<I>>,
    store: S,
    max_neighbors: usize,
}

impl<L, I, S> SimilarityEngine<L, I, S>
where
    L: ImageLoader,
    I: SignatureIndex,
    S: SimilarityStore,
{
    pub fn new(loader: L, index: I, store: S, config: &EngineConfig) -> Self {
        let index = Arc::new(RwLock::new(index));
        Self {
            pipeline: HashPipeline::new(loader, index.clone(), config.workers),
            index,
            store,
            max_neighbors: config.max_neighbors,
        }
    }

    pub fn pipeline(&self) -> &HashPipeline<L, I> {
        &self.pipeline
    }

    pub fn index(&self) -> &Arc<RwLock<I>> {
        &self.index
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// 见 [`HashPipeline::generate_hashes`]
    pub fn generate_hashes<F>(
        &self,
        images: &[ImageId],
        progress: F,
    ) -> Result<SignatureMap, PipelineError>
    where
        F: FnMut(usize, usize),
    {
        self.pipeline.generate_hashes(images, progress)
    }

    pub fn stop_hashes(&self) {
        self.pipeline.stop_hashes()
    }

    /// 为每张图片查询签名索引，把最相似的 `max_neighbors` 张图片写入存储
    ///
    /// 整个过程在一次重建事务中完成，任何写入失败都会放弃整个重建，
    /// 存储保持在上一次提交的状态。
    pub fn build_similarity_index<F>(
        &self,
        signatures: &SignatureMap,
        mut progress: F,
    ) -> Result<(), RebuildError>
    where
        F: FnMut(usize, usize),
    {
        let start = Instant::now();
        let result = self.rebuild(signatures, &mut progress);
        let elapsed = start.elapsed().as_secs_f32();
        metrics::observe_rebuild_duration(result.is_ok(), elapsed);

        match result {
            Ok(records) => {
                info!("相似度索引重建完成: {} 条记录，耗时 {:.2}s", records, elapsed);
                Ok(())
            }
            Err(e) => {
                error!("{}", e);
                Err(e)
            }
        }
    }

    fn rebuild<F>(&self, signatures: &SignatureMap, progress: &mut F) -> Result<usize, RebuildError>
    where
        F: FnMut(usize, usize),
    {
        let total = signatures.len();
        info!("开始重建相似度索引: {} 张图片", total);

        let mut rebuild = self.store.begin_rebuild()?;
        let mut records = 0;

        // 结果与遍历顺序无关，这里排序只是为了让进度和日志稳定
        let mut sources = signatures.iter().collect::<Vec<_>>();
        sources.sort_unstable_by_key(|(id, _)| **id);

        for (current, (&source, signature)) in sources.into_iter().enumerate() {
            let mut matches = read(&self.index).query(signature);
            matches.sort_by(|a, b| a.score.total_cmp(&b.score));

            // 索引中不属于本次输入的图片不参与
            let neighbors = matches
                .into_iter()
                .filter(|m| m.id != source && signatures.contains_key(&m.id))
                .take(self.max_neighbors);
            for (rank, m) in neighbors.enumerate() {
                rebuild.add_neighbor(source, m.id, rank as u32, m.score)?;
                records += 1;
            }
            progress(current + 1, total);
        }

        rebuild.end_rebuild()?;
        rebuild.commit()?;
        Ok(records)
    }

    /// 按存储的 rank 顺序返回相似图片
    pub fn get_similar_images(&self, id: ImageId) -> Result<Vec<ImageId>, StoreError> {
        Ok(self.store.get_neighbors(id)?.into_iter().map(|r| r.target).collect())
    }

    /// 同 [`Self::get_similar_images`]，附带分数
    pub fn get_neighbors(&self, id: ImageId) -> Result<Vec<NeighborRecord>, StoreError> {
        self.store.get_neighbors(id)
    }
}
