use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use log::{info, warn};
use regex::Regex;
use walkdir::WalkDir;

use crate::cache::ImageCache;
use crate::catalog::Catalog;
use crate::cli::SubCommandExtend;
use crate::config::{CacheConfig, CacheOptions, EngineConfig, EngineOptions, Opts};
use crate::index::BucketIndex;
use crate::progress::{BarReporter, pb_style};
use crate::similarity::SimilarityEngine;
use crate::store::{LmdbSimilarityStore, SimilarityStore};

#[derive(Parser, Debug, Clone)]
pub struct ScanCommand {
    #[command(flatten)]
    pub engine: EngineOptions,
    #[command(flatten)]
    pub cache: CacheOptions,
    /// 图片所在目录
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,webp")]
    pub suffix: String,
}

impl SubCommandExtend for ScanCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let re_suf = format!("(?i)^({})$", self.suffix.replace(',', "|"));
        let re_suf = Regex::new(&re_suf)?;
        let catalog = Catalog::open(opts.conf_dir.catalog())?;

        let mut added = 0;
        for entry in WalkDir::new(&self.path).into_iter().filter_map(|entry| entry.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let matched = entry.path().extension().map(|s| re_suf.is_match(&s.to_string_lossy()));
            if matched != Some(true) {
                continue;
            }
            let path = match entry.path().canonicalize() {
                Ok(path) => path,
                Err(e) => {
                    warn!("跳过 {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            if catalog.register(&path)?.1 {
                added += 1;
            }
        }

        // 签名不持久化，每次扫描都为整个图库重新计算
        let ids = catalog.images()?.into_iter().map(|(id, _)| id).collect::<Vec<_>>();
        info!("新增 {} 张图片，图库共 {} 张图片", added, ids.len());

        let cache = Arc::new(ImageCache::new(catalog.loader()?, CacheConfig::from(&self.cache)));
        if self.cache.warm_thumbnails {
            cache.initialize(&ids, &BarReporter::new())?;
        }

        let store = LmdbSimilarityStore::open(opts.conf_dir.similarity())?;
        let config = EngineConfig::from(&self.engine);
        let engine = SimilarityEngine::new(cache.clone(), BucketIndex::new(), store, &config);

        let pb = ProgressBar::new(ids.len() as u64).with_style(pb_style());
        pb.set_message("计算签名");
        let signatures =
            engine.generate_hashes(&ids, |current, _| pb.set_position(current as u64))?;
        pb.finish();
        cache.purge();

        let pb = ProgressBar::new(signatures.len() as u64).with_style(pb_style());
        pb.set_message("重建相似度索引");
        engine.build_similarity_index(&signatures, |current, _| pb.set_position(current as u64))?;
        pb.finish();

        let meta = engine.store().meta()?;
        info!("相似度索引: {} 张图片，{} 条记录", meta.sources, meta.records);
        Ok(())
    }
}
