//! 解码后图片的内存缓存
//!
//! 每张图片最多缓存三种尺寸：缩略图、显示用缩放图和原图。同一张图片的并发请求
//! 在该图片自己的锁上排队，只会解码一次。`purge` 只释放缩放图和原图，保留缩略图
//! 以便快速重新显示。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::DynamicImage;
use image::imageops::FilterType;
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::config::CacheConfig;
use crate::error::DecodeError;
use crate::loader::{ImageLoader, scale_to_cover};
use crate::progress::ProgressReporter;
use crate::types::ImageId;
use crate::utils::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Thumbnail,
    Scaled,
    Full,
}

#[derive(Default)]
struct Slot {
    thumbnail: Option<Arc<DynamicImage>>,
    scaled: Option<Arc<DynamicImage>>,
    full: Option<Arc<DynamicImage>>,
}

impl Slot {
    fn get_mut(&mut self, kind: Kind) -> &mut Option<Arc<DynamicImage>> {
        match kind {
            Kind::Thumbnail => &mut self.thumbnail,
            Kind::Scaled => &mut self.scaled,
            Kind::Full => &mut self.full,
        }
    }
}

/// 估算图片占用的内存，不等于解码器实际分配的大小
pub fn image_bytes(image: &DynamicImage) -> usize {
    image.width() as usize * image.height() as usize * image.color().bytes_per_pixel() as usize
}

pub struct ImageCache<L> {
    loader: L,
    config: CacheConfig,
    slots: Mutex<HashMap<ImageId, Arc<Mutex<Slot>>>>,
    /// 原图和缩放图占用的内存
    usage: AtomicUsize,
    /// 缩略图占用的内存
    thumbnail_usage: AtomicUsize,
}

impl<L: ImageLoader> ImageCache<L> {
    pub fn new(loader: L, config: CacheConfig) -> Self {
        Self {
            loader,
            config,
            slots: Mutex::new(HashMap::new()),
            usage: AtomicUsize::new(0),
            thumbnail_usage: AtomicUsize::new(0),
        }
    }

    /// 并发预生成缩略图，返回成功的数量
    pub fn initialize(
        &self,
        images: &[ImageId],
        reporter: &dyn ProgressReporter,
    ) -> Result<usize, rayon::ThreadPoolBuildError> {
        let total = images.len();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .thread_name(|i| format!("thumbnail-{i}"))
            .build()?;

        info!("开始生成 {} 张缩略图", total);
        let done = AtomicUsize::new(0);
        let ok = AtomicUsize::new(0);
        pool.install(|| {
            images.par_iter().for_each(|&id| {
                match self.get_thumbnail(id) {
                    Ok(_) => {
                        ok.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => warn!("生成缩略图 {} 失败: {}", id, e),
                }
                let current = done.fetch_add(1, Ordering::Relaxed) + 1;
                reporter.update("生成缩略图", current, total, false, false);
            })
        });
        if total == 0 {
            reporter.update("生成缩略图", 0, 0, false, false);
        }

        Ok(ok.into_inner())
    }

    pub fn get_thumbnail(&self, id: ImageId) -> Result<Arc<DynamicImage>, DecodeError> {
        self.get(id, Kind::Thumbnail)
    }

    pub fn get_scaled(&self, id: ImageId) -> Result<Arc<DynamicImage>, DecodeError> {
        self.get(id, Kind::Scaled)
    }

    pub fn get_full(&self, id: ImageId) -> Result<Arc<DynamicImage>, DecodeError> {
        self.get(id, Kind::Full)
    }

    /// 释放所有原图和缩放图，保留缩略图
    pub fn purge(&self) {
        let slots = lock(&self.slots).values().cloned().collect::<Vec<_>>();
        let mut released = 0;
        for slot in slots {
            let mut slot = lock(&slot);
            for image in [slot.scaled.take(), slot.full.take()].into_iter().flatten() {
                let bytes = image_bytes(&image);
                self.usage.fetch_sub(bytes, Ordering::SeqCst);
                released += bytes;
            }
        }
        debug!("释放图片缓存 {} 字节", released);
    }

    /// 移除一张图片的所有缓存
    pub fn evict(&self, id: ImageId) {
        let Some(slot) = lock(&self.slots).remove(&id) else {
            return;
        };
        let mut slot = lock(&slot);
        if let Some(thumbnail) = slot.thumbnail.take() {
            self.thumbnail_usage.fetch_sub(image_bytes(&thumbnail), Ordering::SeqCst);
        }
        for image in [slot.scaled.take(), slot.full.take()].into_iter().flatten() {
            self.usage.fetch_sub(image_bytes(&image), Ordering::SeqCst);
        }
    }

    /// 估算的内存占用，包括缩略图
    pub fn memory_usage(&self) -> usize {
        self.usage.load(Ordering::SeqCst) + self.thumbnail_usage.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, id: ImageId) -> Arc<Mutex<Slot>> {
        lock(&self.slots).entry(id).or_default().clone()
    }

    fn get(&self, id: ImageId, kind: Kind) -> Result<Arc<DynamicImage>, DecodeError> {
        let slot = self.slot(id);
        let (image, over) = {
            // 持有这张图片的锁直到解码完成，其他线程的同一请求会等待并直接使用结果
            let mut slot = lock(&slot);
            if let Some(image) = slot.get_mut(kind) {
                return Ok(image.clone());
            }
            let image = Arc::new(self.decode(id, kind, &slot)?);
            *slot.get_mut(kind) = Some(image.clone());

            // 计数和写入缓存在同一把锁内完成，purge 只能在计数之后减去
            let bytes = image_bytes(&image);
            let over = if kind == Kind::Thumbnail {
                self.thumbnail_usage.fetch_add(bytes, Ordering::SeqCst);
                false
            } else {
                self.usage.fetch_add(bytes, Ordering::SeqCst) + bytes > self.config.max_bytes
            };
            (image, over)
        };

        if over {
            // 必须在释放这张图片的锁之后再清理，否则会死锁
            info!("图片缓存超过 {} 字节，开始清理", self.config.max_bytes);
            self.purge();
        }
        Ok(image)
    }

    fn decode(&self, id: ImageId, kind: Kind, slot: &Slot) -> Result<DynamicImage, DecodeError> {
        let size = match kind {
            Kind::Full => return self.loader.load(id),
            Kind::Scaled => self.config.scaled_size,
            Kind::Thumbnail => self.config.thumbnail_size,
        };
        // 优先从已经解码的更大尺寸生成
        let source = match (&slot.full, &slot.scaled) {
            (Some(full), _) => (**full).clone(),
            (None, Some(scaled)) if kind == Kind::Thumbnail => (**scaled).clone(),
            _ => self.loader.load_scaled(id, size)?,
        };
        Ok(match kind {
            Kind::Thumbnail => source.thumbnail(size, size),
            _ => source.resize(size, size, FilterType::Triangle),
        })
    }
}

/// 计算签名时复用已缓存的原图，缩放方式和直接读取文件一致
///
/// 缩略图经过了额外一次缩放，结果和直接缩放原图不同，所以不用来计算签名
impl<L: ImageLoader> ImageLoader for ImageCache<L> {
    fn load(&self, id: ImageId) -> Result<DynamicImage, DecodeError> {
        Ok((*self.get_full(id)?).clone())
    }

    fn load_scaled(&self, id: ImageId, size: u32) -> Result<DynamicImage, DecodeError> {
        // 不能调用 self.slot，否则每张计算过签名的图片都会留下一个空槽
        let slot = lock(&self.slots).get(&id).cloned();
        let full = slot.and_then(|slot| lock(&slot).full.clone());
        match full {
            Some(full) => Ok(scale_to_cover((*full).clone(), size)),
            None => self.loader.load_scaled(id, size),
        }
    }
}
