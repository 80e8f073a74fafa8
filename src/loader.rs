use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageReader};
use log::debug;

use crate::error::DecodeError;
use crate::types::ImageId;

/// 图片加载器，隐藏文件读取和方向校正等细节
pub trait ImageLoader: Send + Sync {
    /// 解码原始尺寸的图片
    fn load(&self, id: ImageId) -> Result<DynamicImage, DecodeError>;

    /// 解码并等比缩放图片，使宽高都不小于 `size`，原图本身更小时保持原尺寸
    fn load_scaled(&self, id: ImageId, size: u32) -> Result<DynamicImage, DecodeError> {
        Ok(scale_to_cover(self.load(id)?, size))
    }
}

impl<L: ImageLoader + ?Sized> ImageLoader for std::sync::Arc<L> {
    fn load(&self, id: ImageId) -> Result<DynamicImage, DecodeError> {
        (**self).load(id)
    }

    fn load_scaled(&self, id: ImageId, size: u32) -> Result<DynamicImage, DecodeError> {
        (**self).load_scaled(id, size)
    }
}

/// 等比缩放，使较短的一边等于 `size`
pub fn scale_to_cover(image: DynamicImage, size: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let short = width.min(height);
    if short <= size {
        return image;
    }
    let scale = size as f64 / short as f64;
    let nwidth = ((width as f64 * scale).round() as u32).max(size);
    let nheight = ((height as f64 * scale).round() as u32).max(size);
    image.resize_exact(nwidth, nheight, FilterType::Triangle)
}

/// 从文件系统读取图片，按 EXIF 信息校正方向
#[derive(Debug, Default, Clone)]
pub struct FileLoader {
    paths: HashMap<ImageId, PathBuf>,
}

impl FileLoader {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = (ImageId, P)>,
        P: Into<PathBuf>,
    {
        Self { paths: paths.into_iter().map(|(id, p)| (id, p.into())).collect() }
    }

    pub fn path(&self, id: ImageId) -> Option<&Path> {
        self.paths.get(&id).map(PathBuf::as_path)
    }
}

impl ImageLoader for FileLoader {
    fn load(&self, id: ImageId) -> Result<DynamicImage, DecodeError> {
        let path = self.path(id).ok_or(DecodeError::UnknownImage(id))?;
        debug!("解码图片 {}: {}", id, path.display());
        let mut decoder = ImageReader::open(path)?.with_guessed_format()?.into_decoder()?;
        let orientation = decoder.orientation()?;
        let mut image = DynamicImage::from_decoder(decoder)?;
        image.apply_orientation(orientation);
        Ok(image)
    }
}
