//! 基于 Haar 小波的图片视觉签名
//!
//! 图片被缩放到固定的 [`IMAGE_SCALE`] x [`IMAGE_SCALE`]，转换到 YIQ 色彩空间后
//! 对每个通道做二维 Haar 变换。每个通道只保留绝对值最大的 [`TOP_COEFS`] 个系数
//! 参与比较，这里记录的是它们的阈值。

use std::f64::consts::SQRT_2;

use image::DynamicImage;
use image::imageops::FilterType;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::InvalidSignature;

/// 计算签名时图片缩放到的边长，必须是 2 的幂
pub const IMAGE_SCALE: u32 = 32;

/// 每个通道保留的系数数量
pub const TOP_COEFS: usize = 40;

/// 通道数量（Y、I、Q）
pub const CHANNELS: usize = 3;

/// 每个通道的系数数量
pub const COEF_COUNT: usize = (IMAGE_SCALE * IMAGE_SCALE) as usize;

/// 一个像素位置上三个通道的系数
pub type Coef = [f64; CHANNELS];

/// 图片签名，创建后不可修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// 小波系数，行优先，第 0 个为直流分量
    coefs: Vec<Coef>,
    /// 每个通道第 TOP_COEFS 大的系数绝对值
    thresholds: Coef,
    /// 原图宽高比
    ratio: f64,
}

impl Signature {
    /// 从已有的数据重建签名，用于调用方自行持久化签名的场景
    pub fn from_parts(
        coefs: Vec<Coef>,
        thresholds: Coef,
        ratio: f64,
    ) -> Result<Self, InvalidSignature> {
        if coefs.len() != COEF_COUNT {
            return Err(InvalidSignature { expected: COEF_COUNT, actual: coefs.len() });
        }
        Ok(Self { coefs, thresholds, ratio })
    }

    pub fn coefs(&self) -> &[Coef] {
        &self.coefs
    }

    pub fn thresholds(&self) -> Coef {
        self.thresholds
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// 直流分量，即图片各通道的平均值
    pub fn dc(&self) -> Coef {
        self.coefs[0]
    }

    /// 遍历所有通道中达到阈值的非零系数，返回 (通道, 系数下标, 是否为正)
    ///
    /// 顺序固定为先通道后下标，评分时依赖这个顺序保证浮点累加结果稳定
    pub fn top_coefs(&self) -> impl Iterator<Item = (usize, usize, bool)> + '_ {
        (0..CHANNELS).flat_map(move |ch| {
            let threshold = self.thresholds[ch];
            self.coefs.iter().enumerate().skip(1).filter_map(move |(i, coef)| {
                let v = coef[ch];
                (v != 0.0 && v.abs() >= threshold).then_some((ch, i, v > 0.0))
            })
        })
    }
}

/// 计算图片签名
pub fn compute_signature(image: &DynamicImage) -> Signature {
    let (width, height) = (image.width(), image.height());
    let ratio = aspect_ratio(width, height);

    let coefs = if width == 0 || height == 0 {
        vec![[0.0; CHANNELS]; COEF_COUNT]
    } else {
        let resized = image.resize_exact(IMAGE_SCALE, IMAGE_SCALE, FilterType::Triangle).to_rgb8();
        let mut planes = [vec![0.0; COEF_COUNT], vec![0.0; COEF_COUNT], vec![0.0; COEF_COUNT]];
        for (i, pixel) in resized.pixels().enumerate() {
            let yiq = rgb_to_yiq(pixel.0);
            for ch in 0..CHANNELS {
                planes[ch][i] = yiq[ch];
            }
        }
        for plane in &mut planes {
            haar_2d(plane, IMAGE_SCALE as usize);
        }
        (0..COEF_COUNT).map(|i| [planes[0][i], planes[1][i], planes[2][i]]).collect()
    };

    let mut thresholds = [0.0; CHANNELS];
    for (ch, threshold) in thresholds.iter_mut().enumerate() {
        // 直流分量代表平均颜色，单独比较，不参与阈值计算
        let values = coefs[1..].iter().map(|c| c[ch]).collect::<Vec<_>>();
        *threshold = select_threshold(&values, TOP_COEFS);
    }

    Signature { coefs, thresholds, ratio }
}

/// 宽高比，高度为 0 时返回 0
pub fn aspect_ratio(width: u32, height: u32) -> f64 {
    if height == 0 { 0.0 } else { width as f64 / height as f64 }
}

/// 返回 `values` 中第 `k` 大的绝对值，恰好有 `k` 个值的绝对值不小于它（并列时可能更多）
///
/// - 空列表返回 0
/// - `k == 0` 返回正无穷
/// - `k` 超过列表长度时按列表长度处理
pub fn select_threshold(values: &[f64], k: usize) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    if k == 0 {
        return f64::INFINITY;
    }
    let mut abs = values.iter().map(|v| v.abs()).collect::<Vec<_>>();
    let k = k.min(abs.len());
    kth_largest(&mut abs, k, &mut rand::rng())
}

/// 随机选取主元的快速选择，`k` 从 1 开始，要求 `1 <= k <= values.len()`
fn kth_largest<R: Rng + ?Sized>(values: &mut [f64], k: usize, rng: &mut R) -> f64 {
    let pivot = values[rng.random_range(0..values.len())];

    // 三路划分为 [大于 pivot | 等于 pivot | 小于 pivot]
    // 等于区间至少包含 pivot 本身，因此子问题一定严格变小
    let (mut gt, mut i, mut lt) = (0, 0, values.len());
    while i < lt {
        if values[i] > pivot {
            values.swap(gt, i);
            gt += 1;
            i += 1;
        } else if values[i] < pivot {
            lt -= 1;
            values.swap(i, lt);
        } else {
            i += 1;
        }
    }

    if k <= gt {
        kth_largest(&mut values[..gt], k, rng)
    } else if k <= lt {
        pivot
    } else {
        kth_largest(&mut values[lt..], k - lt, rng)
    }
}

fn rgb_to_yiq([r, g, b]: [u8; 3]) -> Coef {
    let (r, g, b) = (r as f64 / 255., g as f64 / 255., b as f64 / 255.);
    [
        0.299 * r + 0.587 * g + 0.114 * b,
        0.595716 * r - 0.274453 * g - 0.321263 * b,
        0.211456 * r - 0.522591 * g + 0.311135 * b,
    ]
}

/// 标准二维 Haar 分解：先对每一行完整变换，再对每一列完整变换
fn haar_2d(plane: &mut [f64], n: usize) {
    let mut tmp = vec![0.0; n];
    for row in plane.chunks_exact_mut(n) {
        haar_1d(row, &mut tmp);
    }
    let mut column = vec![0.0; n];
    for x in 0..n {
        for y in 0..n {
            column[y] = plane[y * n + x];
        }
        haar_1d(&mut column, &mut tmp);
        for y in 0..n {
            plane[y * n + x] = column[y];
        }
    }
}

fn haar_1d(data: &mut [f64], tmp: &mut [f64]) {
    let mut h = data.len();
    while h > 1 {
        h /= 2;
        for i in 0..h {
            let (a, b) = (data[2 * i], data[2 * i + 1]);
            tmp[i] = (a + b) / SQRT_2;
            tmp[h + i] = (a - b) / SQRT_2;
        }
        data[..2 * h].copy_from_slice(&tmp[..2 * h]);
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};
    use rand::prelude::*;

    use super::*;

    fn kth_by_sort(values: &[f64], k: usize) -> f64 {
        let mut abs = values.iter().map(|v| v.abs()).collect::<Vec<_>>();
        abs.sort_by(|a, b| b.total_cmp(a));
        abs[k - 1]
    }

    fn gradient(width: u32, height: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_select_threshold_empty() {
        assert_eq!(select_threshold(&[], 0), 0.0);
        assert_eq!(select_threshold(&[], 40), 0.0);
    }

    #[test]
    fn test_select_threshold_zero_k() {
        assert_eq!(select_threshold(&[1.0, -2.0], 0), f64::INFINITY);
    }

    #[test]
    fn test_select_threshold_single() {
        assert_eq!(select_threshold(&[-3.5], 1), 3.5);
        // k 超过长度时按长度处理
        assert_eq!(select_threshold(&[-3.5], 10), 3.5);
    }

    #[test]
    fn test_select_threshold_matches_sort() {
        let mut rng = StdRng::seed_from_u64(42);
        for len in [1, 10, 1000] {
            for _ in 0..20 {
                let values =
                    (0..len).map(|_| rng.random_range(-100.0..100.0)).collect::<Vec<f64>>();
                for k in [1, len / 2 + 1, len] {
                    assert_eq!(select_threshold(&values, k), kth_by_sort(&values, k), "len={len} k={k}");
                }
                let k = rng.random_range(1..=len);
                assert_eq!(select_threshold(&values, k), kth_by_sort(&values, k));
            }
        }
    }

    #[test]
    fn test_select_threshold_duplicates() {
        let values = [2.0, -2.0, 2.0, 1.0, -1.0, 0.0, 2.0, 5.0];
        for k in 1..=values.len() {
            assert_eq!(select_threshold(&values, k), kth_by_sort(&values, k));
        }
        assert_eq!(select_threshold(&[7.0; 100], 40), 7.0);
    }

    #[test]
    fn test_aspect_ratio() {
        assert_eq!(aspect_ratio(200, 100), 2.0);
        assert_eq!(aspect_ratio(100, 0), 0.0);
        assert_eq!(aspect_ratio(0, 0), 0.0);
    }

    #[test]
    fn test_signature_deterministic() {
        let img = gradient(120, 80);
        let a = compute_signature(&img);
        let b = compute_signature(&img);
        assert_eq!(a, b);
        assert_eq!(a.coefs().len(), COEF_COUNT);
        assert_eq!(a.ratio(), 1.5);
    }

    #[test]
    fn test_signature_top_coefs() {
        let sig = compute_signature(&gradient(64, 64));
        for ch in 0..CHANNELS {
            let values = sig.coefs()[1..].iter().map(|c| c[ch]).collect::<Vec<_>>();
            let count = values.iter().filter(|v| v.abs() >= sig.thresholds()[ch]).count();
            assert!(count >= TOP_COEFS.min(values.len()));
        }
        assert!(sig.top_coefs().count() > 0);
    }

    #[test]
    fn test_signature_solid_color() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 50, Rgb([255, 255, 255])));
        let sig = compute_signature(&img);
        // 纯色图片只有直流分量
        assert!(sig.dc()[0] > 0.0);
        assert_eq!(sig.top_coefs().count(), 0);
    }

    #[test]
    fn test_signature_empty_image() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(10, 0));
        let sig = compute_signature(&img);
        assert_eq!(sig.ratio(), 0.0);
        assert_eq!(sig.thresholds(), [0.0; CHANNELS]);
    }

    #[test]
    fn test_haar_1d_average() {
        let mut data = [1.0, 1.0, 1.0, 1.0];
        haar_1d(&mut data, &mut [0.0; 4]);
        assert!((data[0] - 2.0).abs() < 1e-12);
        assert!(data[1..].iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_from_parts_length() {
        assert!(Signature::from_parts(vec![[0.0; 3]; 3], [0.0; 3], 1.0).is_err());
        assert!(Signature::from_parts(vec![[0.0; 3]; COEF_COUNT], [0.0; 3], 1.0).is_ok());
    }
}
