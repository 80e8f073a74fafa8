#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use image::{DynamicImage, Rgb, RgbImage};
use imsimilar::{DecodeError, ImageId, ImageLoader};

/// 根据 id 生成图片的加载器，`fail` 中的图片解码失败
#[derive(Default)]
pub struct SyntheticLoader {
    pub fail: Vec<ImageId>,
    /// 解码这些图片时 panic，模拟解码器内部的错误
    pub panic_on: Vec<ImageId>,
    pub delay: Duration,
    pub loads: AtomicUsize,
    /// 设置后每次加载都等待，直到发送端被 drop
    pub gate: Option<Receiver<()>>,
}

impl SyntheticLoader {
    pub fn failing(fail: &[u64]) -> Self {
        Self { fail: fail.iter().copied().map(ImageId).collect(), ..Default::default() }
    }

    pub fn panicking(panic_on: &[u64]) -> Self {
        Self { panic_on: panic_on.iter().copied().map(ImageId).collect(), ..Default::default() }
    }

    pub fn slow(delay: Duration) -> Self {
        Self { delay, ..Default::default() }
    }

    pub fn gated(gate: Receiver<()>) -> Self {
        Self { gate: Some(gate), ..Default::default() }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ImageLoader for SyntheticLoader {
    fn load(&self, id: ImageId) -> Result<DynamicImage, DecodeError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.fail.contains(&id) {
            return Err(DecodeError::UnknownImage(id));
        }
        if self.panic_on.contains(&id) {
            panic!("无法解码图片 {}", id);
        }
        Ok(synthetic_image(id.0 as u32))
    }
}

pub fn synthetic_image(seed: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(64, 48, |x, y| {
        Rgb([
            (x * 4 + seed * 17) as u8,
            (y * 5 + seed * 31) as u8,
            ((x ^ y) * seed % 256) as u8,
        ])
    }))
}

pub fn ids(range: std::ops::RangeInclusive<u64>) -> Vec<ImageId> {
    range.map(ImageId).collect()
}
