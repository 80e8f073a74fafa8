use std::sync::LazyLock;

use log::warn;
use prometheus::*;

static METRIC_HASH_IMAGE_COUNT: LazyLock<Option<IntCounterVec>> = LazyLock::new(|| {
    register_int_counter_vec!("im_hash_image_count", "count of the hashed images", &["result"])
        .inspect_err(|e| warn!("注册指标失败: {e}"))
        .ok()
});

static METRIC_HASH_DURATION: LazyLock<Option<Histogram>> = LazyLock::new(|| {
    register_histogram!(
        "im_hash_duration",
        "duration of the per-image load and signature in seconds",
        exponential_buckets(0.001, 2.0, 14).unwrap_or_default()
    )
    .inspect_err(|e| warn!("注册指标失败: {e}"))
    .ok()
});

static METRIC_REBUILD_DURATION: LazyLock<Option<HistogramVec>> = LazyLock::new(|| {
    register_histogram_vec!(
        "im_rebuild_duration",
        "duration of the similarity index rebuild in seconds",
        &["result"]
    )
    .inspect_err(|e| warn!("注册指标失败: {e}"))
    .ok()
});

/// 记录一张图片的哈希结果
pub fn inc_hash_count(ok: bool) {
    if let Some(m) = &*METRIC_HASH_IMAGE_COUNT {
        m.with_label_values(&[if ok { "ok" } else { "error" }]).inc();
    }
}

pub fn observe_hash_duration(duration: f32) {
    if let Some(m) = &*METRIC_HASH_DURATION {
        m.observe(duration as f64);
    }
}

pub fn observe_rebuild_duration(ok: bool, duration: f32) {
    if let Some(m) = &*METRIC_REBUILD_DURATION {
        m.with_label_values(&[if ok { "ok" } else { "error" }]).observe(duration as f64);
    }
}

/// 以文本格式导出当前进程的所有指标
pub fn gather_text() -> String {
    let families = prometheus::gather();
    TextEncoder::new().encode_to_string(&families).unwrap_or_default()
}
