use indicatif::{ProgressBar, ProgressStyle};

/// 进度显示，只负责展示，调用方不关心结果
pub trait ProgressReporter: Send + Sync {
    fn update(&self, label: &str, current: usize, total: usize, cancellable: bool, modal: bool);
}

/// 不显示任何进度
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn update(&self, _: &str, _: usize, _: usize, _: bool, _: bool) {}
}

/// 在终端中显示进度条
#[derive(Debug, Clone)]
pub struct BarReporter {
    pb: ProgressBar,
}

impl BarReporter {
    pub fn new() -> Self {
        Self { pb: ProgressBar::no_length().with_style(pb_style()) }
    }

    pub fn progress_bar(&self) -> &ProgressBar {
        &self.pb
    }
}

impl Default for BarReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for BarReporter {
    fn update(&self, label: &str, current: usize, total: usize, _: bool, _: bool) {
        self.pb.set_length(total as u64);
        self.pb.set_position(current as u64);
        self.pb.set_message(label.to_owned());
        if current >= total {
            self.pb.finish();
        }
    }
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {per_sec} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}
