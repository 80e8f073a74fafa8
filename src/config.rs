use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;

/// 每张图片保存的相似图片数量上限
pub const MAX_NEIGHBORS: usize = 20;

static CONF_DIR: LazyLock<String> = LazyLock::new(|| {
    ProjectDirs::from("", "imsimilar", "imsimilar")
        .map(|dirs| dirs.config_dir().to_string_lossy().into_owned())
        .unwrap_or_else(|| ".imsimilar".to_string())
});

fn default_config_dir() -> &'static str {
    CONF_DIR.as_str()
}

/// 相似度引擎配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// 计算签名的工作线程数量
    pub workers: usize,
    /// 每张图片保存的相似图片数量上限
    pub max_neighbors: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { workers: num_cpus::get(), max_neighbors: MAX_NEIGHBORS }
    }
}

/// 图片缓存配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// 缩略图最长边
    pub thumbnail_size: u32,
    /// 显示用缩放图的最长边
    pub scaled_size: u32,
    /// 原图和缩放图占用的内存超过该值时自动清理，缩略图不计入限制
    pub max_bytes: usize,
    /// 预生成缩略图的线程数量
    pub workers: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            thumbnail_size: 256,
            scaled_size: 1920,
            max_bytes: 1 << 30,
            workers: num_cpus::get(),
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct EngineOptions {
    /// 计算签名的线程数量，默认为 CPU 核心数
    #[arg(short = 'j', long, value_name = "N")]
    pub workers: Option<usize>,
    /// 每张图片保存的相似图片数量
    #[arg(long, value_name = "N", default_value_t = MAX_NEIGHBORS)]
    pub max_neighbors: usize,
}

impl From<&EngineOptions> for EngineConfig {
    fn from(opts: &EngineOptions) -> Self {
        Self {
            workers: opts.workers.unwrap_or_else(num_cpus::get),
            max_neighbors: opts.max_neighbors,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct CacheOptions {
    /// 缩略图最长边
    #[arg(long, value_name = "SIZE", default_value_t = 256)]
    pub thumbnail_size: u32,
    /// 计算签名前先预生成缩略图
    #[arg(long)]
    pub warm_thumbnails: bool,
}

impl From<&CacheOptions> for CacheConfig {
    fn from(opts: &CacheOptions) -> Self {
        Self { thumbnail_size: opts.thumbnail_size, ..Default::default() }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imsimilar", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// imsimilar 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描目录，计算签名并重建相似度索引
    Scan(ScanCommand),
    /// 查询与指定图片相似的图片
    Similar(SimilarCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回图库数据库的路径
    pub fn catalog(&self) -> PathBuf {
        self.path.join("catalog")
    }

    /// 返回相似度存储的路径
    pub fn similarity(&self) -> PathBuf {
        self.path.join("similarity")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conf_dir() {
        let conf = ConfDir::from_str("/tmp/imsimilar").unwrap();
        assert_eq!(conf.catalog(), PathBuf::from("/tmp/imsimilar/catalog"));
        assert_eq!(conf.similarity(), PathBuf::from("/tmp/imsimilar/similarity"));
    }

    #[test]
    fn test_engine_options() {
        let opts = EngineOptions { workers: Some(3), max_neighbors: 5 };
        assert_eq!(EngineConfig::from(&opts), EngineConfig { workers: 3, max_neighbors: 5 });
        let opts = EngineOptions { workers: None, max_neighbors: MAX_NEIGHBORS };
        assert_eq!(EngineConfig::from(&opts), EngineConfig::default());
    }

    #[test]
    fn test_parse_opts() {
        let opts = Opts::try_parse_from(["imsimilar", "-c", "/tmp/x", "similar", "a.jpg"]).unwrap();
        assert_eq!(opts.conf_dir.path(), Path::new("/tmp/x"));
        assert!(matches!(opts.subcmd, SubCommand::Similar(_)));
    }
}
