use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Parser, ValueEnum};

use crate::catalog::Catalog;
use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::store::{LmdbSimilarityStore, SimilarityStore};

#[derive(Parser, Debug, Clone)]
pub struct SimilarCommand {
    /// 已经扫描过的图片路径
    pub image: PathBuf,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SimilarCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let catalog = Catalog::open(opts.conf_dir.catalog())?;
        let path = self.image.canonicalize()?;
        let id = catalog
            .find(&path)?
            .ok_or_else(|| anyhow!("图片尚未扫描: {}", path.display()))?;

        let store = LmdbSimilarityStore::open(opts.conf_dir.similarity())?;
        let mut result = vec![];
        for record in store.get_neighbors(id)? {
            // 已从图库移除的图片不显示
            if let Some(path) = catalog.path(record.target)? {
                result.push((record.score, path.to_string_lossy().into_owned()));
            }
        }
        print_result(&result, self.output_format)
    }
}

fn print_result(result: &[(f64, String)], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for (k, v) in result {
                println!("{:.2}\t{}", k, v);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}
